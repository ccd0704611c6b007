//! HTTP gateway.
//!
//! Talks to the hosted exercise service with `reqwest`. Every call is bounded
//! by the configured request timeout and reads at most
//! [`MAX_RESPONSE_SIZE`] bytes of body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, redirect};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    CoachRequest, CreateSessionRequest, Gateway, LeaderboardQuery, LeaderboardRow,
    LeaderboardUpdate, Pairing, PairingStatus, RedeemRequest,
};
use crate::error::{GatewayError, MatchError};
use crate::session::state::{Role, SessionId};

/// Maximum accepted response body (1 MB).
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct CreatedSession {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct IssuedCode {
    code: String,
}

#[derive(Debug, Deserialize)]
struct JoinResponse {
    status: PairingStatus,
    #[serde(default)]
    session: Option<JoinedSession>,
}

#[derive(Debug, Deserialize)]
struct JoinedSession {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Debug, Deserialize)]
struct CoachReply {
    #[serde(default)]
    text: Option<String>,
}

/// [`Gateway`] backed by the hosted exercise service.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpGateway {
    /// Creates a gateway rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` if the HTTP client cannot be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base,
            timeout,
        })
    }

    fn url(&self, path: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::InvalidResponse(format!("bad route {path}: {e}")))
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, Vec<u8>), GatewayError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();

        let bytes = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if bytes.len() > MAX_RESPONSE_SIZE {
            return Err(GatewayError::InvalidResponse(format!(
                "response body exceeds {MAX_RESPONSE_SIZE} byte limit"
            )));
        }
        Ok((status, bytes.to_vec()))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(GatewayError::HttpStatus(status.as_u16()));
        }
        decode(&body)
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

/// Maps a join response onto a pairing.
///
/// The session id falls back to the code when the service omits it.
fn pairing_from(response: JoinResponse, code: &str) -> Pairing {
    let (id, peer_role) = response
        .session
        .map_or((None, None), |s| (s.id, s.role));
    Pairing {
        session_id: SessionId::new(id.unwrap_or_else(|| code.to_owned())),
        status: response.status,
        peer_role,
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<SessionId, GatewayError> {
        debug!(scenario = %request.scenario, role = %request.role, "creating session");
        let created: CreatedSession = self
            .call(self.client.post(self.url("/api/sessions")?).json(request))
            .await?;
        Ok(SessionId::new(created.id))
    }

    async fn issue_code(&self, _participant_id: &str, role: Role) -> Result<String, GatewayError> {
        let mut url = self.url("/api/match/code")?;
        url.query_pairs_mut().append_pair("role", role.as_str());
        let issued: IssuedCode = self.call(self.client.post(url)).await?;
        Ok(issued.code)
    }

    async fn redeem_code(&self, request: &RedeemRequest) -> Result<Pairing, MatchError> {
        let (status, body) = self
            .execute(self.client.post(self.url("/api/match/join")?).json(request))
            .await?;
        match status {
            StatusCode::BAD_REQUEST => Err(MatchError::RoleCollision { role: request.role }),
            StatusCode::NOT_FOUND => Err(MatchError::InvalidOrExpired {
                code: request.code.clone(),
            }),
            s if s.is_success() => Ok(pairing_from(decode(&body)?, &request.code)),
            s => Err(MatchError::Rejected(s.as_u16())),
        }
    }

    async fn update_leaderboard(&self, update: &LeaderboardUpdate) -> Result<(), GatewayError> {
        let (status, _) = self
            .execute(
                self.client
                    .post(self.url("/api/leaderboard/update")?)
                    .json(update),
            )
            .await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(GatewayError::HttpStatus(status.as_u16()))
        }
    }

    async fn coach(&self, request: &CoachRequest) -> Result<Option<String>, GatewayError> {
        let reply: CoachReply = self
            .call(self.client.post(self.url("/api/ai/coach")?).json(request))
            .await?;
        Ok(reply.text.filter(|t| !t.trim().is_empty()))
    }

    async fn leaderboard(
        &self,
        query: &LeaderboardQuery,
    ) -> Result<Vec<LeaderboardRow>, GatewayError> {
        let mut url = self.url("/api/leaderboard")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(role) = query.role {
                pairs.append_pair("role", role.as_str());
            }
            if let Some(scenario) = query.scenario {
                pairs.append_pair("scenario", scenario.as_str());
            }
            if query.daily {
                pairs.append_pair("daily", "true");
            }
            pairs.append_pair("limit", &query.limit.to_string());
        }
        self.call(self.client.get(url)).await
    }
}
