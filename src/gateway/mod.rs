//! External Gateway Adapters.
//!
//! Thin request/response wrappers around the collaborators the session core
//! talks to: exercise-session creation, match-code issuance and redemption,
//! the leaderboard and the coach. [`HttpGateway`] speaks to the hosted
//! service; [`InMemoryGateway`] is a loopback that applies the same code
//! policy in-process.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpGateway;
pub use memory::InMemoryGateway;

use crate::error::{GatewayError, MatchError};
use crate::session::state::{Os, Outcome, Role, Scenario, SessionId};

// ============================================================================
// Requests and responses
// ============================================================================

/// Single-player exercise creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateSessionRequest {
    /// Participant identity.
    #[serde(rename = "user_id")]
    pub participant_id: String,
    /// Scenario.
    #[serde(rename = "scenario_id")]
    pub scenario: Scenario,
    /// Requested role.
    pub role: Role,
    /// Simulated OS.
    pub os: Os,
}

/// Match-code redemption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedeemRequest {
    /// Participant identity.
    #[serde(rename = "user_id")]
    pub participant_id: String,
    /// Scenario.
    #[serde(rename = "scenario_id")]
    pub scenario: Scenario,
    /// Simulated OS.
    pub os: Os,
    /// Normalized code.
    pub code: String,
    /// Requested role.
    pub role: Role,
}

/// Whether a redemption found a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    /// First to redeem; parked until a peer arrives.
    Waiting,
    /// A peer was already present.
    Matched,
}

/// Successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    /// Session id shared by both participants.
    pub session_id: SessionId,
    /// Pairing status.
    pub status: PairingStatus,
    /// Role the matchmaking side reports as already committed.
    pub peer_role: Option<Role>,
}

/// Terminal result report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardUpdate {
    /// Participant identity.
    #[serde(rename = "user_id")]
    pub participant_id: String,
    /// Role played.
    pub role: Role,
    /// Scenario.
    pub scenario: Scenario,
    /// Final outcome.
    #[serde(rename = "result")]
    pub outcome: Outcome,
}

/// Moment a coaching hint is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoachAction {
    /// The exercise was started.
    GameStart,
    /// The connection opened.
    Connected,
    /// The peer joined and the countdown started.
    MatchStart,
    /// The peer sent a message.
    OpponentMessage,
    /// This participant sent a message.
    SentMessage,
}

/// Coaching text request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoachRequest {
    /// Scenario.
    pub scenario: Scenario,
    /// Role of the participant being coached.
    pub role: Role,
    /// Moment in the exercise.
    pub action: CoachAction,
    /// Free-form context.
    pub payload: serde_json::Value,
}

/// Leaderboard filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardQuery {
    /// Restrict to one role.
    pub role: Option<Role>,
    /// Restrict to one scenario.
    pub scenario: Option<Scenario>,
    /// Only today's results.
    pub daily: bool,
    /// Maximum number of rows.
    pub limit: u32,
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        Self {
            role: None,
            scenario: None,
            daily: false,
            limit: 50,
        }
    }
}

/// One leaderboard line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// Participant identity.
    #[serde(rename = "userId", default)]
    pub user_id: String,
    /// Display name.
    #[serde(default, alias = "displayName")]
    pub name: Option<String>,
    /// Wins.
    #[serde(default)]
    pub wins: u32,
    /// Losses.
    #[serde(default)]
    pub losses: u32,
    /// Last update, epoch milliseconds.
    #[serde(default)]
    pub ts: i64,
}

impl LeaderboardRow {
    /// Name to display, falling back to the participant id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.user_id)
    }
}

/// Sorts rows by wins descending, losses ascending, most recent first.
pub fn rank(rows: &mut [LeaderboardRow]) {
    rows.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then(a.losses.cmp(&b.losses))
            .then(b.ts.cmp(&a.ts))
    });
}

// ============================================================================
// Gateway trait
// ============================================================================

/// Collaborators consumed by the session core.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Creates a single-player exercise session.
    async fn create_session(&self, request: &CreateSessionRequest)
    -> Result<SessionId, GatewayError>;

    /// Requests a fresh match code bound to `role`.
    async fn issue_code(&self, participant_id: &str, role: Role) -> Result<String, GatewayError>;

    /// Redeems a match code.
    ///
    /// Rejections are reported as distinct `MatchError` variants.
    async fn redeem_code(&self, request: &RedeemRequest) -> Result<Pairing, MatchError>;

    /// Reports a final outcome.
    async fn update_leaderboard(&self, update: &LeaderboardUpdate) -> Result<(), GatewayError>;

    /// Requests advisory coaching text.
    async fn coach(&self, request: &CoachRequest) -> Result<Option<String>, GatewayError>;

    /// Fetches leaderboard rows.
    async fn leaderboard(
        &self,
        query: &LeaderboardQuery,
    ) -> Result<Vec<LeaderboardRow>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: &str, wins: u32, losses: u32, ts: i64) -> LeaderboardRow {
        LeaderboardRow {
            user_id: user.to_owned(),
            name: None,
            wins,
            losses,
            ts,
        }
    }

    #[test]
    fn rank_orders_by_wins_losses_then_recency() {
        let mut rows = vec![
            row("a", 3, 2, 10),
            row("b", 5, 0, 1),
            row("c", 3, 1, 5),
            row("d", 3, 1, 9),
        ];
        rank(&mut rows);
        let order: Vec<_> = rows.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, ["b", "d", "c", "a"]);
    }

    #[test]
    fn leaderboard_row_accepts_display_name_and_missing_numbers() {
        let parsed: LeaderboardRow =
            serde_json::from_str(r#"{"userId":"guest-7","displayName":"Seven"}"#).unwrap();
        assert_eq!(parsed.display_name(), "Seven");
        assert_eq!(parsed.wins, 0);
        assert_eq!(parsed.losses, 0);

        let anonymous: LeaderboardRow = serde_json::from_str(r#"{"userId":"guest-8"}"#).unwrap();
        assert_eq!(anonymous.display_name(), "guest-8");
    }

    #[test]
    fn requests_use_service_field_names() {
        let request = RedeemRequest {
            participant_id: "guest-1".to_owned(),
            scenario: Scenario::NetworkInterception,
            os: Os::Linux,
            code: "ABCD12".to_owned(),
            role: Role::Victim,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["user_id"], "guest-1");
        assert_eq!(v["scenario_id"], "mitm");
        assert_eq!(v["os"], "linux");

        let update = LeaderboardUpdate {
            participant_id: "guest-1".to_owned(),
            role: Role::Victim,
            scenario: Scenario::Phishing,
            outcome: Outcome::Timeout,
        };
        let v = serde_json::to_value(&update).unwrap();
        assert_eq!(v["result"], "timeout");
    }
}
