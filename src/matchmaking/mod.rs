//! Matchmaking Client.
//!
//! Issues and redeems the short-lived codes that pair two participants.
//! Codes this client issued are kept in a local ledger so an expired or
//! already-paired code is refused without a round trip; everything else is
//! decided by the matchmaking collaborator.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::error::MatchError;
use crate::gateway::{Gateway, PairingStatus, RedeemRequest};
use crate::session::state::{Os, Role, Scenario, SessionId};

/// Length of a match code.
pub const CODE_LEN: usize = 6;

/// Default validity window of an issued code.
pub const DEFAULT_CODE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

/// Trims and uppercases user input and checks the code shape.
///
/// # Errors
///
/// Returns `MatchError::MalformedCode` unless the result is exactly
/// [`CODE_LEN`] characters of `A-Z` or `0-9`.
pub fn normalize_code(input: &str) -> Result<String, MatchError> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        Ok(code)
    } else {
        Err(MatchError::MalformedCode(input.trim().to_owned()))
    }
}

/// A code issued to this participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCode {
    /// The code.
    pub code: String,
    /// Issuance instant.
    pub issued_at: DateTime<Utc>,
    /// Last instant the code may be redeemed.
    pub expires_at: DateTime<Utc>,
    /// Role the issuer committed to.
    pub bound_role: Role,
}

impl MatchCode {
    /// Whether the code can no longer be redeemed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left for display, never negative.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// A successful redemption, with the role resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    /// Normalized code.
    pub code: String,
    /// Session id to connect with.
    pub session_id: SessionId,
    /// Waiting or matched.
    pub status: PairingStatus,
    /// Role the caller asked for.
    pub requested_role: Role,
    /// Role the caller must use on the connection.
    pub effective_role: Role,
}

impl Redemption {
    /// Whether the role had to be flipped to complement the peer.
    #[must_use]
    pub fn role_swapped(&self) -> bool {
        self.requested_role != self.effective_role
    }
}

/// Identity carried in redemption requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Participant identity.
    pub id: String,
    /// Scenario.
    pub scenario: Scenario,
    /// Simulated OS.
    pub os: Os,
}

#[derive(Debug, Default)]
struct Ledger {
    issued: HashMap<String, MatchCode>,
    retired: HashSet<String>,
}

/// Issues and redeems match codes through a [`Gateway`].
pub struct MatchmakingClient {
    gateway: Arc<dyn Gateway>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    ledger: Mutex<Ledger>,
}

impl std::fmt::Debug for MatchmakingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakingClient")
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl MatchmakingClient {
    /// Creates a client whose codes stay valid for `ttl`.
    #[must_use]
    pub fn new(gateway: Arc<dyn Gateway>, clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        Self {
            gateway,
            clock,
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests a fresh code bound to `role`.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::Gateway` if the collaborator call fails, or
    /// `MatchError::MalformedCode` if it returns something that is not a code.
    pub async fn issue_code(&self, participant_id: &str, role: Role) -> Result<MatchCode, MatchError> {
        let raw = self.gateway.issue_code(participant_id, role).await?;
        let code = normalize_code(&raw)?;
        let issued_at = self.clock.now();
        let issued = MatchCode {
            code: code.clone(),
            issued_at,
            expires_at: issued_at + self.ttl,
            bound_role: role,
        };
        tracing::info!(%code, %role, expires_at = %issued.expires_at, "match code issued");
        self.ledger().issued.insert(code, issued.clone());
        Ok(issued)
    }

    /// A code this client issued, if still known.
    #[must_use]
    pub fn issued(&self, code: &str) -> Option<MatchCode> {
        self.ledger().issued.get(code).cloned()
    }

    /// Attempts to pair on `code` as `role`.
    ///
    /// When the pairing is `matched` and the peer reports the caller's own
    /// role, the effective role is flipped to its complement.
    ///
    /// # Errors
    ///
    /// Returns a `MatchError` for malformed, expired, retired or unknown
    /// codes, for role collisions, and for collaborator failures. None of
    /// these are retried.
    pub async fn redeem_code(
        &self,
        code: &str,
        role: Role,
        participant: &Participant,
    ) -> Result<Redemption, MatchError> {
        let code = normalize_code(code)?;
        let now = self.clock.now();

        {
            let ledger = self.ledger();
            if ledger.retired.contains(&code) {
                return Err(MatchError::InvalidOrExpired { code });
            }
            if let Some(issued) = ledger.issued.get(&code) {
                if issued.is_expired_at(now) {
                    return Err(MatchError::Expired {
                        code,
                        expired_at: issued.expires_at,
                    });
                }
            }
        }

        let request = RedeemRequest {
            participant_id: participant.id.clone(),
            scenario: participant.scenario,
            os: participant.os,
            code: code.clone(),
            role,
        };
        let pairing = self.gateway.redeem_code(&request).await?;

        let effective_role =
            if pairing.status == PairingStatus::Matched && pairing.peer_role == Some(role) {
                role.complement()
            } else {
                role
            };

        if pairing.status == PairingStatus::Matched {
            let mut ledger = self.ledger();
            ledger.issued.remove(&code);
            ledger.retired.insert(code.clone());
        }

        Ok(Redemption {
            code,
            session_id: pairing.session_id,
            status: pairing.status,
            requested_role: role,
            effective_role,
        })
    }
}
