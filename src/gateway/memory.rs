//! In-process loopback gateway.
//!
//! Applies the hosted service's matchmaking rules against local state so
//! sessions can be exercised without a network: codes expire after the
//! configured TTL, the issuer may park on its own code, another participant
//! holding the bound role is refused, and a complementary redemption pairs
//! and retires the code. Leaderboard updates and coach requests are recorded
//! for inspection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use super::{
    CoachRequest, CreateSessionRequest, Gateway, LeaderboardQuery, LeaderboardRow,
    LeaderboardUpdate, Pairing, PairingStatus, RedeemRequest, rank,
};
use crate::clock::Clock;
use crate::error::{GatewayError, MatchError};
use crate::session::state::{Outcome, Role, SessionId};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug)]
struct CodeRecord {
    issuer: String,
    bound_role: Role,
    issued_at: DateTime<Utc>,
    session_id: SessionId,
    parked: Option<(String, Role)>,
    retired: bool,
}

#[derive(Debug, Default)]
struct State {
    codes: HashMap<String, CodeRecord>,
    sessions_created: u64,
    leaderboard_updates: Vec<(DateTime<Utc>, LeaderboardUpdate)>,
    coach_requests: Vec<CoachRequest>,
    coach_reply: Option<String>,
    fail_leaderboard: bool,
    fail_coach: bool,
}

/// [`Gateway`] that keeps all collaborator state in memory.
#[derive(Debug)]
pub struct InMemoryGateway {
    clock: Arc<dyn Clock>,
    code_ttl: Duration,
    state: Mutex<State>,
}

impl InMemoryGateway {
    /// Creates a gateway judging code expiry against `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, code_ttl: std::time::Duration) -> Self {
        Self {
            clock,
            code_ttl: Duration::from_std(code_ttl).unwrap_or(Duration::MAX),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a code with a chosen value, as if `issuer` had requested it.
    pub fn preset_code(&self, code: &str, issuer: &str, bound_role: Role) {
        let issued_at = self.clock.now();
        self.state().codes.insert(
            code.to_owned(),
            CodeRecord {
                issuer: issuer.to_owned(),
                bound_role,
                issued_at,
                session_id: SessionId::new(format!("match-{}", uuid::Uuid::new_v4())),
                parked: None,
                retired: false,
            },
        );
    }

    /// Text returned by subsequent coach calls.
    pub fn set_coach_reply(&self, reply: Option<&str>) {
        self.state().coach_reply = reply.map(str::to_owned);
    }

    /// Makes subsequent leaderboard updates fail.
    pub fn fail_leaderboard(&self, fail: bool) {
        self.state().fail_leaderboard = fail;
    }

    /// Makes subsequent coach calls fail.
    pub fn fail_coach(&self, fail: bool) {
        self.state().fail_coach = fail;
    }

    /// Leaderboard updates received so far.
    #[must_use]
    pub fn leaderboard_updates(&self) -> Vec<LeaderboardUpdate> {
        self.state()
            .leaderboard_updates
            .iter()
            .map(|(_, u)| u.clone())
            .collect()
    }

    /// Coach requests received so far.
    #[must_use]
    pub fn coach_requests(&self) -> Vec<CoachRequest> {
        self.state().coach_requests.clone()
    }

    /// Number of single-player sessions created.
    #[must_use]
    pub fn sessions_created(&self) -> u64 {
        self.state().sessions_created
    }

    fn fresh_code(codes: &HashMap<String, CodeRecord>) -> String {
        let mut rng = rand::rng();
        loop {
            let code: String = (0..6)
                .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
                .collect();
            if !codes.contains_key(&code) {
                return code;
            }
        }
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn create_session(
        &self,
        _request: &CreateSessionRequest,
    ) -> Result<SessionId, GatewayError> {
        self.state().sessions_created += 1;
        Ok(SessionId::new(uuid::Uuid::new_v4().to_string()))
    }

    async fn issue_code(&self, participant_id: &str, role: Role) -> Result<String, GatewayError> {
        let code = Self::fresh_code(&self.state().codes);
        self.preset_code(&code, participant_id, role);
        Ok(code)
    }

    async fn redeem_code(&self, request: &RedeemRequest) -> Result<Pairing, MatchError> {
        let now = self.clock.now();
        let mut state = self.state();
        let invalid = || MatchError::InvalidOrExpired {
            code: request.code.clone(),
        };

        let record = state.codes.get_mut(&request.code).ok_or_else(invalid)?;
        if record.retired || now > record.issued_at + self.code_ttl {
            return Err(invalid());
        }
        if request.role == record.bound_role && request.participant_id != record.issuer {
            return Err(MatchError::RoleCollision { role: request.role });
        }

        match record.parked.clone() {
            None => {
                record.parked = Some((request.participant_id.clone(), request.role));
                Ok(Pairing {
                    session_id: record.session_id.clone(),
                    status: PairingStatus::Waiting,
                    peer_role: None,
                })
            }
            Some((participant, _)) if participant == request.participant_id => Ok(Pairing {
                session_id: record.session_id.clone(),
                status: PairingStatus::Waiting,
                peer_role: None,
            }),
            Some((_, parked_role)) if parked_role == request.role => {
                Err(MatchError::RoleCollision { role: request.role })
            }
            Some((_, parked_role)) => {
                record.retired = true;
                Ok(Pairing {
                    session_id: record.session_id.clone(),
                    status: PairingStatus::Matched,
                    peer_role: Some(parked_role),
                })
            }
        }
    }

    async fn update_leaderboard(&self, update: &LeaderboardUpdate) -> Result<(), GatewayError> {
        let now = self.clock.now();
        let mut state = self.state();
        if state.fail_leaderboard {
            return Err(GatewayError::HttpStatus(503));
        }
        state.leaderboard_updates.push((now, update.clone()));
        Ok(())
    }

    async fn coach(&self, request: &CoachRequest) -> Result<Option<String>, GatewayError> {
        let mut state = self.state();
        if state.fail_coach {
            return Err(GatewayError::Timeout);
        }
        state.coach_requests.push(request.clone());
        Ok(state.coach_reply.clone())
    }

    async fn leaderboard(
        &self,
        query: &LeaderboardQuery,
    ) -> Result<Vec<LeaderboardRow>, GatewayError> {
        let today = self.clock.now().date_naive();
        let state = self.state();
        let mut rows: HashMap<&str, LeaderboardRow> = HashMap::new();

        for (at, update) in &state.leaderboard_updates {
            if query.role.is_some_and(|r| r != update.role)
                || query.scenario.is_some_and(|s| s != update.scenario)
                || (query.daily && at.date_naive() != today)
            {
                continue;
            }
            let row = rows
                .entry(update.participant_id.as_str())
                .or_insert_with(|| LeaderboardRow {
                    user_id: update.participant_id.clone(),
                    name: None,
                    wins: 0,
                    losses: 0,
                    ts: 0,
                });
            match update.outcome {
                Outcome::Win => row.wins += 1,
                Outcome::Loss | Outcome::Timeout => row.losses += 1,
            }
            row.ts = row.ts.max(at.timestamp_millis());
        }

        let mut rows: Vec<_> = rows.into_values().collect();
        rank(&mut rows);
        rows.truncate(usize::try_from(query.limit).unwrap_or(usize::MAX));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::state::{Os, Scenario};

    fn gateway() -> (Arc<ManualClock>, InMemoryGateway) {
        let clock = Arc::new(ManualClock::default());
        let gateway = InMemoryGateway::new(clock.clone(), std::time::Duration::from_secs(300));
        (clock, gateway)
    }

    fn redeem(participant: &str, code: &str, role: Role) -> RedeemRequest {
        RedeemRequest {
            participant_id: participant.to_owned(),
            scenario: Scenario::Phishing,
            os: Os::Windows,
            code: code.to_owned(),
            role,
        }
    }

    #[tokio::test]
    async fn issued_code_has_expected_shape() {
        let (_, gw) = gateway();
        let code = gw.issue_code("host", Role::Attacker).await.unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[tokio::test]
    async fn issuer_parks_then_complement_matches() {
        let (_, gw) = gateway();
        gw.preset_code("ABCD12", "host", Role::Attacker);

        let parked = gw.redeem_code(&redeem("host", "ABCD12", Role::Attacker)).await.unwrap();
        assert_eq!(parked.status, PairingStatus::Waiting);

        let matched = gw.redeem_code(&redeem("guest", "ABCD12", Role::Victim)).await.unwrap();
        assert_eq!(matched.status, PairingStatus::Matched);
        assert_eq!(matched.peer_role, Some(Role::Attacker));
        assert_eq!(matched.session_id, parked.session_id);
    }

    #[tokio::test]
    async fn same_role_from_other_participant_is_refused() {
        let (_, gw) = gateway();
        gw.preset_code("ABCD12", "host", Role::Attacker);
        let err = gw
            .redeem_code(&redeem("guest", "ABCD12", Role::Attacker))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::RoleCollision { role: Role::Attacker }));
    }

    #[tokio::test]
    async fn retired_code_cannot_be_redeemed() {
        let (_, gw) = gateway();
        gw.preset_code("ABCD12", "host", Role::Attacker);
        gw.redeem_code(&redeem("host", "ABCD12", Role::Attacker)).await.unwrap();
        gw.redeem_code(&redeem("guest", "ABCD12", Role::Victim)).await.unwrap();

        let err = gw
            .redeem_code(&redeem("third", "ABCD12", Role::Victim))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidOrExpired { .. }));
    }

    #[tokio::test]
    async fn expiry_is_inclusive_of_ttl() {
        let (clock, gw) = gateway();
        gw.preset_code("ZZZZ99", "host", Role::Victim);

        clock.advance(Duration::seconds(300));
        assert!(gw.redeem_code(&redeem("host", "ZZZZ99", Role::Victim)).await.is_ok());

        clock.advance(Duration::seconds(1));
        let err = gw
            .redeem_code(&redeem("guest", "ZZZZ99", Role::Attacker))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidOrExpired { .. }));
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let (_, gw) = gateway();
        let err = gw
            .redeem_code(&redeem("guest", "NOPE00", Role::Victim))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::InvalidOrExpired { code } if code == "NOPE00"));
    }

    #[tokio::test]
    async fn leaderboard_aggregates_updates() {
        let (_, gw) = gateway();
        for (user, outcome) in [
            ("a", Outcome::Win),
            ("b", Outcome::Loss),
            ("a", Outcome::Win),
            ("b", Outcome::Win),
            ("c", Outcome::Timeout),
        ] {
            gw.update_leaderboard(&LeaderboardUpdate {
                participant_id: user.to_owned(),
                role: Role::Victim,
                scenario: Scenario::Phishing,
                outcome,
            })
            .await
            .unwrap();
        }

        let rows = gw.leaderboard(&LeaderboardQuery::default()).await.unwrap();
        let summary: Vec<_> = rows
            .iter()
            .map(|r| (r.user_id.as_str(), r.wins, r.losses))
            .collect();
        assert_eq!(summary, [("a", 2, 0), ("b", 1, 1), ("c", 0, 1)]);

        let attackers = gw
            .leaderboard(&LeaderboardQuery {
                role: Some(Role::Attacker),
                ..LeaderboardQuery::default()
            })
            .await
            .unwrap();
        assert!(attackers.is_empty());
    }

    #[tokio::test]
    async fn failing_leaderboard_reports_error() {
        let (_, gw) = gateway();
        gw.fail_leaderboard(true);
        let result = gw
            .update_leaderboard(&LeaderboardUpdate {
                participant_id: "a".to_owned(),
                role: Role::Victim,
                scenario: Scenario::Ransomware,
                outcome: Outcome::Loss,
            })
            .await;
        assert!(matches!(result, Err(GatewayError::HttpStatus(503))));
        assert!(gw.leaderboard_updates().is_empty());
    }
}
