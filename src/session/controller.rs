//! Session Controller
//!
//! The single writer of a [`Session`]. Every source of change (user
//! commands, collaborator replies, connection events, timer expiries) is
//! delivered as an [`Input`]; [`SessionController::handle`] applies it and
//! returns the [`Effect`]s the runtime must carry out. The controller itself
//! never performs I/O, which keeps every interleaving reproducible in a plain
//! unit test.
//!
//! Observers subscribe to a broadcast of [`SessionUpdate`]s or watch the
//! latest [`SessionSnapshot`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::log::{ActivityLog, LogCategory, LogEntry};
use super::state::{
    ConclusionTrigger, LifecycleState, Mode, Outcome, Role, Session, SessionId, SessionParams,
    Verdict,
};
use crate::clock::Clock;
use crate::config::DrillConfig;
use crate::connection::{
    ConnectionEvent, ConnectionEventKind, InboundMessage, OutboundMessage, PeerAction,
};
use crate::error::{DrillError, GatewayError, MatchError, SessionError};
use crate::gateway::{
    CoachAction, CoachRequest, CreateSessionRequest, LeaderboardUpdate, PairingStatus,
};
use crate::matchmaking::{MatchCode, Redemption};
use crate::observability::events::{Event, EventEmitter, RunSummary};
use crate::observability::metrics;

/// Capacity of the update broadcast; slow observers skip ahead.
const UPDATE_CAPACITY: usize = 256;

// ============================================================================
// Policy
// ============================================================================

/// Timing and feature policy applied by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Countdown budget when the peer does not supply one.
    pub exercise_duration_secs: u32,
    /// Time the result stays on display before `ended`.
    pub display_delay: Duration,
    /// Delay before re-opening a lost connection.
    pub reconnect_backoff: Duration,
    /// Ransomware lock-out before a link click is relayed.
    pub ransomware_lockout: Duration,
    /// Whether coaching requests are issued.
    pub coach_enabled: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            exercise_duration_secs: 1530,
            display_delay: Duration::from_secs(3),
            reconnect_backoff: Duration::from_secs(3),
            ransomware_lockout: Duration::from_secs(5),
            coach_enabled: true,
        }
    }
}

impl From<&DrillConfig> for SessionPolicy {
    fn from(config: &DrillConfig) -> Self {
        Self {
            exercise_duration_secs: u32::try_from(config.timing.exercise_duration.as_secs())
                .unwrap_or(u32::MAX),
            display_delay: config.timing.display_delay,
            reconnect_backoff: config.timing.reconnect_backoff,
            ransomware_lockout: config.timing.ransomware_lockout,
            coach_enabled: config.coach.enabled,
        }
    }
}

// ============================================================================
// Inputs and effects
// ============================================================================

/// Everything that can change a session.
#[derive(Debug)]
pub enum Input {
    /// Start a single-player exercise.
    Start,
    /// Issue a code and wait on it.
    Host,
    /// Redeem a code shared by another participant.
    Join {
        /// Code as entered.
        code: String,
    },
    /// Send free text to the peer.
    Say {
        /// The text.
        text: String,
    },
    /// Activate a link offered by the peer (the most recent one if `None`).
    ClickLink {
        /// Link to activate.
        url: Option<String>,
    },
    /// Concede the exercise.
    Surrender,

    /// Exercise-session creation finished.
    SessionCreated(Result<SessionId, GatewayError>),
    /// Code issuance finished.
    CodeIssued(Result<MatchCode, MatchError>),
    /// Code redemption finished.
    Redeemed(Result<Redemption, MatchError>),
    /// Coaching text arrived.
    CoachReplied(String),
    /// Leaderboard update finished.
    LeaderboardReported(Result<(), GatewayError>),
    /// An outbound frame could not be queued.
    SendFailed {
        /// Cause.
        reason: String,
    },

    /// Event reported by a connection task. The runtime drops events from
    /// superseded connections before they reach the controller.
    Connection(ConnectionEvent),

    /// One second elapsed on the countdown.
    Tick,
    /// The result display delay elapsed.
    DisplayElapsed,
    /// The ransomware lock-out elapsed.
    LockoutElapsed {
        /// Link whose activation was held back.
        url: String,
    },
}

impl From<ConnectionEvent> for Input {
    fn from(event: ConnectionEvent) -> Self {
        Self::Connection(event)
    }
}

/// Work the runtime performs on the controller's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Call exercise-session creation.
    CreateSession(CreateSessionRequest),
    /// Request a match code.
    IssueCode {
        /// Participant identity.
        participant_id: String,
        /// Role to bind.
        role: Role,
    },
    /// Redeem a match code.
    RedeemCode {
        /// Code as entered.
        code: String,
        /// Requested role.
        role: Role,
    },
    /// Open the session connection.
    Open {
        /// Session to connect to.
        session_id: SessionId,
        /// Role to connect as.
        role: Role,
    },
    /// Re-open the connection after a delay.
    Reconnect {
        /// Backoff.
        after: Duration,
    },
    /// Close the connection.
    Close,
    /// Send a protocol message.
    Send {
        /// Message.
        message: OutboundMessage,
        /// Sender role.
        role: Role,
    },
    /// Start the countdown.
    StartCountdown,
    /// Stop the countdown.
    StopCountdown,
    /// Deliver [`Input::DisplayElapsed`] after a delay.
    ScheduleDisplayEnd {
        /// Delay.
        after: Duration,
    },
    /// Deliver [`Input::LockoutElapsed`] after a delay.
    ScheduleLockout {
        /// Held-back link.
        url: String,
        /// Delay.
        after: Duration,
    },
    /// Request coaching text.
    Coach(CoachRequest),
    /// Report the final outcome.
    UpdateLeaderboard(LeaderboardUpdate),
}

// ============================================================================
// Observer types
// ============================================================================

/// Why the last matchmaking attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionKind {
    /// Both participants asked for the same role.
    RoleCollision,
    /// Unknown, retired or expired code.
    InvalidOrExpired,
    /// The code did not have the expected shape.
    MalformedCode,
    /// The matchmaking collaborator failed or answered unexpectedly.
    Unavailable,
}

impl From<&MatchError> for RejectionKind {
    fn from(err: &MatchError) -> Self {
        match err {
            MatchError::RoleCollision { .. } => Self::RoleCollision,
            MatchError::InvalidOrExpired { .. } | MatchError::Expired { .. } => {
                Self::InvalidOrExpired
            }
            MatchError::MalformedCode(_) => Self::MalformedCode,
            MatchError::Rejected(_) | MatchError::Gateway(_) => Self::Unavailable,
        }
    }
}

/// Why a session never got going.
#[derive(Debug, Clone)]
pub enum StartFailure {
    /// Code issuance or redemption was refused.
    Matchmaking(MatchError),
    /// The exercise session could not be created.
    SessionCreation(GatewayError),
}

impl From<StartFailure> for DrillError {
    fn from(failure: StartFailure) -> Self {
        match failure {
            StartFailure::Matchmaking(err) => Self::Match(err),
            StartFailure::SessionCreation(err) => Self::Gateway(err),
        }
    }
}

/// One lifecycle edge as it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Previous state.
    pub from: LifecycleState,
    /// New state.
    pub to: LifecycleState,
    /// When the edge was taken.
    pub at: DateTime<Utc>,
}

/// Incremental change notifications.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A log entry was appended.
    Log(LogEntry),
    /// The lifecycle moved.
    Lifecycle {
        /// Previous state.
        from: LifecycleState,
        /// New state.
        to: LifecycleState,
    },
    /// The countdown moved.
    Tick {
        /// Seconds left.
        remaining: u32,
    },
    /// The verdict was fixed.
    Concluded(Verdict),
    /// A match code was issued.
    CodeIssued(MatchCode),
    /// The opening attempt failed; nothing further will happen on its own.
    Aborted(StartFailure),
    /// The ransomware lock-out started or ended.
    Lockout {
        /// Whether the screen is locked.
        active: bool,
    },
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session id, once assigned.
    pub session_id: Option<SessionId>,
    /// Mode.
    pub mode: Mode,
    /// Effective role.
    pub role: Role,
    /// Lifecycle state.
    pub lifecycle: LifecycleState,
    /// Seconds left.
    pub remaining_seconds: u32,
    /// Verdict, once concluded.
    pub verdict: Option<Verdict>,
    /// Whether the connection is open.
    pub connected: bool,
    /// Code issued by this participant, if any.
    pub issued_code: Option<MatchCode>,
    /// Last matchmaking rejection.
    pub rejection: Option<RejectionKind>,
    /// Whether the ransomware lock-out is showing.
    pub locked_out: bool,
    /// Number of log entries.
    pub log_len: usize,
}

/// Everything a finished session leaves behind.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session id, if one was assigned.
    pub session_id: Option<SessionId>,
    /// Final lifecycle state.
    pub lifecycle: LifecycleState,
    /// Verdict, if the session concluded.
    pub verdict: Option<Verdict>,
    /// Edges taken, in order.
    pub transitions: Vec<Transition>,
    /// The complete Activity Log.
    pub log: Vec<LogEntry>,
    /// Run counters.
    pub summary: RunSummary,
    /// Set when the opening attempt failed.
    pub failure: Option<StartFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    CreatingSession,
    IssuingCode,
    Redeeming,
}

// ============================================================================
// Controller
// ============================================================================

/// Single-writer state machine for one session.
#[derive(Debug)]
pub struct SessionController {
    session: Session,
    log: ActivityLog,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
    events: Arc<EventEmitter>,
    updates: broadcast::Sender<SessionUpdate>,
    snapshot: watch::Sender<SessionSnapshot>,
    transitions: Vec<Transition>,
    summary: RunSummary,
    pending: Pending,
    connected: bool,
    locked_out: bool,
    issued_code: Option<MatchCode>,
    rejection: Option<RejectionKind>,
    failure: Option<StartFailure>,
}

impl SessionController {
    /// Creates a controller for a new idle session.
    #[must_use]
    pub fn new(
        params: SessionParams,
        policy: SessionPolicy,
        clock: Arc<dyn Clock>,
        events: Arc<EventEmitter>,
    ) -> Self {
        let session = Session::new(params);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        let (snapshot, _) = watch::channel(SessionSnapshot {
            session_id: None,
            mode: session.mode(),
            role: session.role(),
            lifecycle: session.lifecycle(),
            remaining_seconds: 0,
            verdict: None,
            connected: false,
            issued_code: None,
            rejection: None,
            locked_out: false,
            log_len: 0,
        });
        Self {
            session,
            log: ActivityLog::new(),
            policy,
            clock,
            events,
            updates,
            snapshot,
            transitions: Vec::new(),
            summary: RunSummary::default(),
            pending: Pending::None,
            connected: false,
            locked_out: false,
            issued_code: None,
            rejection: None,
            failure: None,
        }
    }

    /// The session record.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// The Activity Log.
    #[must_use]
    pub const fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// Edges taken so far.
    #[must_use]
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Run counters.
    #[must_use]
    pub const fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Policy in force.
    #[must_use]
    pub const fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Subscribes to incremental updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Sender side of the update broadcast, for handing out more receivers.
    #[must_use]
    pub fn update_sender(&self) -> broadcast::Sender<SessionUpdate> {
        self.updates.clone()
    }

    /// Watches the latest snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Builds the report of the session as it stands.
    #[must_use]
    pub fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.session.session_id().cloned(),
            lifecycle: self.session.lifecycle(),
            verdict: self.session.verdict().cloned(),
            transitions: self.transitions.clone(),
            log: self.log.entries().to_vec(),
            summary: self.summary.clone(),
            failure: self.failure.clone(),
        }
    }

    /// Records an early teardown. No-op once `ended`.
    pub fn abandon(&mut self) {
        if self.session.lifecycle() == LifecycleState::Ended {
            return;
        }
        info!(state = %self.session.lifecycle(), "session disposed");
        self.connected = false;
        self.append(LogCategory::LocalInfo, "Session disposed");
        self.events.emit(Event::SessionEnded {
            timestamp: self.clock.now(),
            outcome: self.session.outcome(),
            summary: self.summary.clone(),
        });
        self.events.flush();
        self.publish();
    }

    /// Applies an input, turning a refused command into a `local-error` entry.
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match self.apply(input) {
            Ok(effects) => effects,
            Err(err) => {
                debug!(error = %err, "command refused");
                self.append(LogCategory::LocalError, err.to_string());
                Vec::new()
            }
        }
    }

    /// Applies an input.
    ///
    /// # Errors
    ///
    /// Returns a `SessionError` when a user command does not apply to the
    /// session's mode or lifecycle state. Non-command inputs never fail.
    pub fn apply(&mut self, input: Input) -> Result<Vec<Effect>, SessionError> {
        if self.session.lifecycle() == LifecycleState::Ended {
            return Ok(self.apply_after_end(input));
        }

        let effects = match input {
            Input::Start => self.start()?,
            Input::Host => self.host()?,
            Input::Join { code } => self.join(code)?,
            Input::Say { text } => self.say(&text)?,
            Input::ClickLink { url } => self.click_link(url)?,
            Input::Surrender => self.surrender()?,
            Input::SessionCreated(result) => self.on_session_created(result),
            Input::CodeIssued(result) => self.on_code_issued(result),
            Input::Redeemed(result) => self.on_redeemed(result),
            Input::CoachReplied(text) => {
                self.append(LogCategory::Coach, format!("AI Coach: {text}"));
                Vec::new()
            }
            Input::LeaderboardReported(result) => self.on_leaderboard_reported(result),
            Input::SendFailed { reason } => {
                self.append(LogCategory::LocalError, format!("Send failed: {reason}"));
                Vec::new()
            }
            Input::Connection(event) => self.on_connection(event.kind),
            Input::Tick => self.on_tick(),
            Input::DisplayElapsed => self.on_display_elapsed(),
            Input::LockoutElapsed { url } => self.on_lockout_elapsed(url),
        };
        self.publish();
        Ok(effects)
    }

    /// After `ended` only the leaderboard report is still recorded; connection
    /// traffic, timers and commands are dropped.
    fn apply_after_end(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::LeaderboardReported(result) => {
                let effects = self.on_leaderboard_reported(result);
                self.publish();
                effects
            }
            other => {
                debug!(input = ?other, "session ended, input dropped");
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn start(&mut self) -> Result<Vec<Effect>, SessionError> {
        self.require_mode("start", Mode::SinglePlayer)?;
        let state = self.session.lifecycle();
        let retry = state == LifecycleState::Connecting && self.session.session_id().is_none();
        if self.pending != Pending::None || !(state == LifecycleState::Idle || retry) {
            return Err(SessionError::InvalidTransition {
                from: state,
                to: LifecycleState::Connecting,
            });
        }

        if state == LifecycleState::Idle {
            self.transition(LifecycleState::Idle, LifecycleState::Connecting);
        }
        self.pending = Pending::CreatingSession;
        self.failure = None;
        self.append(
            LogCategory::LocalInfo,
            format!(
                "Starting {} exercise as {}",
                self.session.scenario(),
                self.session.role()
            ),
        );

        let mut effects = vec![Effect::CreateSession(CreateSessionRequest {
            participant_id: self.session.participant_id().to_owned(),
            scenario: self.session.scenario(),
            role: self.session.role(),
            os: self.session.os(),
        })];
        effects.extend(self.coach(CoachAction::GameStart, json!({})));
        Ok(effects)
    }

    fn host(&mut self) -> Result<Vec<Effect>, SessionError> {
        self.require_matchmaking("host")?;
        self.pending = Pending::IssuingCode;
        self.rejection = None;
        self.failure = None;
        self.append(
            LogCategory::LocalInfo,
            format!("Requesting a match code as {}", self.session.role()),
        );
        Ok(vec![Effect::IssueCode {
            participant_id: self.session.participant_id().to_owned(),
            role: self.session.role(),
        }])
    }

    fn join(&mut self, code: String) -> Result<Vec<Effect>, SessionError> {
        self.require_matchmaking("join")?;
        self.pending = Pending::Redeeming;
        self.rejection = None;
        self.failure = None;
        self.append(
            LogCategory::LocalInfo,
            format!(
                "Joining with code {} as {}",
                code.trim().to_ascii_uppercase(),
                self.session.role()
            ),
        );
        Ok(vec![Effect::RedeemCode {
            code,
            role: self.session.role(),
        }])
    }

    fn say(&mut self, text: &str) -> Result<Vec<Effect>, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.session.lifecycle();
        if !self.connected
            || !matches!(state, LifecycleState::WaitingForPeer | LifecycleState::Active)
        {
            return Err(SessionError::NotAvailable {
                command: "say",
                state,
            });
        }

        self.append(LogCategory::Outbound, format!("You -> {text}"));
        let mut effects = vec![self.send(OutboundMessage::user_input(text))];
        effects.extend(self.coach(CoachAction::SentMessage, json!({ "text": text })));
        Ok(effects)
    }

    fn click_link(&mut self, url: Option<String>) -> Result<Vec<Effect>, SessionError> {
        let state = self.session.lifecycle();
        if state != LifecycleState::Active {
            return Err(SessionError::NotAvailable {
                command: "click",
                state,
            });
        }
        let url = url
            .or_else(|| self.log.last_peer_link().map(str::to_owned))
            .ok_or(SessionError::NoLink)?;

        if self.session.scenario() == super::state::Scenario::Ransomware {
            let after = self.policy.ransomware_lockout;
            self.locked_out = true;
            let _ = self.updates.send(SessionUpdate::Lockout { active: true });
            self.append(
                LogCategory::LocalInfo,
                format!(
                    "Your files have been encrypted! Screen locked for {}s",
                    after.as_secs()
                ),
            );
            return Ok(vec![Effect::ScheduleLockout { url, after }]);
        }

        Ok(self.relay_click(url))
    }

    fn surrender(&mut self) -> Result<Vec<Effect>, SessionError> {
        let state = self.session.lifecycle();
        if state != LifecycleState::Active {
            return Err(SessionError::NotAvailable {
                command: "surrender",
                state,
            });
        }
        Ok(self.conclude(
            Outcome::Loss,
            "You surrendered".to_owned(),
            ConclusionTrigger::LocalAction,
        ))
    }

    // ------------------------------------------------------------------------
    // Collaborator replies
    // ------------------------------------------------------------------------

    fn on_session_created(&mut self, result: Result<SessionId, GatewayError>) -> Vec<Effect> {
        self.pending = Pending::None;
        match result {
            Ok(session_id) => {
                if let Err(err) = self.session.assign_session_id(session_id.clone()) {
                    warn!(error = %err, "duplicate session id ignored");
                    return Vec::new();
                }
                self.emit_created(&session_id);
                self.append(
                    LogCategory::LocalInfo,
                    format!("Session {session_id} created"),
                );
                vec![Effect::Open {
                    session_id,
                    role: self.session.role(),
                }]
            }
            Err(err) => {
                metrics::record_gateway_failure("create_session");
                self.append(
                    LogCategory::LocalError,
                    format!("Could not create session: {err}"),
                );
                self.abort(StartFailure::SessionCreation(err));
                Vec::new()
            }
        }
    }

    fn on_code_issued(&mut self, result: Result<MatchCode, MatchError>) -> Vec<Effect> {
        match result {
            Ok(code) => {
                let remaining = code.remaining_at(self.clock.now());
                self.append(
                    LogCategory::LocalInfo,
                    format!(
                        "Match code {} (expires in {}). Share it with your opponent",
                        code.code,
                        clock_face(u32::try_from(remaining.num_seconds()).unwrap_or(0))
                    ),
                );
                self.events.emit(Event::CodeIssued {
                    timestamp: self.clock.now(),
                    code: code.code.clone(),
                    bound_role: code.bound_role,
                    expires_at: code.expires_at,
                });
                let _ = self.updates.send(SessionUpdate::CodeIssued(code.clone()));
                self.pending = Pending::Redeeming;
                let effect = Effect::RedeemCode {
                    code: code.code.clone(),
                    role: code.bound_role,
                };
                self.issued_code = Some(code);
                vec![effect]
            }
            Err(err) => {
                self.reject(&err);
                Vec::new()
            }
        }
    }

    fn on_redeemed(&mut self, result: Result<Redemption, MatchError>) -> Vec<Effect> {
        self.pending = Pending::None;
        let redemption = match result {
            Ok(r) => r,
            Err(err) => {
                self.reject(&err);
                return Vec::new();
            }
        };

        if redemption.role_swapped() {
            match self.session.swap_role() {
                Ok(role) => self.append(
                    LogCategory::LocalInfo,
                    format!("Your opponent already plays {}; you play {role}", role.complement()),
                ),
                Err(err) => warn!(error = %err, "role swap refused"),
            };
        }
        if let Err(err) = self.session.assign_session_id(redemption.session_id.clone()) {
            warn!(error = %err, "duplicate session id ignored");
            return Vec::new();
        }

        self.events.emit(Event::Paired {
            timestamp: self.clock.now(),
            session_id: redemption.session_id.to_string(),
            status: match redemption.status {
                PairingStatus::Waiting => "waiting",
                PairingStatus::Matched => "matched",
            }
            .to_owned(),
            role_swapped: redemption.role_swapped(),
        });
        self.emit_created(&redemption.session_id);
        self.transition(LifecycleState::Idle, LifecycleState::Connecting);
        self.append(
            LogCategory::LocalInfo,
            match redemption.status {
                PairingStatus::Waiting => "Waiting for an opponent to join".to_owned(),
                PairingStatus::Matched => "Matched!".to_owned(),
            },
        );

        vec![Effect::Open {
            session_id: redemption.session_id,
            role: self.session.role(),
        }]
    }

    fn on_leaderboard_reported(&mut self, result: Result<(), GatewayError>) -> Vec<Effect> {
        match result {
            Ok(()) => self.append(LogCategory::LocalInfo, "Leaderboard updated"),
            Err(err) => {
                metrics::record_gateway_failure("leaderboard_update");
                warn!(error = %err, "leaderboard update failed");
                self.append(
                    LogCategory::LocalError,
                    format!("Leaderboard update failed: {err}"),
                );
            }
        }
        Vec::new()
    }

    // ------------------------------------------------------------------------
    // Connection events
    // ------------------------------------------------------------------------

    fn on_connection(&mut self, event: ConnectionEventKind) -> Vec<Effect> {
        match event {
            ConnectionEventKind::Opened => self.on_opened(),
            ConnectionEventKind::Message(message) => {
                self.summary.messages_received += 1;
                metrics::record_inbound(message.tag());
                self.on_message(message)
            }
            ConnectionEventKind::Malformed { raw, error } => {
                self.summary.messages_received += 1;
                self.summary.malformed_messages += 1;
                metrics::record_malformed();
                warn!(%error, frame_len = raw.len(), "dropping malformed message");
                self.append(
                    LogCategory::LocalError,
                    format!("Dropped malformed message: {error}"),
                );
                Vec::new()
            }
            ConnectionEventKind::Lost { reason } => self.on_lost(reason),
        }
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        self.connected = true;
        self.session.lock_role();
        let mut effects = Vec::new();

        match self.session.lifecycle() {
            LifecycleState::Connecting => {
                self.append(LogCategory::LocalInfo, "Connected");
                effects.extend(self.coach(CoachAction::Connected, json!({})));
                match self.session.mode() {
                    Mode::SinglePlayer => {
                        effects.extend(self.activate(LifecycleState::Connecting, None));
                    }
                    Mode::TwoPlayer => {
                        self.transition(LifecycleState::Connecting, LifecycleState::WaitingForPeer);
                        self.append(LogCategory::LocalInfo, "Waiting for your opponent");
                    }
                }
            }
            _ => self.append(LogCategory::LocalInfo, "Reconnected"),
        }
        effects
    }

    fn on_lost(&mut self, reason: String) -> Vec<Effect> {
        self.connected = false;
        if !self.session.lifecycle().wants_connection() {
            self.append(LogCategory::LocalInfo, format!("Connection closed: {reason}"));
            return Vec::new();
        }

        let after = self.policy.reconnect_backoff;
        self.summary.reconnects += 1;
        metrics::record_reconnect();
        warn!(%reason, backoff_ms = after.as_millis(), "connection lost, reconnecting");
        self.events.emit(Event::Reconnecting {
            timestamp: self.clock.now(),
            reason: reason.clone(),
            backoff_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        });
        self.append(
            LogCategory::LocalInfo,
            format!("Connection lost ({reason}); retrying in {}s", after.as_secs()),
        );
        vec![Effect::Reconnect { after }]
    }

    /// Each message appends exactly one entry describing it; a conclusion it
    /// causes adds its own transition entry.
    fn on_message(&mut self, message: InboundMessage) -> Vec<Effect> {
        match message {
            InboundMessage::PeerAction(action) => self.on_peer_action(action),
            InboundMessage::MatchStarted { time_limit_secs } => {
                let budget = time_limit_secs.filter(|&s| s > 0);
                match self.session.lifecycle() {
                    from @ (LifecycleState::Connecting | LifecycleState::WaitingForPeer) => {
                        let mut effects = self.activate(from, budget);
                        effects.extend(self.coach(CoachAction::MatchStart, json!({})));
                        effects
                    }
                    state => {
                        self.append(
                            LogCategory::InboundSystem,
                            format!("Repeated match start ignored while {state}"),
                        );
                        Vec::new()
                    }
                }
            }
            InboundMessage::GameResult { outcome, reason } => {
                self.append(
                    LogCategory::InboundSystem,
                    format!("Result received: {outcome} ({reason})"),
                );
                self.conclude(outcome, reason, ConclusionTrigger::ResultMessage)
            }
            InboundMessage::Finished { verdict } => {
                let reason = verdict.unwrap_or_else(|| "Game ended".to_owned());
                self.append(
                    LogCategory::InboundSystem,
                    format!("Session finished: {reason}"),
                );
                self.conclude(Outcome::Timeout, reason, ConclusionTrigger::Termination)
            }
            InboundMessage::Unrecognized { tag, raw } => {
                debug!(%tag, "unrecognized message");
                self.append(LogCategory::InboundSystem, format!("Unhandled message: {raw}"));
                Vec::new()
            }
        }
    }

    fn on_peer_action(&mut self, action: PeerAction) -> Vec<Effect> {
        let who = format!("Opponent({})", action.role.as_deref().unwrap_or("unknown"));
        match (action.is_user_input(), action.text.as_deref()) {
            (true, Some(text)) if !text.is_empty() => {
                let line = if action.link || action.link_url().is_some() {
                    format!("{who} sent a link: {text}")
                } else {
                    format!("{who} -> {text}")
                };
                let payload = json!({ "text": text });
                self.append(LogCategory::InboundPeer, line);
                self.coach(CoachAction::OpponentMessage, payload)
                    .into_iter()
                    .collect()
            }
            (true, _) => {
                self.append(LogCategory::InboundPeer, format!("{who} sent an empty message"));
                Vec::new()
            }
            (false, _) => {
                self.append(
                    LogCategory::InboundPeer,
                    format!("{who} performed {}", action.action),
                );
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn on_tick(&mut self) -> Vec<Effect> {
        let Some(remaining) = self.session.tick() else {
            return Vec::new();
        };
        metrics::set_remaining_seconds(remaining);
        let _ = self.updates.send(SessionUpdate::Tick { remaining });
        if remaining == 0 {
            return self.conclude(
                Outcome::Timeout,
                "Time's up! The exercise has ended".to_owned(),
                ConclusionTrigger::Countdown,
            );
        }
        Vec::new()
    }

    fn on_display_elapsed(&mut self) -> Vec<Effect> {
        if !self.transition(LifecycleState::ResultPending, LifecycleState::Ended) {
            return Vec::new();
        }
        self.connected = false;
        self.append(LogCategory::LocalInfo, "Session ended");

        let outcome = self.session.outcome();
        self.events.emit(Event::SessionEnded {
            timestamp: self.clock.now(),
            outcome,
            summary: self.summary.clone(),
        });
        self.events.flush();

        let mut effects = vec![Effect::Close];
        if let Some(outcome) = outcome {
            effects.push(Effect::UpdateLeaderboard(LeaderboardUpdate {
                participant_id: self.session.participant_id().to_owned(),
                role: self.session.role(),
                scenario: self.session.scenario(),
                outcome,
            }));
        }
        effects
    }

    fn on_lockout_elapsed(&mut self, url: String) -> Vec<Effect> {
        self.locked_out = false;
        let _ = self.updates.send(SessionUpdate::Lockout { active: false });
        if self.session.lifecycle() == LifecycleState::Active {
            self.relay_click(url)
        } else {
            self.append(LogCategory::LocalInfo, "Lock-out lifted");
            Vec::new()
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn activate(&mut self, from: LifecycleState, budget: Option<u32>) -> Vec<Effect> {
        let seconds = budget.unwrap_or(self.policy.exercise_duration_secs);
        if !self.session.activate(from, seconds) {
            return Vec::new();
        }
        self.record_transition(from, LifecycleState::Active);
        metrics::set_remaining_seconds(seconds);
        let category = match self.session.mode() {
            Mode::SinglePlayer => LogCategory::LocalInfo,
            Mode::TwoPlayer => LogCategory::InboundSystem,
        };
        self.append(
            category,
            format!("Match started: {} on the clock", clock_face(seconds)),
        );
        vec![Effect::StartCountdown]
    }

    /// The only way out of `active`; the first caller wins.
    fn conclude(
        &mut self,
        outcome: Outcome,
        reason: String,
        trigger: ConclusionTrigger,
    ) -> Vec<Effect> {
        let verdict = Verdict {
            outcome,
            reason: reason.clone(),
            trigger,
        };
        if !self.session.conclude(verdict.clone()) {
            debug!(%trigger, state = %self.session.lifecycle(), "conclusion ignored");
            return Vec::new();
        }

        self.record_transition(LifecycleState::Active, LifecycleState::ResultPending);
        metrics::record_outcome(outcome);
        self.events.emit(Event::Concluded {
            timestamp: self.clock.now(),
            outcome,
            reason: reason.clone(),
            trigger,
        });
        let _ = self.updates.send(SessionUpdate::Concluded(verdict));
        self.append(
            LogCategory::LocalInfo,
            format!("Exercise over: {} ({reason}, {trigger})", outcome.to_string().to_uppercase()),
        );

        let mut effects = vec![Effect::StopCountdown];
        if matches!(
            trigger,
            ConclusionTrigger::Countdown | ConclusionTrigger::LocalAction
        ) && self.connected
        {
            effects.push(self.send(OutboundMessage::Finish { verdict: reason }));
        }
        effects.push(Effect::ScheduleDisplayEnd {
            after: self.policy.display_delay,
        });
        effects
    }

    fn transition(&mut self, from: LifecycleState, to: LifecycleState) -> bool {
        if !self.session.try_transition(from, to) {
            return false;
        }
        self.record_transition(from, to);
        true
    }

    fn record_transition(&mut self, from: LifecycleState, to: LifecycleState) {
        info!(%from, %to, "lifecycle transition");
        let at = self.clock.now();
        self.transitions.push(Transition { from, to, at });
        self.summary.transitions += 1;
        metrics::record_transition(from, to);
        self.events.emit(Event::LifecycleChanged {
            timestamp: at,
            from,
            to,
        });
        let _ = self.updates.send(SessionUpdate::Lifecycle { from, to });
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn require_mode(&self, command: &'static str, mode: Mode) -> Result<(), SessionError> {
        if self.session.mode() == mode {
            Ok(())
        } else {
            Err(SessionError::WrongMode {
                command,
                mode: self.session.mode(),
            })
        }
    }

    fn require_matchmaking(&self, command: &'static str) -> Result<(), SessionError> {
        self.require_mode(command, Mode::TwoPlayer)?;
        let state = self.session.lifecycle();
        if state != LifecycleState::Idle || self.pending != Pending::None {
            return Err(SessionError::InvalidTransition {
                from: state,
                to: LifecycleState::Connecting,
            });
        }
        Ok(())
    }

    fn reject(&mut self, err: &MatchError) {
        self.pending = Pending::None;
        self.rejection = Some(RejectionKind::from(err));
        warn!(error = %err, "matchmaking rejected");
        self.append(LogCategory::LocalError, format!("Matchmaking failed: {err}"));
        self.abort(StartFailure::Matchmaking(err.clone()));
    }

    fn abort(&mut self, failure: StartFailure) {
        let _ = self.updates.send(SessionUpdate::Aborted(failure.clone()));
        self.failure = Some(failure);
    }

    fn relay_click(&mut self, url: String) -> Vec<Effect> {
        self.append(LogCategory::Outbound, format!("You clicked {url}"));
        if self.connected {
            vec![self.send(OutboundMessage::ClickedLink { link: url })]
        } else {
            Vec::new()
        }
    }

    fn send(&mut self, message: OutboundMessage) -> Effect {
        self.summary.messages_sent += 1;
        metrics::record_outbound(message.tag());
        Effect::Send {
            message,
            role: self.session.role(),
        }
    }

    fn coach(&self, action: CoachAction, payload: serde_json::Value) -> Option<Effect> {
        self.policy.coach_enabled.then(|| {
            Effect::Coach(CoachRequest {
                scenario: self.session.scenario(),
                role: self.session.role(),
                action,
                payload,
            })
        })
    }

    fn emit_created(&self, session_id: &SessionId) {
        self.events.emit(Event::SessionCreated {
            timestamp: self.clock.now(),
            session_id: session_id.to_string(),
            mode: self.session.mode(),
            role: self.session.role(),
            scenario: self.session.scenario(),
        });
    }

    fn append(&mut self, category: LogCategory, text: impl Into<String>) {
        let entry = self
            .log
            .append_at(self.clock.now(), category, text)
            .clone();
        let _ = self.updates.send(SessionUpdate::Log(entry));
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            session_id: self.session.session_id().cloned(),
            mode: self.session.mode(),
            role: self.session.role(),
            lifecycle: self.session.lifecycle(),
            remaining_seconds: self.session.remaining_seconds(),
            verdict: self.session.verdict().cloned(),
            connected: self.connected,
            issued_code: self.issued_code.clone(),
            rejection: self.rejection,
            locked_out: self.locked_out,
            log_len: self.log.len(),
        });
    }
}

/// Formats seconds as `M:SS`.
#[must_use]
pub fn clock_face(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::state::{Os, Scenario};

    fn params(mode: Mode, scenario: Scenario) -> SessionParams {
        SessionParams {
            participant_id: "guest-42".to_owned(),
            mode,
            role: Role::Victim,
            scenario,
            os: Os::Windows,
        }
    }

    fn controller(mode: Mode, scenario: Scenario, policy: SessionPolicy) -> SessionController {
        SessionController::new(
            params(mode, scenario),
            policy,
            Arc::new(ManualClock::default()),
            Arc::new(EventEmitter::noop()),
        )
    }

    fn conn(kind: ConnectionEventKind) -> Input {
        Input::Connection(ConnectionEvent {
            connection: 1,
            kind,
        })
    }

    fn short_policy(seconds: u32) -> SessionPolicy {
        SessionPolicy {
            exercise_duration_secs: seconds,
            ..SessionPolicy::default()
        }
    }

    /// Drives a single-player session to `active`.
    fn active_solo(scenario: Scenario, seconds: u32) -> SessionController {
        let mut c = controller(Mode::SinglePlayer, scenario, short_policy(seconds));
        c.handle(Input::Start);
        c.handle(Input::SessionCreated(Ok(SessionId::new("s-1"))));
        c.handle(conn(ConnectionEventKind::Opened));
        assert_eq!(c.session().lifecycle(), LifecycleState::Active);
        c
    }

    fn peer_text(text: &str) -> Input {
        conn(ConnectionEventKind::Message(InboundMessage::PeerAction(
            PeerAction {
                role: Some("attacker".to_owned()),
                action: "user_input".to_owned(),
                text: Some(text.to_owned()),
                link: false,
            },
        )))
    }

    fn game_result(outcome: Outcome) -> Input {
        conn(ConnectionEventKind::Message(InboundMessage::GameResult {
            outcome,
            reason: "Victim reported the phish".to_owned(),
        }))
    }

    fn conclusions(c: &SessionController) -> usize {
        c.log()
            .entries()
            .iter()
            .filter(|e| e.text.starts_with("Exercise over"))
            .count()
    }

    fn redemption(status: PairingStatus, requested: Role, effective: Role) -> Redemption {
        Redemption {
            code: "ABCD12".to_owned(),
            session_id: SessionId::new("ABCD12"),
            status,
            requested_role: requested,
            effective_role: effective,
        }
    }

    #[test]
    fn test_start_creates_session_and_activates_on_open() {
        let mut c = controller(Mode::SinglePlayer, Scenario::Phishing, SessionPolicy::default());

        let effects = c.handle(Input::Start);
        assert!(matches!(effects[0], Effect::CreateSession(_)));
        assert!(effects.iter().any(|e| matches!(e, Effect::Coach(_))));
        assert_eq!(c.session().lifecycle(), LifecycleState::Connecting);

        let effects = c.handle(Input::SessionCreated(Ok(SessionId::new("s-1"))));
        assert_eq!(
            effects,
            vec![Effect::Open {
                session_id: SessionId::new("s-1"),
                role: Role::Victim,
            }]
        );

        let effects = c.handle(conn(ConnectionEventKind::Opened));
        assert!(effects.contains(&Effect::StartCountdown));
        assert_eq!(c.session().remaining_seconds(), 1530);
        assert_eq!(c.snapshot().lifecycle, LifecycleState::Active);
        assert!(c.snapshot().connected);
    }

    #[test]
    fn test_start_refused_in_two_player() {
        let mut c = controller(Mode::TwoPlayer, Scenario::Phishing, SessionPolicy::default());
        let err = c.apply(Input::Start).unwrap_err();
        assert!(matches!(err, SessionError::WrongMode { command: "start", .. }));

        assert!(c.handle(Input::Start).is_empty());
        assert_eq!(c.log().by_category(LogCategory::LocalError).count(), 1);
        assert_eq!(c.session().lifecycle(), LifecycleState::Idle);
    }

    #[test]
    fn test_failed_creation_can_be_retried() {
        let mut c = controller(Mode::SinglePlayer, Scenario::Phishing, SessionPolicy::default());
        c.handle(Input::Start);
        let mut updates = c.subscribe();
        c.handle(Input::SessionCreated(Err(GatewayError::Timeout)));
        assert_eq!(c.session().lifecycle(), LifecycleState::Connecting);
        assert!(c.session().session_id().is_none());
        assert!(matches!(
            c.report().failure,
            Some(StartFailure::SessionCreation(GatewayError::Timeout))
        ));
        let mut aborted = false;
        while let Ok(update) = updates.try_recv() {
            aborted |= matches!(update, SessionUpdate::Aborted(_));
        }
        assert!(aborted);

        let effects = c.handle(Input::Start);
        assert!(matches!(effects[0], Effect::CreateSession(_)));
        assert!(c.report().failure.is_none());
    }

    #[test]
    fn test_countdown_reaching_zero_concludes_with_timeout() {
        let mut c = active_solo(Scenario::Phishing, 3);
        assert!(c.handle(Input::Tick).is_empty());
        assert!(c.handle(Input::Tick).is_empty());

        let effects = c.handle(Input::Tick);
        assert_eq!(effects[0], Effect::StopCountdown);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Send {
                message: OutboundMessage::Finish { .. },
                ..
            }
        )));
        assert!(matches!(
            effects.last(),
            Some(Effect::ScheduleDisplayEnd { after }) if *after == Duration::from_secs(3)
        ));

        let verdict = c.session().verdict().unwrap();
        assert_eq!(verdict.outcome, Outcome::Timeout);
        assert_eq!(verdict.trigger, ConclusionTrigger::Countdown);
        assert_eq!(c.session().remaining_seconds(), 0);
    }

    #[test]
    fn test_result_message_wins_over_late_tick() {
        let mut c = active_solo(Scenario::Phishing, 1);
        c.handle(game_result(Outcome::Win));
        assert!(c.handle(Input::Tick).is_empty());

        assert_eq!(conclusions(&c), 1);
        let verdict = c.session().verdict().unwrap();
        assert_eq!(verdict.outcome, Outcome::Win);
        assert_eq!(verdict.trigger, ConclusionTrigger::ResultMessage);
        assert_eq!(c.session().remaining_seconds(), 1);
    }

    #[test]
    fn test_tick_wins_over_late_result_message() {
        let mut c = active_solo(Scenario::Phishing, 1);
        c.handle(Input::Tick);
        let effects = c.handle(game_result(Outcome::Win));

        assert!(effects.is_empty());
        assert_eq!(conclusions(&c), 1);
        assert_eq!(c.session().outcome(), Some(Outcome::Timeout));
    }

    #[test]
    fn test_result_message_does_not_send_finish() {
        let mut c = active_solo(Scenario::Phishing, 60);
        let effects = c.handle(game_result(Outcome::Loss));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Send { .. })));
    }

    #[test]
    fn test_finished_message_concludes_with_termination() {
        let mut c = active_solo(Scenario::Phishing, 60);
        c.handle(conn(ConnectionEventKind::Message(
            InboundMessage::Finished { verdict: None },
        )));
        let verdict = c.session().verdict().unwrap();
        assert_eq!(verdict.outcome, Outcome::Timeout);
        assert_eq!(verdict.reason, "Game ended");
        assert_eq!(verdict.trigger, ConclusionTrigger::Termination);
    }

    #[test]
    fn test_display_elapsed_ends_and_reports_once() {
        let mut c = active_solo(Scenario::Phishing, 60);
        c.handle(Input::Surrender);
        assert_eq!(c.session().lifecycle(), LifecycleState::ResultPending);

        let effects = c.handle(Input::DisplayElapsed);
        assert_eq!(effects[0], Effect::Close);
        assert!(matches!(
            &effects[1],
            Effect::UpdateLeaderboard(update) if update.outcome == Outcome::Loss
        ));
        assert_eq!(c.session().lifecycle(), LifecycleState::Ended);

        assert!(c.handle(Input::DisplayElapsed).is_empty());
    }

    #[test]
    fn test_nothing_happens_after_ended() {
        let mut c = active_solo(Scenario::Phishing, 60);
        c.handle(Input::Surrender);
        c.handle(Input::DisplayElapsed);
        let before = c.log().len();

        assert!(c.handle(peer_text("hello?")).is_empty());
        assert!(c.handle(Input::Tick).is_empty());
        assert!(
            c.handle(conn(ConnectionEventKind::Lost {
                reason: "closed".to_owned()
            }))
            .is_empty()
        );
        assert!(c.handle(Input::Say { text: "hi".to_owned() }).is_empty());
        assert_eq!(c.log().len(), before);

        c.handle(Input::LeaderboardReported(Ok(())));
        assert_eq!(c.log().len(), before + 1);
    }

    #[test]
    fn test_lost_connection_schedules_reconnect() {
        let mut c = active_solo(Scenario::Phishing, 60);
        let effects = c.handle(conn(ConnectionEventKind::Lost {
            reason: "reset by peer".to_owned(),
        }));
        assert_eq!(
            effects,
            vec![Effect::Reconnect {
                after: Duration::from_secs(3)
            }]
        );
        assert!(!c.snapshot().connected);
        assert_eq!(c.summary().reconnects, 1);

        c.handle(conn(ConnectionEventKind::Opened));
        assert_eq!(c.log().entries().last().unwrap().text, "Reconnected");
        assert_eq!(c.session().lifecycle(), LifecycleState::Active);
    }

    #[test]
    fn test_lost_connection_while_result_pending_is_not_retried() {
        let mut c = active_solo(Scenario::Phishing, 60);
        c.handle(Input::Surrender);
        let effects = c.handle(conn(ConnectionEventKind::Lost {
            reason: "closed".to_owned(),
        }));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_malformed_message_keeps_session_active() {
        let mut c = active_solo(Scenario::Phishing, 60);
        c.handle(conn(ConnectionEventKind::Malformed {
            raw: "{not json".to_owned(),
            error: "expected value".to_owned(),
        }));
        assert_eq!(c.session().lifecycle(), LifecycleState::Active);
        assert_eq!(c.summary().malformed_messages, 1);
        assert_eq!(
            c.log().entries().last().unwrap().category,
            LogCategory::LocalError
        );
    }

    #[test]
    fn test_peer_messages_append_one_entry_each() {
        let mut c = active_solo(Scenario::Phishing, 60);
        let before = c.log().len();
        c.handle(peer_text("Your account is locked, verify at https://bank.example/login"));
        c.handle(peer_text(""));
        c.handle(conn(ConnectionEventKind::Message(
            InboundMessage::Unrecognized {
                tag: "typing".to_owned(),
                raw: r#"{"type":"typing"}"#.to_owned(),
            },
        )));
        assert_eq!(c.log().len(), before + 3);

        let entries = &c.log().entries()[before..];
        assert!(entries[0].text.starts_with("Opponent(attacker) sent a link"));
        assert_eq!(entries[0].link_url.as_deref(), Some("https://bank.example/login"));
        assert_eq!(entries[1].text, "Opponent(attacker) sent an empty message");
        assert_eq!(entries[2].category, LogCategory::InboundSystem);
    }

    #[test]
    fn test_say_requires_open_connection() {
        let mut c = controller(Mode::SinglePlayer, Scenario::Phishing, SessionPolicy::default());
        let err = c.apply(Input::Say { text: "hi".to_owned() }).unwrap_err();
        assert!(matches!(err, SessionError::NotAvailable { command: "say", .. }));

        let mut c = active_solo(Scenario::Phishing, 60);
        let effects = c.handle(Input::Say {
            text: "see https://evil.example".to_owned(),
        });
        assert_eq!(
            effects[0],
            Effect::Send {
                message: OutboundMessage::UserInput {
                    text: "see https://evil.example".to_owned(),
                    link: true,
                },
                role: Role::Victim,
            }
        );
        assert_eq!(c.summary().messages_sent, 1);
    }

    #[test]
    fn test_click_without_link_is_refused() {
        let mut c = active_solo(Scenario::Phishing, 60);
        let err = c.apply(Input::ClickLink { url: None }).unwrap_err();
        assert!(matches!(err, SessionError::NoLink));
    }

    #[test]
    fn test_click_relays_last_peer_link() {
        let mut c = active_solo(Scenario::Phishing, 60);
        c.handle(peer_text("reset here https://a.example/reset"));
        let effects = c.handle(Input::ClickLink { url: None });
        assert_eq!(
            effects,
            vec![Effect::Send {
                message: OutboundMessage::ClickedLink {
                    link: "https://a.example/reset".to_owned()
                },
                role: Role::Victim,
            }]
        );
    }

    #[test]
    fn test_ransomware_click_locks_before_relaying() {
        let mut c = active_solo(Scenario::Ransomware, 60);
        c.handle(peer_text("invoice https://files.example/invoice.exe"));

        let effects = c.handle(Input::ClickLink { url: None });
        assert_eq!(
            effects,
            vec![Effect::ScheduleLockout {
                url: "https://files.example/invoice.exe".to_owned(),
                after: Duration::from_secs(5),
            }]
        );
        assert!(c.snapshot().locked_out);

        let effects = c.handle(Input::LockoutElapsed {
            url: "https://files.example/invoice.exe".to_owned(),
        });
        assert!(matches!(
            &effects[0],
            Effect::Send {
                message: OutboundMessage::ClickedLink { .. },
                ..
            }
        ));
        assert!(!c.snapshot().locked_out);
    }

    #[test]
    fn test_surrender_sends_finish_and_loses() {
        let mut c = active_solo(Scenario::Phishing, 60);
        let effects = c.handle(Input::Surrender);
        assert!(effects.contains(&Effect::Send {
            message: OutboundMessage::Finish {
                verdict: "You surrendered".to_owned()
            },
            role: Role::Victim,
        }));
        assert_eq!(c.session().outcome(), Some(Outcome::Loss));
    }

    #[test]
    fn test_host_issues_then_waits_on_own_code() {
        let mut c = controller(Mode::TwoPlayer, Scenario::Phishing, SessionPolicy::default());
        let effects = c.handle(Input::Host);
        assert_eq!(
            effects,
            vec![Effect::IssueCode {
                participant_id: "guest-42".to_owned(),
                role: Role::Victim,
            }]
        );

        let now = DateTime::<Utc>::UNIX_EPOCH;
        let code = MatchCode {
            code: "ABCD12".to_owned(),
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(300),
            bound_role: Role::Victim,
        };
        let effects = c.handle(Input::CodeIssued(Ok(code)));
        assert_eq!(
            effects,
            vec![Effect::RedeemCode {
                code: "ABCD12".to_owned(),
                role: Role::Victim,
            }]
        );
        assert!(c.log().entries().last().unwrap().text.contains("5:00"));
        assert!(c.snapshot().issued_code.is_some());

        let effects = c.handle(Input::Redeemed(Ok(redemption(
            PairingStatus::Waiting,
            Role::Victim,
            Role::Victim,
        ))));
        assert!(matches!(effects[0], Effect::Open { .. }));
        assert_eq!(c.session().lifecycle(), LifecycleState::Connecting);

        c.handle(conn(ConnectionEventKind::Opened));
        assert_eq!(c.session().lifecycle(), LifecycleState::WaitingForPeer);
    }

    #[test]
    fn test_join_swaps_role_to_complement_peer() {
        let mut c = controller(Mode::TwoPlayer, Scenario::Phishing, SessionPolicy::default());
        c.handle(Input::Join {
            code: "abcd12".to_owned(),
        });
        let effects = c.handle(Input::Redeemed(Ok(redemption(
            PairingStatus::Matched,
            Role::Victim,
            Role::Attacker,
        ))));
        assert_eq!(
            effects,
            vec![Effect::Open {
                session_id: SessionId::new("ABCD12"),
                role: Role::Attacker,
            }]
        );
        assert_eq!(c.session().role(), Role::Attacker);
    }

    #[test]
    fn test_rejection_keeps_session_idle() {
        let mut c = controller(Mode::TwoPlayer, Scenario::Phishing, SessionPolicy::default());
        c.handle(Input::Join {
            code: "ABCD12".to_owned(),
        });
        c.handle(Input::Redeemed(Err(MatchError::RoleCollision {
            role: Role::Victim,
        })));
        assert_eq!(c.session().lifecycle(), LifecycleState::Idle);
        assert_eq!(c.snapshot().rejection, Some(RejectionKind::RoleCollision));
        let failure = c.report().failure.unwrap();
        assert_eq!(
            DrillError::from(failure).exit_code(),
            crate::error::ExitCode::MATCH_ERROR
        );

        // A rejected join may be retried.
        assert_eq!(
            c.handle(Input::Join {
                code: "ZZZZ99".to_owned()
            })
            .len(),
            1
        );
        assert_eq!(c.snapshot().rejection, None);
    }

    #[test]
    fn test_match_started_uses_supplied_budget_once() {
        let mut c = controller(Mode::TwoPlayer, Scenario::Phishing, SessionPolicy::default());
        c.handle(Input::Join {
            code: "ABCD12".to_owned(),
        });
        c.handle(Input::Redeemed(Ok(redemption(
            PairingStatus::Matched,
            Role::Victim,
            Role::Victim,
        ))));
        c.handle(conn(ConnectionEventKind::Opened));

        let started = |t| {
            conn(ConnectionEventKind::Message(InboundMessage::MatchStarted {
                time_limit_secs: t,
            }))
        };
        let effects = c.handle(started(Some(600)));
        assert!(effects.contains(&Effect::StartCountdown));
        assert_eq!(c.session().remaining_seconds(), 600);

        c.handle(Input::Tick);
        assert!(c.handle(started(Some(900))).is_empty());
        assert_eq!(c.session().remaining_seconds(), 599);
    }

    #[test]
    fn test_zero_budget_falls_back_to_default() {
        let mut c = controller(Mode::TwoPlayer, Scenario::Phishing, short_policy(42));
        c.handle(Input::Join {
            code: "ABCD12".to_owned(),
        });
        c.handle(Input::Redeemed(Ok(redemption(
            PairingStatus::Matched,
            Role::Victim,
            Role::Victim,
        ))));
        c.handle(conn(ConnectionEventKind::Opened));
        c.handle(conn(ConnectionEventKind::Message(
            InboundMessage::MatchStarted {
                time_limit_secs: Some(0),
            },
        )));
        assert_eq!(c.session().remaining_seconds(), 42);
    }

    #[test]
    fn test_transitions_follow_lifecycle_graph() {
        let mut c = active_solo(Scenario::Phishing, 1);
        c.handle(Input::Tick);
        c.handle(Input::DisplayElapsed);

        let edges: Vec<_> = c.transitions().iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            edges,
            [
                (LifecycleState::Idle, LifecycleState::Connecting),
                (LifecycleState::Connecting, LifecycleState::Active),
                (LifecycleState::Active, LifecycleState::ResultPending),
                (LifecycleState::ResultPending, LifecycleState::Ended),
            ]
        );
        assert_eq!(c.summary().transitions, 4);
    }

    #[test]
    fn test_coach_disabled_suppresses_requests() {
        let policy = SessionPolicy {
            coach_enabled: false,
            ..SessionPolicy::default()
        };
        let mut c = controller(Mode::SinglePlayer, Scenario::Phishing, policy);
        let effects = c.handle(Input::Start);
        assert!(!effects.iter().any(|e| matches!(e, Effect::Coach(_))));
    }

    #[test]
    fn test_clock_face() {
        assert_eq!(clock_face(1530), "25:30");
        assert_eq!(clock_face(59), "0:59");
        assert_eq!(clock_face(0), "0:00");
    }
}
