//! Session record and lifecycle latch
//!
//! The lifecycle lives in an atomic so the `active -> result-pending` edge can
//! be taken with a single compare-and-set. Whoever wins the CAS owns the
//! verdict; every later caller sees a state other than `active` and backs off.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

// ============================================================================
// Enumerations
// ============================================================================

/// How the opponent is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// One participant against the automated opponent.
    SinglePlayer,
    /// Two participants paired through a match code.
    TwoPlayer,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SinglePlayer => write!(f, "single-player"),
            Self::TwoPlayer => write!(f, "two-player"),
        }
    }
}

/// Side of the exercise a participant plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Crafts the attack.
    Attacker,
    /// Defends against it.
    Victim,
}

impl Role {
    /// The other role.
    #[must_use]
    pub const fn complement(self) -> Self {
        match self {
            Self::Attacker => Self::Victim,
            Self::Victim => Self::Attacker,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attacker => "attacker",
            Self::Victim => "victim",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of simulated attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Scenario {
    /// Email social engineering.
    #[serde(rename = "phishing")]
    Phishing,
    /// Endpoint compromise with a lock screen.
    #[serde(rename = "ransomware")]
    Ransomware,
    /// Man-in-the-middle network interception.
    #[serde(rename = "mitm", alias = "network-interception")]
    #[value(name = "mitm", alias = "network-interception")]
    NetworkInterception,
}

impl Scenario {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phishing => "phishing",
            Self::Ransomware => "ransomware",
            Self::NetworkInterception => "mitm",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system the simulated desktop presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Windows desktop.
    #[default]
    Windows,
    /// Linux desktop.
    Linux,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
        }
    }
}

/// Final classification of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The local participant won.
    Win,
    /// The local participant lost.
    Loss,
    /// Time ran out or the exercise was terminated.
    Timeout,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Loss => write!(f, "loss"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Which source ended the `active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConclusionTrigger {
    /// The countdown reached zero.
    Countdown,
    /// A `game_result` message arrived.
    ResultMessage,
    /// A `finished` message arrived.
    Termination,
    /// A local action decided the exercise.
    LocalAction,
}

impl fmt::Display for ConclusionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Countdown => write!(f, "countdown"),
            Self::ResultMessage => write!(f, "result message"),
            Self::Termination => write!(f, "termination message"),
            Self::LocalAction => write!(f, "local action"),
        }
    }
}

/// Outcome, reason text, and the trigger that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Final outcome.
    pub outcome: Outcome,
    /// Human-readable reason shown on the result screen.
    pub reason: String,
    /// Source that won the race out of `active`.
    pub trigger: ConclusionTrigger,
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum LifecycleState {
    /// Created, nothing started.
    Idle = 0,
    /// Opening the session connection.
    Connecting = 1,
    /// Connected, waiting for the remote participant.
    WaitingForPeer = 2,
    /// Countdown running.
    Active = 3,
    /// Verdict fixed, result on display.
    ResultPending = 4,
    /// Terminal.
    Ended = 5,
}

impl LifecycleState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::WaitingForPeer,
            3 => Self::Active,
            4 => Self::ResultPending,
            _ => Self::Ended,
        }
    }

    /// Whether a dropped connection should be re-opened in this state.
    #[must_use]
    pub const fn wants_connection(self) -> bool {
        matches!(self, Self::Connecting | Self::WaitingForPeer | Self::Active)
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::WaitingForPeer | Self::Active)
                | (Self::WaitingForPeer, Self::Active)
                | (Self::Active, Self::ResultPending)
                | (Self::ResultPending, Self::Ended)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::WaitingForPeer => "waiting-for-peer",
            Self::Active => "active",
            Self::ResultPending => "result-pending",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Atomic lifecycle cell.
///
/// Transitions go through [`try_transition`](Self::try_transition), a CAS
/// from an expected state, so two racing callers can never both take the
/// same edge.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    /// Creates a lifecycle in `idle`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Idle as u8),
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Attempts to move from `from` to `to`.
    ///
    /// Returns `false` if the edge is not part of the lifecycle graph or if
    /// the state is no longer `from`.
    pub fn try_transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Session record
// ============================================================================

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a session id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrowed id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters fixed at session creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Participant identity sent to collaborators.
    pub participant_id: String,
    /// Single- or two-player.
    pub mode: Mode,
    /// Requested role.
    pub role: Role,
    /// Exercise type.
    pub scenario: Scenario,
    /// Simulated operating system.
    pub os: Os,
}

/// Returns a random `guest-NNNN` participant id.
#[must_use]
pub fn guest_participant_id() -> String {
    format!("guest-{}", rand::random_range(0..9999))
}

/// The unit of a single exercise run.
///
/// Only the session controller holds a mutable reference; the latch methods
/// take `&self` so they can be exercised from several threads in tests.
#[derive(Debug)]
pub struct Session {
    session_id: Option<SessionId>,
    participant_id: String,
    mode: Mode,
    role: Role,
    role_swapped: bool,
    role_locked: bool,
    scenario: Scenario,
    os: Os,
    lifecycle: Lifecycle,
    remaining_seconds: u32,
    verdict: OnceLock<Verdict>,
}

impl Session {
    /// Creates an idle session.
    #[must_use]
    pub fn new(params: SessionParams) -> Self {
        Self {
            session_id: None,
            participant_id: params.participant_id,
            mode: params.mode,
            role: params.role,
            role_swapped: false,
            role_locked: false,
            scenario: params.scenario,
            os: params.os,
            lifecycle: Lifecycle::new(),
            remaining_seconds: 0,
            verdict: OnceLock::new(),
        }
    }

    /// Session identifier, once assigned.
    #[must_use]
    pub const fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Participant identity.
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Mode fixed at creation.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Effective role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Scenario fixed at creation.
    #[must_use]
    pub const fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Simulated operating system.
    #[must_use]
    pub const fn os(&self) -> Os {
        self.os
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    /// Seconds left on the countdown.
    #[must_use]
    pub const fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Verdict, once the session has left `active`.
    #[must_use]
    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.get()
    }

    /// Outcome, once the session has left `active`.
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        self.verdict.get().map(|v| v.outcome)
    }

    /// Assigns the session id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyAssigned` if an id is already set.
    pub fn assign_session_id(&mut self, id: SessionId) -> Result<(), SessionError> {
        if self.session_id.is_some() {
            return Err(SessionError::AlreadyAssigned("session id"));
        }
        self.session_id = Some(id);
        Ok(())
    }

    /// Flips the role to its complement.
    ///
    /// Allowed once, and only before the connection has opened.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadyAssigned` if the role was already
    /// swapped or is locked.
    pub fn swap_role(&mut self) -> Result<Role, SessionError> {
        if self.role_swapped || self.role_locked {
            return Err(SessionError::AlreadyAssigned("role"));
        }
        self.role = self.role.complement();
        self.role_swapped = true;
        Ok(self.role)
    }

    /// Freezes the role; called when the connection opens.
    pub const fn lock_role(&mut self) {
        self.role_locked = true;
    }

    /// Attempts a lifecycle edge.
    ///
    /// Nothing leaves `ended`; the edge into `result-pending` is reserved for
    /// [`conclude`](Self::conclude).
    pub fn try_transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        if to == LifecycleState::ResultPending {
            return false;
        }
        self.lifecycle.try_transition(from, to)
    }

    /// Enters `active` with the given budget.
    ///
    /// Returns `false` if another event already moved the session out of
    /// `from`; the budget is left untouched in that case.
    pub fn activate(&mut self, from: LifecycleState, budget_seconds: u32) -> bool {
        if !self.lifecycle.try_transition(from, LifecycleState::Active) {
            return false;
        }
        self.remaining_seconds = budget_seconds;
        true
    }

    /// The single-entry latch out of `active`.
    ///
    /// The first caller moves the session to `result-pending` and records
    /// the verdict. Later callers get `false` and change nothing.
    pub fn conclude(&self, verdict: Verdict) -> bool {
        if !self
            .lifecycle
            .try_transition(LifecycleState::Active, LifecycleState::ResultPending)
        {
            return false;
        }
        self.verdict.set(verdict).is_ok()
    }

    /// Decrements the countdown by one second.
    ///
    /// Returns the new value while `active`, or `None` when frozen.
    pub fn tick(&mut self) -> Option<u32> {
        if self.lifecycle() != LifecycleState::Active {
            return None;
        }
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        Some(self.remaining_seconds)
    }
}
