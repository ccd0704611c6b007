//! Exercise sessions
//!
//! A session moves `idle -> connecting -> [waiting-for-peer ->] active ->
//! result-pending -> ended`. [`state`] holds the record and the lifecycle
//! latch, [`controller`] is the single writer that applies every input,
//! and [`runtime`] drives a controller on a tokio task.

pub mod controller;
pub mod countdown;
pub mod log;
pub mod runtime;
pub mod state;

pub use controller::{
    Effect, Input, RejectionKind, SessionController, SessionPolicy, SessionReport,
    SessionSnapshot, SessionUpdate, StartFailure, Transition,
};
pub use countdown::Countdown;
pub use log::{ActivityLog, LogCategory, LogEntry};
pub use runtime::{SessionEnvironment, SessionHandle, SessionRuntime};
pub use state::{
    ConclusionTrigger, LifecycleState, Mode, Os, Outcome, Role, Scenario, Session, SessionId,
    SessionParams, Verdict, guest_participant_id,
};
