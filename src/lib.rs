//! `breachdrill` - Client orchestrator for timed attacker/victim security drills
//!
//! This library drives exercise sessions against a remote exercise service:
//! matchmaking, the session connection, the countdown, the Activity Log and
//! the collaborator calls that surround a run.

pub mod cli;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod matchmaking;
pub mod observability;
pub mod session;
