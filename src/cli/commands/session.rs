//! `solo`, `host` and `join` command handlers
//!
//! Builds the session environment from configuration, starts the runtime,
//! and hands the terminal to the interactive console until the session ends.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{http_gateway, load_config};
use crate::cli::args::{JoinArgs, SessionArgs};
use crate::cli::console::{Console, ConsoleExit};
use crate::clock::SystemClock;
use crate::connection::WebSocketDialer;
use crate::error::{DrillError, SessionError};
use crate::matchmaking::normalize_code;
use crate::observability::events::EventEmitter;
use crate::observability::init_metrics;
use crate::session::{
    Mode, SessionEnvironment, SessionHandle, SessionParams, SessionPolicy, SessionReport,
    SessionRuntime, guest_participant_id,
};

/// First command issued to a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opening {
    /// Single-player start.
    Start,
    /// Issue a code and wait.
    Host,
    /// Redeem a code.
    Join(String),
}

impl Opening {
    fn issue(&self, handle: &SessionHandle) -> Result<(), SessionError> {
        match self {
            Self::Start => handle.start(),
            Self::Host => handle.host(),
            Self::Join(code) => handle.join(code.clone()),
        }
    }
}

/// Runs `join <CODE>`.
///
/// # Errors
///
/// Returns `MatchError::MalformedCode` before touching the network if the
/// code has the wrong shape, otherwise whatever [`run`] returns.
pub async fn join(args: &JoinArgs, shutdown: CancellationToken) -> Result<(), DrillError> {
    let code = normalize_code(&args.code)?;
    run(&args.session, Mode::TwoPlayer, Opening::Join(code), shutdown).await
}

/// Runs one interactive session to completion.
///
/// Losing, timing out or quitting are not errors; the result is printed.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the metrics endpoint
/// or events file cannot be opened, or the session task is lost. A refused
/// matchmaking attempt returns the `MatchError` and a failed session
/// creation the `GatewayError`.
pub async fn run(
    args: &SessionArgs,
    mode: Mode,
    opening: Opening,
    shutdown: CancellationToken,
) -> Result<(), DrillError> {
    let config = load_config(&args.config)?;

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    });

    let env = SessionEnvironment {
        gateway: Arc::new(http_gateway(&config)?),
        dialer: Arc::new(WebSocketDialer::new(config.timing.request_timeout)),
        clock: Arc::new(SystemClock),
        events: Arc::clone(&events),
        policy: SessionPolicy::from(config.as_ref()),
        ws_base: config.ws_base.clone(),
        code_ttl: config.timing.code_ttl,
    };

    let params = SessionParams {
        participant_id: args.participant.clone().unwrap_or_else(guest_participant_id),
        mode,
        role: args.role,
        scenario: args.scenario,
        os: args.os,
    };
    info!(
        participant = %params.participant_id,
        %mode,
        role = %params.role,
        scenario = %params.scenario,
        "starting session"
    );

    let runtime = SessionRuntime::create(params, env);
    let console = Console::attach(runtime.handle());
    opening.issue(&runtime.handle())?;

    let mut report = match console.run(shutdown).await {
        ConsoleExit::Finished => runtime.finished().await?,
        ConsoleExit::Aborted | ConsoleExit::Quit | ConsoleExit::Interrupted => {
            runtime.dispose().await?
        }
    };

    events.flush();
    if let Some(failure) = report.failure.take() {
        return Err(failure.into());
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &SessionReport) {
    match &report.verdict {
        Some(verdict) => println!(
            "\nResult: {} ({}, by {})",
            verdict.outcome.to_string().to_uppercase(),
            verdict.reason,
            verdict.trigger
        ),
        None => println!("\nSession closed in state {}", report.lifecycle),
    }

    let summary = &report.summary;
    info!(
        messages_received = summary.messages_received,
        messages_sent = summary.messages_sent,
        malformed_messages = summary.malformed_messages,
        transitions = summary.transitions,
        reconnects = summary.reconnects,
        "session summary"
    );
}
