//! Interactive console
//!
//! Renders the Activity Log on stdout and turns stdin lines into session
//! commands. Plain text is sent to the peer; lines starting with `/` are
//! console commands.

use std::fmt;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::controller::clock_face;
use crate::session::{LifecycleState, SessionHandle, SessionSnapshot, SessionUpdate};

/// Ticks at or below this are always shown.
const FINAL_SECONDS: u32 = 10;

/// One parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Free text for the peer.
    Say(String),
    /// `/click [url]`
    Click(Option<String>),
    /// `/surrender`
    Surrender,
    /// `/status`
    Status,
    /// `/quit`
    Quit,
    /// `/help`
    Help,
    /// Blank line.
    Empty,
}

/// A `/command` the console does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command '/{}' (try /help)", self.0)
    }
}

impl ConsoleCommand {
    /// Parses one input line.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCommand`] for an unrecognized `/command`.
    pub fn parse(line: &str) -> Result<Self, UnknownCommand> {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Ok(if line.is_empty() {
                Self::Empty
            } else {
                Self::Say(line.to_owned())
            });
        };

        let (name, rest) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));

        match name.to_ascii_lowercase().as_str() {
            "click" => Ok(Self::Click((!rest.is_empty()).then(|| rest.to_owned()))),
            "surrender" => Ok(Self::Surrender),
            "status" => Ok(Self::Status),
            "quit" | "exit" => Ok(Self::Quit),
            "help" => Ok(Self::Help),
            other => Err(UnknownCommand(other.to_owned())),
        }
    }
}

/// Why the console stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The session reached `ended` on its own.
    Finished,
    /// The opening attempt failed and the session will not progress.
    Aborted,
    /// The user typed `/quit`.
    Quit,
    /// A shutdown signal arrived.
    Interrupted,
}

/// Terminal front end for one session.
pub struct Console {
    handle: SessionHandle,
    updates: BroadcastStream<SessionUpdate>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").finish_non_exhaustive()
    }
}

impl Console {
    /// Subscribes to `handle`. Attach before issuing the first command so
    /// no log entry is missed.
    #[must_use]
    pub fn attach(handle: SessionHandle) -> Self {
        let updates = BroadcastStream::new(handle.subscribe());
        Self { handle, updates }
    }

    /// Runs until the session ends or aborts, the user quits, or `shutdown`
    /// fires.
    pub async fn run(mut self, shutdown: CancellationToken) -> ConsoleExit {
        let mut stdin = Some(BufReader::new(tokio::io::stdin()).lines());

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return ConsoleExit::Interrupted,
                update = self.updates.next() => match update {
                    Some(Ok(update)) => {
                        if let Some(exit) = render(&update) {
                            return exit;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(skipped, "console fell behind the session; some updates were not shown");
                    }
                    None => return ConsoleExit::Finished,
                },
                line = next_line(&mut stdin) => match line {
                    Some(line) => {
                        if self.dispatch(&line) {
                            return ConsoleExit::Quit;
                        }
                    }
                    None => {
                        debug!("stdin closed; console is now read-only");
                        stdin = None;
                    }
                },
            }
        }
    }

    /// Returns `true` when the user asked to leave.
    fn dispatch(&self, line: &str) -> bool {
        let command = match ConsoleCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                return false;
            }
        };

        let result: Result<(), SessionError> = match command {
            ConsoleCommand::Say(text) => self.handle.say(text),
            ConsoleCommand::Click(url) => self.handle.click(url),
            ConsoleCommand::Surrender => self.handle.surrender(),
            ConsoleCommand::Status => {
                println!("{}", status_line(&self.handle.snapshot()));
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{HELP}");
                Ok(())
            }
            ConsoleCommand::Quit => return true,
            ConsoleCommand::Empty => Ok(()),
        };

        if let Err(e) = result {
            eprintln!("error: {e}");
        }
        false
    }
}

const HELP: &str = "\
  <text>          send a message to your opponent
  /click [url]    open the last link you received (or the given one)
  /surrender      concede the exercise
  /status         show the session state
  /quit           leave the session";

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Prints one update. Returns how the console should stop, if it should.
fn render(update: &SessionUpdate) -> Option<ConsoleExit> {
    match update {
        SessionUpdate::Log(entry) => println!("{entry}"),
        SessionUpdate::Tick { remaining } => {
            if *remaining % 60 == 0 || *remaining <= FINAL_SECONDS {
                println!("  {} remaining", clock_face(*remaining));
            }
        }
        SessionUpdate::Lockout { active: false } => println!("  Screen unlocked"),
        SessionUpdate::Lifecycle {
            to: LifecycleState::Ended,
            ..
        } => return Some(ConsoleExit::Finished),
        SessionUpdate::Aborted(_) => return Some(ConsoleExit::Aborted),
        SessionUpdate::Lifecycle { .. }
        | SessionUpdate::Concluded(_)
        | SessionUpdate::CodeIssued(_)
        | SessionUpdate::Lockout { active: true } => {}
    }
    None
}

/// One-line summary for `/status`.
#[must_use]
pub fn status_line(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "{} | {} | {} | {} left | {}",
        snapshot.mode,
        snapshot.role,
        snapshot.lifecycle,
        clock_face(snapshot.remaining_seconds),
        if snapshot.connected {
            "connected"
        } else {
            "offline"
        },
    );
    if let Some(code) = &snapshot.issued_code {
        line.push_str(&format!(" | code {}", code.code));
    }
    if snapshot.locked_out {
        line.push_str(" | screen locked");
    }
    if let Some(verdict) = &snapshot.verdict {
        line.push_str(&format!(" | {} ({})", verdict.outcome, verdict.reason));
    }
    line
}
