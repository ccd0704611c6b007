//! Structured event stream for `breachdrill`.
//!
//! Discrete, typed events emitted while a session runs. Events are serialized
//! as newline-delimited JSON (JSONL) and carry a monotonically increasing
//! sequence number so a consumer can replay them in order.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::state::{ConclusionTrigger, LifecycleState, Mode, Outcome, Role, Scenario};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Counters collected over one session run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Inbound protocol messages processed (including malformed ones).
    pub messages_received: u64,
    /// Outbound protocol messages sent.
    pub messages_sent: u64,
    /// Inbound frames dropped as malformed.
    pub malformed_messages: u64,
    /// Lifecycle transitions taken.
    pub transitions: u64,
    /// Reconnection attempts scheduled.
    pub reconnects: u64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} sent={} malformed={} transitions={} reconnects={}",
            self.messages_received,
            self.messages_sent,
            self.malformed_messages,
            self.transitions,
            self.reconnects,
        )
    }
}

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during a session.
///
/// Each variant is tagged with `"type"` when serialized to JSON so consumers
/// can dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A session id was assigned.
    SessionCreated {
        /// When the id was assigned.
        timestamp: DateTime<Utc>,
        /// Assigned id.
        session_id: String,
        /// Session mode.
        mode: Mode,
        /// Effective role.
        role: Role,
        /// Scenario.
        scenario: Scenario,
    },

    /// A match code was issued to this participant.
    CodeIssued {
        /// When the code was issued.
        timestamp: DateTime<Utc>,
        /// The code.
        code: String,
        /// Role the code is bound to.
        bound_role: Role,
        /// Expiry instant.
        expires_at: DateTime<Utc>,
    },

    /// A code redemption succeeded.
    Paired {
        /// When the pairing response arrived.
        timestamp: DateTime<Utc>,
        /// Session id returned by matchmaking.
        session_id: String,
        /// `"waiting"` or `"matched"`.
        status: String,
        /// Whether the local role was flipped.
        role_swapped: bool,
    },

    /// The lifecycle moved along one edge.
    LifecycleChanged {
        /// When the edge was taken.
        timestamp: DateTime<Utc>,
        /// Previous state.
        from: LifecycleState,
        /// New state.
        to: LifecycleState,
    },

    /// A reconnection attempt was scheduled.
    Reconnecting {
        /// When the attempt was scheduled.
        timestamp: DateTime<Utc>,
        /// Why the previous connection ended.
        reason: String,
        /// Backoff before the attempt, in milliseconds.
        backoff_ms: u64,
    },

    /// The session left `active`.
    Concluded {
        /// When the latch was taken.
        timestamp: DateTime<Utc>,
        /// Final outcome.
        outcome: Outcome,
        /// Reason text.
        reason: String,
        /// Which source won the race.
        trigger: ConclusionTrigger,
    },

    /// The session reached `ended`.
    SessionEnded {
        /// When the session ended.
        timestamp: DateTime<Utc>,
        /// Final outcome, absent when disposed before a verdict.
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<Outcome>,
        /// Run counters.
        summary: RunSummary,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Each call to [`emit`](Self::emit) increments the sequence counter,
/// serializes the event as one JSON line and flushes the writer.
/// Serialization and I/O failures are dropped; the event stream never fails
/// a session.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards every event.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that appends to the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created or opened.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Flushes the underlying writer.
    pub fn flush(&self) {
        if let Ok(mut w) = self.writer.lock() {
            let _ = w.flush();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
