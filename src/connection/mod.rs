//! Connection Manager.
//!
//! Owns the one logical connection a session may have open. Each call to
//! [`ConnectionManager::open`] or [`ConnectionManager::reopen`] cancels the
//! previous connection task (including a pending reconnection backoff) and
//! starts a new one under a fresh [`ConnectionId`]. The task decodes inbound
//! frames and posts [`ConnectionEvent`]s into the owner's queue, converted to
//! the queue's item type, so they interleave with the owner's other inputs in
//! arrival order. It never touches session state. Consumers drop events whose
//! id is no longer [`current`](ConnectionManager::is_current).

pub mod protocol;
pub mod websocket;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use protocol::{InboundMessage, OutboundMessage, PeerAction};
pub use websocket::WebSocketDialer;

use crate::error::TransportError;
use crate::session::state::{Role, SessionId};

/// Identifier of one connection attempt.
pub type ConnectionId = u64;

// ============================================================================
// Dialer seam
// ============================================================================

/// A bidirectional text-frame link.
///
/// An inbound `TransportError::Protocol` item describes one undecodable frame
/// and does not end the stream. Any other error does.
pub struct Link {
    sink: Pin<Box<dyn Sink<String, Error = TransportError> + Send>>,
    stream: BoxStream<'static, Result<String, TransportError>>,
}

impl Link {
    /// Wraps a sink of outbound frames and a stream of inbound frames.
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = TransportError> + Send + 'static,
        R: Stream<Item = Result<String, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens links to a URL.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Opens a link.
    ///
    /// # Errors
    ///
    /// Returns a `TransportError` if the connection cannot be established.
    async fn dial(&self, url: &str) -> Result<Link, TransportError>;
}

/// Builds the session connection URL.
#[must_use]
pub fn session_url(ws_base: &str, session_id: &SessionId, role: Role) -> String {
    format!(
        "{}/ws/session/{}/{}",
        ws_base.trim_end_matches('/'),
        session_id,
        role
    )
}

// ============================================================================
// Events
// ============================================================================

/// What happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// The link is established.
    Opened,
    /// A frame decoded into a protocol message.
    Message(InboundMessage),
    /// A frame that did not decode; it has been dropped.
    Malformed {
        /// The frame as received, empty when it was not text.
        raw: String,
        /// Decoder error.
        error: String,
    },
    /// Dial failure, transport error or closure.
    Lost {
        /// Human-readable cause.
        reason: String,
    },
}

/// An event tagged with the connection it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Originating connection.
    pub connection: ConnectionId,
    /// Event payload.
    pub kind: ConnectionEventKind,
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug)]
struct Slot {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Opens, replaces and closes the session connection.
///
/// Events are posted as `E`, which lets the owner share one queue between
/// connection events and everything else it reacts to.
pub struct ConnectionManager<E = ConnectionEvent> {
    dialer: Arc<dyn Dialer>,
    ws_base: String,
    events: mpsc::UnboundedSender<E>,
    target: Option<(SessionId, Role)>,
    current: Option<Slot>,
    next_id: ConnectionId,
}

impl<E> fmt::Debug for ConnectionManager<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("ws_base", &self.ws_base)
            .field("target", &self.target)
            .field("current", &self.current.as_ref().map(|s| s.id))
            .finish_non_exhaustive()
    }
}

impl<E> ConnectionManager<E>
where
    E: From<ConnectionEvent> + Send + 'static,
{
    /// Creates a manager that reports to `events`.
    #[must_use]
    pub fn new(
        dialer: Arc<dyn Dialer>,
        ws_base: impl Into<String>,
        events: mpsc::UnboundedSender<E>,
    ) -> Self {
        Self {
            dialer,
            ws_base: ws_base.into(),
            events,
            target: None,
            current: None,
            next_id: 1,
        }
    }

    /// Opens the connection for `session_id` as `role`, replacing any open one.
    pub fn open(&mut self, session_id: &SessionId, role: Role) -> ConnectionId {
        self.target = Some((session_id.clone(), role));
        self.spawn(session_url(&self.ws_base, session_id, role), Duration::ZERO)
    }

    /// Re-opens the last target after `backoff`, replacing any open one.
    ///
    /// Returns `None` if nothing was ever opened.
    pub fn reopen(&mut self, backoff: Duration) -> Option<ConnectionId> {
        let (session_id, role) = self.target.as_ref()?;
        let url = session_url(&self.ws_base, session_id, *role);
        Some(self.spawn(url, backoff))
    }

    /// Closes the current connection and cancels any pending backoff.
    pub fn close(&mut self) {
        if let Some(slot) = self.current.take() {
            tracing::debug!(connection = slot.id, "closing connection");
            slot.cancel.cancel();
        }
    }

    /// Queues an outbound frame on the current connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::SendFailed` if no connection task is running.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        let slot = self
            .current
            .as_ref()
            .ok_or_else(|| TransportError::SendFailed("no open connection".to_owned()))?;
        slot.outbound
            .send(frame)
            .map_err(|_| TransportError::SendFailed("connection task has exited".to_owned()))
    }

    /// Whether `id` is the connection currently owned by the manager.
    #[must_use]
    pub fn is_current(&self, id: ConnectionId) -> bool {
        self.current.as_ref().is_some_and(|s| s.id == id)
    }

    /// Id of the current connection, if any.
    #[must_use]
    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current.as_ref().map(|s| s.id)
    }

    fn spawn(&mut self, url: String, delay: Duration) -> ConnectionId {
        self.close();

        let id = self.next_id;
        self.next_id += 1;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_connection(
            id,
            Arc::clone(&self.dialer),
            url,
            delay,
            cancel.clone(),
            outbound_rx,
            self.events.clone(),
        ));

        self.current = Some(Slot {
            id,
            outbound: outbound_tx,
            cancel,
        });
        id
    }
}

impl<E> Drop for ConnectionManager<E> {
    fn drop(&mut self) {
        if let Some(slot) = self.current.take() {
            slot.cancel.cancel();
        }
    }
}

async fn run_connection<E>(
    id: ConnectionId,
    dialer: Arc<dyn Dialer>,
    url: String,
    delay: Duration,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<E>,
) where
    E: From<ConnectionEvent> + Send + 'static,
{
    let report = |kind| {
        let _ = events.send(E::from(ConnectionEvent {
            connection: id,
            kind,
        }));
    };

    if !delay.is_zero() {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!(connection = id, %url, "dialing");
    let dialed = tokio::select! {
        () = cancel.cancelled() => return,
        result = dialer.dial(&url) => result,
    };

    let Link {
        mut sink,
        mut stream,
    } = match dialed {
        Ok(link) => link,
        Err(e) => {
            report(ConnectionEventKind::Lost {
                reason: e.to_string(),
            });
            return;
        }
    };

    tracing::info!(connection = id, "connection open");
    report(ConnectionEventKind::Opened);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = sink.send(frame).await {
                    report(ConnectionEventKind::Lost { reason: e.to_string() });
                    return;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(raw)) => match InboundMessage::decode(&raw) {
                    Ok(message) => report(ConnectionEventKind::Message(message)),
                    Err(e) => report(ConnectionEventKind::Malformed {
                        raw,
                        error: e.to_string(),
                    }),
                },
                Some(Err(e @ TransportError::Protocol(_))) => {
                    report(ConnectionEventKind::Malformed {
                        raw: String::new(),
                        error: e.to_string(),
                    });
                }
                Some(Err(e)) => {
                    report(ConnectionEventKind::Lost { reason: e.to_string() });
                    return;
                }
                None => {
                    report(ConnectionEventKind::Lost {
                        reason: "connection closed".to_owned(),
                    });
                    return;
                }
            },
        }
    }
}
