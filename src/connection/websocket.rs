//! WebSocket dialer.
//!
//! Opens the session connection with `tokio-tungstenite` and adapts the split
//! socket into a text-frame [`Link`]. Pings and pongs are answered by
//! tungstenite and never surface; a close frame ends the stream with
//! `ConnectionClosed`. A binary frame that is not UTF-8 surfaces as a
//! per-frame `Protocol` error.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{Dialer, Link};
use crate::error::TransportError;

/// Dials `ws://` and `wss://` URLs.
#[derive(Debug, Clone)]
pub struct WebSocketDialer {
    connect_timeout: Duration,
}

impl WebSocketDialer {
    /// Creates a dialer that gives up on the handshake after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    async fn dial(&self, url: &str) -> Result<Link, TransportError> {
        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout(format!("handshake with {url}")))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
            .with(|text: String| future::ok::<_, TransportError>(Message::Text(text)));

        let stream = stream.filter_map(|frame| future::ready(inbound_frame(frame)));

        Ok(Link::new(sink, stream))
    }
}

fn inbound_frame(frame: Result<Message, WsError>) -> Option<Result<String, TransportError>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes)
                .map_err(|e| TransportError::Protocol(format!("binary frame: {e}"))),
        ),
        Ok(Message::Close(frame)) => Some(Err(TransportError::ConnectionClosed(
            frame.map_or_else(|| "closed by peer".to_owned(), |f| f.reason.into_owned()),
        ))),
        Ok(_) => None,
        Err(e) => Some(Err(TransportError::ConnectionClosed(e.to_string()))),
    }
}
