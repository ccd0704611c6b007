//! Session connection protocol.
//!
//! Inbound frames are `{"type": tag, "payload": {...}}`; outbound frames are
//! `{"action": tag, "role": role, "payload": {...}}`. Decoding happens in two
//! steps: the envelope first, then the payload for the known tag. A frame
//! whose envelope or payload does not decode is a protocol error; a frame
//! with a well-formed envelope and an unknown tag is kept as
//! [`InboundMessage::Unrecognized`].

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::TransportError;
use crate::session::log::extract_url;
use crate::session::state::{Outcome, Role};

// ============================================================================
// Inbound
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct OpponentActionPayload {
    #[serde(default)]
    role: Option<String>,
    action: String,
    #[serde(default)]
    payload: Option<ActionContent>,
}

#[derive(Debug, Default, Deserialize)]
struct ActionContent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    link: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchStartedPayload {
    #[serde(default)]
    time_limit_sec: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GameResultPayload {
    result: Outcome,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct FinishedPayload {
    #[serde(default)]
    verdict: Option<String>,
}

/// Content the remote participant produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAction {
    /// Role the sender reports, as sent.
    pub role: Option<String>,
    /// Action name, `user_input` for text.
    pub action: String,
    /// Text content, if any.
    pub text: Option<String>,
    /// Whether the sender flagged the text as carrying a link.
    pub link: bool,
}

impl PeerAction {
    /// Link the local participant may deliberately activate.
    #[must_use]
    pub fn link_url(&self) -> Option<&str> {
        self.text.as_deref().and_then(extract_url)
    }

    /// Whether this is a plain text message.
    #[must_use]
    pub fn is_user_input(&self) -> bool {
        self.action == "user_input"
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `opponent_action`
    PeerAction(PeerAction),
    /// `match_started`, with the authoritative time budget when supplied.
    MatchStarted {
        /// Budget in seconds; zero or absent means "use the default".
        time_limit_secs: Option<u32>,
    },
    /// `game_result`
    GameResult {
        /// Outcome from the local participant's point of view.
        outcome: Outcome,
        /// Reason text.
        reason: String,
    },
    /// `finished`
    Finished {
        /// Server-supplied reason.
        verdict: Option<String>,
    },
    /// Well-formed envelope with a tag this client does not handle.
    Unrecognized {
        /// The tag.
        tag: String,
        /// The raw frame.
        raw: String,
    },
}

impl InboundMessage {
    /// Decodes one frame.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Protocol` if the frame is not a JSON object
    /// with a string `type`, or if the payload of a known tag does not have
    /// the expected shape.
    pub fn decode(raw: &str) -> Result<Self, TransportError> {
        let envelope: RawEnvelope = serde_json::from_str(raw)
            .map_err(|e| TransportError::Protocol(format!("invalid envelope: {e}")))?;

        let message = match envelope.tag.as_str() {
            "opponent_action" => {
                let p: OpponentActionPayload = payload(&envelope)?;
                let content = p.payload.unwrap_or_default();
                Self::PeerAction(PeerAction {
                    role: p.role,
                    action: p.action,
                    text: content.text,
                    link: content.link,
                })
            }
            "match_started" => {
                let p: Option<MatchStartedPayload> = payload(&envelope)?;
                Self::MatchStarted {
                    time_limit_secs: p.and_then(|p| p.time_limit_sec),
                }
            }
            "game_result" => {
                let p: GameResultPayload = payload(&envelope)?;
                Self::GameResult {
                    outcome: p.result,
                    reason: p.reason,
                }
            }
            "finished" => {
                let p: Option<FinishedPayload> = payload(&envelope)?;
                Self::Finished {
                    verdict: p.and_then(|p| p.verdict),
                }
            }
            _ => Self::Unrecognized {
                tag: envelope.tag,
                raw: raw.to_owned(),
            },
        };
        Ok(message)
    }

    /// Wire tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::PeerAction(_) => "opponent_action",
            Self::MatchStarted { .. } => "match_started",
            Self::GameResult { .. } => "game_result",
            Self::Finished { .. } => "finished",
            Self::Unrecognized { tag, .. } => tag,
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &RawEnvelope) -> Result<T, TransportError> {
    T::deserialize(&envelope.payload)
        .map_err(|e| TransportError::Protocol(format!("invalid {} payload: {e}", envelope.tag)))
}

// ============================================================================
// Outbound
// ============================================================================

/// A message sent to the exercise service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Free text typed by the participant.
    UserInput {
        /// The text.
        text: String,
        /// Whether the text embeds an `http(s)://` reference.
        link: bool,
    },
    /// The participant activated a link offered by the peer.
    ClickedLink {
        /// The activated URL.
        link: String,
    },
    /// The exercise concluded locally.
    Finish {
        /// Reason text.
        verdict: String,
    },
}

impl OutboundMessage {
    /// Builds a `user_input` message, flagging embedded links.
    #[must_use]
    pub fn user_input(text: impl Into<String>) -> Self {
        let text = text.into();
        let link = extract_url(&text).is_some();
        Self::UserInput { text, link }
    }

    /// Wire tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::UserInput { .. } => "user_input",
            Self::ClickedLink { .. } => "clicked_link",
            Self::Finish { .. } => "finish",
        }
    }

    /// Encodes the frame for the given sender role.
    #[must_use]
    pub fn encode(&self, role: Role) -> String {
        let payload = match self {
            Self::UserInput { text, link } => json!({ "text": text, "link": link }),
            Self::ClickedLink { link } => json!({ "link": link }),
            Self::Finish { verdict } => json!({ "verdict": verdict }),
        };
        json!({ "action": self.tag(), "role": role, "payload": payload }).to_string()
    }
}
