//! Activity Log
//!
//! Append-only record of everything that happened in a session. Entries are
//! never reordered, deduplicated, edited or removed; the log is what the
//! console renders and what tests assert against.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s]+").expect("valid regex"));

/// Returns the first `http(s)://` reference embedded in `text`.
#[must_use]
pub fn extract_url(text: &str) -> Option<&str> {
    URL_RE.find(text).map(|m| m.as_str())
}

/// Where a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogCategory {
    /// Local status information.
    LocalInfo,
    /// Local failure (rejections, parse errors, collaborator failures).
    LocalError,
    /// Something this participant sent.
    Outbound,
    /// Content from the remote participant or automated opponent.
    InboundPeer,
    /// Protocol-level messages from the exercise service.
    InboundSystem,
    /// Advisory coaching text.
    Coach,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LocalInfo => "local-info",
            Self::LocalError => "local-error",
            Self::Outbound => "outbound",
            Self::InboundPeer => "inbound-peer",
            Self::InboundSystem => "inbound-system",
            Self::Coach => "coach",
        };
        f.write_str(name)
    }
}

/// One line of the Activity Log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Source category.
    pub category: LogCategory,
    /// Display text.
    pub text: String,
    /// Clickable reference embedded in `text`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_url: Option<String>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<14} {}",
            self.timestamp.format("%H:%M:%S"),
            self.category,
            self.text
        )
    }
}

/// Append-only, time-ordered sequence of [`LogEntry`].
#[derive(Debug, Default, Clone)]
pub struct ActivityLog {
    entries: Vec<LogEntry>,
}

impl ActivityLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry stamped with the current time.
    pub fn append(&mut self, category: LogCategory, text: impl Into<String>) -> &LogEntry {
        self.append_at(Utc::now(), category, text)
    }

    /// Appends an entry with an explicit timestamp.
    ///
    /// A timestamp earlier than the previous entry is raised to it, so the
    /// log stays ordered even if the wall clock steps backwards.
    pub fn append_at(
        &mut self,
        timestamp: DateTime<Utc>,
        category: LogCategory,
        text: impl Into<String>,
    ) -> &LogEntry {
        let text = text.into();
        let timestamp = self
            .entries
            .last()
            .map_or(timestamp, |last| timestamp.max(last.timestamp));
        let link_url = extract_url(&text).map(str::to_owned);
        let index = self.entries.len();
        self.entries.push(LogEntry {
            timestamp,
            category,
            text,
            link_url,
        });
        &self.entries[index]
    }

    /// All entries in arrival order.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries of one category.
    pub fn by_category(&self, category: LogCategory) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// Most recent link offered by the remote participant.
    #[must_use]
    pub fn last_peer_link(&self) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .filter(|e| e.category == LogCategory::InboundPeer)
            .find_map(|e| e.link_url.as_deref())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
