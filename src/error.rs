//! Error types for `breachdrill`
//!
//! One error enum per domain plus a top-level [`DrillError`] that maps every
//! failure to a process exit code.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::state::{LifecycleState, Mode, Role};

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `breachdrill` CLI operations.
///
/// These codes follow Unix conventions.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (connection failed, protocol error)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Session controller error (invalid transition, wrong mode)
    pub const SESSION_ERROR: i32 = 5;

    /// Matchmaking rejection (role collision, invalid or expired code)
    pub const MATCH_ERROR: i32 = 6;

    /// Collaborator call failed (session create, leaderboard, coach)
    pub const GATEWAY_ERROR: i32 = 7;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `breachdrill` operations.
///
/// This enum aggregates all domain-specific errors and provides
/// a unified interface for error handling and exit code mapping.
#[derive(Debug, Error)]
pub enum DrillError {
    /// Configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Session controller error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Matchmaking rejection
    #[error(transparent)]
    Match(#[from] MatchError),

    /// Collaborator call error
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DrillError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Session(_) => ExitCode::SESSION_ERROR,
            Self::Match(_) => ExitCode::MATCH_ERROR,
            Self::Gateway(_) => ExitCode::GATEWAY_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the configuration file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message supplied with the `${VAR:?message}` reference
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during configuration validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "timing.display_delay")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - validation failure that prevents configuration from being used
    Error,
    /// Warning - potential issue that does not prevent configuration loading
    Warning,
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors raised by the session connection.
///
/// All of these are recoverable from the session's point of view: the
/// controller turns them into log entries and, where the lifecycle allows,
/// a reconnection attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection was closed unexpectedly
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Inbound frame could not be decoded into a protocol message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Outbound frame could not be written
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Read or write timeout
    #[error("timeout: {0}")]
    Timeout(String),
}

// ============================================================================
// Session Errors
// ============================================================================

/// Session controller errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Attempted transition not allowed by the lifecycle
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        /// State the session was in
        from: LifecycleState,
        /// State that was requested
        to: LifecycleState,
    },

    /// Command does not apply to the session's mode
    #[error("'{command}' is not available in {mode} mode")]
    WrongMode {
        /// Command name
        command: &'static str,
        /// Mode fixed at session creation
        mode: Mode,
    },

    /// Command does not apply to the current lifecycle state
    #[error("'{command}' is not available while {state}")]
    NotAvailable {
        /// Command name
        command: &'static str,
        /// Current lifecycle state
        state: LifecycleState,
    },

    /// A link activation was requested but the peer offered none
    #[error("no link to activate")]
    NoLink,

    /// A write-once field was assigned twice
    #[error("{0} is already assigned")]
    AlreadyAssigned(&'static str),

    /// The session runtime has been disposed
    #[error("session disposed")]
    Disposed,
}

// ============================================================================
// Matchmaking Errors
// ============================================================================

/// Matchmaking rejections.
///
/// Every variant is terminal for the attempt that produced it; a new attempt
/// has to be started explicitly.
#[derive(Debug, Clone, Error)]
pub enum MatchError {
    /// The code was issued to a participant holding the same role
    #[error("both participants chose {role}; pick the opposite role")]
    RoleCollision {
        /// Role requested by the redeeming participant
        role: Role,
    },

    /// The code is unknown, retired, or expired on the matchmaking side
    #[error("invalid or expired code {code}")]
    InvalidOrExpired {
        /// Code as submitted
        code: String,
    },

    /// The code is known locally and its expiry has passed
    #[error("code {code} expired at {expired_at}")]
    Expired {
        /// Code as submitted
        code: String,
        /// Expiry instant
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    /// The code does not have the expected shape
    #[error("malformed code '{0}': expected 6 characters A-Z or 0-9")]
    MalformedCode(String),

    /// Rejection with a status that carries no known meaning
    #[error("redemption rejected with status {0}")]
    Rejected(u16),

    /// The matchmaking call itself failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

// ============================================================================
// Gateway Errors
// ============================================================================

/// Errors from request/response collaborators.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Connection or request failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// Response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `breachdrill` operations.
pub type Result<T> = std::result::Result<T, DrillError>;

// ============================================================================
// Tests
// ============================================================================
