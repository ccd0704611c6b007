//! CLI argument definitions
//!
//! All Clap derive structs for `breachdrill` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;
use crate::session::state::{Os, Role, Scenario};

// ============================================================================
// Root CLI
// ============================================================================

/// Timed attacker/victim security drills from the terminal.
#[derive(Parser, Debug)]
#[command(name = "breachdrill", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "BREACHDRILL_COLOR")]
    pub color: ColorChoice,

    /// Diagnostic log format on stderr.
    #[arg(long, default_value = "human", global = true)]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a single-player exercise against the automated opponent.
    Solo(SessionArgs),

    /// Issue a match code and wait for an opponent to join.
    Host(SessionArgs),

    /// Join a two-player exercise with a code shared by the host.
    Join(JoinArgs),

    /// Show leaderboard standings.
    Leaderboard(LeaderboardArgs),

    /// Validate configuration files.
    Validate(ValidateArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Session Commands
// ============================================================================

/// Arguments shared by `solo`, `host` and `join`.
#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    /// Attack scenario to play.
    #[arg(short, long, default_value = "phishing")]
    pub scenario: Scenario,

    /// Side to play. In two-player mode the role may be flipped to
    /// complement the opponent.
    #[arg(short, long, default_value = "victim")]
    pub role: Role,

    /// Simulated desktop operating system.
    #[arg(long, default_value = "windows")]
    pub os: Os,

    /// Participant identity sent to the service (default: random guest id).
    #[arg(long, env = "BREACHDRILL_PARTICIPANT")]
    pub participant: Option<String>,

    /// Collaborator and timing settings.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Write a JSONL event stream to this file.
    #[arg(long, env = "BREACHDRILL_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Expose Prometheus metrics on 127.0.0.1 at this port.
    #[arg(long, env = "BREACHDRILL_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for `join`.
#[derive(Args, Debug, Clone)]
pub struct JoinArgs {
    /// Six-character match code (case-insensitive).
    pub code: String,

    /// Session settings.
    #[command(flatten)]
    pub session: SessionArgs,
}

/// Configuration sources shared by commands that talk to the service.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to YAML configuration file.
    #[arg(short, long, env = "BREACHDRILL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the HTTP collaborator base URL.
    #[arg(long, env = "BREACHDRILL_API_BASE")]
    pub api_base: Option<String>,

    /// Override the session connection base URL.
    #[arg(long, env = "BREACHDRILL_WS_BASE")]
    pub ws_base: Option<String>,

    /// Do not request coaching hints.
    #[arg(long)]
    pub no_coach: bool,
}

// ============================================================================
// Leaderboard / Validate / Completions / Version
// ============================================================================

/// Arguments for `leaderboard`.
#[derive(Args, Debug, Clone)]
pub struct LeaderboardArgs {
    /// Only rows for this role.
    #[arg(short, long)]
    pub role: Option<Role>,

    /// Only rows for this scenario.
    #[arg(short, long)]
    pub scenario: Option<Scenario>,

    /// Only today's results.
    #[arg(long)]
    pub daily: bool,

    /// Maximum number of rows.
    #[arg(short, long, default_value_t = 50)]
    pub limit: u32,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Collaborator settings.
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Configuration files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: Shell,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Shell type for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell.
    Bash,
    /// Zsh shell.
    Zsh,
    /// Fish shell.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell.
    Elvish,
}

// ============================================================================
// Tests
// ============================================================================
