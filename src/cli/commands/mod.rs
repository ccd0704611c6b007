//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod completions;
pub mod leaderboard;
pub mod session;
pub mod validate;
pub mod version;

use std::sync::Arc;

use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands, ConfigArgs};
use crate::config::{ConfigLoader, ConfigOverrides, DrillConfig};
use crate::error::{ConfigError, DrillError};
use crate::gateway::HttpGateway;
use crate::session::Mode;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// `shutdown` fires on the first interrupt; session commands dispose their
/// session when it does.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli, shutdown: CancellationToken) -> Result<(), DrillError> {
    match cli.command {
        Commands::Solo(args) => {
            session::run(&args, Mode::SinglePlayer, session::Opening::Start, shutdown).await
        }
        Commands::Host(args) => {
            session::run(&args, Mode::TwoPlayer, session::Opening::Host, shutdown).await
        }
        Commands::Join(args) => session::join(&args, shutdown).await,
        Commands::Leaderboard(args) => leaderboard::run(&args).await,
        Commands::Validate(args) => validate::run(&args),
        Commands::Completions(args) => {
            completions::run(&args);
            Ok(())
        }
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}

/// Loads the configuration named by `args` with its command-line overrides
/// and reports load warnings through tracing.
pub(crate) fn load_config(args: &ConfigArgs) -> Result<Arc<DrillConfig>, DrillError> {
    let overrides = ConfigOverrides {
        api_base: args.api_base.clone(),
        ws_base: args.ws_base.clone(),
        disable_coach: args.no_coach,
    };

    if let Some(path) = &args.config {
        tracing::info!(config = %path.display(), "loading configuration");
    }
    let load_result = ConfigLoader::new()
        .with_overrides(overrides)
        .load(args.config.as_deref())?;

    for warning in &load_result.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }

    Ok(load_result.config)
}

/// Builds the HTTP collaborator client for `config.api_base`.
pub(crate) fn http_gateway(config: &DrillConfig) -> Result<HttpGateway, DrillError> {
    let base = Url::parse(&config.api_base).map_err(|e| ConfigError::InvalidValue {
        field: "api_base".to_string(),
        value: config.api_base.clone(),
        expected: format!("an absolute URL ({e})"),
    })?;
    Ok(HttpGateway::new(base, config.timing.request_timeout)?)
}
