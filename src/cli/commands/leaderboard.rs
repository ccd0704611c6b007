//! `leaderboard` command handler

use std::fmt::Write as _;

use crate::cli::args::{LeaderboardArgs, OutputFormat};
use crate::error::DrillError;
use crate::gateway::{Gateway, LeaderboardQuery, LeaderboardRow, rank};

use super::{http_gateway, load_config};

/// Fetches and prints leaderboard rows.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or the collaborator
/// call fails.
pub async fn run(args: &LeaderboardArgs) -> Result<(), DrillError> {
    let config = load_config(&args.config)?;
    let gateway = http_gateway(&config)?;

    let query = LeaderboardQuery {
        role: args.role,
        scenario: args.scenario,
        daily: args.daily,
        limit: args.limit,
    };
    tracing::debug!(?query, "fetching leaderboard");

    let mut rows = gateway.leaderboard(&query).await?;
    rank(&mut rows);

    match args.format {
        OutputFormat::Human => print!("{}", render_table(&rows)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

fn render_table(rows: &[LeaderboardRow]) -> String {
    if rows.is_empty() {
        return "No results yet.\n".to_string();
    }

    let width = rows
        .iter()
        .map(|r| r.display_name().chars().count())
        .max()
        .unwrap_or(0)
        .max("Player".len());

    let mut out = format!("{:>4}  {:<width$}  {:>5}  {:>6}\n", "#", "Player", "Wins", "Losses");
    for (position, row) in rows.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>4}  {:<width$}  {:>5}  {:>6}",
            position + 1,
            row.display_name(),
            row.wins,
            row.losses
        );
    }
    out
}
