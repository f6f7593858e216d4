use anyhow::Result;
use cadence_core::reconcile::CommitOutcome;
use cadence_core::repository::Repository;
use chrono::Duration;
use owo_colors::OwoColorize;

use crate::cli::MoveCommand;
use crate::config::Config;
use crate::parser::parse_datetime;
use crate::util::{open_session, report_skipped, target_occurrence};

pub async fn move_occurrence(repo: impl Repository, config: &Config, command: MoveCommand) -> Result<()> {
    let (mut session, id) = open_session(repo, config, &command.id).await?;
    let occurrence = target_occurrence(&session, &id)?;

    let start_utc = parse_datetime(&command.to)?;
    let length = match command.duration {
        Some(minutes) => Duration::minutes(minutes),
        None => occurrence.end_utc() - occurrence.start_utc(),
    };

    match session.move_occurrence(&id, start_utc, start_utc + length).await? {
        CommitOutcome::Applied(moved) => {
            println!(
                "{} Moved '{}' to {}",
                "✓".green().bold(),
                moved.title(),
                moved.start_utc().format("%Y-%m-%d %H:%M").to_string().cyan()
            );
            println!("  {} ID: {}", "→".blue(), moved.id().to_string().yellow());
        }
        CommitOutcome::Skipped => report_skipped(&id),
    }
    Ok(())
}
