use anyhow::Result;
use cadence_core::reconcile::CommitOutcome;
use cadence_core::repository::Repository;
use cadence_core::session::CalendarSession;
use owo_colors::OwoColorize;

use crate::cli::RestoreCommand;
use crate::config::Config;
use crate::parser::parse_date;
use crate::util::lookup_config;

pub async fn restore_day(repo: impl Repository, config: &Config, command: RestoreCommand) -> Result<()> {
    let date = parse_date(&command.date)?;
    let mut session = CalendarSession::new(repo, config.owner_id, lookup_config(config));
    session.load_range(date, date).await?;

    match session.restore_day(command.series_id, date).await? {
        CommitOutcome::Applied(true) => println!(
            "{} Restored {} in series {}",
            "✓".green().bold(),
            date.format("%Y-%m-%d").to_string().cyan(),
            command.series_id
        ),
        CommitOutcome::Applied(false) => println!(
            "Nothing to restore: series {} has no deleted occurrence on {}.",
            command.series_id,
            date.format("%Y-%m-%d")
        ),
        CommitOutcome::Skipped => println!("{} Another change to that day is still being saved.", "!".yellow()),
    }
    Ok(())
}
