use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::models::OccurrenceKind;
use cadence_core::reconcile::CommitOutcome;
use cadence_core::repository::Repository;
use owo_colors::OwoColorize;

use crate::cli::RecurCommand;
use crate::config::Config;
use crate::parser::parse_rule;
use crate::util::{open_session, report_skipped, target_occurrence};

pub async fn edit_recurrence(repo: impl Repository, config: &Config, command: RecurCommand) -> Result<()> {
    let rule = parse_rule(&command.rule)?;
    if rule.is_none() && !command.clear {
        return Err(anyhow!(CoreError::InvalidInput(
            "Pass --every to set a recurrence or --clear to remove it".to_string()
        )));
    }

    let (mut session, id) = open_session(repo, config, &command.id).await?;
    let before = target_occurrence(&session, &id)?;

    if command.series {
        let series_id = before.series_id().ok_or_else(|| {
            anyhow!(CoreError::InvalidInput(format!("Occurrence {} does not belong to a series", id)))
        })?;
        match session.edit_series_recurrence(series_id, rule).await? {
            CommitOutcome::Applied(updated) if command.clear => {
                println!("{} '{}' no longer repeats", "✓".green().bold(), updated.title());
            }
            CommitOutcome::Applied(updated) => {
                println!("{} Updated recurrence of series '{}'", "✓".green().bold(), updated.title());
            }
            CommitOutcome::Skipped => report_skipped(&id),
        }
        return Ok(());
    }

    match session.edit_recurrence(&id, rule).await? {
        CommitOutcome::Applied(updated) => {
            let is_master = updated.kind() == OccurrenceKind::SeriesMaster;
            let promoted = is_master && before.kind() == OccurrenceKind::Standalone && before.id() == updated.id();
            let spawned = is_master && !promoted && before.series_id() != updated.series_id();
            if promoted {
                println!("{} '{}' now repeats", "✓".green().bold(), updated.title());
                println!("  {} Series ID: {}", "→".blue(), updated.id().to_string().yellow());
            } else if spawned {
                println!(
                    "{} Started a new series from '{}'",
                    "✓".green().bold(),
                    updated.title()
                );
                println!("  {} Series ID: {}", "→".blue(), updated.id().to_string().yellow());
            } else if command.clear {
                println!("{} '{}' no longer repeats", "✓".green().bold(), updated.title());
            } else {
                println!("{} Updated recurrence of '{}'", "✓".green().bold(), updated.title());
            }
        }
        CommitOutcome::Skipped => report_skipped(&id),
    }
    Ok(())
}
