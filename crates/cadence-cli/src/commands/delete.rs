use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::models::Occurrence;
use cadence_core::reconcile::CommitOutcome;
use cadence_core::repository::Repository;
use dialoguer::Select;
use owo_colors::OwoColorize;

use crate::cli::DeleteCommand;
use crate::config::Config;
use crate::util::{confirm, open_session, report_skipped, target_occurrence};

pub async fn delete_occurrence(repo: impl Repository, config: &Config, command: DeleteCommand) -> Result<()> {
    let (mut session, id) = open_session(repo, config, &command.id).await?;
    let occurrence = target_occurrence(&session, &id)?;

    let whole_series = if command.series {
        if occurrence.series_id().is_none() {
            return Err(anyhow!(CoreError::InvalidInput(format!(
                "Occurrence {} does not belong to a series",
                id
            ))));
        }
        if !command.force
            && !confirm(format!(
                "Delete every occurrence of '{}', including moved ones?",
                occurrence.title()
            ))
        {
            println!("Deletion cancelled.");
            return Ok(());
        }
        true
    } else if command.force {
        false
    } else if occurrence.is_series_instance() {
        match ask_series_or_day(&occurrence)? {
            Some(whole_series) => whole_series,
            None => {
                println!("Deletion cancelled.");
                return Ok(());
            }
        }
    } else {
        if !confirm(format!("Are you sure you want to delete '{}'?", occurrence.title())) {
            println!("Deletion cancelled.");
            return Ok(());
        }
        false
    };

    if whole_series {
        match session.delete_series(&id).await? {
            CommitOutcome::Applied(rows) => println!(
                "{} Deleted series '{}' ({} rows)",
                "✓".green().bold(),
                occurrence.title(),
                rows
            ),
            CommitOutcome::Skipped => report_skipped(&id),
        }
        return Ok(());
    }

    match session.delete_this_day(&id).await? {
        CommitOutcome::Applied(()) => {
            println!(
                "{} Deleted '{}' on {}",
                "✓".green().bold(),
                occurrence.title(),
                occurrence.start_utc().format("%Y-%m-%d")
            );
            if let (Some(series_id), Some(original)) = (occurrence.series_id(), occurrence.original_start()) {
                println!(
                    "  {} Undo with: cadence restore {} {}",
                    "→".blue(),
                    series_id,
                    original.format("%Y-%m-%d")
                );
            }
        }
        CommitOutcome::Skipped => report_skipped(&id),
    }
    Ok(())
}

/// `Some(true)` for the whole series, `Some(false)` for this day, `None` to cancel.
fn ask_series_or_day(occurrence: &Occurrence) -> Result<Option<bool>> {
    let options = [
        format!("This day only ({})", occurrence.start_utc().format("%Y-%m-%d")),
        "Entire series".to_string(),
        "Cancel".to_string(),
    ];
    println!("{}", "This event is part of a recurring series.".yellow());
    let selection = Select::new()
        .with_prompt("What would you like to delete?")
        .items(&options)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    })
}
