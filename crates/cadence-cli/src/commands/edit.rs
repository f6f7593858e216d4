use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::models::UpdateEvent;
use cadence_core::reconcile::CommitOutcome;
use cadence_core::repository::Repository;
use owo_colors::OwoColorize;

use crate::cli::EditCommand;
use crate::config::Config;
use crate::util::{open_session, report_skipped};

pub async fn edit_occurrence(repo: impl Repository, config: &Config, command: EditCommand) -> Result<()> {
    let description = if command.description_clear {
        Some(None)
    } else {
        command.description.map(Some)
    };
    let color = if command.color_clear {
        Some(None)
    } else {
        command.color.map(Some)
    };
    let patch = UpdateEvent {
        title: command.title,
        description,
        color,
        ..Default::default()
    };
    if patch.is_empty() {
        return Err(anyhow!(CoreError::InvalidInput(
            "Nothing to change, pass --title, --description or --color".to_string()
        )));
    }

    let (mut session, id) = open_session(repo, config, &command.id).await?;
    session.stage_edit(id, patch);
    match session.flush_edits(&id).await? {
        CommitOutcome::Applied(updated) => {
            println!("{} Updated '{}'", "✓".green().bold(), updated.title());
            if updated.id() != id {
                println!("  {} This day is now stored as {}", "→".blue(), updated.id().to_string().yellow());
            }
        }
        CommitOutcome::Skipped => report_skipped(&id),
    }
    Ok(())
}
