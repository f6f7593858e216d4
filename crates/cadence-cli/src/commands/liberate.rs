use anyhow::Result;
use cadence_core::reconcile::CommitOutcome;
use cadence_core::repository::Repository;
use owo_colors::OwoColorize;

use crate::cli::LiberateCommand;
use crate::config::Config;
use crate::util::{open_session, report_skipped};

pub async fn liberate_occurrence(repo: impl Repository, config: &Config, command: LiberateCommand) -> Result<()> {
    let (mut session, id) = open_session(repo, config, &command.id).await?;

    match session.liberate(&id).await? {
        CommitOutcome::Applied(standalone) => {
            println!(
                "{} Detached '{}' from its series",
                "✓".green().bold(),
                standalone.title()
            );
            println!("  {} Event ID: {}", "→".blue(), standalone.id().to_string().yellow());
        }
        CommitOutcome::Skipped => report_skipped(&id),
    }
    Ok(())
}
