use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::repository::Repository;
use cadence_core::session::CalendarSession;
use chrono::{Duration, Utc};

use crate::cli::ListCommand;
use crate::config::Config;
use crate::parser::parse_date;
use crate::views::table::{display_occurrences, ViewOccurrence};

const DEFAULT_SPAN_DAYS: i64 = 6;

pub async fn list_occurrences(repo: impl Repository, config: &Config, command: ListCommand) -> Result<()> {
    let from = match &command.from {
        Some(from) => parse_date(from)?,
        None => Utc::now().date_naive(),
    };
    let to = match &command.to {
        Some(to) => parse_date(to)?,
        None => from + Duration::days(DEFAULT_SPAN_DAYS),
    };
    if to < from {
        return Err(anyhow!(CoreError::InvalidInput(format!(
            "Range ends ({}) before it starts ({})",
            to, from
        ))));
    }

    let mut session = CalendarSession::new(repo, config.owner_id, config.materializer.clone());
    let views = session.load_range(from, to).await?.to_vec();

    let mut rows = Vec::with_capacity(views.len());
    for view in &views {
        let mut row = ViewOccurrence::from(view);
        if command.subtasks {
            let subtasks = session.subtasks(&view.id()).await?;
            row.subtasks = Some((subtasks.iter().filter(|s| s.completed).count(), subtasks.len()));
        }
        rows.push(row);
    }

    display_occurrences(&rows);
    Ok(())
}
