use std::io::IsTerminal;

use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::materialize::MaterializerConfig;
use cadence_core::models::{EditScope, Occurrence, OccurrenceId};
use cadence_core::repository::Repository;
use cadence_core::session::CalendarSession;
use chrono::Duration;
use dialoguer::{Confirm, Select};
use owo_colors::OwoColorize;

use crate::config::Config;

/// How far past a series start to look for its first occurrence.
const FIRST_OCCURRENCE_SEARCH_DAYS: i64 = 400;

/// Materializer settings for id lookups: the whole day is visible so nothing the
/// user can address is hidden.
pub fn lookup_config(config: &Config) -> MaterializerConfig {
    MaterializerConfig {
        visible_start_hour: 0,
        visible_end_hour: 24,
        ..config.materializer.clone()
    }
}

/// Opens a session whose loaded range contains the occurrence named by `input`.
///
/// A series master id resolves to the first occurrence of its series.
pub async fn open_session<R: Repository>(
    repo: R,
    config: &Config,
    input: &str,
) -> Result<(CalendarSession<R>, OccurrenceId)> {
    let id: OccurrenceId = input.parse()?;
    let (start, end, master_id) = match id {
        OccurrenceId::Virtual(virtual_id) => (virtual_id.date, virtual_id.date, None),
        OccurrenceId::Persisted(event_id) => {
            let event = repo
                .find_event_by_id(event_id)
                .await?
                .ok_or_else(|| CoreError::NotFound(format!("No event with ID {}", event_id)))?;
            if event.is_recurring {
                let start = event.start_utc.date_naive();
                (start, start + Duration::days(FIRST_OCCURRENCE_SEARCH_DAYS), Some(event.id))
            } else {
                (event.start_utc.date_naive(), event.end_utc.date_naive(), None)
            }
        }
    };

    let mut session = CalendarSession::new(repo, config.owner_id, lookup_config(config));
    session.load_range(start, end).await?;

    let target = match master_id {
        Some(series_id) => session
            .occurrences()
            .iter()
            .find(|view| view.occurrence.series_id() == Some(series_id))
            .map(|view| view.id())
            .ok_or_else(|| CoreError::NotFound(format!("Series {} has no upcoming occurrence", series_id)))?,
        None => id,
    };
    if session.find(&target).is_none() {
        return Err(CoreError::NotFound(format!("No occurrence with ID {}", input)).into());
    }
    Ok((session, target))
}

/// The occurrence a session was opened on.
pub fn target_occurrence<R: Repository>(session: &CalendarSession<R>, id: &OccurrenceId) -> Result<Occurrence> {
    session
        .find(id)
        .cloned()
        .ok_or_else(|| anyhow!(CoreError::NotFound(format!("No occurrence with ID {}", id))))
}

/// Asks where a structural change applies. `None` when nobody can answer.
pub fn prompt_scope() -> Result<Option<EditScope>> {
    if !std::io::stdin().is_terminal() {
        return Ok(None);
    }
    let options = ["This occurrence only", "Entire series"];
    println!("{}", "This event is part of a recurring series.".yellow());
    let selection = Select::new()
        .with_prompt("Where should the change apply?")
        .items(&options)
        .default(0)
        .interact()?;
    Ok(Some(match selection {
        0 => EditScope::ThisOccurrence,
        _ => EditScope::EntireSeries,
    }))
}

pub fn confirm(prompt: String) -> bool {
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

pub fn report_skipped(id: &OccurrenceId) {
    println!("{} Another change to {} is still being saved, nothing was changed.", "!".yellow(), id);
}
