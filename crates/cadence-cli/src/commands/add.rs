use anyhow::Result;
use cadence_core::models::NewEvent;
use cadence_core::recurrence::RecurrenceEngine;
use cadence_core::repository::EventRepository;
use chrono::Duration;
use owo_colors::{OwoColorize, Style};

use crate::cli::AddCommand;
use crate::config::Config;
use crate::parser::{parse_datetime, parse_rule};

const PREVIEW_OCCURRENCES: usize = 3;

pub async fn add_event(repo: &impl EventRepository, config: &Config, command: AddCommand) -> Result<()> {
    let start_utc = parse_datetime(&command.start)?;
    let end_utc = match &command.end {
        Some(end) => parse_datetime(end)?,
        None => start_utc + Duration::minutes(command.duration),
    };
    let recurrence = parse_rule(&command.rule)?;

    let event = repo
        .create_event(NewEvent {
            owner_id: config.owner_id,
            title: command.title,
            description: command.description,
            start_utc,
            end_utc,
            color: command.color,
            recurrence: recurrence.clone(),
            ..Default::default()
        })
        .await?;

    let success_style = Style::new().green().bold();
    let info_style = Style::new().blue();

    match recurrence {
        Some(rule) => {
            println!(
                "{} Created recurring event: {}",
                "✓".style(success_style),
                event.title.bright_white().bold()
            );
            println!("  {} Series ID: {}", "→".style(info_style), event.id.to_string().yellow());

            let first = start_utc.date_naive();
            let upcoming = RecurrenceEngine::expand(&rule, start_utc, first, first + Duration::days(366))?;
            if !upcoming.is_empty() {
                let preview: Vec<String> = upcoming
                    .iter()
                    .take(PREVIEW_OCCURRENCES)
                    .map(|d| d.format("%a %Y-%m-%d").to_string())
                    .collect();
                println!("  {} Next: {}", "→".style(info_style), preview.join(", ").cyan());
            }
        }
        None => {
            println!(
                "{} Created event: {}",
                "✓".style(success_style),
                event.title.bright_white().bold()
            );
            println!("  {} Event ID: {}", "→".style(info_style), event.id.to_string().yellow());
            println!(
                "  {} {}",
                "→".style(info_style),
                event.start_utc.format("%Y-%m-%d %H:%M").to_string().cyan()
            );
        }
    }

    Ok(())
}
