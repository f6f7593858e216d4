use clap::Parser;
use owo_colors::{OwoColorize, Style};
use cadence_core::db;
use cadence_core::error::CoreError;
use cadence_core::repository::SqliteRepository;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod parser;
mod util;
mod views;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("CADENCE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    if let Err(e) = run(cli).await {
        handle_error(e);
        std::process::exit(1);
    }
}

async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let config = config::Config::new()?;
    let pool = db::establish_connection(&config.database_path).await?;
    let repository = SqliteRepository::new(pool);

    match cli.command {
        cli::Commands::Add(command) => commands::add::add_event(&repository, &config, command).await,
        cli::Commands::List(command) => {
            commands::list::list_occurrences(repository, &config, command).await
        }
        cli::Commands::Move(command) => {
            commands::r#move::move_occurrence(repository, &config, command).await
        }
        cli::Commands::Edit(command) => {
            commands::edit::edit_occurrence(repository, &config, command).await
        }
        cli::Commands::Delete(command) => {
            commands::delete::delete_occurrence(repository, &config, command).await
        }
        cli::Commands::Restore(command) => {
            commands::restore::restore_day(repository, &config, command).await
        }
        cli::Commands::Recur(command) => {
            commands::recurrence::edit_recurrence(repository, &config, command).await
        }
        cli::Commands::Liberate(command) => {
            commands::liberate::liberate_occurrence(repository, &config, command).await
        }
        cli::Commands::Subtask(command) => {
            commands::subtask::subtask_command(repository, &config, command).await
        }
    }
}

fn handle_error(err: anyhow::Error) {
    let error_style = Style::new().red().bold();

    if let Some(core_error) = err.downcast_ref::<CoreError>() {
        match core_error {
            CoreError::NotFound(s) => {
                eprintln!("{} {}", "Error:".style(error_style), s);
            }
            CoreError::InvalidInput(s) => {
                eprintln!("{} Invalid input: {}", "Error:".style(error_style), s);
            }
            CoreError::InvalidRule(s) => {
                eprintln!("{} Invalid recurrence: {}", "Error:".style(error_style), s);
            }
            CoreError::InvalidOccurrenceId(s) => {
                eprintln!(
                    "{} '{}' is not an occurrence ID. Use an event ID like {} or {}",
                    "Error:".style(error_style),
                    s,
                    "12".yellow(),
                    "7_2025-01-13".yellow()
                );
            }
            CoreError::ScopeRequired(s) => {
                eprintln!("{} {}", "Error:".style(error_style), s);
                eprintln!(
                    "This event repeats. Pass {} or {} to choose where the change applies.",
                    "--scope this".yellow(),
                    "--scope series".yellow()
                );
            }
            CoreError::PartialDelete { deleted, failed } => {
                eprintln!(
                    "{} Deleted {} rows of the series, {} failed:",
                    "Error:".style(error_style),
                    deleted.len(),
                    failed.len()
                );
                for (id, reason) in failed {
                    eprintln!("  {} ({})", id.to_string().yellow(), reason);
                }
            }
            e if e.is_retryable() => {
                eprintln!("{} {}", "Error:".style(error_style), e);
                eprintln!("The change was not saved. Try again.");
            }
            _ => eprintln!("{} {}", "Error:".style(error_style), err),
        }
    } else {
        eprintln!("{} {:#}", "Error:".style(error_style), err);
    }
}
