use anyhow::{anyhow, Result};
use cadence_core::error::CoreError;
use cadence_core::models::{EditScope, EffectiveSubtask, OccurrenceId, StructuralChanges, SubtaskDraft};
use cadence_core::repository::Repository;
use cadence_core::session::CalendarSession;
use owo_colors::OwoColorize;

use crate::cli::{SubtaskCommand, SubtaskSubcommand};
use crate::config::Config;
use crate::util::{open_session, prompt_scope};
use crate::views::table::display_subtasks;

pub async fn subtask_command(repo: impl Repository, config: &Config, command: SubtaskCommand) -> Result<()> {
    match command.command {
        SubtaskSubcommand::List(command) => {
            let (mut session, id) = open_session(repo, config, &command.id).await?;
            let subtasks = session.subtasks(&id).await?;
            display_subtasks(&subtasks);
        }
        SubtaskSubcommand::Toggle(command) => {
            let (mut session, id) = open_session(repo, config, &command.id).await?;
            let subtasks = session.subtasks(&id).await?;
            let subtask = pick(&subtasks, command.index)?;
            let completed = !subtask.completed;
            session.toggle_subtask(&id, subtask.reference(), completed).await?;
            println!(
                "{} '{}' marked {}",
                "✓".green().bold(),
                subtask.text,
                if completed { "done" } else { "not done" }
            );
        }
        SubtaskSubcommand::Add(command) => {
            let (mut session, id) = open_session(repo, config, &command.id).await?;
            let mut drafts = current_drafts(&mut session, &id).await?;
            drafts.push(SubtaskDraft::new(command.text));
            let changes = apply_edit(&mut session, &id, &drafts, command.scope).await?;
            report(&changes);
        }
        SubtaskSubcommand::Edit(command) => {
            let (mut session, id) = open_session(repo, config, &command.id).await?;
            let mut drafts = current_drafts(&mut session, &id).await?;
            let position = index(drafts.len(), command.index)?;
            drafts[position].text = command.text;
            let changes = apply_edit(&mut session, &id, &drafts, command.scope).await?;
            report(&changes);
        }
        SubtaskSubcommand::Remove(command) => {
            let (mut session, id) = open_session(repo, config, &command.id).await?;
            let mut drafts = current_drafts(&mut session, &id).await?;
            let position = index(drafts.len(), command.index)?;
            drafts.remove(position);
            let changes = apply_edit(&mut session, &id, &drafts, command.scope).await?;
            report(&changes);
        }
    }
    Ok(())
}

async fn current_drafts<R: Repository>(session: &mut CalendarSession<R>, id: &OccurrenceId) -> Result<Vec<SubtaskDraft>> {
    Ok(session.subtasks(id).await?.iter().map(SubtaskDraft::from).collect())
}

/// Applies the edited list, asking for a scope when the change needs one and none was given.
async fn apply_edit<R: Repository>(
    session: &mut CalendarSession<R>,
    id: &OccurrenceId,
    drafts: &[SubtaskDraft],
    scope: Option<EditScope>,
) -> Result<StructuralChanges> {
    match session.edit_subtasks(id, drafts, scope).await {
        Err(CoreError::ScopeRequired(reason)) if scope.is_none() => match prompt_scope()? {
            Some(chosen) => Ok(session.edit_subtasks(id, drafts, Some(chosen)).await?),
            None => Err(CoreError::ScopeRequired(reason).into()),
        },
        other => Ok(other?),
    }
}

fn index(len: usize, position: usize) -> Result<usize> {
    if position == 0 || position > len {
        return Err(anyhow!(CoreError::InvalidInput(format!(
            "No subtask #{}, the list has {}",
            position, len
        ))));
    }
    Ok(position - 1)
}

fn pick(subtasks: &[EffectiveSubtask], position: usize) -> Result<EffectiveSubtask> {
    Ok(subtasks[index(subtasks.len(), position)?].clone())
}

fn report(changes: &StructuralChanges) {
    if changes.is_empty() {
        println!("No changes.");
    } else {
        println!("{} Subtasks updated: {}", "✓".green().bold(), changes.summary());
    }
}
