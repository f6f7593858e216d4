use std::collections::HashSet;
use tracing::debug;

use crate::error::CoreError;
use crate::models::{
    EffectiveSubtask, InstanceKey, NewCustomSubtask, NewSubtask, Occurrence, SubtaskOrigin,
};
use crate::repository::SubtaskRepository;
use crate::subtasks::SubtaskResolver;

/// What a migration wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub instance_states: usize,
    pub masters_created: usize,
    pub customs_created: usize,
    pub masters_deleted: usize,
}

/// Carries subtasks (and their completion) from one occurrence to another
/// when an occurrence changes representation.
pub struct SubtaskMigrator<'r, R: ?Sized> {
    repo: &'r R,
}

impl<'r, R> SubtaskMigrator<'r, R>
where
    R: SubtaskRepository + ?Sized,
{
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// Migrates the effective subtasks of `old` onto `new`.
    ///
    /// # Behavior
    ///
    /// - Same series: completed inherited items become instance state under
    ///   `new`'s key; custom items are copied when the key changes.
    /// - `new` is a persisted owner (series master or standalone): subtask
    ///   definitions are created under it, skipping identical ones. A new
    ///   series master also gets the completion recorded on its first occurrence.
    /// - `new` belongs to a different series: items are copied as custom subtasks.
    ///
    /// Definitions owned by `old` are removed only when `old` was a standalone
    /// row distinct from `new`. Running the same migration twice writes nothing new.
    pub async fn migrate(&self, old: &Occurrence, new: &Occurrence) -> Result<MigrationSummary, CoreError> {
        let subtasks = SubtaskResolver::new(self.repo).resolve(old).await?;
        let mut summary = MigrationSummary::default();

        let same_series = old.is_series_instance()
            && new.is_series_instance()
            && old.series_id() == new.series_id();

        if same_series {
            let new_key = new.instance_key();
            for subtask in subtasks.iter().filter(|s| s.origin == SubtaskOrigin::Master && s.completed) {
                self.repo
                    .toggle_completion_for_instance(subtask.id, &new_key, true)
                    .await?;
                summary.instance_states += 1;
            }
            if old.instance_key() != new_key {
                let customs: Vec<&EffectiveSubtask> = subtasks
                    .iter()
                    .filter(|s| s.origin == SubtaskOrigin::Custom)
                    .collect();
                summary.customs_created += self.copy_as_custom(&customs, new_key).await?;
            }
        } else {
            match new {
                Occurrence::SeriesMaster(owner) | Occurrence::Standalone(owner) => {
                    let existing = self.repo.list_subtasks(owner.id).await?;
                    let mut first_occurrence_completed = Vec::new();

                    for subtask in &subtasks {
                        let identical = existing
                            .iter()
                            .find(|m| m.text == subtask.text && m.completed == subtask.completed);
                        let master_id = match identical {
                            Some(m) => m.id,
                            None => {
                                let created = self
                                    .repo
                                    .create_subtask(NewSubtask {
                                        owner_event_id: owner.id,
                                        text: subtask.text.clone(),
                                        sort_order: subtask.sort_order,
                                        completed: subtask.completed,
                                    })
                                    .await?;
                                summary.masters_created += 1;
                                created.id
                            }
                        };
                        if subtask.completed {
                            first_occurrence_completed.push(master_id);
                        }
                    }

                    if let Occurrence::SeriesMaster(master) = new {
                        let first_key = InstanceKey::Series {
                            series_id: master.id,
                            date: master.start_utc.date_naive(),
                        };
                        for master_id in first_occurrence_completed {
                            self.repo
                                .toggle_completion_for_instance(master_id, &first_key, true)
                                .await?;
                            summary.instance_states += 1;
                        }
                    }
                }
                Occurrence::Override(_) | Occurrence::Virtual(_) => {
                    let all: Vec<&EffectiveSubtask> = subtasks.iter().collect();
                    summary.customs_created += self.copy_as_custom(&all, new.instance_key()).await?;
                }
            }
        }

        if let (Occurrence::Standalone(old_row), Some(new_row)) = (old, new.event()) {
            if old_row.id != new_row.id {
                for subtask in subtasks.iter().filter(|s| s.origin == SubtaskOrigin::Master) {
                    self.repo.delete_subtask(subtask.id).await?;
                    summary.masters_deleted += 1;
                }
            }
        }

        debug!(from = %old.id(), to = %new.id(), ?summary, "migrated subtasks");
        Ok(summary)
    }

    async fn copy_as_custom(
        &self,
        subtasks: &[&EffectiveSubtask],
        key: InstanceKey,
    ) -> Result<usize, CoreError> {
        let present: HashSet<String> = self
            .repo
            .list_custom_subtasks(&key)
            .await?
            .into_iter()
            .map(|c| c.text)
            .collect();

        let mut created = 0;
        for subtask in subtasks.iter().filter(|s| !present.contains(&s.text)) {
            self.repo
                .create_custom_subtask(NewCustomSubtask {
                    instance_key: key,
                    text: subtask.text.clone(),
                    sort_order: subtask.sort_order,
                    completed: subtask.completed,
                })
                .await?;
            created += 1;
        }
        Ok(created)
    }
}
