//! Subtask inheritance.
//!
//! Series occurrences (virtual or overridden) read the series master's
//! subtasks through a per-occurrence state layer keyed by [`InstanceKey`],
//! plus custom subtasks that exist only for that occurrence. Standalone
//! events and series masters own their subtasks directly.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::CoreError;
use crate::models::{
    EditScope, EffectiveSubtask, InstanceKey, NewCustomSubtask, NewSubtask, Occurrence,
    StructuralChanges, SubtaskDraft, SubtaskInstanceState, SubtaskModification, SubtaskOrigin,
    SubtaskRef, UpdateSubtask,
};
use crate::repository::SubtaskRepository;

pub mod migrator;

pub use migrator::{MigrationSummary, SubtaskMigrator};

pub struct SubtaskResolver<'r, R: ?Sized> {
    repo: &'r R,
}

impl<'r, R> SubtaskResolver<'r, R>
where
    R: SubtaskRepository + ?Sized,
{
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// The subtasks `occurrence` sees, ordered by `sort_order` with inherited
    /// items ahead of custom ones on ties.
    pub async fn resolve(&self, occurrence: &Occurrence) -> Result<Vec<EffectiveSubtask>, CoreError> {
        match (occurrence.is_series_instance(), occurrence.series_id(), occurrence.event()) {
            (true, Some(series_id), _) => {
                self.resolve_series_instance(series_id, &occurrence.instance_key()).await
            }
            (false, _, Some(event)) => {
                let masters = self.repo.list_subtasks(event.id).await?;
                Ok(masters
                    .into_iter()
                    .map(|m| EffectiveSubtask {
                        id: m.id,
                        origin: SubtaskOrigin::Master,
                        text: m.text,
                        completed: m.completed,
                        sort_order: m.sort_order,
                    })
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn resolve_series_instance(
        &self,
        series_id: i64,
        key: &InstanceKey,
    ) -> Result<Vec<EffectiveSubtask>, CoreError> {
        let masters = self.repo.list_subtasks(series_id).await?;
        let states: HashMap<i64, SubtaskInstanceState> = self
            .repo
            .list_instance_states(key)
            .await?
            .into_iter()
            .map(|s| (s.subtask_master_id, s))
            .collect();
        let customs = self.repo.list_custom_subtasks(key).await?;

        let mut resolved = Vec::with_capacity(masters.len() + customs.len());
        for master in masters {
            let state = states.get(&master.id);
            if state.is_some_and(|s| s.hidden) {
                continue;
            }
            resolved.push(EffectiveSubtask {
                id: master.id,
                origin: SubtaskOrigin::Master,
                text: master.text,
                completed: state.is_some_and(|s| s.completed),
                sort_order: master.sort_order,
            });
        }
        resolved.extend(customs.into_iter().map(|c| EffectiveSubtask {
            id: c.id,
            origin: SubtaskOrigin::Custom,
            text: c.text,
            completed: c.completed,
            sort_order: c.sort_order,
        }));

        resolved.sort_by_key(|s| (s.sort_order, s.origin, s.id));
        Ok(resolved)
    }

    /// Sets completion of one subtask as seen by `occurrence`.
    ///
    /// Inherited items on a series occurrence go to the instance-state layer
    /// so the series definition and sibling occurrences are untouched.
    pub async fn toggle(
        &self,
        occurrence: &Occurrence,
        subtask: SubtaskRef,
        completed: bool,
    ) -> Result<(), CoreError> {
        match subtask.origin {
            SubtaskOrigin::Custom => {
                self.repo
                    .update_custom_subtask(
                        subtask.id,
                        UpdateSubtask {
                            completed: Some(completed),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            SubtaskOrigin::Master if occurrence.is_series_instance() => {
                self.repo
                    .toggle_completion_for_instance(subtask.id, &occurrence.instance_key(), completed)
                    .await?;
            }
            SubtaskOrigin::Master => {
                self.repo
                    .update_subtask(
                        subtask.id,
                        UpdateSubtask {
                            completed: Some(completed),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Applies an edited subtask list.
    ///
    /// Completion changes are always applied. Structural changes on a series
    /// occurrence need an explicit scope; without one nothing is written and
    /// `CoreError::ScopeRequired` is returned.
    pub async fn apply_edit(
        &self,
        occurrence: &Occurrence,
        original: &[EffectiveSubtask],
        current: &[SubtaskDraft],
        scope: Option<EditScope>,
    ) -> Result<StructuralChanges, CoreError> {
        let changes = detect_structural_changes(current, original);
        let series_tied = occurrence.is_series_instance();

        if series_tied && !changes.is_empty() && scope.is_none() {
            return Err(CoreError::ScopeRequired(changes.summary()));
        }

        let drafts: HashMap<SubtaskRef, &SubtaskDraft> = current
            .iter()
            .filter_map(|d| d.existing.map(|r| (r, d)))
            .collect();

        for subtask in original {
            if let Some(draft) = drafts.get(&subtask.reference()) {
                if draft.completed != subtask.completed {
                    self.toggle(occurrence, subtask.reference(), draft.completed).await?;
                }
            }
        }

        if changes.is_empty() {
            return Ok(changes);
        }

        match (series_tied, scope) {
            (true, Some(EditScope::ThisOccurrence)) => {
                self.apply_to_occurrence(occurrence, &changes, &drafts).await?
            }
            (true, _) => {
                let series_id = occurrence.series_id().ok_or_else(|| {
                    CoreError::InvalidInput(format!("Occurrence {} has no series", occurrence.id()))
                })?;
                self.apply_to_owner(series_id, &changes).await?
            }
            (false, _) => {
                let owner = occurrence.event().map(|e| e.id).ok_or_else(|| {
                    CoreError::InvalidInput(format!("Occurrence {} has no row", occurrence.id()))
                })?;
                self.apply_to_owner(owner, &changes).await?
            }
        }

        debug!(id = %occurrence.id(), scope = ?scope, changes = %changes.summary(), "applied subtask edit");
        Ok(changes)
    }

    /// "This day only": custom additions plus hidden flags on inherited items.
    async fn apply_to_occurrence(
        &self,
        occurrence: &Occurrence,
        changes: &StructuralChanges,
        drafts: &HashMap<SubtaskRef, &SubtaskDraft>,
    ) -> Result<(), CoreError> {
        let key = occurrence.instance_key();

        for (position, draft) in &changes.added {
            self.repo
                .create_custom_subtask(NewCustomSubtask {
                    instance_key: key,
                    text: draft.text.clone(),
                    sort_order: *position,
                    completed: draft.completed,
                })
                .await?;
        }

        for removed in &changes.removed {
            match removed.origin {
                SubtaskOrigin::Master => {
                    self.repo.hide_for_instance(removed.id, &key).await?;
                }
                SubtaskOrigin::Custom => self.repo.delete_custom_subtask(removed.id).await?,
            }
        }

        for modification in &changes.modified {
            let original = &modification.original;
            match original.origin {
                SubtaskOrigin::Master => {
                    let completed = drafts
                        .get(&original.reference())
                        .map_or(original.completed, |d| d.completed);
                    self.repo.hide_for_instance(original.id, &key).await?;
                    self.repo
                        .create_custom_subtask(NewCustomSubtask {
                            instance_key: key,
                            text: modification.text.clone(),
                            sort_order: modification.sort_order,
                            completed,
                        })
                        .await?;
                }
                SubtaskOrigin::Custom => {
                    self.repo
                        .update_custom_subtask(
                            original.id,
                            UpdateSubtask {
                                text: Some(modification.text.clone()),
                                sort_order: Some(modification.sort_order),
                                completed: None,
                            },
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Writes the changes to the subtask definitions owned by `owner_event_id`.
    async fn apply_to_owner(
        &self,
        owner_event_id: i64,
        changes: &StructuralChanges,
    ) -> Result<(), CoreError> {
        for (position, draft) in &changes.added {
            self.repo
                .create_subtask(NewSubtask {
                    owner_event_id,
                    text: draft.text.clone(),
                    sort_order: *position,
                    completed: draft.completed,
                })
                .await?;
        }

        for removed in &changes.removed {
            match removed.origin {
                SubtaskOrigin::Master => self.repo.delete_subtask(removed.id).await?,
                SubtaskOrigin::Custom => self.repo.delete_custom_subtask(removed.id).await?,
            }
        }

        for modification in &changes.modified {
            let update = UpdateSubtask {
                text: Some(modification.text.clone()),
                sort_order: Some(modification.sort_order),
                completed: None,
            };
            match modification.original.origin {
                SubtaskOrigin::Master => {
                    self.repo.update_subtask(modification.original.id, update).await?;
                }
                SubtaskOrigin::Custom => {
                    self.repo.update_custom_subtask(modification.original.id, update).await?;
                }
            }
        }
        Ok(())
    }
}

/// Compares an edited list against what the occurrence showed before editing.
///
/// Completion-only differences are not structural. A retained item counts as
/// modified when its text changed or its position relative to the other
/// retained items changed.
pub fn detect_structural_changes(
    current: &[SubtaskDraft],
    original: &[EffectiveSubtask],
) -> StructuralChanges {
    let known: HashSet<SubtaskRef> = original.iter().map(|s| s.reference()).collect();
    let mut changes = StructuralChanges::default();

    let mut retained: Vec<(usize, SubtaskRef, &SubtaskDraft)> = Vec::new();
    for (position, draft) in current.iter().enumerate() {
        match draft.existing {
            Some(reference) if known.contains(&reference) => {
                retained.push((position, reference, draft));
            }
            _ => changes.added.push((position as i64, draft.clone())),
        }
    }

    let kept: HashSet<SubtaskRef> = retained.iter().map(|(_, r, _)| *r).collect();
    changes.removed = original
        .iter()
        .filter(|s| !kept.contains(&s.reference()))
        .cloned()
        .collect();

    let original_order: Vec<SubtaskRef> = original
        .iter()
        .map(|s| s.reference())
        .filter(|r| kept.contains(r))
        .collect();
    let by_ref: HashMap<SubtaskRef, &EffectiveSubtask> =
        original.iter().map(|s| (s.reference(), s)).collect();

    for (rank, (position, reference, draft)) in retained.iter().enumerate() {
        let Some(before) = by_ref.get(reference) else {
            continue;
        };
        let moved = original_order.get(rank) != Some(reference);
        if moved || before.text != draft.text {
            changes.modified.push(SubtaskModification {
                original: (*before).clone(),
                text: draft.text.clone(),
                sort_order: *position as i64,
            });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn effective(id: i64, origin: SubtaskOrigin, text: &str, completed: bool) -> EffectiveSubtask {
        EffectiveSubtask {
            id,
            origin,
            text: text.to_string(),
            completed,
            sort_order: id,
        }
    }

    fn original() -> Vec<EffectiveSubtask> {
        vec![
            effective(1, SubtaskOrigin::Master, "Agenda", false),
            effective(2, SubtaskOrigin::Master, "Notes", true),
            effective(3, SubtaskOrigin::Custom, "Book room", false),
        ]
    }

    fn drafts(list: &[EffectiveSubtask]) -> Vec<SubtaskDraft> {
        list.iter().map(SubtaskDraft::from).collect()
    }

    #[test]
    fn test_unchanged_list_has_no_changes() {
        let original = original();
        let changes = detect_structural_changes(&drafts(&original), &original);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_completion_only_change_is_not_structural() {
        let original = original();
        let mut current = drafts(&original);
        current[0].completed = true;
        current[1].completed = false;
        assert!(detect_structural_changes(&current, &original).is_empty());
    }

    #[test]
    fn test_addition_removal_and_text_change() {
        let original = original();
        let mut current = drafts(&original);
        current.remove(2);
        current[1].text = "Minutes".to_string();
        current.push(SubtaskDraft::new("Send recap"));

        let changes = detect_structural_changes(&current, &original);
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].0, 2);
        assert_eq!(changes.added[0].1.text, "Send recap");
        assert_eq!(changes.removed, vec![original[2].clone()]);
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].original.id, 2);
        assert_eq!(changes.modified[0].text, "Minutes");
        assert_eq!(changes.summary(), "1 added, 1 removed, 1 modified");
    }

    #[rstest]
    #[case(vec![1, 0, 2], 2)]
    #[case(vec![0, 2, 1], 2)]
    #[case(vec![2, 0, 1], 3)]
    fn test_reordering_is_structural(#[case] order: Vec<usize>, #[case] expected_modified: usize) {
        let original = original();
        let current: Vec<SubtaskDraft> = order.iter().map(|i| SubtaskDraft::from(&original[*i])).collect();
        let changes = detect_structural_changes(&current, &original);
        assert!(changes.added.is_empty());
        assert!(changes.removed.is_empty());
        assert_eq!(changes.modified.len(), expected_modified);
    }

    #[test]
    fn test_removing_item_does_not_mark_followers_moved() {
        let original = original();
        let mut current = drafts(&original);
        current.remove(0);
        let changes = detect_structural_changes(&current, &original);
        assert_eq!(changes.removed.len(), 1);
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn test_unknown_reference_counts_as_added() {
        let original = original();
        let mut current = drafts(&original);
        current.push(SubtaskDraft {
            existing: Some(SubtaskRef::master(99)),
            text: "Stale".to_string(),
            completed: false,
        });
        let changes = detect_structural_changes(&current, &original);
        assert_eq!(changes.added.len(), 1);
    }
}
