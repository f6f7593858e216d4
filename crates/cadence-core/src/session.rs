use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::materialize::{day_bounds, InstanceMaterializer, MaterializerConfig};
use crate::models::{
    EditScope, EffectiveSubtask, EventViewModel, InstanceKey, Occurrence, OccurrenceId,
    RecurrenceRule, StructuralChanges, SubtaskDraft, SubtaskRef, UpdateEvent,
};
use crate::reconcile::{CommitLocks, CommitOutcome, OverrideReconciler};
use crate::repository::Repository;
use crate::save_queue::SaveQueue;
use crate::subtasks::SubtaskResolver;

/// Cache state restored when a commit fails.
struct Snapshot {
    occurrences: Vec<EventViewModel>,
    subtasks: HashMap<InstanceKey, Vec<EffectiveSubtask>>,
}

/// A user's view of a date range.
///
/// Holds the materialized occurrences and resolved subtasks. Mutations update
/// the cache optimistically, commit through the reconciler, then reload on
/// success or restore the pre-mutation snapshot on failure.
pub struct CalendarSession<R> {
    repo: R,
    locks: CommitLocks,
    materializer: InstanceMaterializer,
    owner_id: i64,
    range: (NaiveDate, NaiveDate),
    occurrences: Vec<EventViewModel>,
    subtasks: HashMap<InstanceKey, Vec<EffectiveSubtask>>,
    edits: HashMap<OccurrenceId, SaveQueue<UpdateEvent>>,
}

impl<R: Repository> CalendarSession<R> {
    pub fn new(repo: R, owner_id: i64, config: MaterializerConfig) -> Self {
        let today = Utc::now().date_naive();
        Self {
            repo,
            locks: CommitLocks::new(),
            materializer: InstanceMaterializer::new(config),
            owner_id,
            range: (today, today),
            occurrences: Vec::new(),
            subtasks: HashMap::new(),
            edits: HashMap::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn locks(&self) -> &CommitLocks {
        &self.locks
    }

    pub fn range(&self) -> (NaiveDate, NaiveDate) {
        self.range
    }

    pub fn occurrences(&self) -> &[EventViewModel] {
        &self.occurrences
    }

    pub fn find(&self, id: &OccurrenceId) -> Option<&Occurrence> {
        self.occurrences
            .iter()
            .find(|v| v.id() == *id)
            .map(|v| &v.occurrence)
    }

    /// Loads `[start, end]` (inclusive days) and returns its occurrences.
    pub async fn load_range(&mut self, start: NaiveDate, end: NaiveDate) -> Result<&[EventViewModel], CoreError> {
        if end < start {
            return Err(CoreError::InvalidInput(format!(
                "Range end {} precedes its start {}",
                end, start
            )));
        }
        self.range = (start, end);
        self.refresh().await?;
        Ok(&self.occurrences)
    }

    /// Re-reads rows for the current range and rematerializes it.
    pub async fn refresh(&mut self) -> Result<(), CoreError> {
        let (start, end) = self.range;
        let (widened_start, widened_end) = self.materializer.widened_range(start, end);
        let (from, to) = day_bounds(widened_start, widened_end);

        let rows = self.repo.list_by_owner_and_range(self.owner_id, from, to).await?;
        self.occurrences = self.materializer.materialize(&rows, start, end);
        self.subtasks.clear();

        debug!(rows = rows.len(), occurrences = self.occurrences.len(), %start, %end, "CalendarSession: refreshed");
        Ok(())
    }

    /// Resolves (and caches) the subtasks of one occurrence.
    pub async fn subtasks(&mut self, id: &OccurrenceId) -> Result<Vec<EffectiveSubtask>, CoreError> {
        let occurrence = self.lookup(id)?;
        let key = occurrence.instance_key();
        if let Some(cached) = self.subtasks.get(&key) {
            return Ok(cached.clone());
        }
        let resolved = SubtaskResolver::new(&self.repo).resolve(&occurrence).await?;
        self.subtasks.insert(key, resolved.clone());
        Ok(resolved)
    }

    pub async fn move_occurrence(
        &mut self,
        id: &OccurrenceId,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        let occurrence = self.lookup(id)?;
        let snapshot = self.snapshot();

        if let Some(index) = self.occurrences.iter().position(|v| v.id() == *id) {
            let mut moved = self.occurrences.remove(index).occurrence;
            moved.set_times(start_utc, end_utc);
            if let Some(view) = self.materializer.apply_visibility(moved) {
                self.occurrences.push(view);
                self.sort_occurrences();
            }
        }

        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .reschedule(&occurrence, start_utc, end_utc)
            .await;
        self.settle(snapshot, result).await
    }

    pub async fn update_fields(
        &mut self,
        id: &OccurrenceId,
        patch: UpdateEvent,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        let occurrence = self.lookup(id)?;
        let snapshot = self.snapshot();

        if let Some(view) = self.occurrences.iter_mut().find(|v| v.id() == *id) {
            patch_in_place(&mut view.occurrence, &patch);
        }

        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .update_fields(&occurrence, patch)
            .await;
        self.settle(snapshot, result).await
    }

    /// Queues a field edit; nothing is written until [`flush_edits`](Self::flush_edits).
    pub fn stage_edit(&mut self, id: OccurrenceId, patch: UpdateEvent) {
        self.edits.entry(id).or_default().enqueue(patch);
    }

    /// Sends the coalesced staged edits for `id` as one commit.
    pub async fn flush_edits(&mut self, id: &OccurrenceId) -> Result<CommitOutcome<Occurrence>, CoreError> {
        let Some(ticket) = self.edits.get_mut(id).and_then(|q| q.begin()) else {
            return Ok(CommitOutcome::Skipped);
        };
        let generation = ticket.generation;

        match self.update_fields(id, ticket.payload.clone()).await {
            Ok(CommitOutcome::Skipped) => {
                debug!(%id, generation, "CalendarSession: flush skipped, keeping staged edits");
                if let Some(queue) = self.edits.get_mut(id) {
                    queue.fail(ticket);
                }
                Ok(CommitOutcome::Skipped)
            }
            Ok(CommitOutcome::Applied(updated)) => {
                if let Some(mut queue) = self.edits.remove(id) {
                    if !queue.finish(generation) {
                        debug!(%id, generation, "CalendarSession: response superseded by newer edits");
                    }
                    if !queue.is_idle() {
                        self.edits.insert(updated.id(), queue);
                    }
                }
                Ok(CommitOutcome::Applied(updated))
            }
            Err(e) => {
                if let Some(queue) = self.edits.get_mut(id) {
                    queue.fail(ticket);
                }
                Err(e)
            }
        }
    }

    pub fn has_staged_edits(&self, id: &OccurrenceId) -> bool {
        self.edits.get(id).is_some_and(|q| q.has_pending())
    }

    pub async fn delete_this_day(&mut self, id: &OccurrenceId) -> Result<CommitOutcome<()>, CoreError> {
        let occurrence = self.lookup(id)?;
        let snapshot = self.snapshot();
        self.occurrences.retain(|v| v.id() != *id);

        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .delete_this_day(&occurrence)
            .await;
        self.settle(snapshot, result).await
    }

    pub async fn restore_day(&mut self, series_id: i64, date: NaiveDate) -> Result<CommitOutcome<bool>, CoreError> {
        let snapshot = self.snapshot();
        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .restore_day(series_id, date)
            .await;
        self.settle(snapshot, result).await
    }

    pub async fn edit_recurrence(
        &mut self,
        id: &OccurrenceId,
        rule: Option<RecurrenceRule>,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        let occurrence = self.lookup(id)?;
        let snapshot = self.snapshot();
        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .edit_recurrence(&occurrence, rule)
            .await;
        self.settle(snapshot, result).await
    }

    /// Changes the rule of the whole series `series_id` through its master.
    pub async fn edit_series_recurrence(
        &mut self,
        series_id: i64,
        rule: Option<RecurrenceRule>,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        let master = self
            .repo
            .find_event_by_id(series_id)
            .await?
            .filter(|event| event.is_recurring)
            .ok_or_else(|| CoreError::NotFound(format!("Series {}", series_id)))?;
        let occurrence = Occurrence::SeriesMaster(master);
        let snapshot = self.snapshot();
        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .edit_recurrence(&occurrence, rule)
            .await;
        self.settle(snapshot, result).await
    }

    pub async fn liberate(&mut self, id: &OccurrenceId) -> Result<CommitOutcome<Occurrence>, CoreError> {
        let occurrence = self.lookup(id)?;
        let snapshot = self.snapshot();
        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .liberate(&occurrence)
            .await;
        self.settle(snapshot, result).await
    }

    pub async fn delete_series(&mut self, id: &OccurrenceId) -> Result<CommitOutcome<usize>, CoreError> {
        let occurrence = self.lookup(id)?;
        let series_id = occurrence.series_id();
        let snapshot = self.snapshot();
        self.occurrences
            .retain(|v| series_id.is_none() || v.occurrence.series_id() != series_id);

        let result = OverrideReconciler::new(&self.repo, &self.locks)
            .delete_whole_series(&occurrence)
            .await;
        self.settle(snapshot, result).await
    }

    pub async fn toggle_subtask(
        &mut self,
        id: &OccurrenceId,
        subtask: SubtaskRef,
        completed: bool,
    ) -> Result<(), CoreError> {
        let occurrence = self.lookup(id)?;
        let snapshot = self.snapshot();

        if let Some(cached) = self.subtasks.get_mut(&occurrence.instance_key()) {
            if let Some(item) = cached.iter_mut().find(|s| s.reference() == subtask) {
                item.completed = completed;
            }
        }

        let result = SubtaskResolver::new(&self.repo)
            .toggle(&occurrence, subtask, completed)
            .await;
        match result {
            Ok(()) => {
                self.subtasks.remove(&occurrence.instance_key());
                Ok(())
            }
            Err(e) => {
                self.restore(snapshot);
                Err(commit_error(e))
            }
        }
    }

    /// Applies an edited subtask list to one occurrence.
    ///
    /// Returns `CoreError::ScopeRequired` when the edit restructures a series
    /// occurrence's list and `scope` is `None`.
    pub async fn edit_subtasks(
        &mut self,
        id: &OccurrenceId,
        current: &[SubtaskDraft],
        scope: Option<EditScope>,
    ) -> Result<StructuralChanges, CoreError> {
        let occurrence = self.lookup(id)?;
        let original = self.subtasks(id).await?;

        let result = SubtaskResolver::new(&self.repo)
            .apply_edit(&occurrence, &original, current, scope)
            .await;

        // Series-wide edits change what every occurrence of the series sees.
        self.subtasks.clear();
        result.map_err(commit_error)
    }

    // ------------------------------------------------------------------------

    fn lookup(&self, id: &OccurrenceId) -> Result<Occurrence, CoreError> {
        self.find(id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("Occurrence {} is not in the loaded range", id)))
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            occurrences: self.occurrences.clone(),
            subtasks: self.subtasks.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.occurrences = snapshot.occurrences;
        self.subtasks = snapshot.subtasks;
    }

    fn sort_occurrences(&mut self) {
        self.occurrences.sort_by(|a, b| {
            a.occurrence
                .start_utc()
                .cmp(&b.occurrence.start_utc())
                .then_with(|| a.id().cmp(&b.id()))
        });
    }

    async fn settle<T>(
        &mut self,
        snapshot: Snapshot,
        result: Result<CommitOutcome<T>, CoreError>,
    ) -> Result<CommitOutcome<T>, CoreError> {
        match result {
            Ok(CommitOutcome::Skipped) => {
                self.restore(snapshot);
                Ok(CommitOutcome::Skipped)
            }
            Ok(applied) => {
                if let Err(e) = self.refresh().await {
                    warn!(error = %e, "CalendarSession: reload after commit failed, keeping optimistic state");
                }
                Ok(applied)
            }
            Err(e) => {
                debug!(error = %e, "CalendarSession: commit failed, restoring snapshot");
                self.restore(snapshot);
                Err(commit_error(e))
            }
        }
    }
}

/// Storage failures surface as a retryable `CommitFailed`; validation errors pass through.
fn commit_error(error: CoreError) -> CoreError {
    match error {
        CoreError::Database(_) | CoreError::Io(_) => CoreError::CommitFailed(Box::new(error)),
        other => other,
    }
}

fn patch_in_place(occurrence: &mut Occurrence, patch: &UpdateEvent) {
    match occurrence {
        Occurrence::Virtual(instance) => {
            if let Some(title) = &patch.title {
                instance.title = title.clone();
            }
            if let Some(description) = &patch.description {
                instance.description = description.clone();
            }
            if let Some(color) = &patch.color {
                instance.color = color.clone();
            }
        }
        Occurrence::SeriesMaster(event) | Occurrence::Override(event) | Occurrence::Standalone(event) => {
            if let Err(e) = patch.apply_to(event) {
                debug!(error = %e, "CalendarSession: optimistic patch rejected");
            }
        }
    }
}
