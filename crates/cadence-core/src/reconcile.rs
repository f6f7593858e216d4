use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::models::{
    Event, NewEvent, Occurrence, OccurrenceId, RecurrenceRule, UpdateEvent, VirtualId,
    VirtualInstance,
};
use crate::recurrence::RecurrenceEngine;
use crate::repository::Repository;
use crate::subtasks::SubtaskMigrator;

// ============================================================================
// Commit Guard
// ============================================================================

/// Set of occurrence ids with a commit in flight.
#[derive(Debug, Clone, Default)]
pub struct CommitLocks {
    held: Arc<Mutex<HashSet<OccurrenceId>>>,
}

impl CommitLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id`, or returns `None` while another commit for it is outstanding.
    pub fn try_acquire(&self, id: OccurrenceId) -> Option<CommitGuard> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(id) {
            return None;
        }
        Some(CommitGuard {
            held: Arc::clone(&self.held),
            id,
        })
    }

    pub fn is_locked(&self, id: &OccurrenceId) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }
}

/// Releases its occurrence id when dropped.
#[derive(Debug)]
pub struct CommitGuard {
    held: Arc<Mutex<HashSet<OccurrenceId>>>,
    id: OccurrenceId,
}

impl Drop for CommitGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Result of a guarded commit. `Skipped` means another commit for the same
/// occurrence was in flight and nothing was written.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome<T> {
    Applied(T),
    Skipped,
}

impl<T> CommitOutcome<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommitOutcome::Applied(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            CommitOutcome::Applied(value) => Some(value),
            CommitOutcome::Skipped => None,
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// OverrideReconciler: turns user edits on occurrences into row writes.
///
/// Every entry point receives the occurrence the caller is looking at and
/// decides, from its variant alone, which rows to create, update or delete:
///
/// - a virtual occurrence is persisted as an override before it is changed
/// - an override or standalone event is changed in place
/// - a series master change affects the whole series
pub struct OverrideReconciler<'r, R: ?Sized> {
    repo: &'r R,
    locks: &'r CommitLocks,
}

macro_rules! acquire_or_skip {
    ($self:ident, $id:expr) => {{
        let id: OccurrenceId = $id;
        match $self.locks.try_acquire(id) {
            Some(guard) => guard,
            None => {
                debug!(%id, "OverrideReconciler: commit already in flight, skipping");
                return Ok(CommitOutcome::Skipped);
            }
        }
    }};
}

impl<'r, R> OverrideReconciler<'r, R>
where
    R: Repository + ?Sized,
{
    pub fn new(repo: &'r R, locks: &'r CommitLocks) -> Self {
        Self { repo, locks }
    }

    /// Moves or resizes one occurrence.
    pub async fn reschedule(
        &self,
        occurrence: &Occurrence,
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        if end_utc < start_utc {
            return Err(CoreError::InvalidInput(
                "Event end must not precede its start".to_string(),
            ));
        }
        let _guard = acquire_or_skip!(self, occurrence.id());

        let patch = UpdateEvent::reschedule(start_utc, end_utc);
        let updated = self.apply_patch(occurrence, patch).await?;
        info!(from = %occurrence.id(), to = %updated.id(), start = %start_utc, "rescheduled occurrence");
        Ok(CommitOutcome::Applied(updated))
    }

    /// Changes title, description or color of one occurrence.
    pub async fn update_fields(
        &self,
        occurrence: &Occurrence,
        patch: UpdateEvent,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        if patch.recurrence.is_some()
            || patch.series_id.is_some()
            || patch.original_start_utc.is_some()
            || patch.is_cancelled.is_some()
        {
            return Err(CoreError::InvalidInput(
                "Series membership and recurrence are changed through dedicated operations".to_string(),
            ));
        }
        if patch.is_empty() {
            return Ok(CommitOutcome::Applied(occurrence.clone()));
        }
        let _guard = acquire_or_skip!(self, occurrence.id());

        let updated = self.apply_patch(occurrence, patch).await?;
        Ok(CommitOutcome::Applied(updated))
    }

    /// Deletes only the selected occurrence, leaving the rest of its series.
    ///
    /// Series dates are suppressed with a cancelled override so they can be
    /// brought back with [`restore_day`](Self::restore_day).
    pub async fn delete_this_day(&self, occurrence: &Occurrence) -> Result<CommitOutcome<()>, CoreError> {
        if let Occurrence::SeriesMaster(master) = occurrence {
            return Err(CoreError::InvalidInput(format!(
                "Event {} is a series definition, delete the whole series instead",
                master.id
            )));
        }
        let _guard = acquire_or_skip!(self, occurrence.id());

        if let Occurrence::Standalone(event) = occurrence {
            self.repo.delete_event(event.id).await?;
        } else {
            self.apply_patch(occurrence, UpdateEvent::cancel()).await?;
        }
        info!(id = %occurrence.id(), "deleted single occurrence");
        Ok(CommitOutcome::Applied(()))
    }

    /// Removes the cancellation of `date` in a series. Returns whether one existed.
    pub async fn restore_day(&self, series_id: i64, date: NaiveDate) -> Result<CommitOutcome<bool>, CoreError> {
        let _guard = acquire_or_skip!(self, OccurrenceId::Virtual(VirtualId::new(series_id, date)));

        let tombstones: Vec<Event> = self
            .repo
            .list_series_overrides(series_id)
            .await?
            .into_iter()
            .filter(|o| o.is_cancelled && o.original_start_utc.map(|t| t.date_naive()) == Some(date))
            .collect();

        for tombstone in &tombstones {
            self.repo.delete_event(tombstone.id).await?;
        }
        debug!(series_id, %date, restored = !tombstones.is_empty(), "restore day");
        Ok(CommitOutcome::Applied(!tombstones.is_empty()))
    }

    /// Sets (or clears, with `None`) the recurrence of an occurrence.
    ///
    /// # Behavior
    ///
    /// - Virtual occurrence, override or liberated standalone: a new independent
    ///   series starts at the occurrence, subtasks are migrated and the old
    ///   date is retired. Sibling occurrences are left untouched.
    /// - Series master: the master is edited in place.
    /// - Plain standalone: the row becomes a series master in place.
    pub async fn edit_recurrence(
        &self,
        occurrence: &Occurrence,
        rule: Option<RecurrenceRule>,
    ) -> Result<CommitOutcome<Occurrence>, CoreError> {
        if let Some(rule) = &rule {
            RecurrenceEngine::validate(rule)?;
        }
        let _guard = acquire_or_skip!(self, occurrence.id());

        let updated = match occurrence {
            Occurrence::Override(event) => {
                let rule = rule.ok_or_else(|| {
                    CoreError::InvalidInput(format!("Event {} is not recurring", event.id))
                })?;
                let created = self.spawn_series(occurrence, event, rule).await?;
                self.retire_override(event).await?;
                created
            }
            Occurrence::Standalone(event) if event.was_series_instance() => match rule {
                Some(rule) => {
                    let created = self.spawn_series(occurrence, event, rule).await?;
                    self.repo.delete_event(event.id).await?;
                    created
                }
                None => occurrence.clone(),
            },
            Occurrence::Standalone(event) => match rule {
                Some(rule) => {
                    let promoted = self.set_rule(event.id, Some(rule)).await?;
                    SubtaskMigrator::new(self.repo).migrate(occurrence, &promoted).await?;
                    promoted
                }
                None => occurrence.clone(),
            },
            Occurrence::SeriesMaster(master) => self.set_rule(master.id, rule).await?,
            Occurrence::Virtual(instance) => {
                let rule = rule.ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "Occurrence {} cannot stop repeating on its own, clear the recurrence of series {}",
                        instance.id, instance.id.series_id
                    ))
                })?;
                let persisted = self.apply_patch(occurrence, UpdateEvent::default()).await?;
                let Occurrence::Override(event) = &persisted else {
                    return Err(CoreError::InvalidInput(format!(
                        "Occurrence {} could not be stored as an override",
                        instance.id
                    )));
                };
                let created = self.spawn_series(&persisted, event, rule).await?;
                self.retire_override(event).await?;
                created
            }
        };

        info!(from = %occurrence.id(), to = %updated.id(), kind = %updated.kind(), "edited recurrence");
        Ok(CommitOutcome::Applied(updated))
    }

    /// Detaches a series occurrence into a standalone event.
    pub async fn liberate(&self, occurrence: &Occurrence) -> Result<CommitOutcome<Occurrence>, CoreError> {
        if !occurrence.is_series_instance() {
            return Err(CoreError::InvalidInput(format!(
                "Occurrence {} does not belong to a series",
                occurrence.id()
            )));
        }
        let _guard = acquire_or_skip!(self, occurrence.id());

        let standalone = self
            .repo
            .create_event(NewEvent {
                owner_id: occurrence.owner_id(),
                title: occurrence.title().to_string(),
                description: occurrence.description().map(str::to_string),
                start_utc: occurrence.start_utc(),
                end_utc: occurrence.end_utc(),
                color: occurrence.color().map(str::to_string),
                original_start_utc: occurrence.original_start(),
                ..Default::default()
            })
            .await?;
        let liberated = Occurrence::Standalone(standalone);

        SubtaskMigrator::new(self.repo).migrate(occurrence, &liberated).await?;
        self.apply_patch(occurrence, UpdateEvent::cancel()).await?;

        info!(from = %occurrence.id(), to = %liberated.id(), "liberated occurrence");
        Ok(CommitOutcome::Applied(liberated))
    }

    /// Deletes the series an occurrence belongs to: its overrides first, then the master.
    ///
    /// Every row is deleted with its own call. Rows that could not be deleted
    /// are reported through `CoreError::PartialDelete`.
    pub async fn delete_whole_series(&self, occurrence: &Occurrence) -> Result<CommitOutcome<usize>, CoreError> {
        let series_id = occurrence.series_id().ok_or_else(|| {
            CoreError::InvalidInput(format!("Occurrence {} does not belong to a series", occurrence.id()))
        })?;
        let _guard = acquire_or_skip!(self, occurrence.id());

        let mut ids: Vec<i64> = self
            .repo
            .list_series_overrides(series_id)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        ids.push(series_id);

        let mut deleted = Vec::with_capacity(ids.len());
        let mut failed = Vec::new();
        for id in ids {
            match self.repo.delete_event(id).await {
                Ok(()) => deleted.push(id),
                Err(e) if e.is_not_found() => deleted.push(id),
                Err(e) => {
                    warn!(event_id = id, error = %e, "failed to delete series row");
                    failed.push((id, e.to_string()));
                }
            }
        }

        if !failed.is_empty() {
            return Err(CoreError::PartialDelete { deleted, failed });
        }
        info!(series_id, rows = deleted.len(), "deleted series");
        Ok(CommitOutcome::Applied(deleted.len()))
    }

    // ------------------------------------------------------------------------

    /// Writes `patch` to the row behind `occurrence`, persisting virtual ones first.
    async fn apply_patch(&self, occurrence: &Occurrence, patch: UpdateEvent) -> Result<Occurrence, CoreError> {
        match occurrence {
            Occurrence::Virtual(instance) => {
                let master = self.find_master(instance.id.series_id).await?;
                let rule = master.rule()?.ok_or_else(|| {
                    CoreError::InvalidInput(format!("Event {} is not recurring", master.id))
                })?;
                if !RecurrenceEngine::produces(&rule, master.start_utc, instance.id.date)? {
                    return Err(CoreError::InvalidInput(format!(
                        "{} is not an occurrence of series {}",
                        instance.id.date, master.id
                    )));
                }
                let created = self
                    .persist_override(&master, instance.id.date, instance.original_start(), patch)
                    .await?;
                let persisted = Occurrence::classify(created)?;
                if persisted.event().is_some_and(|e| !e.is_cancelled) {
                    SubtaskMigrator::new(self.repo).migrate(occurrence, &persisted).await?;
                }
                Ok(persisted)
            }
            Occurrence::Override(event) => {
                let updated = self.update_with_fallback(event, patch).await?;
                Occurrence::classify(updated)
            }
            Occurrence::SeriesMaster(master) => {
                let updated = self.repo.update_event(master.id, patch).await?;
                if updated.start_utc.time() != master.start_utc.time() {
                    self.realign_overrides(&updated).await?;
                }
                Occurrence::classify(updated)
            }
            Occurrence::Standalone(event) => {
                let updated = self.repo.update_event(event.id, patch).await?;
                Occurrence::classify(updated)
            }
        }
    }

    /// Moves the original start of every override of `master` onto the master's
    /// time of day, keeping its date, so each override still shadows its occurrence.
    async fn realign_overrides(&self, master: &Event) -> Result<(), CoreError> {
        for row in self.repo.list_series_overrides(master.id).await? {
            let Some(original) = row.original_start_utc else {
                continue;
            };
            let aligned = VirtualInstance::from_master(master, original.date_naive()).original_start();
            if aligned == original {
                continue;
            }
            self.repo
                .update_event(
                    row.id,
                    UpdateEvent {
                        original_start_utc: Some(Some(aligned)),
                        ..Default::default()
                    },
                )
                .await?;
            debug!(event_id = row.id, series_id = master.id, from = %original, to = %aligned, "realigned override");
        }
        Ok(())
    }

    /// Updates an override, recreating it from its series when the row has vanished.
    async fn update_with_fallback(&self, event: &Event, patch: UpdateEvent) -> Result<Event, CoreError> {
        match self.repo.update_event(event.id, patch.clone()).await {
            Err(CoreError::NotFound(_)) => {
                let (Some(series_id), Some(original)) = (event.series_id, event.original_start_utc) else {
                    return Err(CoreError::NotFound(format!("Event {}", event.id)));
                };
                warn!(event_id = event.id, series_id, "override vanished, recreating from series");
                let master = self.find_master(series_id).await?;
                self.persist_override(&master, original.date_naive(), original, patch).await
            }
            other => other,
        }
    }

    /// Creates the override of `date`, or patches the one already stored for it.
    async fn persist_override(
        &self,
        master: &Event,
        date: NaiveDate,
        original: DateTime<Utc>,
        patch: UpdateEvent,
    ) -> Result<Event, CoreError> {
        if let Some(existing) = self.repo.find_override(master.id, original).await? {
            return self.repo.update_event(existing.id, patch).await;
        }

        let instance = VirtualInstance::from_master(master, date);
        let mut data = NewEvent {
            owner_id: master.owner_id,
            title: instance.title,
            description: instance.description,
            start_utc: instance.start_utc,
            end_utc: instance.end_utc,
            color: instance.color,
            recurrence: None,
            series_id: Some(master.id),
            original_start_utc: Some(original),
            is_cancelled: false,
        };
        apply_to_new(&patch, &mut data);

        let created = self.repo.create_event(data).await?;
        debug!(event_id = created.id, series_id = master.id, %date, cancelled = created.is_cancelled, "created override");
        Ok(created)
    }

    /// Creates a new series master from `event` and migrates subtasks onto it.
    async fn spawn_series(
        &self,
        occurrence: &Occurrence,
        event: &Event,
        rule: RecurrenceRule,
    ) -> Result<Occurrence, CoreError> {
        let created = self
            .repo
            .create_event(NewEvent {
                owner_id: event.owner_id,
                title: event.title.clone(),
                description: event.description.clone(),
                start_utc: event.start_utc,
                end_utc: event.end_utc,
                color: event.color.clone(),
                recurrence: Some(rule),
                ..Default::default()
            })
            .await?;
        let series = Occurrence::SeriesMaster(created);
        SubtaskMigrator::new(self.repo).migrate(occurrence, &series).await?;
        Ok(series)
    }

    /// Turns an override into a tombstone so its date stays suppressed.
    async fn retire_override(&self, event: &Event) -> Result<(), CoreError> {
        self.update_with_fallback(event, UpdateEvent::cancel()).await?;
        Ok(())
    }

    async fn set_rule(&self, event_id: i64, rule: Option<RecurrenceRule>) -> Result<Occurrence, CoreError> {
        let updated = self
            .repo
            .update_event(
                event_id,
                UpdateEvent {
                    recurrence: Some(rule),
                    ..Default::default()
                },
            )
            .await?;
        Occurrence::classify(updated)
    }

    async fn find_master(&self, series_id: i64) -> Result<Event, CoreError> {
        let master = self
            .repo
            .find_event_by_id(series_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Series {}", series_id)))?;
        if !master.is_recurring {
            return Err(CoreError::InvalidInput(format!("Event {} is not recurring", series_id)));
        }
        Ok(master)
    }
}

/// Applies the plain fields of an update to a row that has not been written yet.
fn apply_to_new(patch: &UpdateEvent, data: &mut NewEvent) {
    if let Some(title) = &patch.title {
        data.title = title.clone();
    }
    if let Some(description) = &patch.description {
        data.description = description.clone();
    }
    if let Some(start) = patch.start_utc {
        data.start_utc = start;
    }
    if let Some(end) = patch.end_utc {
        data.end_utc = end;
    }
    if let Some(color) = &patch.color {
        data.color = color.clone();
    }
    if let Some(cancelled) = patch.is_cancelled {
        data.is_cancelled = cancelled;
    }
}
