use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    CustomSubtask, Event, InstanceKey, NewCustomSubtask, NewEvent, NewSubtask, SubtaskInstanceState,
    SubtaskMaster, UpdateEvent, UpdateSubtask,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod events;
pub mod subtasks;

/// Persistence of event rows (series masters, overrides and standalone events).
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create_event(&self, data: NewEvent) -> Result<Event, CoreError>;
    async fn find_event_by_id(&self, id: i64) -> Result<Option<Event>, CoreError>;
    /// Fails with `CoreError::NotFound` when the row no longer exists.
    async fn update_event(&self, id: i64, data: UpdateEvent) -> Result<Event, CoreError>;
    /// Deletes one row together with the subtasks it owns.
    async fn delete_event(&self, id: i64) -> Result<(), CoreError>;
    /// Every row that can contribute an occurrence to `[start, end)`:
    /// rows intersecting the range, overrides whose original start lies in it,
    /// and series masters whose window intersects it.
    async fn list_by_owner_and_range(
        &self,
        owner_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, CoreError>;
    /// All overrides of a series, cancelled ones included.
    async fn list_series_overrides(&self, series_id: i64) -> Result<Vec<Event>, CoreError>;
    async fn find_override(
        &self,
        series_id: i64,
        original_start: DateTime<Utc>,
    ) -> Result<Option<Event>, CoreError>;
}

/// Persistence of subtask definitions, per-occurrence state and custom subtasks.
#[async_trait]
pub trait SubtaskRepository: Send + Sync {
    async fn create_subtask(&self, data: NewSubtask) -> Result<SubtaskMaster, CoreError>;
    async fn update_subtask(&self, id: i64, data: UpdateSubtask) -> Result<SubtaskMaster, CoreError>;
    async fn delete_subtask(&self, id: i64) -> Result<(), CoreError>;
    /// Subtasks owned by an event row, ordered by `sort_order`.
    async fn list_subtasks(&self, owner_event_id: i64) -> Result<Vec<SubtaskMaster>, CoreError>;

    async fn toggle_completion_for_instance(
        &self,
        subtask_id: i64,
        key: &InstanceKey,
        completed: bool,
    ) -> Result<SubtaskInstanceState, CoreError>;
    async fn hide_for_instance(
        &self,
        subtask_id: i64,
        key: &InstanceKey,
    ) -> Result<SubtaskInstanceState, CoreError>;
    async fn list_instance_states(
        &self,
        key: &InstanceKey,
    ) -> Result<Vec<SubtaskInstanceState>, CoreError>;

    async fn create_custom_subtask(&self, data: NewCustomSubtask) -> Result<CustomSubtask, CoreError>;
    async fn update_custom_subtask(
        &self,
        id: i64,
        data: UpdateSubtask,
    ) -> Result<CustomSubtask, CoreError>;
    async fn delete_custom_subtask(&self, id: i64) -> Result<(), CoreError>;
    async fn list_custom_subtasks(&self, key: &InstanceKey) -> Result<Vec<CustomSubtask>, CoreError>;
}

/// Everything the engine needs from storage.
pub trait Repository: EventRepository + SubtaskRepository {}

impl<T> Repository for T where T: EventRepository + SubtaskRepository {}

/// SQLite implementation of the repository traits.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }
}
