use crate::error::CoreError;
use crate::models::{normalize_timestamp, Event, NewEvent, UpdateEvent};
use crate::recurrence::RecurrenceEngine;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::debug;

#[async_trait]
impl super::EventRepository for SqliteRepository {
    async fn create_event(&self, data: NewEvent) -> Result<Event, CoreError> {
        data.validate()?;
        if let Some(rule) = &data.recurrence {
            RecurrenceEngine::validate(rule)?;
        }

        let mut tx = self.pool().begin().await?;
        let id = Self::insert_event_in_transaction(&mut tx, &data).await?;
        let event = Self::find_event_in_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Event {}", id)))?;
        tx.commit().await?;

        debug!(event_id = event.id, series_id = ?event.series_id, recurring = event.is_recurring, "created event");
        Ok(event)
    }

    async fn find_event_by_id(&self, id: i64) -> Result<Option<Event>, CoreError> {
        let event = sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(event)
    }

    async fn update_event(&self, id: i64, data: UpdateEvent) -> Result<Event, CoreError> {
        if let Some(Some(rule)) = &data.recurrence {
            RecurrenceEngine::validate(rule)?;
        }

        let mut tx = self.pool().begin().await?;

        let mut event = Self::find_event_in_transaction(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Event {}", id)))?;

        data.apply_to(&mut event)?;
        event.original_start_utc = event.original_start_utc.map(normalize_timestamp);
        event.updated_at = Utc::now();

        Self::write_event_in_transaction(&mut tx, &event).await?;
        tx.commit().await?;

        debug!(event_id = id, "updated event");
        Ok(event)
    }

    async fn delete_event(&self, id: i64) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Event {}", id)));
        }

        sqlx::query(
            r#"DELETE FROM subtask_instance_states
            WHERE subtask_master_id IN (SELECT id FROM subtask_masters WHERE owner_event_id = $1)"#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM subtask_masters WHERE owner_event_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        // Custom subtasks keyed by the row itself or, for a master, by any of its occurrences.
        sqlx::query(
            r#"DELETE FROM custom_subtasks
            WHERE instance_key = $1 OR instance_key LIKE $2 ESCAPE '\'"#,
        )
        .bind(id.to_string())
        .bind(format!("{}\\_%", id))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(event_id = id, "deleted event");
        Ok(())
    }

    async fn list_by_owner_and_range(
        &self,
        owner_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, CoreError> {
        let events = sqlx::query_as(
            r#"SELECT * FROM events
            WHERE owner_id = $1 AND (
                (is_recurring = 1 AND start_utc < $3
                    AND (recurrence_end_date IS NULL OR recurrence_end_date >= $4))
                OR (is_recurring = 0 AND start_utc < $3 AND end_utc >= $2)
                OR (series_id IS NOT NULL AND original_start_utc >= $2 AND original_start_utc < $3)
            )
            ORDER BY start_utc, id"#,
        )
        .bind(owner_id)
        .bind(start)
        .bind(end)
        .bind(start.date_naive())
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }

    async fn list_series_overrides(&self, series_id: i64) -> Result<Vec<Event>, CoreError> {
        let events = sqlx::query_as(
            "SELECT * FROM events WHERE series_id = $1 ORDER BY original_start_utc, id",
        )
        .bind(series_id)
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }

    async fn find_override(
        &self,
        series_id: i64,
        original_start: DateTime<Utc>,
    ) -> Result<Option<Event>, CoreError> {
        let event = sqlx::query_as(
            "SELECT * FROM events WHERE series_id = $1 AND original_start_utc = $2",
        )
        .bind(series_id)
        .bind(normalize_timestamp(original_start))
        .fetch_optional(self.pool())
        .await?;
        Ok(event)
    }
}

impl SqliteRepository {
    pub(crate) async fn find_event_in_transaction<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        id: i64,
    ) -> Result<Option<Event>, CoreError> {
        let event = sqlx::query_as("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(event)
    }

    async fn insert_event_in_transaction<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        data: &NewEvent,
    ) -> Result<i64, CoreError> {
        let now = normalize_timestamp(Utc::now());
        let (rule_json, end_date) = match &data.recurrence {
            Some(rule) => (Some(rule.to_json()?), rule.end_date),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"INSERT INTO events (owner_id, title, description, start_utc, end_utc, color,
                is_recurring, recurrence_rule, recurrence_end_date, series_id, original_start_utc,
                is_cancelled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"#,
        )
        .bind(data.owner_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.start_utc)
        .bind(data.end_utc)
        .bind(&data.color)
        .bind(data.recurrence.is_some())
        .bind(rule_json)
        .bind(end_date)
        .bind(data.series_id)
        .bind(data.original_start_utc.map(normalize_timestamp))
        .bind(data.is_cancelled)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn write_event_in_transaction<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        event: &Event,
    ) -> Result<(), CoreError> {
        sqlx::query(
            r#"UPDATE events SET title = $1, description = $2, start_utc = $3, end_utc = $4,
                color = $5, is_recurring = $6, recurrence_rule = $7, recurrence_end_date = $8,
                series_id = $9, original_start_utc = $10, is_cancelled = $11, updated_at = $12
            WHERE id = $13"#,
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_utc)
        .bind(event.end_utc)
        .bind(&event.color)
        .bind(event.is_recurring)
        .bind(&event.recurrence_rule)
        .bind(event.recurrence_end_date)
        .bind(event.series_id)
        .bind(event.original_start_utc)
        .bind(event.is_cancelled)
        .bind(event.updated_at)
        .bind(event.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
