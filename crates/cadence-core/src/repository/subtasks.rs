use crate::error::CoreError;
use crate::models::{
    CustomSubtask, InstanceKey, NewCustomSubtask, NewSubtask, SubtaskInstanceState, SubtaskMaster,
    UpdateSubtask,
};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};

#[async_trait]
impl super::SubtaskRepository for SqliteRepository {
    async fn create_subtask(&self, data: NewSubtask) -> Result<SubtaskMaster, CoreError> {
        if data.text.trim().is_empty() {
            return Err(CoreError::InvalidInput("Subtask text cannot be empty".to_string()));
        }

        let result = sqlx::query(
            "INSERT INTO subtask_masters (owner_event_id, text, sort_order, completed) VALUES ($1, $2, $3, $4)",
        )
        .bind(data.owner_event_id)
        .bind(&data.text)
        .bind(data.sort_order)
        .bind(data.completed)
        .execute(self.pool())
        .await?;

        Ok(SubtaskMaster {
            id: result.last_insert_rowid(),
            owner_event_id: data.owner_event_id,
            text: data.text,
            sort_order: data.sort_order,
            completed: data.completed,
        })
    }

    async fn update_subtask(&self, id: i64, data: UpdateSubtask) -> Result<SubtaskMaster, CoreError> {
        let mut tx = self.pool().begin().await?;

        let mut subtask: SubtaskMaster = sqlx::query_as("SELECT * FROM subtask_masters WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Subtask {}", id)))?;

        if let Some(text) = data.text {
            subtask.text = text;
        }
        if let Some(sort_order) = data.sort_order {
            subtask.sort_order = sort_order;
        }
        if let Some(completed) = data.completed {
            subtask.completed = completed;
        }

        sqlx::query("UPDATE subtask_masters SET text = $1, sort_order = $2, completed = $3 WHERE id = $4")
            .bind(&subtask.text)
            .bind(subtask.sort_order)
            .bind(subtask.completed)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(subtask)
    }

    async fn delete_subtask(&self, id: i64) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query("DELETE FROM subtask_masters WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Subtask {}", id)));
        }

        sqlx::query("DELETE FROM subtask_instance_states WHERE subtask_master_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_subtasks(&self, owner_event_id: i64) -> Result<Vec<SubtaskMaster>, CoreError> {
        let subtasks = sqlx::query_as(
            "SELECT * FROM subtask_masters WHERE owner_event_id = $1 ORDER BY sort_order, id",
        )
        .bind(owner_event_id)
        .fetch_all(self.pool())
        .await?;
        Ok(subtasks)
    }

    async fn toggle_completion_for_instance(
        &self,
        subtask_id: i64,
        key: &InstanceKey,
        completed: bool,
    ) -> Result<SubtaskInstanceState, CoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"INSERT INTO subtask_instance_states (subtask_master_id, instance_key, completed, hidden)
            VALUES ($1, $2, $3, 0)
            ON CONFLICT (subtask_master_id, instance_key) DO UPDATE SET completed = excluded.completed"#,
        )
        .bind(subtask_id)
        .bind(key.to_string())
        .bind(completed)
        .execute(&mut *tx)
        .await?;

        let state = Self::find_instance_state_in_transaction(&mut tx, subtask_id, key).await?;
        tx.commit().await?;
        Ok(state)
    }

    async fn hide_for_instance(
        &self,
        subtask_id: i64,
        key: &InstanceKey,
    ) -> Result<SubtaskInstanceState, CoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"INSERT INTO subtask_instance_states (subtask_master_id, instance_key, completed, hidden)
            VALUES ($1, $2, 0, 1)
            ON CONFLICT (subtask_master_id, instance_key) DO UPDATE SET hidden = 1"#,
        )
        .bind(subtask_id)
        .bind(key.to_string())
        .execute(&mut *tx)
        .await?;

        let state = Self::find_instance_state_in_transaction(&mut tx, subtask_id, key).await?;
        tx.commit().await?;
        Ok(state)
    }

    async fn list_instance_states(
        &self,
        key: &InstanceKey,
    ) -> Result<Vec<SubtaskInstanceState>, CoreError> {
        let states = sqlx::query_as(
            "SELECT * FROM subtask_instance_states WHERE instance_key = $1 ORDER BY subtask_master_id",
        )
        .bind(key.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(states)
    }

    async fn create_custom_subtask(&self, data: NewCustomSubtask) -> Result<CustomSubtask, CoreError> {
        if data.text.trim().is_empty() {
            return Err(CoreError::InvalidInput("Subtask text cannot be empty".to_string()));
        }

        let instance_key = data.instance_key.to_string();
        let result = sqlx::query(
            "INSERT INTO custom_subtasks (instance_key, text, sort_order, completed) VALUES ($1, $2, $3, $4)",
        )
        .bind(&instance_key)
        .bind(&data.text)
        .bind(data.sort_order)
        .bind(data.completed)
        .execute(self.pool())
        .await?;

        Ok(CustomSubtask {
            id: result.last_insert_rowid(),
            instance_key,
            text: data.text,
            sort_order: data.sort_order,
            completed: data.completed,
        })
    }

    async fn update_custom_subtask(
        &self,
        id: i64,
        data: UpdateSubtask,
    ) -> Result<CustomSubtask, CoreError> {
        let mut tx = self.pool().begin().await?;

        let mut subtask: CustomSubtask = sqlx::query_as("SELECT * FROM custom_subtasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Custom subtask {}", id)))?;

        if let Some(text) = data.text {
            subtask.text = text;
        }
        if let Some(sort_order) = data.sort_order {
            subtask.sort_order = sort_order;
        }
        if let Some(completed) = data.completed {
            subtask.completed = completed;
        }

        sqlx::query("UPDATE custom_subtasks SET text = $1, sort_order = $2, completed = $3 WHERE id = $4")
            .bind(&subtask.text)
            .bind(subtask.sort_order)
            .bind(subtask.completed)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(subtask)
    }

    async fn delete_custom_subtask(&self, id: i64) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM custom_subtasks WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("Custom subtask {}", id)));
        }
        Ok(())
    }

    async fn list_custom_subtasks(&self, key: &InstanceKey) -> Result<Vec<CustomSubtask>, CoreError> {
        let subtasks = sqlx::query_as(
            "SELECT * FROM custom_subtasks WHERE instance_key = $1 ORDER BY sort_order, id",
        )
        .bind(key.to_string())
        .fetch_all(self.pool())
        .await?;
        Ok(subtasks)
    }
}

impl SqliteRepository {
    async fn find_instance_state_in_transaction<'a>(
        tx: &mut Transaction<'a, Sqlite>,
        subtask_id: i64,
        key: &InstanceKey,
    ) -> Result<SubtaskInstanceState, CoreError> {
        let state = sqlx::query_as(
            "SELECT * FROM subtask_instance_states WHERE subtask_master_id = $1 AND instance_key = $2",
        )
        .bind(subtask_id)
        .bind(key.to_string())
        .fetch_one(&mut **tx)
        .await?;
        Ok(state)
    }
}
