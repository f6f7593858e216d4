use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid recurrence rule: {0}")]
    InvalidRule(String),

    #[error("Invalid occurrence id: {0}")]
    InvalidOccurrenceId(String),

    #[error("Subtask changes on a recurring occurrence need a scope: {0}")]
    ScopeRequired(String),

    #[error("Failed to delete {} of the series rows", .failed.len())]
    PartialDelete {
        deleted: Vec<i64>,
        failed: Vec<(i64, String)>,
    },

    #[error("Commit failed, changes were rolled back: {0}")]
    CommitFailed(Box<CoreError>),
}

impl CoreError {
    /// Whether the user can reasonably retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Database(_)
            | CoreError::Io(_)
            | CoreError::PartialDelete { .. }
            | CoreError::CommitFailed(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }
}
