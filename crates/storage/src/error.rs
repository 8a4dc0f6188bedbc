use comply_core::ComplyError;
use comply_rules::lifecycle::LifecycleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached. Callers retry with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or expected-state check failed.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be mapped back into the domain model.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Transient failures worth retrying: connectivity, pool exhaustion,
    /// serialization failures and deadlocks.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => match e {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
                }
                _ => false,
            },
            _ => false,
        }
    }

    pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
        if let sqlx::Error::Database(db_err) = e {
            return db_err.code().as_deref() == Some("23505");
        }
        false
    }
}

impl From<StoreError> for ComplyError {
    fn from(e: StoreError) -> Self {
        if e.is_retryable() {
            return ComplyError::StoreUnavailable(e.to_string());
        }
        match e {
            StoreError::NotFound(what) => ComplyError::NotFound(what),
            other => ComplyError::Other(other.to_string()),
        }
    }
}
