use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the idempotency store and its storage backends.
///
/// A missing record is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum AppError {
    /// The storage engine could not be opened or reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    /// The storage engine reported a conflicting transaction. Safe to retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// An import blob or stored record is not in the expected format.
    #[error("format error: {0}")]
    Format(String),

    #[error("write attempted inside a read-only transaction")]
    ReadOnlyTransaction,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

const SQLITE_PERM: i32 = 3;
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_READONLY: i32 = 8;
const SQLITE_CANTOPEN: i32 = 14;

/// Reduces an SQLite result code to its primary code. Extended codes carry
/// the primary code in their low byte (e.g. 1032 READONLY_DBMOVED -> 8).
fn primary_code(code: &str) -> Option<i32> {
    code.parse::<i32>().ok().map(|c| c & 0xff)
}

impl AppError {
    /// Classifies a driver error into the storage error taxonomy.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => AppError::StorageUnavailable(e.to_string()),
            sqlx::Error::PoolClosed => {
                AppError::StorageUnavailable("connection pool is closed".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                AppError::StorageUnavailable("timed out acquiring a connection".to_string())
            }
            sqlx::Error::Database(db) => {
                let code = db.code().and_then(|c| primary_code(&c));
                match code {
                    Some(SQLITE_BUSY | SQLITE_LOCKED) => {
                        AppError::ConcurrencyConflict(db.message().to_string())
                    }
                    Some(SQLITE_PERM | SQLITE_READONLY | SQLITE_CANTOPEN) => {
                        AppError::StorageUnavailable(db.message().to_string())
                    }
                    _ => AppError::Database(sqlx::Error::Database(db)),
                }
            }
            other => AppError::Database(other),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Format(err.to_string())
    }
}
