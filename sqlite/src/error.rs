//! Error types for record storage.
//!
//! Storage errors are never swallowed by the pipeline: they indicate disk,
//! schema, or uniqueness problems the caller has to see.

use thiserror::Error;

/// Errors that can occur while storing or reading battery records.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite operation failure.
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// A record collided with the `(log_capture_time, nickname)` index.
    #[error("duplicate record for capture time {log_capture_time} on device {nickname}")]
    Duplicate {
        log_capture_time: String,
        nickname: String,
    },

    /// The existing table was created by a different record schema version.
    #[error(
        "table schema version {found} does not match expected version {expected}; \
         re-run ingestion in init mode to rebuild it"
    )]
    SchemaMismatch { found: u32, expected: u32 },

    /// Stored row could not be turned back into a record.
    #[error("conversion error: {0}")]
    ConversionError(String),

    /// Filesystem failure preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results with [`StorageError`].
pub type Result<T> = std::result::Result<T, StorageError>;
