//! Queue-level error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// Stored task arguments could not be decoded.
    #[error("invalid task arguments for task '{task_id}': {message}")]
    InvalidArgs { task_id: String, message: String },

    /// A handler ran and failed.
    #[error("task '{task_id}' failed: {message}")]
    Handler { task_id: String, message: String },
}
