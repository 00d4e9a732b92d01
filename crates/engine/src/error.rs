//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the notification engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// A workflow failed validation before being stored.
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// A request carried an unusable value.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    // ------ Lookup errors ------

    #[error("workflow {0} not found")]
    WorkflowNotFound(i64),

    #[error("log entry {0} not found")]
    LogEntryNotFound(i64),

    #[error("post {0} not found")]
    PostNotFound(i64),

    #[error("user {0} not found")]
    UserNotFound(i64),

    // ------ Authorisation ------

    /// The acting user lacks the capability for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    // ------ Storage ------

    /// A stored document could not be decoded.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// Error from the deferred task facility.
    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
