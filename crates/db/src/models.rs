//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub title: String,
    /// `publish`, `draft` or `trash`.
    pub status: String,
    /// JSON document holding filters, receivers, content and channels.
    pub settings: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written when a workflow is created or updated.
#[derive(Debug, Clone)]
pub struct WorkflowWrite {
    pub title: String,
    pub status: String,
    pub settings: String,
    pub is_default: bool,
    /// Selection keys of the events this workflow listens to.
    pub event_keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// notification_log
// ---------------------------------------------------------------------------

/// Possible statuses for a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
    Skipped,
    Scheduled,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Scheduled => "scheduled",
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success"   => Ok(Self::Success),
            "error"     => Ok(Self::Error),
            "skipped"   => Ok(Self::Skipped),
            "scheduled" => Ok(Self::Scheduled),
            other       => Err(format!("unknown log status: {other}")),
        }
    }
}

/// A persisted notification log row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LogEntryRow {
    pub id: i64,
    pub post_id: i64,
    pub site_id: i64,
    pub workflow_id: i64,
    pub actor_id: i64,
    pub event: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub channel: Option<String>,
    pub receiver: Option<String>,
    pub receiver_group: Option<String>,
    pub receiver_subgroup: Option<String>,
    pub subject: Option<String>,
    pub status: String,
    pub success: bool,
    pub error: Option<String>,
    pub is_async: bool,
    pub comment_id: Option<i64>,
    /// Serialised event argument bag.
    pub event_args: String,
    pub cron_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values for a new log row.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub post_id: i64,
    pub site_id: i64,
    pub workflow_id: i64,
    pub actor_id: i64,
    pub event: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub channel: Option<String>,
    pub receiver: Option<String>,
    pub receiver_group: Option<String>,
    pub receiver_subgroup: Option<String>,
    pub subject: Option<String>,
    pub status: LogStatus,
    pub error: Option<String>,
    pub is_async: bool,
    pub comment_id: Option<i64>,
    pub event_args: String,
    pub cron_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sort direction for log listings (always by creation date).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter set shared by listing, counting and "delete all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilter {
    pub post_id: Option<i64>,
    pub workflow_id: Option<i64>,
    pub event: Option<String>,
    pub channel: Option<String>,
    pub status: Option<LogStatus>,
    /// Substring match on the receiver column.
    pub receiver: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive to the end of its second.
    pub date_to: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// scheduled_tasks
// ---------------------------------------------------------------------------

/// A one-off deferred task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRow {
    /// UUID rendered as text.
    pub id: String,
    /// Name of the handler that runs this task.
    pub hook: String,
    /// JSON arguments passed to the handler.
    pub args: String,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// post_followers
// ---------------------------------------------------------------------------

/// A per-post subscription: `kind` is `user`, `role` or `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct FollowerRow {
    pub post_id: i64,
    pub kind: String,
    pub value: String,
}
