//! Scheduling side of the task facility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use db::models::TaskRow;
use db::repository::tasks as task_repo;
use db::DbPool;

use crate::QueueError;

/// A decoded task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub hook: String,
    pub args: Value,
    pub run_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ScheduledTask {
    type Error = QueueError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let args = serde_json::from_str(&row.args).map_err(|e| QueueError::InvalidArgs {
            task_id: row.id.clone(),
            message: e.to_string(),
        })?;
        Ok(Self { id: row.id, hook: row.hook, args, run_at: row.run_at })
    }
}

/// Handle used to schedule, look up and cancel tasks.
#[derive(Clone)]
pub struct TaskQueue {
    pool: DbPool,
}

impl TaskQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Schedule `hook` to run once with `args` at or after `run_at`.
    pub async fn schedule_single(
        &self,
        hook: &str,
        args: &Value,
        run_at: DateTime<Utc>,
    ) -> Result<ScheduledTask, QueueError> {
        let row = task_repo::insert_task(&self.pool, hook, args, run_at).await?;
        debug!(task_id = %row.id, hook, %run_at, "task scheduled");
        ScheduledTask::try_from(row)
    }

    /// Cancel a pending task.  Returns `false` when it no longer exists.
    pub async fn unschedule(&self, task_id: &str) -> Result<bool, QueueError> {
        Ok(task_repo::delete_task(&self.pool, task_id).await?)
    }

    /// Look a pending task up.
    pub async fn find(&self, task_id: &str) -> Result<Option<ScheduledTask>, QueueError> {
        task_repo::get_task(&self.pool, task_id)
            .await?
            .map(ScheduledTask::try_from)
            .transpose()
    }

    /// Tasks due at `now`, oldest first.
    pub async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskRow>, QueueError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(task_repo::fetch_due(&self.pool, now, limit).await?)
    }

    /// Take ownership of a task so it runs exactly once.
    pub async fn claim(&self, task_id: &str) -> Result<bool, QueueError> {
        Ok(task_repo::delete_task(&self.pool, task_id).await?)
    }

    /// Number of pending tasks.
    pub async fn pending(&self) -> Result<i64, QueueError> {
        Ok(task_repo::count_tasks(&self.pool).await?)
    }
}
