//! Scheduled task repository functions.
//!
//! Backs the cron-like deferred task facility.  A task is "claimed" by
//! deleting its row; whichever caller removes it runs it, so a task fires at
//! most once even when several workers poll the same table.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{DbError, models::TaskRow};

/// Insert a one-off task that becomes due at `run_at`.
pub async fn insert_task(
    pool: &SqlitePool,
    hook: &str,
    args: &serde_json::Value,
    run_at: DateTime<Utc>,
) -> Result<TaskRow, DbError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO scheduled_tasks (id, hook, args, run_at, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(hook)
    .bind(args.to_string())
    .bind(run_at)
    .bind(now)
    .execute(pool)
    .await?;

    get_task(pool, &id).await?.ok_or(DbError::NotFound)
}

/// Look a task up by id.
pub async fn get_task(pool: &SqlitePool, id: &str) -> Result<Option<TaskRow>, DbError> {
    let row = sqlx::query_as::<_, TaskRow>(
        "SELECT id, hook, args, run_at, created_at FROM scheduled_tasks WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Tasks whose `run_at` is at or before `now`, oldest first.
pub async fn fetch_due(pool: &SqlitePool, now: DateTime<Utc>, limit: i64) -> Result<Vec<TaskRow>, DbError> {
    let rows = sqlx::query_as::<_, TaskRow>(
        r#"
        SELECT id, hook, args, run_at, created_at
        FROM scheduled_tasks
        WHERE run_at <= ?
        ORDER BY run_at ASC, created_at ASC
        LIMIT ?
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Remove a task.  Returns `true` when this call removed it.
pub async fn delete_task(pool: &SqlitePool, id: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Number of tasks still pending.
pub async fn count_tasks(pool: &SqlitePool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scheduled_tasks")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
