//! Notification log repository functions.
//!
//! Rows are only ever inserted or deleted; the audit trail is never
//! rewritten in place.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    DbError,
    models::{LogEntryRow, LogFilter, LogStatus, NewLogEntry, SortOrder},
};

const LOG_COLUMNS: &str = "id, post_id, site_id, workflow_id, actor_id, event, old_status, \
    new_status, channel, receiver, receiver_group, receiver_subgroup, subject, status, success, \
    error, is_async, comment_id, event_args, cron_task_id, created_at";

/// Append a row to the log.
pub async fn insert_entry(pool: &SqlitePool, entry: &NewLogEntry) -> Result<LogEntryRow, DbError> {
    let id = sqlx::query(
        r#"
        INSERT INTO notification_log
            (post_id, site_id, workflow_id, actor_id, event, old_status, new_status, channel,
             receiver, receiver_group, receiver_subgroup, subject, status, success, error,
             is_async, comment_id, event_args, cron_task_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.post_id)
    .bind(entry.site_id)
    .bind(entry.workflow_id)
    .bind(entry.actor_id)
    .bind(&entry.event)
    .bind(&entry.old_status)
    .bind(&entry.new_status)
    .bind(&entry.channel)
    .bind(&entry.receiver)
    .bind(&entry.receiver_group)
    .bind(&entry.receiver_subgroup)
    .bind(&entry.subject)
    .bind(entry.status.as_str())
    .bind(entry.status == LogStatus::Success)
    .bind(&entry.error)
    .bind(entry.is_async)
    .bind(entry.comment_id)
    .bind(&entry.event_args)
    .bind(&entry.cron_task_id)
    .bind(entry.created_at)
    .execute(pool)
    .await?
    .last_insert_rowid();

    get_entry(pool, id).await
}

/// Fetch one row by id.
pub async fn get_entry(pool: &SqlitePool, id: i64) -> Result<LogEntryRow, DbError> {
    let sql = format!("SELECT {LOG_COLUMNS} FROM notification_log WHERE id = ?");
    sqlx::query_as::<_, LogEntryRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// The row that references the given scheduled task, if any.
pub async fn find_by_task(pool: &SqlitePool, task_id: &str) -> Result<Option<LogEntryRow>, DbError> {
    let sql = format!("SELECT {LOG_COLUMNS} FROM notification_log WHERE cron_task_id = ? LIMIT 1");
    let row = sqlx::query_as::<_, LogEntryRow>(&sql)
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// One page of rows matching `filter`, ordered by creation date.
pub async fn list_entries(
    pool: &SqlitePool,
    filter: &LogFilter,
    order: SortOrder,
    limit: i64,
    offset: i64,
) -> Result<Vec<LogEntryRow>, DbError> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {LOG_COLUMNS} FROM notification_log WHERE 1=1"));
    push_filter(&mut qb, filter);

    match order {
        SortOrder::Asc => qb.push(" ORDER BY created_at ASC, id ASC"),
        SortOrder::Desc => qb.push(" ORDER BY created_at DESC, id DESC"),
    };
    qb.push(" LIMIT ");
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows = qb.build_query_as::<LogEntryRow>().fetch_all(pool).await?;
    Ok(rows)
}

/// Number of rows matching `filter`.
pub async fn count_entries(pool: &SqlitePool, filter: &LogFilter) -> Result<i64, DbError> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM notification_log WHERE 1=1");
    push_filter(&mut qb, filter);
    let count: i64 = qb.build_query_scalar().fetch_one(pool).await?;
    Ok(count)
}

/// Task ids referenced by rows matching `filter`.
pub async fn task_ids_matching(pool: &SqlitePool, filter: &LogFilter) -> Result<Vec<String>, DbError> {
    let mut qb = QueryBuilder::<Sqlite>::new(
        "SELECT cron_task_id FROM notification_log WHERE cron_task_id IS NOT NULL",
    );
    push_filter(&mut qb, filter);
    let ids: Vec<String> = qb.build_query_scalar().fetch_all(pool).await?;
    Ok(ids)
}

/// Delete every row matching `filter`; returns the number removed.
pub async fn delete_matching(pool: &SqlitePool, filter: &LogFilter) -> Result<u64, DbError> {
    let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM notification_log WHERE 1=1");
    push_filter(&mut qb, filter);
    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected())
}

/// Delete one row by id.
pub async fn delete_entry(pool: &SqlitePool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM notification_log WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Delete the row(s) that reference a scheduled task.
pub async fn delete_by_task(pool: &SqlitePool, task_id: &str) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM notification_log WHERE cron_task_id = ?")
        .bind(task_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Whether a delivered or scheduled row exists for the same workflow and
/// post since `since`, whatever event produced it.
pub async fn exists_recent_dispatch(
    pool: &SqlitePool,
    workflow_id: i64,
    post_id: i64,
    since: DateTime<Utc>,
) -> Result<bool, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM notification_log
        WHERE workflow_id = ? AND post_id = ?
          AND status IN ('success', 'scheduled')
          AND created_at >= ?
        "#,
    )
    .bind(workflow_id)
    .bind(post_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &LogFilter) {
    if let Some(post_id) = filter.post_id {
        qb.push(" AND post_id = ");
        qb.push_bind(post_id);
    }
    if let Some(workflow_id) = filter.workflow_id {
        qb.push(" AND workflow_id = ");
        qb.push_bind(workflow_id);
    }
    if let Some(event) = non_blank(&filter.event) {
        qb.push(" AND event = ");
        qb.push_bind(event);
    }
    if let Some(channel) = non_blank(&filter.channel) {
        qb.push(" AND channel = ");
        qb.push_bind(channel);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(receiver) = non_blank(&filter.receiver) {
        qb.push(" AND receiver LIKE ");
        qb.push_bind(format!("%{}%", escape_like(&receiver)));
        qb.push(" ESCAPE '\\'");
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND created_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.date_to {
        // Stored timestamps carry fractions; the bound covers its whole second.
        qb.push(" AND created_at < ");
        qb.push_bind(to.trunc_subsecs(0) + Duration::seconds(1));
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
