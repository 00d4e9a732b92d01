//! Workflow CRUD operations and the event-key index.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    DbError,
    models::{WorkflowRow, WorkflowWrite},
};

const WORKFLOW_COLUMNS: &str =
    "w.id, w.title, w.status, w.settings, w.is_default, w.created_at, w.updated_at";

/// Insert a new workflow together with its event index rows.
pub async fn create_workflow(pool: &SqlitePool, write: &WorkflowWrite) -> Result<WorkflowRow, DbError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let id = sqlx::query(
        r#"
        INSERT INTO workflows (title, status, settings, is_default, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&write.title)
    .bind(&write.status)
    .bind(&write.settings)
    .bind(write.is_default)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    replace_event_keys(&mut tx, id, &write.event_keys).await?;
    tx.commit().await?;

    get_workflow(pool, id).await
}

/// Overwrite every column of an existing workflow and re-index its events.
pub async fn update_workflow(
    pool: &SqlitePool,
    id: i64,
    write: &WorkflowWrite,
) -> Result<WorkflowRow, DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE workflows
        SET title = ?, status = ?, settings = ?, is_default = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&write.title)
    .bind(&write.status)
    .bind(&write.settings)
    .bind(write.is_default)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(DbError::NotFound);
    }

    replace_event_keys(&mut tx, id, &write.event_keys).await?;
    tx.commit().await?;

    get_workflow(pool, id).await
}

/// Change only the publication status (used for trash / restore).
pub async fn set_workflow_status(pool: &SqlitePool, id: i64, status: &str) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &SqlitePool, id: i64) -> Result<WorkflowRow, DbError> {
    let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows w WHERE w.id = ?");
    sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Return workflows ordered by id, optionally restricted to one status.
pub async fn list_workflows(pool: &SqlitePool, status: Option<&str>) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = match status {
        Some(status) => {
            let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows w WHERE w.status = ? ORDER BY w.id ASC");
            sqlx::query_as::<_, WorkflowRow>(&sql).bind(status).fetch_all(pool).await?
        }
        None => {
            let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows w ORDER BY w.id ASC");
            sqlx::query_as::<_, WorkflowRow>(&sql).fetch_all(pool).await?
        }
    };
    Ok(rows)
}

/// Published workflows that selected the given event key.
pub async fn list_published_by_event(pool: &SqlitePool, event_key: &str) -> Result<Vec<WorkflowRow>, DbError> {
    let sql = format!(
        "SELECT {WORKFLOW_COLUMNS} FROM workflows w \
         JOIN workflow_events e ON e.workflow_id = w.id \
         WHERE e.event_key = ? AND w.status = 'publish' \
         ORDER BY w.id ASC"
    );
    let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(event_key)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Event keys indexed for one workflow.
pub async fn list_event_keys(pool: &SqlitePool, workflow_id: i64) -> Result<Vec<String>, DbError> {
    let keys = sqlx::query_scalar::<_, String>(
        "SELECT event_key FROM workflow_events WHERE workflow_id = ? ORDER BY event_key",
    )
    .bind(workflow_id)
    .fetch_all(pool)
    .await?;
    Ok(keys)
}

/// Number of workflows flagged as defaults.
pub async fn count_default_workflows(pool: &SqlitePool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM workflows WHERE is_default = 1")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Permanently delete a workflow by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_workflow(pool: &SqlitePool, id: i64) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM workflow_events WHERE workflow_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(DbError::NotFound);
    }

    tx.commit().await?;
    Ok(())
}

async fn replace_event_keys(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    workflow_id: i64,
    keys: &[String],
) -> Result<(), DbError> {
    sqlx::query("DELETE FROM workflow_events WHERE workflow_id = ?")
        .bind(workflow_id)
        .execute(&mut **tx)
        .await?;

    for key in keys {
        sqlx::query("INSERT OR IGNORE INTO workflow_events (workflow_id, event_key) VALUES (?, ?)")
            .bind(workflow_id)
            .bind(key)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}
