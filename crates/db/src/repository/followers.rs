//! Per-post follower subscriptions.

use sqlx::SqlitePool;

use crate::{DbError, models::FollowerRow};

/// Subscribe `value` (a user id, role name or e-mail) to a post.
///
/// Returns `true` when a new subscription was stored.
pub async fn add_follower(pool: &SqlitePool, post_id: i64, kind: &str, value: &str) -> Result<bool, DbError> {
    let result = sqlx::query("INSERT OR IGNORE INTO post_followers (post_id, kind, value) VALUES (?, ?, ?)")
        .bind(post_id)
        .bind(kind)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Remove a subscription.  Returns `true` when one was removed.
pub async fn remove_follower(pool: &SqlitePool, post_id: i64, kind: &str, value: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM post_followers WHERE post_id = ? AND kind = ? AND value = ?")
        .bind(post_id)
        .bind(kind)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Every subscription on a post.
pub async fn list_followers(pool: &SqlitePool, post_id: i64) -> Result<Vec<FollowerRow>, DbError> {
    let rows = sqlx::query_as::<_, FollowerRow>(
        "SELECT post_id, kind, value FROM post_followers WHERE post_id = ? ORDER BY kind, value",
    )
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
