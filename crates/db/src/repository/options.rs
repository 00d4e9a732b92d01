//! Key/value plugin options.

use sqlx::SqlitePool;

use crate::DbError;

pub async fn get_option(pool: &SqlitePool, name: &str) -> Result<Option<String>, DbError> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM options WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set_option(pool: &SqlitePool, name: &str, value: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO options (name, value) VALUES (?, ?) \
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
    )
    .bind(name)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
