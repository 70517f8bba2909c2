//! Database query functions for the `locks` table.
//!
//! This is the audit trail alongside the fast CAS path on `tasks`
//! (`tasks::try_acquire_lock` / `tasks::release_lock`): every acquisition
//! and release recorded here so history survives past the current holder.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Lock;

pub async fn record_acquired(
    pool: &PgPool,
    task_id: i64,
    owner: &str,
    metadata: Option<serde_json::Value>,
) -> Result<Lock> {
    sqlx::query_as::<_, Lock>(
        "INSERT INTO locks (task_id, owner, is_active, acquired_at, metadata) \
         VALUES ($1, $2, TRUE, now(), $3) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(owner)
    .bind(metadata)
    .fetch_one(pool)
    .await
    .context("failed to record lock acquisition")
}

/// Close out the active lock row for `owner` on `task_id`, if one exists.
pub async fn record_released(pool: &PgPool, task_id: i64, owner: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE locks SET is_active = FALSE, released_at = now() \
         WHERE task_id = $1 AND owner = $2 AND is_active = TRUE",
    )
    .bind(task_id)
    .bind(owner)
    .execute(pool)
    .await
    .context("failed to record lock release")?;
    Ok(result.rows_affected())
}

pub async fn list_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<Lock>> {
    sqlx::query_as::<_, Lock>("SELECT * FROM locks WHERE task_id = $1 ORDER BY acquired_at DESC")
        .bind(task_id)
        .fetch_all(pool)
        .await
        .context("failed to list locks for task")
}

pub async fn get_active_for_task(pool: &PgPool, task_id: i64) -> Result<Option<Lock>> {
    sqlx::query_as::<_, Lock>("SELECT * FROM locks WHERE task_id = $1 AND is_active = TRUE")
        .bind(task_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch active lock for task")
}
