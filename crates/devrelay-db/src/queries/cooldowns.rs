//! Database query functions for the `cooldowns` table.
//!
//! Audit trail alongside the fast CAS fields on `tasks`
//! (`tasks::set_cooldown` / `tasks::clear_cooldown`): one row per cooldown
//! period imposed on a task, independent of whatever the current fast-path
//! fields say.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{Cooldown, CooldownType};

pub async fn record(
    pool: &PgPool,
    task_id: i64,
    until_at: DateTime<Utc>,
    cooldown_type: CooldownType,
    failed_attempts: i32,
    metadata: Option<serde_json::Value>,
) -> Result<Cooldown> {
    sqlx::query_as::<_, Cooldown>(
        "INSERT INTO cooldowns (task_id, until_at, cooldown_type, failed_attempts, metadata) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(until_at)
    .bind(cooldown_type)
    .bind(failed_attempts)
    .bind(metadata)
    .fetch_one(pool)
    .await
    .context("failed to record cooldown")
}

pub async fn list_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<Cooldown>> {
    sqlx::query_as::<_, Cooldown>(
        "SELECT * FROM cooldowns WHERE task_id = $1 ORDER BY created_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list cooldowns for task")
}

/// The most recent cooldown recorded for a task, used to report the
/// escalation trajectory (normal -> aggressive -> backoff).
pub async fn latest_for_task(pool: &PgPool, task_id: i64) -> Result<Option<Cooldown>> {
    sqlx::query_as::<_, Cooldown>(
        "SELECT * FROM cooldowns WHERE task_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest cooldown for task")
}
