//! Database query functions for `reactivation_records` and
//! `update_trigger_history`.
//!
//! The history table exists purely to make duplicate delivery of the same
//! upstream update a no-op: its primary key is `(task_id, update_id)`, so a
//! second insert of the same pair fails with a unique-violation that the
//! caller downgrades to "already seen" (invariant #3).

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;

use crate::models::{ReactivationRecord, ReactivationStatus, ReactivationTrigger};

pub async fn insert_record(
    pool: &PgPool,
    task_id: i64,
    update_id: &str,
    trigger_type: ReactivationTrigger,
    update_data: Value,
) -> Result<ReactivationRecord> {
    sqlx::query_as::<_, ReactivationRecord>(
        "INSERT INTO reactivation_records \
             (task_id, update_id, trigger_type, update_data, status, started_at) \
         VALUES ($1, $2, $3, $4, 'pending', now()) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(update_id)
    .bind(trigger_type)
    .bind(update_data)
    .fetch_one(pool)
    .await
    .context("failed to insert reactivation record")
}

pub async fn mark_status(
    pool: &PgPool,
    id: i64,
    status: ReactivationStatus,
    run_id: Option<i64>,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE reactivation_records \
         SET status = $1, run_id = COALESCE($2, run_id), error = $3, completed_at = now() \
         WHERE id = $4",
    )
    .bind(status)
    .bind(run_id)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update reactivation record status")?;
    Ok(())
}

pub async fn list_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<ReactivationRecord>> {
    sqlx::query_as::<_, ReactivationRecord>(
        "SELECT * FROM reactivation_records WHERE task_id = $1 ORDER BY started_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list reactivation records for task")
}

/// The most recent reactivation trigger for a task -- used by
/// `implement_task` to fold the update that woke the task back up into
/// the next generation call.
pub async fn get_latest_for_task(pool: &PgPool, task_id: i64) -> Result<Option<ReactivationRecord>> {
    sqlx::query_as::<_, ReactivationRecord>(
        "SELECT * FROM reactivation_records WHERE task_id = $1 ORDER BY started_at DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest reactivation record for task")
}

/// Record that `update_id` has been seen for `task_id`. Returns `false`
/// without erroring when the pair was already recorded, so callers can
/// treat a duplicate delivery as a silent drop rather than a failure.
pub async fn record_update_seen(pool: &PgPool, task_id: i64, update_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO update_trigger_history (task_id, update_id) \
         VALUES ($1, $2) \
         ON CONFLICT (task_id, update_id) DO NOTHING",
    )
    .bind(task_id)
    .bind(update_id)
    .execute(pool)
    .await
    .context("failed to record update trigger history")?;
    Ok(result.rows_affected() > 0)
}
