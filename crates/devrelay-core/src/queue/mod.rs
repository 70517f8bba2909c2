//! Queue ingestion and leasing (C2).
//!
//! Wraps the `queue_entries` table with the lease/heartbeat/release
//! protocol workers use to pull work, plus the reactivation gate that
//! decides whether an update to an already-processed task should spin up
//! a new run.

pub mod reactivation;

use anyhow::{Context, Result};
use sqlx::PgPool;

use devrelay_db::models::QueueEntry;
use devrelay_db::queries::queue as db;

/// Submit a new item of work. `task_id` is `None` until C1 has classified
/// and created (or matched) the corresponding task.
pub async fn enqueue(
    pool: &PgPool,
    external_item_id: &str,
    task_id: Option<i64>,
    priority: i32,
    payload: serde_json::Value,
) -> Result<QueueEntry> {
    db::enqueue(pool, external_item_id, task_id, priority, payload)
        .await
        .context("failed to enqueue work item")
}

/// Lease the next eligible entry for a worker identified by
/// `executor_task_id`. Returns `None` when the queue is empty.
pub async fn lease_next(pool: &PgPool, executor_task_id: &str) -> Result<Option<QueueEntry>> {
    db::lease_next(pool, executor_task_id)
        .await
        .context("failed to lease next queue entry")
}

/// Refresh a worker's lease so the stale-lease sweeper leaves it alone.
pub async fn heartbeat(pool: &PgPool, queue_id: i64, executor_task_id: &str) -> Result<()> {
    let rows = db::heartbeat(pool, queue_id, executor_task_id)
        .await
        .context("failed to heartbeat queue entry")?;
    if rows == 0 {
        anyhow::bail!("lease on queue entry {} is no longer held by {}", queue_id, executor_task_id);
    }
    Ok(())
}

pub async fn mark_waiting_validation(pool: &PgPool, queue_id: i64) -> Result<()> {
    db::mark_waiting_validation(pool, queue_id)
        .await
        .context("failed to mark queue entry waiting on validation")?;
    Ok(())
}

pub async fn complete(pool: &PgPool, queue_id: i64) -> Result<()> {
    db::complete(pool, queue_id).await.context("failed to complete queue entry")?;
    Ok(())
}

pub async fn fail(pool: &PgPool, queue_id: i64) -> Result<()> {
    db::fail(pool, queue_id).await.context("failed to fail queue entry")?;
    Ok(())
}

/// Return a leased entry to `pending` -- used when the lease was won but
/// the task's lock was not, so the entry goes back into rotation instead
/// of being discarded.
pub async fn requeue(pool: &PgPool, queue_id: i64) -> Result<()> {
    db::requeue(pool, queue_id).await.context("failed to requeue queue entry")?;
    Ok(())
}

/// Reclaim leases whose heartbeat has gone stale, returning them to
/// `pending`. Called by the stale-lease sweeper on a fixed interval.
pub async fn release_stale_leases(pool: &PgPool, heartbeat_timeout_secs: i64) -> Result<Vec<QueueEntry>> {
    db::release_stale_leases(pool, heartbeat_timeout_secs)
        .await
        .context("failed to release stale queue leases")
}
