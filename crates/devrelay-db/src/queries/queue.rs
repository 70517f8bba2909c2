//! Database query functions for the `queue_entries` table (C2).
//!
//! Entries are leased, not popped: a worker claims one by flipping it to
//! `running` and recording a heartbeat, then either completes it or lets
//! the heartbeat go stale so a sweeper can reclaim it.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::QueueEntry;

pub async fn enqueue(
    pool: &PgPool,
    external_item_id: &str,
    task_id: Option<i64>,
    priority: i32,
    payload: serde_json::Value,
) -> Result<QueueEntry> {
    sqlx::query_as::<_, QueueEntry>(
        "INSERT INTO queue_entries (external_item_id, task_id, status, priority, payload) \
         VALUES ($1, $2, 'pending', $3, $4) \
         RETURNING *",
    )
    .bind(external_item_id)
    .bind(task_id)
    .bind(priority)
    .bind(payload)
    .fetch_one(pool)
    .await
    .context("failed to enqueue entry")
}

/// Lease the highest-priority pending entry for `executor_task_id` whose
/// task (if any) is neither locked nor in a cooldown window. Entries with
/// no associated task (not yet classified) are always eligible. Uses
/// `FOR UPDATE SKIP LOCKED` on the queue row so concurrent workers never
/// block one another, then the outer UPDATE performs the actual claim.
pub async fn lease_next(pool: &PgPool, executor_task_id: &str) -> Result<Option<QueueEntry>> {
    let mut tx = pool.begin().await.context("failed to start lease transaction")?;

    let candidate = sqlx::query_as::<_, QueueEntry>(
        "SELECT qe.* FROM queue_entries qe \
         LEFT JOIN tasks t ON t.id = qe.task_id \
         WHERE qe.status = 'pending' \
           AND (t.id IS NULL OR (t.is_locked = false AND (t.cooldown_until IS NULL OR t.cooldown_until <= now()))) \
         ORDER BY qe.priority DESC, qe.created_at ASC \
         LIMIT 1 \
         FOR UPDATE OF qe SKIP LOCKED",
    )
    .fetch_optional(&mut *tx)
    .await
    .context("failed to select lease candidate")?;

    let Some(candidate) = candidate else {
        tx.commit().await.ok();
        return Ok(None);
    };

    let leased = sqlx::query_as::<_, QueueEntry>(
        "UPDATE queue_entries \
         SET status = 'running', executor_task_id = $1, leased_at = now(), heartbeat_at = now() \
         WHERE queue_id = $2 \
         RETURNING *",
    )
    .bind(executor_task_id)
    .bind(candidate.queue_id)
    .fetch_one(&mut *tx)
    .await
    .context("failed to claim lease candidate")?;

    tx.commit().await.context("failed to commit lease transaction")?;
    Ok(Some(leased))
}

pub async fn heartbeat(pool: &PgPool, queue_id: i64, executor_task_id: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries SET heartbeat_at = now() \
         WHERE queue_id = $1 AND executor_task_id = $2 AND status = 'running'",
    )
    .bind(queue_id)
    .bind(executor_task_id)
    .execute(pool)
    .await
    .context("failed to heartbeat queue entry")?;
    Ok(result.rows_affected())
}

pub async fn mark_waiting_validation(pool: &PgPool, queue_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'waiting_validation' WHERE queue_id = $1 AND status = 'running'",
    )
    .bind(queue_id)
    .execute(pool)
    .await
    .context("failed to mark queue entry waiting on validation")?;
    Ok(result.rows_affected())
}

pub async fn complete(pool: &PgPool, queue_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'completed', completed_at = now() WHERE queue_id = $1",
    )
    .bind(queue_id)
    .execute(pool)
    .await
    .context("failed to complete queue entry")?;
    Ok(result.rows_affected())
}

/// Return a leased entry to `pending` without marking it terminally
/// failed -- used when a worker wins the lease but loses the race to
/// acquire the task's lock, so another worker (or this one, next poll)
/// gets to pick it up again.
pub async fn requeue(pool: &PgPool, queue_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries \
         SET status = 'pending', executor_task_id = NULL, leased_at = NULL, heartbeat_at = NULL \
         WHERE queue_id = $1 AND status = 'running'",
    )
    .bind(queue_id)
    .execute(pool)
    .await
    .context("failed to requeue queue entry")?;
    Ok(result.rows_affected())
}

pub async fn fail(pool: &PgPool, queue_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries SET status = 'failed', completed_at = now() WHERE queue_id = $1",
    )
    .bind(queue_id)
    .execute(pool)
    .await
    .context("failed to fail queue entry")?;
    Ok(result.rows_affected())
}

/// Entries whose lease holder has gone quiet -- returned to `pending` so a
/// live worker can retry them (§5 Crash recovery, applied to C2's queue).
pub async fn release_stale_leases(pool: &PgPool, heartbeat_timeout_secs: i64) -> Result<Vec<QueueEntry>> {
    sqlx::query_as::<_, QueueEntry>(
        "UPDATE queue_entries \
         SET status = 'pending', executor_task_id = NULL, leased_at = NULL, heartbeat_at = NULL \
         WHERE status = 'running' \
           AND heartbeat_at < now() - ($1 || ' seconds')::interval \
         RETURNING *",
    )
    .bind(heartbeat_timeout_secs.to_string())
    .fetch_all(pool)
    .await
    .context("failed to release stale queue leases")
}

pub async fn get_entry(pool: &PgPool, queue_id: i64) -> Result<Option<QueueEntry>> {
    sqlx::query_as::<_, QueueEntry>("SELECT * FROM queue_entries WHERE queue_id = $1")
        .bind(queue_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch queue entry")
}

pub async fn get_entry_by_external(pool: &PgPool, external_item_id: &str) -> Result<Option<QueueEntry>> {
    sqlx::query_as::<_, QueueEntry>(
        "SELECT * FROM queue_entries WHERE external_item_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(external_item_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch queue entry by external id")
}
