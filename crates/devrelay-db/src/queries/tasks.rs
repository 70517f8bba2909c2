//! Database query functions for the `tasks` table.
//!
//! Two families of update live here: plain status transitions used by the
//! workflow engine (optimistic-locked on the prior status, mirroring the
//! pattern used throughout this crate), and the lock/cooldown/reactivation
//! fields C2 uses as its fast compare-and-set path (denormalized onto the
//! task row so the lease and reactivation predicates stay single-query).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use sqlx::PgPool;

use crate::models::{CooldownType, Task, TaskStatus};

#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &PgPool,
    source: &str,
    external_item_id: &str,
    title: &str,
    description: &str,
    priority: i32,
    repository_url: &str,
    default_branch: &str,
    creator_id: Option<&str>,
    creator_email: Option<&str>,
    creator_name: Option<&str>,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
             (source, external_item_id, title, description, priority, \
              repository_url, default_branch, creator_id, creator_email, creator_name) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING *",
    )
    .bind(source)
    .bind(external_item_id)
    .bind(title)
    .bind(description)
    .bind(priority)
    .bind(repository_url)
    .bind(default_branch)
    .bind(creator_id)
    .bind(creator_email)
    .bind(creator_name)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")
}

/// Look up a task by its external identity, the key C1 classifies on.
pub async fn get_task_by_external(
    pool: &PgPool,
    source: &str,
    external_item_id: &str,
) -> Result<Option<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE source = $1 AND external_item_id = $2")
        .bind(source)
        .bind(external_item_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task by external id")
}

pub async fn list_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list tasks")
}

/// Atomically transition a task's effective status, optimistic-locked on
/// the expected prior status (§4.3's allowed-transition table is enforced
/// by the caller; this only guards against a concurrent writer racing the
/// same row).
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: i64,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, previous_status = status, updated_at = now() \
         WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

pub async fn set_tracker_status(pool: &PgPool, task_id: i64, tracker_status: &str) -> Result<()> {
    sqlx::query("UPDATE tasks SET tracker_status = $1, updated_at = now() WHERE id = $2")
        .bind(tracker_status)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to set tracker status")?;
    Ok(())
}

// -----------------------------------------------------------------------
// Lock fast-path (§4.2)
// -----------------------------------------------------------------------

/// Try to acquire the task lock for `owner`. The WHERE clause is the CAS:
/// succeeds if the task is unlocked, or locked but stale (> 30 min old).
/// Returns `true` iff this call won the race.
pub async fn try_acquire_lock(pool: &PgPool, task_id: i64, owner: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET is_locked = TRUE, locked_at = now(), lock_owner = $1, updated_at = now() \
         WHERE id = $2 \
           AND (is_locked = FALSE OR locked_at < now() - INTERVAL '30 minutes')",
    )
    .bind(owner)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to acquire task lock")?;

    Ok(result.rows_affected() > 0)
}

/// Release the task lock, but only if `owner` is the current holder.
pub async fn release_lock(pool: &PgPool, task_id: i64, owner: &str) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET is_locked = FALSE, lock_owner = NULL, updated_at = now() \
         WHERE id = $1 AND lock_owner = $2",
    )
    .bind(task_id)
    .bind(owner)
    .execute(pool)
    .await
    .context("failed to release task lock")?;

    Ok(result.rows_affected())
}

/// Forcibly clear locks older than 30 min with no refresh. Returns the
/// tasks that were swept so the caller can log/requeue them.
pub async fn sweep_stale_locks(pool: &PgPool) -> Result<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET is_locked = FALSE, lock_owner = NULL, updated_at = now() \
         WHERE is_locked = TRUE AND locked_at < now() - INTERVAL '30 minutes' \
         RETURNING *",
    )
    .fetch_all(pool)
    .await
    .context("failed to sweep stale locks")
}

// -----------------------------------------------------------------------
// Cooldown fast-path (§4.2)
// -----------------------------------------------------------------------

pub async fn set_cooldown(
    pool: &PgPool,
    task_id: i64,
    until_at: DateTime<Utc>,
    cooldown_type: CooldownType,
    failed_attempts: i32,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks \
         SET cooldown_until = $1, cooldown_type = $2, failed_reactivation_attempts = $3, \
             updated_at = now() \
         WHERE id = $4",
    )
    .bind(until_at)
    .bind(cooldown_type)
    .bind(failed_attempts)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to set cooldown")?;
    Ok(())
}

/// Clear the cooldown and reset the failure counter, as happens when a
/// reactivated run reaches `completed`.
pub async fn clear_cooldown(pool: &PgPool, task_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks \
         SET cooldown_until = NULL, cooldown_type = NULL, failed_reactivation_attempts = 0, \
             updated_at = now() \
         WHERE id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to clear cooldown")?;
    Ok(())
}

/// Record the identity that triggered a reactivation as the task's
/// "authorized creator" going forward, so the next human validation checks
/// the commenter who asked for another run rather than whoever originally
/// filed the ticket.
pub async fn set_creator(
    pool: &PgPool,
    task_id: i64,
    creator_id: Option<&str>,
    creator_email: Option<&str>,
    creator_name: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks \
         SET creator_id = $1, creator_email = $2, creator_name = $3, updated_at = now() \
         WHERE id = $4",
    )
    .bind(creator_id)
    .bind(creator_email)
    .bind(creator_name)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to set task creator")?;
    Ok(())
}

/// Apply a successful reactivation: bump the counter, stash the previous
/// status, and move the task into `processing`. Optimistic-locked on the
/// expected terminal status so a racing caller cannot double-reactivate.
pub async fn reactivate_task(pool: &PgPool, task_id: i64, from: TaskStatus) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET previous_status = status, \
             status = 'processing', \
             reactivation_count = reactivation_count + 1, \
             updated_at = now() \
         WHERE id = $1 AND status = $2",
    )
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to reactivate task")?;

    Ok(result.rows_affected())
}
