//! `devrelay retry`: operator-forced reactivation of a failed task.
//!
//! Bypasses the automatic reactivation gate's cooldown window and attempt
//! cap (C2's `try_reactivate`) -- those exist to stop an upstream system
//! from hammering a flaky task, not to stop an operator who has looked at
//! the failure and decided to try again right now. The lock check still
//! applies: a task a live worker currently holds cannot be force-retried
//! out from under it.

use anyhow::{bail, Context, Result};
use sqlx::PgPool;

use devrelay_core::queue;
use devrelay_core::state::dispatch;
use devrelay_db::models::TaskStatus;
use devrelay_db::queries::tasks as tasks_db;

pub async fn run_retry(pool: &PgPool, task_id: i64) -> Result<()> {
    let task = tasks_db::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    if task.status != TaskStatus::Failed {
        bail!("task {task_id} is {}, not failed; nothing to retry", task.status);
    }

    if task.is_locked {
        bail!("task {task_id} is locked by {}; wait for it to release before retrying", task.lock_owner.as_deref().unwrap_or("unknown"));
    }

    dispatch::reactivate(pool, task_id).await.context("failed to reactivate task")?;
    tasks_db::clear_cooldown(pool, task_id).await.ok();

    queue::enqueue(pool, &task.external_item_id, Some(task.id), task.priority, serde_json::json!({"trigger": "manual_retry"}))
        .await
        .context("failed to enqueue retry")?;

    println!("Task {task_id} queued for a manual retry.");
    Ok(())
}
