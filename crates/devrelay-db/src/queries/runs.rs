//! Database query functions for the `runs` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Run, RunStatus};

/// Start a new run on a task. `run_number` is the caller's responsibility
/// (next value after the highest existing run_number for the task); the
/// table's unique `(task_id, run_number)` constraint catches any race.
#[allow(clippy::too_many_arguments)]
pub async fn insert_run(
    pool: &PgPool,
    task_id: i64,
    run_number: i32,
    executor_id: &str,
    branch_name: &str,
    is_reactivation: bool,
    parent_run_id: Option<i64>,
    reactivation_count: i32,
) -> Result<Run> {
    sqlx::query_as::<_, Run>(
        "INSERT INTO runs \
             (task_id, run_number, status, executor_id, started_at, branch_name, \
              is_reactivation, parent_run_id, reactivation_count) \
         VALUES ($1, $2, 'started', $3, now(), $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(run_number)
    .bind(executor_id)
    .bind(branch_name)
    .bind(is_reactivation)
    .bind(parent_run_id)
    .bind(reactivation_count)
    .fetch_one(pool)
    .await
    .context("failed to insert run")
}

pub async fn get_run(pool: &PgPool, id: i64) -> Result<Option<Run>> {
    sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch run")
}

/// The run currently in {started, running} for a task, if any. Invariant
/// #1 guarantees there is at most one.
pub async fn get_active_run_for_task(pool: &PgPool, task_id: i64) -> Result<Option<Run>> {
    sqlx::query_as::<_, Run>(
        "SELECT * FROM runs WHERE task_id = $1 AND status IN ('started', 'running')",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch active run")
}

pub async fn list_runs_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<Run>> {
    sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE task_id = $1 ORDER BY run_number ASC")
        .bind(task_id)
        .fetch_all(pool)
        .await
        .context("failed to list runs for task")
}

pub async fn next_run_number(pool: &PgPool, task_id: i64) -> Result<i32> {
    let row: (Option<i32>,) =
        sqlx::query_as("SELECT MAX(run_number) FROM runs WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(pool)
            .await
            .context("failed to compute next run number")?;
    Ok(row.0.unwrap_or(0) + 1)
}

pub async fn mark_running(pool: &PgPool, run_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE runs SET status = 'running' WHERE id = $1 AND status = 'started'",
    )
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to mark run running")?;
    Ok(result.rows_affected())
}

pub async fn increment_debug_attempts(pool: &PgPool, run_id: i64) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE runs SET debug_attempts = debug_attempts + 1 WHERE id = $1 RETURNING debug_attempts",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await
    .context("failed to increment debug attempts")?;
    Ok(row.0)
}

pub async fn set_branch_and_pr(
    pool: &PgPool,
    run_id: i64,
    branch_name: Option<&str>,
    pr_url: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE runs SET branch_name = COALESCE($1, branch_name), pr_url = COALESCE($2, pr_url) WHERE id = $3")
        .bind(branch_name)
        .bind(pr_url)
        .bind(run_id)
        .execute(pool)
        .await
        .context("failed to set run branch/PR")?;
    Ok(())
}

/// Terminate a run, recording its duration and the engine's result/error
/// blobs in the same statement that flips its status.
pub async fn complete_run(
    pool: &PgPool,
    run_id: i64,
    status: RunStatus,
    result: Option<serde_json::Value>,
    error: Option<&str>,
) -> Result<u64> {
    let updated = sqlx::query(
        "UPDATE runs \
         SET status = $1, \
             completed_at = now(), \
             duration_ms = EXTRACT(EPOCH FROM (now() - started_at)) * 1000, \
             result = COALESCE($2, result), \
             error = COALESCE($3, error) \
         WHERE id = $4 AND status IN ('started', 'running')",
    )
    .bind(status)
    .bind(result)
    .bind(error)
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to complete run")?;
    Ok(updated.rows_affected())
}

/// Runs left `running`/`started` with a task that is not locked by any
/// live worker -- the crash-recovery entry point (§5 Crash recovery).
pub async fn list_dangling_runs(pool: &PgPool) -> Result<Vec<Run>> {
    sqlx::query_as::<_, Run>(
        "SELECT r.* FROM runs r \
         JOIN tasks t ON t.id = r.task_id \
         WHERE r.status IN ('started', 'running') AND t.is_locked = FALSE",
    )
    .fetch_all(pool)
    .await
    .context("failed to list dangling runs")
}
