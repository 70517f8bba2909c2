//! Database query functions for the `steps` table.
//!
//! Steps are append-only: the engine inserts a `pending` row before
//! invoking a node, then updates that same row in place as it resolves.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{NodeName, Step, StepStatus};

pub async fn insert_step(
    pool: &PgPool,
    run_id: i64,
    node_name: NodeName,
    order_index: i32,
    max_retries: i32,
    input: Option<serde_json::Value>,
) -> Result<Step> {
    sqlx::query_as::<_, Step>(
        "INSERT INTO steps (run_id, node_name, order_index, status, max_retries, input, started_at) \
         VALUES ($1, $2, $3, 'running', $4, $5, now()) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(node_name)
    .bind(order_index)
    .bind(max_retries)
    .bind(input)
    .fetch_one(pool)
    .await
    .context("failed to insert step")
}

pub async fn get_step(pool: &PgPool, id: i64) -> Result<Option<Step>> {
    sqlx::query_as::<_, Step>("SELECT * FROM steps WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch step")
}

pub async fn list_steps_for_run(pool: &PgPool, run_id: i64) -> Result<Vec<Step>> {
    sqlx::query_as::<_, Step>("SELECT * FROM steps WHERE run_id = $1 ORDER BY order_index ASC")
        .bind(run_id)
        .fetch_all(pool)
        .await
        .context("failed to list steps for run")
}

/// The highest `order_index` recorded for a run, or -1 if none yet.
pub async fn max_order_index(pool: &PgPool, run_id: i64) -> Result<i32> {
    let row: (Option<i32>,) =
        sqlx::query_as("SELECT MAX(order_index) FROM steps WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(pool)
            .await
            .context("failed to compute next step order")?;
    Ok(row.0.unwrap_or(-1))
}

pub async fn complete_step(
    pool: &PgPool,
    step_id: i64,
    status: StepStatus,
    output: Option<serde_json::Value>,
    error: Option<&str>,
    checkpoint: Option<serde_json::Value>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE steps \
         SET status = $1, output = $2, error = $3, checkpoint = $4, \
             completed_at = now(), checkpoint_saved_at = CASE WHEN $4 IS NOT NULL THEN now() ELSE checkpoint_saved_at END \
         WHERE id = $5",
    )
    .bind(status)
    .bind(output)
    .bind(error)
    .bind(checkpoint)
    .bind(step_id)
    .execute(pool)
    .await
    .context("failed to complete step")?;
    Ok(result.rows_affected())
}

pub async fn increment_retry(pool: &PgPool, step_id: i64) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE steps SET retry_count = retry_count + 1, status = 'retry' WHERE id = $1 RETURNING retry_count",
    )
    .bind(step_id)
    .fetch_one(pool)
    .await
    .context("failed to increment step retry count")?;
    Ok(row.0)
}

/// The most recent step of a run -- used on restart to decide whether to
/// resume from its checkpoint or re-drive from the preceding step.
pub async fn latest_step_for_run(pool: &PgPool, run_id: i64) -> Result<Option<Step>> {
    sqlx::query_as::<_, Step>(
        "SELECT * FROM steps WHERE run_id = $1 ORDER BY order_index DESC LIMIT 1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest step for run")
}
