//! Database query functions for the `ai_usage` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::AIUsage;

#[allow(clippy::too_many_arguments)]
pub async fn record(
    pool: &PgPool,
    run_id: i64,
    task_id: i64,
    provider: &str,
    model: &str,
    operation: &str,
    input_tokens: i64,
    output_tokens: i64,
    estimated_cost: f64,
    duration_ms: i64,
    success: bool,
    error: Option<&str>,
) -> Result<AIUsage> {
    sqlx::query_as::<_, AIUsage>(
        "INSERT INTO ai_usage \
             (run_id, task_id, provider, model, operation, input_tokens, output_tokens, \
              estimated_cost, duration_ms, success, error) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(task_id)
    .bind(provider)
    .bind(model)
    .bind(operation)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(estimated_cost)
    .bind(duration_ms)
    .bind(success)
    .bind(error)
    .fetch_one(pool)
    .await
    .context("failed to record AI usage")
}

pub async fn list_for_run(pool: &PgPool, run_id: i64) -> Result<Vec<AIUsage>> {
    sqlx::query_as::<_, AIUsage>("SELECT * FROM ai_usage WHERE run_id = $1 ORDER BY created_at ASC")
        .bind(run_id)
        .fetch_all(pool)
        .await
        .context("failed to list AI usage for run")
}

/// Sum of `estimated_cost` recorded against a run -- the basis for
/// invariant #8 (a run's total cost equals the sum of its usage rows).
pub async fn total_cost_for_run(pool: &PgPool, run_id: i64) -> Result<f64> {
    let row: (Option<f64>,) =
        sqlx::query_as("SELECT SUM(estimated_cost) FROM ai_usage WHERE run_id = $1")
            .bind(run_id)
            .fetch_one(pool)
            .await
            .context("failed to sum AI usage cost for run")?;
    Ok(row.0.unwrap_or(0.0))
}

pub async fn total_cost_for_task(pool: &PgPool, task_id: i64) -> Result<f64> {
    let row: (Option<f64>,) =
        sqlx::query_as("SELECT SUM(estimated_cost) FROM ai_usage WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(pool)
            .await
            .context("failed to sum AI usage cost for task")?;
    Ok(row.0.unwrap_or(0.0))
}
