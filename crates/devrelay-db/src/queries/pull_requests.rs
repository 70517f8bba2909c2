//! Database query functions for the `pull_requests` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::PullRequest;

pub async fn insert(
    pool: &PgPool,
    run_id: i64,
    task_id: i64,
    url: &str,
    head_sha: &str,
    base_branch: &str,
) -> Result<PullRequest> {
    sqlx::query_as::<_, PullRequest>(
        "INSERT INTO pull_requests (run_id, task_id, url, head_sha, base_branch) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(task_id)
    .bind(url)
    .bind(head_sha)
    .bind(base_branch)
    .fetch_one(pool)
    .await
    .context("failed to insert pull request")
}

pub async fn mark_merged(pool: &PgPool, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE pull_requests SET merged = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark pull request merged")?;
    Ok(result.rows_affected())
}

pub async fn get_for_run(pool: &PgPool, run_id: i64) -> Result<Option<PullRequest>> {
    sqlx::query_as::<_, PullRequest>("SELECT * FROM pull_requests WHERE run_id = $1")
        .bind(run_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch pull request for run")
}

pub async fn list_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<PullRequest>> {
    sqlx::query_as::<_, PullRequest>(
        "SELECT * FROM pull_requests WHERE task_id = $1 ORDER BY created_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list pull requests for task")
}
