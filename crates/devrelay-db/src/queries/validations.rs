//! Database query functions for `human_validations` and
//! `human_validation_responses` (C4).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{HumanValidation, HumanValidationResponse, ValidationStatus};

#[allow(clippy::too_many_arguments)]
pub async fn insert_validation(
    pool: &PgPool,
    task_id: i64,
    run_id: i64,
    step_id: i64,
    title: &str,
    generated_code: serde_json::Value,
    summary: &str,
    files_modified: &[String],
    tracker_update_id: &str,
    creator_id: Option<&str>,
    creator_email: Option<&str>,
    creator_name: Option<&str>,
    expires_at: DateTime<Utc>,
    parent_validation_id: Option<i64>,
) -> Result<HumanValidation> {
    let is_retry = parent_validation_id.is_some();
    sqlx::query_as::<_, HumanValidation>(
        "INSERT INTO human_validations \
             (task_id, run_id, step_id, title, generated_code, summary, files_modified, \
              status, is_retry, parent_validation_id, tracker_update_id, \
              creator_id, creator_email, creator_name, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, $10, $11, $12, $13, $14) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(run_id)
    .bind(step_id)
    .bind(title)
    .bind(generated_code)
    .bind(summary)
    .bind(files_modified)
    .bind(is_retry)
    .bind(parent_validation_id)
    .bind(tracker_update_id)
    .bind(creator_id)
    .bind(creator_email)
    .bind(creator_name)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .context("failed to insert human validation")
}

pub async fn get_validation(pool: &PgPool, id: i64) -> Result<Option<HumanValidation>> {
    sqlx::query_as::<_, HumanValidation>("SELECT * FROM human_validations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch human validation")
}

pub async fn list_pending(pool: &PgPool) -> Result<Vec<HumanValidation>> {
    sqlx::query_as::<_, HumanValidation>(
        "SELECT * FROM human_validations WHERE status = 'pending' ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list pending human validations")
}

/// Pending validations whose deadline has passed -- the C4 expiry sweep's
/// work queue.
pub async fn list_expired(pool: &PgPool) -> Result<Vec<HumanValidation>> {
    sqlx::query_as::<_, HumanValidation>(
        "SELECT * FROM human_validations WHERE status = 'pending' AND expires_at < now()",
    )
    .fetch_all(pool)
    .await
    .context("failed to list expired human validations")
}

pub async fn mark_status(pool: &PgPool, id: i64, status: ValidationStatus) -> Result<u64> {
    let result = sqlx::query("UPDATE human_validations SET status = $1 WHERE id = $2 AND status = 'pending'")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update human validation status")?;
    Ok(result.rows_affected())
}

pub async fn increment_rejection_count(pool: &PgPool, id: i64) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE human_validations SET rejection_count = rejection_count + 1 WHERE id = $1 RETURNING rejection_count",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to increment rejection count")?;
    Ok(row.0)
}

pub async fn record_unauthorized_attempt(pool: &PgPool, id: i64) -> Result<i32> {
    let row: (i32,) = sqlx::query_as(
        "UPDATE human_validations SET unauthorized_attempts = unauthorized_attempts + 1 WHERE id = $1 RETURNING unauthorized_attempts",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to record unauthorized validation attempt")?;
    Ok(row.0)
}

pub async fn mark_reminder_sent(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("UPDATE human_validations SET reminder_sent_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark validation reminder sent")?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_response(
    pool: &PgPool,
    validation_id: i64,
    response_status: ValidationStatus,
    comments: Option<&str>,
    modification_instructions: Option<&str>,
    should_merge: bool,
    should_continue_workflow: bool,
    should_retry_workflow: bool,
    validation_duration_seconds: i64,
    author_id: Option<&str>,
    author_email: Option<&str>,
    author_name: Option<&str>,
) -> Result<HumanValidationResponse> {
    sqlx::query_as::<_, HumanValidationResponse>(
        "INSERT INTO human_validation_responses \
             (validation_id, response_status, comments, modification_instructions, \
              should_merge, should_continue_workflow, should_retry_workflow, \
              validation_duration_seconds, author_id, author_email, author_name) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(validation_id)
    .bind(response_status)
    .bind(comments)
    .bind(modification_instructions)
    .bind(should_merge)
    .bind(should_continue_workflow)
    .bind(should_retry_workflow)
    .bind(validation_duration_seconds)
    .bind(author_id)
    .bind(author_email)
    .bind(author_name)
    .fetch_one(pool)
    .await
    .context("failed to insert human validation response")
}

/// The most recently requested validation for a run -- used by `finalize_pr`
/// to recover the approval's `should_merge` flag without threading it
/// through the engine's node-dispatch signature.
pub async fn get_latest_validation_for_run(pool: &PgPool, run_id: i64) -> Result<Option<HumanValidation>> {
    sqlx::query_as::<_, HumanValidation>(
        "SELECT * FROM human_validations WHERE run_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest human validation for run")
}

/// The most recent response recorded against a validation, if any.
pub async fn get_latest_response(pool: &PgPool, validation_id: i64) -> Result<Option<HumanValidationResponse>> {
    sqlx::query_as::<_, HumanValidationResponse>(
        "SELECT * FROM human_validation_responses WHERE validation_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(validation_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest human validation response")
}

pub async fn list_responses_for_validation(
    pool: &PgPool,
    validation_id: i64,
) -> Result<Vec<HumanValidationResponse>> {
    sqlx::query_as::<_, HumanValidationResponse>(
        "SELECT * FROM human_validation_responses WHERE validation_id = $1 ORDER BY created_at ASC",
    )
    .bind(validation_id)
    .fetch_all(pool)
    .await
    .context("failed to list human validation responses")
}
