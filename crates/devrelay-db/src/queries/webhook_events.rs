//! Database query functions for the `webhook_events` table (C1).

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{ProcessingStatus, WebhookEvent};

pub async fn insert_event(
    pool: &PgPool,
    source: &str,
    event_type: &str,
    payload: serde_json::Value,
    headers: serde_json::Value,
    signature: Option<&str>,
) -> Result<WebhookEvent> {
    sqlx::query_as::<_, WebhookEvent>(
        "INSERT INTO webhook_events (source, event_type, payload, headers, signature) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(source)
    .bind(event_type)
    .bind(payload)
    .bind(headers)
    .bind(signature)
    .fetch_one(pool)
    .await
    .context("failed to insert webhook event")
}

pub async fn mark_processed(
    pool: &PgPool,
    event_id: i64,
    status: ProcessingStatus,
    related_task_id: Option<i64>,
) -> Result<()> {
    sqlx::query(
        "UPDATE webhook_events \
         SET processed = TRUE, processing_status = $1, related_task_id = $2, processed_at = now() \
         WHERE id = $3",
    )
    .bind(status)
    .bind(related_task_id)
    .bind(event_id)
    .execute(pool)
    .await
    .context("failed to mark webhook event processed")?;
    Ok(())
}

/// Events left unprocessed -- the classification sweeper's work queue
/// (§4.1 "a background sweeper retries classification every 30 s").
pub async fn list_unprocessed(pool: &PgPool, limit: i64) -> Result<Vec<WebhookEvent>> {
    sqlx::query_as::<_, WebhookEvent>(
        "SELECT * FROM webhook_events WHERE processed = FALSE ORDER BY received_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list unprocessed webhook events")
}

pub async fn get_event(pool: &PgPool, id: i64) -> Result<Option<WebhookEvent>> {
    sqlx::query_as::<_, WebhookEvent>("SELECT * FROM webhook_events WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch webhook event")
}

/// Purge events older than the retention window (§4.5: 6 months).
pub async fn purge_older_than(pool: &PgPool, months: i32) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM webhook_events WHERE received_at < now() - ($1 || ' months')::interval",
    )
    .bind(months.to_string())
    .execute(pool)
    .await
    .context("failed to purge old webhook events")?;
    Ok(result.rows_affected())
}
