//! Database query functions for the `audit_log_entries` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{AuditLogEntry, AuditSeverity};

pub async fn record(
    pool: &PgPool,
    actor: &str,
    action: &str,
    resource: &str,
    severity: AuditSeverity,
    metadata: Option<serde_json::Value>,
) -> Result<AuditLogEntry> {
    sqlx::query_as::<_, AuditLogEntry>(
        "INSERT INTO audit_log_entries (actor, action, resource, severity, metadata) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(actor)
    .bind(action)
    .bind(resource)
    .bind(severity)
    .bind(metadata)
    .fetch_one(pool)
    .await
    .context("failed to record audit log entry")
}

pub async fn list_for_resource(pool: &PgPool, resource: &str) -> Result<Vec<AuditLogEntry>> {
    sqlx::query_as::<_, AuditLogEntry>(
        "SELECT * FROM audit_log_entries WHERE resource = $1 ORDER BY created_at DESC",
    )
    .bind(resource)
    .fetch_all(pool)
    .await
    .context("failed to list audit log entries for resource")
}

/// List entries at or above `severity`. Severity is stored as text, so the
/// threshold is expressed via an explicit rank mapping rather than relying
/// on lexicographic comparison (which would not match `AuditSeverity`'s
/// `Low < Medium < High < Critical` ordering).
pub async fn list_at_or_above(pool: &PgPool, severity: AuditSeverity) -> Result<Vec<AuditLogEntry>> {
    sqlx::query_as::<_, AuditLogEntry>(
        "SELECT * FROM audit_log_entries \
         WHERE (CASE severity \
                  WHEN 'low' THEN 0 WHEN 'medium' THEN 1 \
                  WHEN 'high' THEN 2 WHEN 'critical' THEN 3 END) \
               >= (CASE $1 \
                  WHEN 'low' THEN 0 WHEN 'medium' THEN 1 \
                  WHEN 'high' THEN 2 WHEN 'critical' THEN 3 END) \
         ORDER BY created_at DESC",
    )
    .bind(severity)
    .fetch_all(pool)
    .await
    .context("failed to list audit log entries by severity")
}
