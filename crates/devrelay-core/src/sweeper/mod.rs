//! Background maintenance sweeps.
//!
//! Runs on a fixed interval from the `devrelay worker` process (or a
//! dedicated `devrelay serve --with-sweeper` flag): reclaim stale
//! locks/leases, retry unclassified webhook events, expire overdue human
//! validations, and rotate `webhook_events` partitions.

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use sqlx::PgPool;

use devrelay_db::queries::{tasks as tasks_db, webhook_events as webhook_events_db};

use crate::collaborators::Notifier;
use crate::queue;
use crate::validation;

/// Default queue lease heartbeat timeout: a worker that hasn't
/// heartbeat-ed in this long is presumed dead.
pub const LEASE_TIMEOUT_SECS: i64 = 120;

/// Default webhook event retention, matching the partitioning scheme.
pub const WEBHOOK_RETENTION_MONTHS: i32 = 6;

/// Reclaim task locks held past their staleness window and queue leases
/// whose heartbeat has gone quiet. Returns the count of each reclaimed.
pub async fn sweep_stale_resources(pool: &PgPool) -> Result<(usize, usize)> {
    let locks = tasks_db::sweep_stale_locks(pool).await.context("failed to sweep stale locks")?;
    let leases = queue::release_stale_leases(pool, LEASE_TIMEOUT_SECS)
        .await
        .context("failed to release stale queue leases")?;
    Ok((locks.len(), leases.len()))
}

/// Re-attempt classification for webhook events still marked unprocessed.
/// Returns the events found; the caller (worker loop) is responsible for
/// re-running C1's classification against each one.
pub async fn sweep_unclassified_events(pool: &PgPool, batch_size: i64) -> Result<Vec<devrelay_db::models::WebhookEvent>> {
    webhook_events_db::list_unprocessed(pool, batch_size)
        .await
        .context("failed to list unprocessed webhook events")
}

/// Expire overdue human validations and send reminders for those
/// approaching their deadline.
pub async fn sweep_validations(pool: &PgPool, notifier: &dyn Notifier) -> Result<(usize, usize)> {
    let expired = validation::sweep_expired(pool).await.context("failed to sweep expired validations")?;
    let reminded = validation::sweep_reminders(pool, notifier).await.context("failed to sweep validation reminders")?;
    Ok((expired.len(), reminded))
}

/// Purge `webhook_events` rows outside the retention window. Partition
/// creation ahead of the current month is left to the operator's
/// migration tooling; this only prunes the default catch-all partition
/// that rows falling outside a dedicated monthly partition land in.
pub async fn rotate_webhook_retention(pool: &PgPool) -> Result<u64> {
    webhook_events_db::purge_older_than(pool, WEBHOOK_RETENTION_MONTHS)
        .await
        .context("failed to purge expired webhook events")
}

/// The calendar month label (`YYYY_MM`) a forward partition for "next
/// month" would use, so the daily maintenance routine can check whether
/// that partition already exists before creating it.
pub fn next_month_label() -> String {
    let now = Utc::now();
    let (year, month) = if now.month() == 12 { (now.year() + 1, 1) } else { (now.year(), now.month() + 1) };
    format!("{year:04}_{month:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_month_label_wraps_december_to_january() {
        // Spot-check the formatting logic in isolation; the actual month
        // depends on wall-clock time so we only assert the shape.
        let label = next_month_label();
        assert_eq!(label.len(), 7);
        assert_eq!(label.as_bytes()[4], b'_');
    }
}
