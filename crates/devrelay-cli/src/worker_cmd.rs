//! `devrelay worker`: the lease -> engine -> complete loop, plus the
//! periodic maintenance sweeps (stale locks/leases, unclassified webhook
//! events, validation expiry).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use devrelay_core::collaborators::synthetic::{
    ScriptedTestRunner, StubCodeGenClient, StubNotifier, StubTrackerClient, StubVcsClient,
};
use devrelay_core::collaborators::ChecksStatus;
use devrelay_core::engine::Engine;
use devrelay_core::queue::reactivation;
use devrelay_core::ratelimit::TokenBucket;
use devrelay_core::sweeper;
use devrelay_core::worker::Worker;
use devrelay_core::workspace::WorkspaceAllocator;
use devrelay_db::models::ReactivationTrigger;
use devrelay_db::queries::webhook_events as webhook_events_db;

/// How long to sleep between queue polls when the queue was empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How often to run the maintenance sweeps, relative to queue polls.
const SWEEP_EVERY_N_POLLS: u32 = 30;

/// Build the engine used by `devrelay worker`.
///
/// The real code-generation, VCS, issue-tracker, and notification
/// providers are out of scope for this process; the synthetic
/// collaborators give the worker loop something real to drive while those
/// integrations are wired up separately.
fn build_engine() -> Engine {
    Engine {
        codegen: Arc::new(StubCodeGenClient::default()),
        tests: Arc::new(ScriptedTestRunner::new(Vec::new())),
        vcs: Arc::new(StubVcsClient::new(ChecksStatus::Passed)),
        tracker: Arc::new(StubTrackerClient::default()),
        notifier: Arc::new(StubNotifier::default()),
        workspace: WorkspaceAllocator::from_env(),
        rate_limiter: Arc::new(TokenBucket::new(4.0, 1.0)),
    }
}

pub async fn run_worker(pool: PgPool, executor_id: String, poll_interval_secs: u64) -> Result<()> {
    let engine = build_engine();
    let worker = Worker { pool: pool.clone(), engine, executor_id: executor_id.clone() };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    println!("devrelay worker started (executor_id={executor_id})");

    let poll_interval = if poll_interval_secs > 0 { Duration::from_secs(poll_interval_secs) } else { IDLE_POLL_INTERVAL };
    let mut polls: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            println!("worker stopped");
            return Ok(());
        }

        let processed = tokio::select! {
            _ = cancel.cancelled() => {
                println!("worker stopped");
                return Ok(());
            }
            result = worker.run_once() => result?,
        };

        polls += 1;
        if polls % SWEEP_EVERY_N_POLLS == 0 {
            run_sweeps(&pool, &worker).await;
        }

        if !processed {
            tokio::select! {
                _ = cancel.cancelled() => {
                    println!("worker stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

async fn run_sweeps(pool: &PgPool, worker: &Worker) {
    match sweeper::sweep_stale_resources(pool).await {
        Ok((locks, leases)) if locks > 0 || leases > 0 => {
            tracing::info!(locks, leases, "reclaimed stale locks/leases");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "stale-resource sweep failed"),
    }

    match sweeper::sweep_validations(pool, worker.engine.notifier.as_ref()).await {
        Ok((expired, reminded)) if expired > 0 || reminded > 0 => {
            tracing::info!(expired, reminded, "validation sweep applied");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "validation sweep failed"),
    }

    match sweeper::sweep_unclassified_events(pool, 20).await {
        Ok(events) if !events.is_empty() => {
            tracing::info!(count = events.len(), "retrying unclassified webhook events");
            for event in events {
                if let Err(e) = retry_classification(pool, &event).await {
                    tracing::warn!(event_id = event.id, error = %e, "retry classification failed");
                }
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "unclassified-event sweep failed"),
    }
}

/// Re-attempt the decision the `POST /webhook/<source>` handler makes at
/// delivery time, for events a prior attempt left `unprocessed`.
async fn retry_classification(pool: &PgPool, event: &devrelay_db::models::WebhookEvent) -> Result<()> {
    use devrelay_db::models::ProcessingStatus;
    use devrelay_db::queries::tasks as tasks_db;

    let external_item_id = match event.payload.get("external_item_id").and_then(|v| v.as_str()) {
        Some(id) => id,
        None => {
            webhook_events_db::mark_processed(pool, event.id, ProcessingStatus::Invalid, None).await?;
            return Ok(());
        }
    };

    let existing = tasks_db::get_task_by_external(pool, &event.source, external_item_id).await?;
    let event_type = event.event_type.as_str();

    let related_task_id = match (existing, event_type) {
        (Some(task), "comment") | (Some(task), "status_change") => {
            let update_id = event.payload.get("update_id").and_then(|v| v.as_str()).unwrap_or_default();
            let trigger = if event_type == "comment" { ReactivationTrigger::Update } else { ReactivationTrigger::StatusChange };
            reactivation::try_reactivate(pool, &task, update_id, trigger, event.payload.clone()).await.ok();
            Some(task.id)
        }
        (existing, _) => existing.map(|t| t.id),
    };

    webhook_events_db::mark_processed(pool, event.id, ProcessingStatus::Processed, related_task_id).await?;
    Ok(())
}
