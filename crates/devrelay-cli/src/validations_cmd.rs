//! `devrelay validations`: the operator-facing side of C4 (Human
//! Validation Gate) -- list pending validations and record a response
//! on the operator's behalf.

use anyhow::{Context, Result};
use sqlx::PgPool;

use devrelay_core::state::dispatch;
use devrelay_core::validation::{self, ValidationOutcome};
use devrelay_core::worker::Worker;
use devrelay_db::models::{RunStatus, TaskStatus, ValidationStatus};
use devrelay_db::queries::{queue as queue_db, runs as runs_db, tasks as tasks_db, validations as validations_db};

pub async fn run_list(pool: &PgPool) -> Result<()> {
    let pending = validations_db::list_pending(pool).await?;

    if pending.is_empty() {
        println!("No pending validations.");
        return Ok(());
    }

    println!("{:<6} {:<8} {:<30} {:<14}", "ID", "TASK", "TITLE", "EXPIRES");
    println!("{}", "-".repeat(62));
    for v in &pending {
        let title_display = if v.title.len() > 28 { format!("{}...", &v.title[..25]) } else { v.title.clone() };
        println!("{:<6} {:<8} {:<30} {:<14}", v.id, v.task_id, title_display, v.expires_at.format("%Y-%m-%d %H:%M"));
    }

    Ok(())
}

/// Record an approval, resuming the paused run toward `finalize_pr`.
pub async fn run_approve(pool: &PgPool, worker: &Worker, validation_id: i64, should_merge: bool, responder_email: &str) -> Result<()> {
    let validation = validations_db::get_validation(pool, validation_id)
        .await?
        .with_context(|| format!("validation {validation_id} not found"))?;

    let (_, outcome) = validation::record_response(
        pool,
        worker.engine.notifier.as_ref(),
        &validation,
        ValidationStatus::Approved,
        None,
        None,
        should_merge,
        false,
        0,
        None,
        Some(responder_email),
        None,
    )
    .await
    .context("failed to record validation response")?;

    match outcome {
        ValidationOutcome::Unauthorized => {
            println!("Responder {responder_email} is not the task's recorded creator; response recorded but not acted on.");
            return Ok(());
        }
        ValidationOutcome::ApprovedMerge | ValidationOutcome::ApprovedNoMerge => {
            println!("Validation {validation_id} approved; resuming task {}.", validation.task_id);
        }
        _ => {}
    }

    let (run, queue_entry) = run_and_queue_entry_for(pool, &validation).await?;
    worker.resume_after_validation(validation.task_id, &run, queue_entry.queue_id).await?;

    Ok(())
}

/// Record a rejection. Below the rejection cap the run resumes at
/// `implement_task` with the reviewer's feedback; at the cap (3
/// rejections on the same lineage) the run and task are left `failed`.
pub async fn run_reject(pool: &PgPool, worker: &Worker, validation_id: i64, instructions: Option<&str>, responder_email: &str) -> Result<()> {
    let validation = validations_db::get_validation(pool, validation_id)
        .await?
        .with_context(|| format!("validation {validation_id} not found"))?;

    let (_, outcome) = validation::record_response(
        pool,
        worker.engine.notifier.as_ref(),
        &validation,
        ValidationStatus::Rejected,
        None,
        instructions,
        false,
        true,
        0,
        None,
        Some(responder_email),
        None,
    )
    .await
    .context("failed to record validation response")?;

    match outcome {
        ValidationOutcome::RejectedRetry => {
            println!("Validation {validation_id} rejected; task {} queued for another attempt.", validation.task_id);
            let (run, queue_entry) = run_and_queue_entry_for(pool, &validation).await?;
            worker.resume_after_rejection(validation.task_id, &run, queue_entry.queue_id).await?;
        }
        ValidationOutcome::Abandoned => {
            println!("Validation {validation_id} rejected and the task abandoned (rejection cap reached).");
            fail_abandoned_run(pool, &validation).await?;
        }
        ValidationOutcome::Unauthorized => {
            println!("Responder {responder_email} is not the task's recorded creator; response recorded but not acted on.");
        }
        _ => {}
    }

    Ok(())
}

/// Cancel a still-pending validation outright, without recording a
/// response -- used to abandon a run an operator has decided not to wait
/// on (e.g. the underlying task was closed upstream).
pub async fn run_cancel(pool: &PgPool, validation_id: i64) -> Result<()> {
    let rows = validations_db::mark_status(pool, validation_id, ValidationStatus::Cancelled)
        .await
        .context("failed to cancel validation")?;
    if rows == 0 {
        anyhow::bail!("validation {validation_id} was not pending (already resolved or does not exist)");
    }
    println!("Validation {validation_id} cancelled.");
    Ok(())
}

async fn run_and_queue_entry_for(
    pool: &PgPool,
    validation: &devrelay_db::models::HumanValidation,
) -> Result<(devrelay_db::models::Run, devrelay_db::models::QueueEntry)> {
    let run = runs_db::get_run(pool, validation.run_id)
        .await?
        .with_context(|| format!("run {} referenced by validation not found", validation.run_id))?;

    let task = tasks_db::get_task(pool, validation.task_id)
        .await?
        .with_context(|| format!("task {} referenced by validation not found", validation.task_id))?;

    let queue_entry = queue_db::get_entry_by_external(pool, &task.external_item_id)
        .await?
        .with_context(|| format!("no queue entry found for task {}", task.id))?;

    Ok((run, queue_entry))
}

async fn fail_abandoned_run(pool: &PgPool, validation: &devrelay_db::models::HumanValidation) -> Result<()> {
    dispatch::fail(pool, validation.task_id, TaskStatus::QualityCheck).await.ok();
    runs_db::complete_run(pool, validation.run_id, RunStatus::Failed, None, Some("validation rejected three times; abandoned"))
        .await
        .ok();
    Ok(())
}
