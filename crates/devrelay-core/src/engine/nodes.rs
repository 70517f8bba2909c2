//! Node handlers for the workflow graph (C3).
//!
//! Each function implements one [`NodeName`] and returns the
//! [`NodeOutcome`] the worker loop should act on. None of these functions
//! touch the task's `status` column directly -- the worker loop applies
//! the corresponding [`TaskStateMachine`](crate::state::TaskStateMachine)
//! transition once a node returns.

use anyhow::{Context, Result};
use sqlx::PgPool;

use devrelay_db::models::{Run, Step, Task};
use devrelay_db::queries::{
    ai_usage as ai_usage_db, pull_requests as pr_db, reactivations as reactivations_db, runs as runs_db,
    validations as validations_db,
};

use crate::collaborators::ChecksStatus;

use super::{Engine, NodeOutcome};

/// A run that has failed this many debug attempts gives up rather than
/// burning an unbounded amount of LLM spend chasing a flaky fix.
const MAX_DEBUG_ATTEMPTS: i32 = 3;

pub async fn prepare_environment(engine: &Engine, _pool: &PgPool, task: &Task, run: &Run) -> Result<NodeOutcome> {
    let _workspace_path = engine
        .workspace
        .allocate(task.id, run.id)
        .context("failed to allocate workspace")?;

    let branch_name = run
        .branch_name
        .clone()
        .unwrap_or_else(|| format!("devrelay/task-{}-run-{}", task.id, run.run_number));

    engine
        .vcs
        .create_branch(&task.repository_url, &task.default_branch, &branch_name)
        .await
        .context("failed to create branch")?;

    Ok(NodeOutcome::Advance(devrelay_db::models::NodeName::ImplementTask))
}

pub async fn implement_task(engine: &Engine, pool: &PgPool, task: &Task, run: &Run) -> Result<NodeOutcome> {
    engine.rate_limiter.acquire(1.0).await;

    let instructions = build_implement_instructions(pool, task, run).await?;
    let output = engine
        .codegen
        .implement(task, &instructions)
        .await
        .context("code generation failed")?;

    ai_usage_db::record(
        pool,
        run.id,
        task.id,
        engine.codegen.provider_name(),
        engine.codegen.model_name(),
        "implement",
        output.usage.input_tokens,
        output.usage.output_tokens,
        output.usage.estimated_cost,
        0,
        true,
        None,
    )
    .await
    .context("failed to record AI usage")?;

    Ok(NodeOutcome::Advance(devrelay_db::models::NodeName::RunTests))
}

/// Build the instructions handed to the code-generation collaborator:
/// the task description, plus -- on a retry -- the prior rejection's
/// feedback, plus -- on a reactivated run -- the update that woke the task
/// back up. Both extras are additive, since a reactivated task can itself
/// go through rejection rounds before landing on `finalize_pr`.
async fn build_implement_instructions(pool: &PgPool, task: &Task, run: &Run) -> Result<String> {
    let mut instructions = format!("{}\n\n{}", task.title, task.description);

    if let Some(modification_instructions) = latest_rejection_feedback(pool, run.id).await? {
        instructions.push_str("\n\n--- feedback from the previous review round ---\n");
        instructions.push_str(&modification_instructions);
    }

    if run.is_reactivation {
        if let Some(update_text) = latest_reactivation_text(pool, task.id).await? {
            instructions.push_str("\n\n--- update that triggered this run ---\n");
            instructions.push_str(&update_text);
        }
    }

    Ok(instructions)
}

/// The modification instructions from the most recent rejected response on
/// this run, if the run has been through a rejection round already.
async fn latest_rejection_feedback(pool: &PgPool, run_id: i64) -> Result<Option<String>> {
    let Some(validation) = validations_db::get_latest_validation_for_run(pool, run_id).await? else {
        return Ok(None);
    };
    let Some(response) = validations_db::get_latest_response(pool, validation.id).await? else {
        return Ok(None);
    };
    Ok(response.modification_instructions)
}

/// The comment or status-change body that triggered a reactivation, read
/// off the task's most recent reactivation record.
async fn latest_reactivation_text(pool: &PgPool, task_id: i64) -> Result<Option<String>> {
    let Some(record) = reactivations_db::get_latest_for_task(pool, task_id).await? else {
        return Ok(None);
    };
    Ok(record
        .update_data
        .get("body")
        .or_else(|| record.update_data.get("description"))
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

pub async fn run_tests(engine: &Engine, _pool: &PgPool, task: &Task, run: &Run) -> Result<NodeOutcome> {
    let workspace_path = engine.workspace.allocate(task.id, run.id)?;
    let result = engine
        .tests
        .run_tests(task, &workspace_path.to_string_lossy())
        .await
        .context("test run failed to execute")?;

    if result.passed {
        Ok(NodeOutcome::Advance(devrelay_db::models::NodeName::HumanValidation))
    } else {
        Ok(NodeOutcome::Advance(devrelay_db::models::NodeName::DebugCode))
    }
}

pub async fn debug_code(engine: &Engine, pool: &PgPool, task: &Task, run: &Run, step: &Step) -> Result<NodeOutcome> {
    let attempts = runs_db::increment_debug_attempts(pool, run.id)
        .await
        .context("failed to increment debug attempts")?;

    if attempts > MAX_DEBUG_ATTEMPTS {
        return Ok(NodeOutcome::Failed(format!(
            "exceeded {} debug attempts without a passing test run",
            MAX_DEBUG_ATTEMPTS
        )));
    }

    engine.rate_limiter.acquire(1.0).await;

    let failing_output = step
        .output
        .as_ref()
        .and_then(|v| v.get("output"))
        .and_then(|v| v.as_str())
        .unwrap_or("tests failed")
        .to_string();

    let output = engine
        .codegen
        .debug(task, &failing_output)
        .await
        .context("debug generation failed")?;

    ai_usage_db::record(
        pool,
        run.id,
        task.id,
        engine.codegen.provider_name(),
        engine.codegen.model_name(),
        "debug",
        output.usage.input_tokens,
        output.usage.output_tokens,
        output.usage.estimated_cost,
        0,
        true,
        None,
    )
    .await
    .context("failed to record AI usage")?;

    Ok(NodeOutcome::RetryTesting)
}

pub async fn human_validation(engine: &Engine, pool: &PgPool, task: &Task, run: &Run, step: &Step) -> Result<NodeOutcome> {
    let validation = crate::validation::request_validation(
        pool,
        engine.notifier.as_ref(),
        task,
        run.id,
        step.id,
        &task.title,
        serde_json::json!({"run_id": run.id}),
        "awaiting review before merge",
        &[],
        &format!("run-{}", run.id),
        None,
    )
    .await
    .context("failed to request human validation")?;

    Ok(NodeOutcome::AwaitingValidation { validation_id: validation.id })
}

pub async fn finalize_pr(engine: &Engine, pool: &PgPool, task: &Task, run: &Run) -> Result<NodeOutcome> {
    let branch_name = run
        .branch_name
        .clone()
        .unwrap_or_else(|| format!("devrelay/task-{}-run-{}", task.id, run.run_number));

    let head_sha = engine
        .vcs
        .push(&task.repository_url, &branch_name)
        .await
        .context("failed to push branch")?;

    let pr = engine
        .vcs
        .open_pull_request(
            &task.repository_url,
            &branch_name,
            &task.default_branch,
            &task.title,
            &task.description,
        )
        .await
        .context("failed to open pull request")?;

    pr_db::insert(pool, run.id, task.id, &pr.url, &head_sha, &task.default_branch)
        .await
        .context("failed to record pull request")?;
    runs_db::set_branch_and_pr(pool, run.id, Some(&branch_name), Some(&pr.url)).await.ok();

    // The approving response's `should_merge` gates the merge outright; a
    // missing response (finalize_pr reached without ever requesting human
    // validation) defaults to merging once checks are green, matching the
    // no-human-in-the-loop case.
    let should_merge = should_merge_for_run(pool, run.id).await?;

    // Only merge once required checks have passed or none are configured;
    // a failing or still-pending check leaves the PR open for a human.
    match engine.vcs.checks_status(&task.repository_url, &head_sha).await? {
        ChecksStatus::Passed | ChecksStatus::NoneConfigured if should_merge => {
            engine.vcs.merge(&task.repository_url, pr.number).await.context("failed to merge pull request")?;
        }
        _ => {
            // Either checks haven't gone green yet, or the reviewer
            // approved without asking to merge -- leave the PR open;
            // `devrelay report` and the tracker comment surface this so a
            // human can intervene or merge by hand.
        }
    }

    Ok(NodeOutcome::Advance(devrelay_db::models::NodeName::UpdateTracker))
}

/// Look up the approval that sent this run to `finalize_pr` and return
/// whether it asked to merge. Defaults to `true` when no validation or
/// response was ever recorded for the run.
async fn should_merge_for_run(pool: &PgPool, run_id: i64) -> Result<bool> {
    let Some(validation) = validations_db::get_latest_validation_for_run(pool, run_id).await? else {
        return Ok(true);
    };
    let Some(response) = validations_db::get_latest_response(pool, validation.id).await? else {
        return Ok(true);
    };
    Ok(response.should_merge)
}

pub async fn update_tracker(engine: &Engine, task: &Task) -> Result<NodeOutcome> {
    engine
        .tracker
        .set_status(&task.external_item_id, &task.status.to_string())
        .await
        .context("failed to update tracker status")?;

    Ok(NodeOutcome::Completed)
}
