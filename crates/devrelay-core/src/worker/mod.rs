//! The worker loop: lease a queue entry, drive its task's run through the
//! node graph, and release the lock when done.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use devrelay_db::models::{NodeName, Run, Step, StepStatus, Task, TaskStatus};
use devrelay_db::queries::{runs as runs_db, steps as steps_db, tasks as tasks_db};

use crate::engine::{Engine, NodeOutcome};
use crate::queue;
use crate::queue::reactivation::next_cooldown;
use crate::state::dispatch;

pub struct Worker {
    pub pool: PgPool,
    pub engine: Engine,
    pub executor_id: String,
}

impl Worker {
    /// Lease and process one queue entry. Returns `Ok(false)` when the
    /// queue was empty (the caller should back off before polling again).
    pub async fn run_once(&self) -> Result<bool> {
        let Some(entry) = queue::lease_next(&self.pool, &self.executor_id).await? else {
            return Ok(false);
        };

        let Some(task_id) = entry.task_id else {
            warn!(queue_id = entry.queue_id, "queue entry has no associated task; dropping");
            queue::fail(&self.pool, entry.queue_id).await?;
            return Ok(true);
        };

        let task = tasks_db::get_task(&self.pool, task_id)
            .await?
            .with_context(|| format!("task {} referenced by queue entry not found", task_id))?;

        if !tasks_db::try_acquire_lock(&self.pool, task.id, &self.executor_id).await? {
            // `lease_next` already filters out locked tasks, so this is a
            // narrow race against a lock acquired after the lease query ran,
            // not the common case. Put the entry back in rotation rather
            // than failing it outright.
            info!(task_id = task.id, "lost the race to lock task; returning entry to the queue");
            queue::requeue(&self.pool, entry.queue_id).await?;
            return Ok(true);
        }

        let result = self.drive_run(&task, entry.queue_id).await;
        tasks_db::release_lock(&self.pool, task.id, &self.executor_id).await.ok();

        match &result {
            // A paused run already marked its queue entry `waiting_validation`
            // in `drive_nodes`; completing it here would stomp that status.
            Ok(true) => queue::complete(&self.pool, entry.queue_id).await.ok(),
            Ok(false) => None,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "run failed");
                queue::fail(&self.pool, entry.queue_id).await.ok()
            }
        };

        result.map(|_| true)
    }

    /// Drive a run from its first node, unless a previous worker already
    /// started one on this task and crashed before finishing it -- in that
    /// case resume the dangling run instead of starting a second one.
    /// Returns `Ok(true)` when the run completed or failed terminally,
    /// `Ok(false)` when it paused for human validation (the queue entry
    /// stays `waiting_validation`).
    async fn drive_run(&self, task: &Task, queue_id: i64) -> Result<bool> {
        if let Some(dangling) = runs_db::get_active_run_for_task(&self.pool, task.id).await? {
            return self.resume_dangling_run(task, dangling, queue_id).await;
        }

        // A reactivated task is already `processing` by the time its queue
        // entry is leased (`TaskStateMachine::reactivate` put it there);
        // only a brand-new task needs the `pending -> processing` edge.
        if task.status == TaskStatus::Pending {
            dispatch::start_processing(&self.pool, task.id).await?;
        }

        // `previous_status` is only `failed` immediately after a
        // reactivation and before any further transition overwrites it, so
        // it doubles as this run's reactivation flag.
        let is_reactivation = task.previous_status == Some(TaskStatus::Failed);

        let run_number = runs_db::next_run_number(&self.pool, task.id).await?;
        let branch_name = format!("devrelay/task-{}-run-{}", task.id, run_number);
        let run = runs_db::insert_run(&self.pool, task.id, run_number, &self.executor_id, &branch_name, is_reactivation, None, task.reactivation_count)
            .await
            .context("failed to insert run")?;
        runs_db::mark_running(&self.pool, run.id).await.ok();

        match self.drive_nodes(task.id, &run, NodeName::PrepareEnvironment, queue_id).await {
            Ok(completed) => Ok(completed),
            Err(e) => {
                runs_db::complete_run(&self.pool, run.id, devrelay_db::models::RunStatus::Failed, None, Some(&e.to_string()))
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    /// Resume a run left `started`/`running` by a worker that crashed
    /// mid-step (§5 Crash Recovery). If the last recorded step was still
    /// `running` when the crash happened, that same row is re-driven (so
    /// the node ends up with exactly one `steps` row, not two); otherwise
    /// the last step had already finished and its node is re-driven fresh.
    async fn resume_dangling_run(&self, task: &Task, run: Run, queue_id: i64) -> Result<bool> {
        info!(task_id = task.id, run_id = run.id, "resuming dangling run left by a crashed worker");
        runs_db::mark_running(&self.pool, run.id).await.ok();

        let latest = steps_db::latest_step_for_run(&self.pool, run.id).await?;
        let (node, resume_step) = match latest {
            Some(step) if step.status == StepStatus::Running => {
                let node = step.node_name;
                (node, Some(step))
            }
            Some(step) => (step.node_name, None),
            None => (NodeName::PrepareEnvironment, None),
        };

        match self.drive_nodes_from(task.id, &run, node, resume_step, queue_id).await {
            Ok(completed) => Ok(completed),
            Err(e) => {
                runs_db::complete_run(&self.pool, run.id, devrelay_db::models::RunStatus::Failed, None, Some(&e.to_string()))
                    .await
                    .ok();
                Err(e)
            }
        }
    }

    /// Drive nodes starting at `node` until the run completes, fails, or
    /// pauses for human validation. Returns `Ok(true)` on completion,
    /// `Ok(false)` when paused.
    async fn drive_nodes(&self, task_id: i64, run: &Run, start: NodeName, queue_id: i64) -> Result<bool> {
        self.drive_nodes_from(task_id, run, start, None, queue_id).await
    }

    /// As `drive_nodes`, but when `resume_step` is given, its node is
    /// re-driven through `Engine::resume_step` (reusing that step's row)
    /// instead of `Engine::execute` inserting a fresh one for the first
    /// iteration only.
    async fn drive_nodes_from(
        &self,
        task_id: i64,
        run: &Run,
        start: NodeName,
        mut resume_step: Option<Step>,
        queue_id: i64,
    ) -> Result<bool> {
        let mut node = start;
        loop {
            let task = tasks_db::get_task(&self.pool, task_id).await?.context("task disappeared mid-run")?;
            let outcome = if let Some(step) = resume_step.take() {
                self.engine.resume_step(&self.pool, &task, run, &step).await?
            } else {
                self.engine.execute(&self.pool, &task, run, node).await?
            };

            match outcome {
                NodeOutcome::Advance(next) => {
                    self.apply_status_for_edge(task_id, node, next).await?;
                    node = next;
                }
                NodeOutcome::RetryTesting => {
                    dispatch::resume_testing(&self.pool, task_id).await.ok();
                    node = NodeName::RunTests;
                }
                NodeOutcome::AwaitingValidation { validation_id } => {
                    queue::mark_waiting_validation(&self.pool, queue_id).await.ok();
                    info!(task_id, validation_id, "run paused for human validation");
                    return Ok(false);
                }
                NodeOutcome::Completed => {
                    dispatch::complete(&self.pool, task_id, TaskStatus::QualityCheck).await.ok();
                    runs_db::complete_run(&self.pool, run.id, devrelay_db::models::RunStatus::Completed, None, None)
                        .await
                        .ok();
                    tasks_db::clear_cooldown(&self.pool, task_id).await.ok();
                    return Ok(true);
                }
                NodeOutcome::Failed(msg) => {
                    let from = task.status;
                    dispatch::fail(&self.pool, task_id, from).await.ok();
                    runs_db::complete_run(&self.pool, run.id, devrelay_db::models::RunStatus::Failed, None, Some(&msg))
                        .await
                        .ok();
                    if run.is_reactivation {
                        let attempts = task.failed_reactivation_attempts + 1;
                        let (delay, cooldown_type) = next_cooldown(attempts);
                        tasks_db::set_cooldown(&self.pool, task_id, chrono::Utc::now() + delay, cooldown_type, attempts)
                            .await
                            .ok();
                    }
                    anyhow::bail!("{}", msg);
                }
            }
        }
    }

    /// Resume a run paused at `HumanValidation` once a response has been
    /// recorded, continuing from `FinalizePr`.
    pub async fn resume_after_validation(&self, task_id: i64, run: &Run, queue_id: i64) -> Result<()> {
        match self.drive_nodes(task_id, run, NodeName::FinalizePr, queue_id).await {
            Ok(true) => {
                queue::complete(&self.pool, queue_id).await.ok();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                queue::fail(&self.pool, queue_id).await.ok();
                Err(e)
            }
        }
    }

    /// Resume a run after a retryable rejection, re-entering at
    /// `ImplementTask` so the code-generation collaborator gets another
    /// pass with the reviewer's feedback folded into the next run's
    /// instructions.
    pub async fn resume_after_rejection(&self, task_id: i64, run: &Run, queue_id: i64) -> Result<()> {
        dispatch::retry_implementation(&self.pool, task_id).await?;
        match self.drive_nodes(task_id, run, NodeName::ImplementTask, queue_id).await {
            // The retried run may land on another human validation before
            // completing -- `drive_nodes` already marked the queue entry
            // `waiting_validation` in that case, so only complete it here
            // when the run actually finished.
            Ok(true) => {
                queue::complete(&self.pool, queue_id).await.ok();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                queue::fail(&self.pool, queue_id).await.ok();
                Err(e)
            }
        }
    }

    async fn apply_status_for_edge(&self, task_id: i64, from_node: NodeName, to_node: NodeName) -> Result<()> {
        use NodeName::*;
        let transition = match (from_node, to_node) {
            (ImplementTask, RunTests) => Some(dispatch::begin_testing(&self.pool, task_id).await),
            (RunTests, HumanValidation) => Some(dispatch::begin_quality_check(&self.pool, task_id).await),
            (RunTests, DebugCode) => Some(dispatch::begin_debugging(&self.pool, task_id).await),
            _ => None,
        };
        if let Some(result) = transition {
            result?;
        }
        Ok(())
    }
}
