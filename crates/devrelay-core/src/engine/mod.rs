//! The workflow engine (C3): drives a run through its node graph.
//!
//! Each node reads and writes its own [`Step`] row so a crashed worker can
//! resume from the last completed step rather than restarting the run.
//! Node behavior itself lives in [`nodes`]; this module owns the
//! step/run bookkeeping and the table that maps [`NodeName`] to handler.

pub mod nodes;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use devrelay_db::models::{NodeName, Run, Step, StepStatus, Task};
use devrelay_db::queries::steps as steps_db;

use crate::collaborators::{CodeGenClient, Notifier, TestRunner, TrackerClient, VcsClient};
use crate::ratelimit::TokenBucket;
use crate::workspace::WorkspaceAllocator;

/// The collaborators and shared resources every node handler needs.
pub struct Engine {
    pub codegen: Arc<dyn CodeGenClient>,
    pub tests: Arc<dyn TestRunner>,
    pub vcs: Arc<dyn VcsClient>,
    pub tracker: Arc<dyn TrackerClient>,
    pub notifier: Arc<dyn Notifier>,
    pub workspace: WorkspaceAllocator,
    pub rate_limiter: Arc<TokenBucket>,
}

/// What the caller (the worker loop) should do after a node runs.
#[derive(Debug)]
pub enum NodeOutcome {
    /// Move on to the given node next.
    Advance(NodeName),
    /// The run is paused awaiting a human validation response.
    AwaitingValidation { validation_id: i64 },
    /// The debug loop should retry testing.
    RetryTesting,
    /// The run finished successfully.
    Completed,
    /// The run failed terminally.
    Failed(String),
}

impl Engine {
    /// Execute the node named by `node`, recording a `steps` row for it,
    /// and return what the worker loop should do next.
    pub async fn execute(&self, pool: &PgPool, task: &Task, run: &Run, node: NodeName) -> Result<NodeOutcome> {
        let order_index = steps_db::max_order_index(pool, run.id).await? + 1;
        let step = steps_db::insert_step(pool, run.id, node, order_index, 3, None)
            .await
            .context("failed to insert step")?;

        self.run_step(pool, task, run, node, &step).await
    }

    /// Re-drive a step a crashed worker left `running`, completing that
    /// same row instead of inserting a second one for the node (§5 Crash
    /// Recovery) -- the resume path `Worker::resume_dangling_run` uses for
    /// the node a run was interrupted on.
    pub async fn resume_step(&self, pool: &PgPool, task: &Task, run: &Run, step: &Step) -> Result<NodeOutcome> {
        self.run_step(pool, task, run, step.node_name, step).await
    }

    async fn run_step(&self, pool: &PgPool, task: &Task, run: &Run, node: NodeName, step: &Step) -> Result<NodeOutcome> {
        let result = self.dispatch(pool, task, run, step, node).await;

        match &result {
            Ok(outcome) => {
                let (status, error) = match outcome {
                    NodeOutcome::Failed(msg) => (StepStatus::Failed, Some(msg.as_str())),
                    NodeOutcome::AwaitingValidation { .. } => (StepStatus::Completed, None),
                    _ => (StepStatus::Completed, None),
                };
                steps_db::complete_step(pool, step.id, status, None, error, None).await.ok();
            }
            Err(e) => {
                steps_db::complete_step(pool, step.id, StepStatus::Failed, None, Some(&e.to_string()), None)
                    .await
                    .ok();
            }
        }

        result
    }

    async fn dispatch(&self, pool: &PgPool, task: &Task, run: &Run, step: &Step, node: NodeName) -> Result<NodeOutcome> {
        match node {
            NodeName::PrepareEnvironment => nodes::prepare_environment(self, pool, task, run).await,
            NodeName::ImplementTask => nodes::implement_task(self, pool, task, run).await,
            NodeName::RunTests => nodes::run_tests(self, pool, task, run).await,
            NodeName::DebugCode => nodes::debug_code(self, pool, task, run, step).await,
            NodeName::HumanValidation => nodes::human_validation(self, pool, task, run, step).await,
            NodeName::FinalizePr => nodes::finalize_pr(self, pool, task, run).await,
            NodeName::UpdateTracker => nodes::update_tracker(self, task).await,
        }
    }
}
