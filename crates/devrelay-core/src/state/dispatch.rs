//! Convenience dispatch helpers that wrap [`super::TaskStateMachine`]
//! transitions with semantic names.

use anyhow::Result;
use sqlx::PgPool;

use devrelay_db::models::TaskStatus;

use super::TaskStateMachine;

/// Begin work on a task: transition `pending -> processing`.
pub async fn start_processing(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Pending, TaskStatus::Processing).await
}

/// Move from implementation into the test node: `processing -> testing`.
pub async fn begin_testing(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Processing, TaskStatus::Testing).await
}

/// Hand a failing test run to the debug node: `testing -> debugging`.
pub async fn begin_debugging(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Testing, TaskStatus::Debugging).await
}

/// Return from the debug node to re-run tests: `debugging -> testing`.
pub async fn resume_testing(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Debugging, TaskStatus::Testing).await
}

/// Tests passed; move to the quality gate: `testing -> quality_check`.
pub async fn begin_quality_check(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Testing, TaskStatus::QualityCheck).await
}

/// Mark a task completed from whichever node finished it.
pub async fn complete(pool: &PgPool, task_id: i64, from: TaskStatus) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, from, TaskStatus::Completed).await
}

/// Mark a task failed from whichever node gave up on it.
pub async fn fail(pool: &PgPool, task_id: i64, from: TaskStatus) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, from, TaskStatus::Failed).await
}

/// A rejected-but-retryable validation sends the run back for another
/// implementation pass: `quality_check -> processing`.
pub async fn retry_implementation(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::QualityCheck, TaskStatus::Processing).await
}

/// Reactivate a failed task back into `processing`, incrementing its
/// reactivation counter.
pub async fn reactivate(pool: &PgPool, task_id: i64) -> Result<()> {
    TaskStateMachine::reactivate(pool, task_id).await
}
