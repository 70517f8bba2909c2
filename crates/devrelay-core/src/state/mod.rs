//! Task state machine transitions.
//!
//! Validates and executes state transitions for tasks, enforcing the
//! allowed transition graph and optimistic locking against the database.

pub mod dispatch;
pub mod queries;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;

use devrelay_db::models::TaskStatus;
use devrelay_db::queries::tasks as db;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending        -> processing, failed
/// processing     -> testing, debugging, completed, failed
/// testing        -> quality_check, debugging, completed, failed
/// debugging      -> testing, completed, failed
/// quality_check  -> completed, processing (rejected retry), failed
/// completed      -> completed  (idempotent re-application)
/// failed         -> pending, processing  (reactivation)
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (from, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Testing)
                | (Processing, Debugging)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Testing, QualityCheck)
                | (Testing, Debugging)
                | (Testing, Completed)
                | (Testing, Failed)
                | (Debugging, Testing)
                | (Debugging, Completed)
                | (Debugging, Failed)
                | (QualityCheck, Completed)
                | (QualityCheck, Processing)
                | (QualityCheck, Failed)
                | (Completed, Completed)
                | (Failed, Pending)
                | (Failed, Processing)
        )
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// Returns an error if the transition is not a legal edge, the task
    /// does not exist, or the current status in the database does not
    /// match `from` (a concurrent writer raced this one).
    pub async fn transition(pool: &PgPool, task_id: i64, from: TaskStatus, to: TaskStatus) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!("invalid state transition: {} -> {} for task {}", from, to, task_id);
        }

        let rows = db::transition_task_status(pool, task_id, from, to)
            .await
            .with_context(|| format!("failed to transition task {} from {} to {}", task_id, from, to))?;

        if rows == 0 {
            let task = db::get_task(pool, task_id).await?;
            match task {
                None => bail!("task {} not found", task_id),
                Some(t) => bail!(
                    "optimistic lock failed: task {} has status {}, expected {}",
                    task_id,
                    t.status,
                    from
                ),
            }
        }

        Ok(())
    }

    /// Apply a reactivation (`failed -> processing`), bumping the
    /// reactivation counter and stashing the prior status in one
    /// optimistic-locked statement.
    pub async fn reactivate(pool: &PgPool, task_id: i64) -> Result<()> {
        let rows = db::reactivate_task(pool, task_id, TaskStatus::Failed)
            .await
            .with_context(|| format!("failed to reactivate task {}", task_id))?;

        if rows == 0 {
            let task = db::get_task(pool, task_id).await?;
            match task {
                None => bail!("task {} not found", task_id),
                Some(t) => bail!(
                    "cannot reactivate task {}: current status is {}, expected failed",
                    task_id,
                    t.status
                ),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn forward_path_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(Pending, Processing));
        assert!(TaskStateMachine::is_valid_transition(Processing, Testing));
        assert!(TaskStateMachine::is_valid_transition(Testing, QualityCheck));
        assert!(TaskStateMachine::is_valid_transition(QualityCheck, Completed));
    }

    #[test]
    fn debug_loop_is_valid() {
        assert!(TaskStateMachine::is_valid_transition(Testing, Debugging));
        assert!(TaskStateMachine::is_valid_transition(Debugging, Testing));
    }

    #[test]
    fn completed_is_terminal_except_idempotent_reapply() {
        assert!(TaskStateMachine::is_valid_transition(Completed, Completed));
        assert!(!TaskStateMachine::is_valid_transition(Completed, Processing));
        assert!(!TaskStateMachine::is_valid_transition(Completed, Failed));
    }

    #[test]
    fn failed_only_reactivates_forward() {
        assert!(TaskStateMachine::is_valid_transition(Failed, Pending));
        assert!(TaskStateMachine::is_valid_transition(Failed, Processing));
        assert!(!TaskStateMachine::is_valid_transition(Failed, Testing));
        assert!(!TaskStateMachine::is_valid_transition(Failed, Completed));
    }

    #[test]
    fn quality_check_cannot_skip_back_to_testing() {
        assert!(!TaskStateMachine::is_valid_transition(QualityCheck, Testing));
    }

    #[test]
    fn rejected_validation_retries_from_processing() {
        assert!(TaskStateMachine::is_valid_transition(QualityCheck, Processing));
    }
}
