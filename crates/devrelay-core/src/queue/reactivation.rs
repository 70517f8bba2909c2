//! The reactivation gate: decides whether an upstream update to an
//! already-`failed` task should spin up a new run.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use devrelay_db::models::{CooldownType, ReactivationStatus, ReactivationTrigger, Task, TaskStatus};
use devrelay_db::queries::{reactivations as reactivations_db, tasks as tasks_db};

use crate::state::TaskStateMachine;

/// Outcome of evaluating whether an update should reactivate a task.
#[derive(Debug, Clone, PartialEq)]
pub enum ReactivationDecision {
    /// A new run should be started; the task has been moved to `processing`.
    Reactivated,
    /// The update was already seen for this task, or the task was not
    /// eligible (not `failed`, or lost a race to reactivate).
    Duplicate,
    /// The task is locked by a live worker.
    Locked,
    /// The task is in a cooldown window until the given time.
    Cooldown(DateTime<Utc>),
    /// The task has exhausted its reactivation attempt budget.
    CapReached,
}

const MAX_FAILED_REACTIVATIONS: i32 = 5;

/// Escalating cooldown schedule: normal (5 min) for the first two failed
/// attempts, aggressive (15 min) through the fourth, backoff
/// (`min(60, 5*2^attempts)` min) beyond that.
pub fn next_cooldown(failed_attempts: i32) -> (Duration, CooldownType) {
    match failed_attempts {
        n if n <= 2 => (Duration::minutes(5), CooldownType::Normal),
        n if n <= 4 => (Duration::minutes(15), CooldownType::Aggressive),
        n => {
            let minutes = (5i64 * 2i64.pow(n.min(20) as u32)).min(60);
            (Duration::minutes(minutes), CooldownType::Backoff)
        }
    }
}

/// Whether `task` has exhausted its reactivation attempt budget.
///
/// The cap is on `reactivation_count` (monotonic, never reset) rather than
/// `failed_reactivation_attempts` (reset by `clear_cooldown` on every
/// successful run) -- a task that occasionally succeeds must still stop
/// being reactivated once it's been reactivated five times in total.
fn cap_reached(task: &Task) -> bool {
    task.reactivation_count >= MAX_FAILED_REACTIVATIONS
}

/// Evaluate and, if eligible, apply a reactivation for `task` triggered by
/// `update_id`. Idempotent: redelivering the same `update_id` is a no-op.
pub async fn try_reactivate(
    pool: &PgPool,
    task: &Task,
    update_id: &str,
    trigger: ReactivationTrigger,
    update_data: serde_json::Value,
) -> Result<ReactivationDecision> {
    let first_seen = reactivations_db::record_update_seen(pool, task.id, update_id)
        .await
        .context("failed to record update trigger history")?;
    if !first_seen {
        return Ok(ReactivationDecision::Duplicate);
    }

    if task.status != TaskStatus::Failed {
        return Ok(ReactivationDecision::Duplicate);
    }

    if task.is_locked {
        return Ok(ReactivationDecision::Locked);
    }

    // A `status_change` trigger (the tracker reporting a human already
    // overrode the state) bypasses cooldown, but never the lock or the
    // attempt cap.
    let bypasses_cooldown = trigger == ReactivationTrigger::StatusChange;

    if !bypasses_cooldown {
        if let Some(until) = task.cooldown_until {
            if until > Utc::now() {
                return Ok(ReactivationDecision::Cooldown(until));
            }
        }
    }

    if cap_reached(task) {
        return Ok(ReactivationDecision::CapReached);
    }

    let record = reactivations_db::insert_record(pool, task.id, update_id, trigger, update_data)
        .await
        .context("failed to insert reactivation record")?;

    // If two reactivations race on the same task, the loser's transition
    // affects zero rows (status is no longer `failed`) and is dropped.
    match TaskStateMachine::reactivate(pool, task.id).await {
        Ok(()) => {
            tasks_db::clear_cooldown(pool, task.id).await.ok();
            reactivations_db::mark_status(pool, record.id, ReactivationStatus::Processing, None, None)
                .await
                .ok();
            Ok(ReactivationDecision::Reactivated)
        }
        Err(_) => {
            reactivations_db::mark_status(
                pool,
                record.id,
                ReactivationStatus::Failed,
                None,
                Some("lost race to reactivate task"),
            )
            .await
            .ok();
            Ok(ReactivationDecision::Duplicate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use devrelay_db::models::TaskStatus;

    fn sample_task() -> Task {
        Task {
            id: 1,
            source: "jira".into(),
            external_item_id: "PROJ-1".into(),
            title: "t".into(),
            description: "d".into(),
            priority: 0,
            repository_url: "git@example.com:org/repo.git".into(),
            default_branch: "main".into(),
            status: TaskStatus::Failed,
            tracker_status: None,
            creator_id: None,
            creator_email: None,
            creator_name: None,
            is_locked: false,
            locked_at: None,
            lock_owner: None,
            cooldown_until: None,
            cooldown_type: None,
            failed_reactivation_attempts: 0,
            reactivation_count: 0,
            previous_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn cooldown_escalates_from_normal_to_backoff() {
        assert_eq!(next_cooldown(1).1, CooldownType::Normal);
        assert_eq!(next_cooldown(3).1, CooldownType::Aggressive);
        assert_eq!(next_cooldown(5).1, CooldownType::Backoff);
    }

    #[test]
    fn backoff_duration_is_capped_at_60_minutes() {
        let (five, _) = next_cooldown(5);
        let (fifty, _) = next_cooldown(50);
        assert_eq!(five, Duration::minutes(60));
        assert_eq!(fifty, Duration::minutes(60));
    }

    #[test]
    fn cap_is_checked_against_reactivation_count_not_failed_attempts() {
        let mut task = sample_task();
        // A task that keeps succeeding after reactivation resets
        // `failed_reactivation_attempts` to 0 every time, but
        // `reactivation_count` never resets -- the cap must track the
        // latter or a flaky-but-occasionally-passing task reactivates
        // forever.
        task.failed_reactivation_attempts = 0;
        task.reactivation_count = MAX_FAILED_REACTIVATIONS;
        assert!(cap_reached(&task));

        task.reactivation_count = MAX_FAILED_REACTIVATIONS - 1;
        assert!(!cap_reached(&task), "count = max - 1 must still be allowed");
    }
}
