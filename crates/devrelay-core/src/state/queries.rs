//! Query helpers for task status reporting.
//!
//! Re-exports and wraps the lower-level DB queries from
//! [`devrelay_db::queries::tasks`] for use by the CLI's `status` command
//! and by C2's lease/reactivation predicates.

use anyhow::Result;
use sqlx::PgPool;

use devrelay_db::models::Task;

pub async fn get_task(pool: &PgPool, task_id: i64) -> Result<Option<Task>> {
    devrelay_db::queries::tasks::get_task(pool, task_id).await
}

pub async fn list_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    devrelay_db::queries::tasks::list_tasks(pool).await
}

/// Whether a task is currently eligible for a new run: not locked, not in
/// cooldown, and not already `completed`.
pub fn is_dispatchable(task: &Task, now: chrono::DateTime<chrono::Utc>) -> bool {
    use devrelay_db::models::TaskStatus;

    if task.status == TaskStatus::Completed {
        return false;
    }
    if task.is_locked {
        return false;
    }
    if let Some(until) = task.cooldown_until {
        if until > now {
            return false;
        }
    }
    true
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
            status: TaskStatus::Pending,
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
    fn locked_task_is_not_dispatchable() {
        let mut task = sample_task();
        task.is_locked = true;
        assert!(!is_dispatchable(&task, Utc::now()));
    }

    #[test]
    fn cooling_down_task_is_not_dispatchable() {
        let mut task = sample_task();
        task.cooldown_until = Some(Utc::now() + chrono::Duration::minutes(5));
        assert!(!is_dispatchable(&task, Utc::now()));
    }

    #[test]
    fn completed_task_is_never_dispatchable() {
        let mut task = sample_task();
        task.status = TaskStatus::Completed;
        assert!(!is_dispatchable(&task, Utc::now()));
    }

    #[test]
    fn idle_task_is_dispatchable() {
        let task = sample_task();
        assert!(is_dispatchable(&task, Utc::now()));
    }
}
