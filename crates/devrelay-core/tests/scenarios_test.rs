//! End-to-end scenario tests driving the full workflow engine against a
//! real (containerized) PostgreSQL instance, using the synthetic
//! collaborators in place of a real codegen/VCS/tracker provider.
//!
//! Each test creates its own temporary database so scenarios don't
//! interfere with one another.

use std::sync::Arc;

use sqlx::PgPool;

use devrelay_core::collaborators::synthetic::{
    ScriptedTestRunner, StubCodeGenClient, StubNotifier, StubTrackerClient, StubVcsClient,
};
use devrelay_core::collaborators::ChecksStatus;
use devrelay_core::engine::Engine;
use devrelay_core::queue;
use devrelay_core::ratelimit::TokenBucket;
use devrelay_core::validation::{self, ValidationOutcome};
use devrelay_core::worker::Worker;
use devrelay_core::workspace::WorkspaceAllocator;

use devrelay_db::models::{RunStatus, TaskStatus, ValidationStatus};
use devrelay_db::pool;
use devrelay_db::queries::{audit, queue as queue_db, runs as runs_db, tasks as tasks_db, validations as validations_db};

use devrelay_test_utils::{create_test_db, drop_test_db};

async fn setup() -> (PgPool, String) {
    let (db_pool, db_name) = create_test_db().await;
    pool::run_migrations(&db_pool, pool::default_migrations_path())
        .await
        .expect("migrations should succeed");
    (db_pool, db_name)
}

fn worker(pool: PgPool, test_results: Vec<bool>, checks: ChecksStatus) -> Worker {
    let engine = Engine {
        codegen: Arc::new(StubCodeGenClient::default()),
        tests: Arc::new(ScriptedTestRunner::new(test_results)),
        vcs: Arc::new(StubVcsClient::new(checks)),
        tracker: Arc::new(StubTrackerClient::default()),
        notifier: Arc::new(StubNotifier::default()),
        workspace: WorkspaceAllocator::from_env(),
        rate_limiter: Arc::new(TokenBucket::new(100.0, 100.0)),
    };
    Worker { pool, engine, executor_id: "test-executor".to_string() }
}

async fn seed_task(pool: &PgPool, external_item_id: &str) -> devrelay_db::models::Task {
    tasks_db::insert_task(
        pool,
        "github",
        external_item_id,
        "Fix the flaky login test",
        "The login integration test fails intermittently under load.",
        0,
        "git@example.com:acme/widgets.git",
        "main",
        Some("user-1"),
        Some("dev@example.com"),
        Some("Dev Person"),
    )
    .await
    .expect("task insert should succeed")
}

/// S1: happy path -- tests pass first try, the reviewer approves and asks
/// to merge, and the task completes with a merged pull request.
#[tokio::test]
async fn happy_path_completes_and_merges() {
    let (db_pool, db_name) = setup().await;

    let task = seed_task(&db_pool, "issue-1").await;
    let entry = queue::enqueue(&db_pool, &task.external_item_id, Some(task.id), 0, serde_json::json!({}))
        .await
        .expect("enqueue should succeed");

    let w = worker(db_pool.clone(), vec![true], ChecksStatus::Passed);

    let advanced = w.run_once().await.expect("run_once should succeed");
    assert!(advanced, "a pending entry should be picked up");

    // The run should have paused for human validation: task sits in
    // quality_check and the queue entry is waiting, not completed.
    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::QualityCheck);

    let queue_entry = queue_db::get_entry(&db_pool, entry.queue_id).await.unwrap().unwrap();
    assert_eq!(queue_entry.status.to_string(), "waiting_validation");

    let pending = validations_db::list_pending(&db_pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    let pending_validation = pending.into_iter().next().unwrap();

    let (_, outcome) = validation::record_response(
        &db_pool,
        w.engine.notifier.as_ref(),
        &pending_validation,
        ValidationStatus::Approved,
        Some("looks good"),
        None,
        true,
        false,
        120,
        Some("user-1"),
        Some("dev@example.com"),
        Some("Dev Person"),
    )
    .await
    .expect("record_response should succeed");
    assert_eq!(outcome, ValidationOutcome::ApprovedMerge);

    let run = runs_db::get_active_run_for_task(&db_pool, task.id)
        .await
        .unwrap()
        .expect("an active run should exist");
    let resumed_entry = queue_db::get_entry_by_external(&db_pool, &task.external_item_id).await.unwrap().unwrap();

    w.resume_after_validation(task.id, &run, resumed_entry.queue_id).await.expect("resume should succeed");

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let run = runs_db::get_run(&db_pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.pr_url.is_some());

    let completed_entry = queue_db::get_entry(&db_pool, resumed_entry.queue_id).await.unwrap().unwrap();
    assert_eq!(completed_entry.status.to_string(), "completed");

    db_pool.close().await;
    drop_test_db(&db_name).await;
}

/// A failing test run routes through the debug loop and the run still
/// reaches human validation once a later attempt passes.
#[tokio::test]
async fn failing_tests_recover_through_debug_loop() {
    let (db_pool, db_name) = setup().await;

    let task = seed_task(&db_pool, "issue-2").await;
    queue::enqueue(&db_pool, &task.external_item_id, Some(task.id), 0, serde_json::json!({}))
        .await
        .unwrap();

    let w = worker(db_pool.clone(), vec![false, true], ChecksStatus::Passed);
    w.run_once().await.expect("run_once should succeed");

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::QualityCheck);

    let run = runs_db::get_active_run_for_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(run.debug_attempts, 1);

    db_pool.close().await;
    drop_test_db(&db_name).await;
}

/// S5: triple rejection -- each rejection below the cap sends the run back
/// to `implement_task` for another pass; the third rejection abandons it.
#[tokio::test]
async fn triple_rejection_abandons_the_task() {
    let (db_pool, db_name) = setup().await;

    let task = seed_task(&db_pool, "issue-3").await;
    queue::enqueue(&db_pool, &task.external_item_id, Some(task.id), 0, serde_json::json!({}))
        .await
        .unwrap();

    let w = worker(db_pool.clone(), vec![true, true, true], ChecksStatus::Passed);
    w.run_once().await.expect("run_once should succeed");

    for round in 1..=3 {
        let pending = validations_db::list_pending(&db_pool).await.unwrap();
        assert_eq!(pending.len(), 1, "round {round} should have exactly one pending validation");
        let v = pending.into_iter().next().unwrap();

        let (_, outcome) = validation::record_response(
            &db_pool,
            w.engine.notifier.as_ref(),
            &v,
            ValidationStatus::Rejected,
            Some("not quite right"),
            Some("please also update the changelog"),
            false,
            true,
            60,
            Some("user-1"),
            Some("dev@example.com"),
            None,
        )
        .await
        .unwrap();

        let task_row = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
        let run = runs_db::get_active_run_for_task(&db_pool, task.id).await.unwrap().unwrap();
        let entry = queue_db::get_entry_by_external(&db_pool, &task.external_item_id).await.unwrap().unwrap();

        if round < 3 {
            assert_eq!(outcome, ValidationOutcome::RejectedRetry);
            w.resume_after_rejection(task_id_of(&task_row), &run, entry.queue_id).await.expect("resume should succeed");
        } else {
            assert_eq!(outcome, ValidationOutcome::Abandoned);
        }
    }

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    db_pool.close().await;
    drop_test_db(&db_name).await;
}

fn task_id_of(task: &devrelay_db::models::Task) -> i64 {
    task.id
}

/// S4: a reactivation attempt inside the cooldown window is refused, and
/// the same task reactivates once the window has lapsed.
#[tokio::test]
async fn reactivation_is_refused_within_cooldown_and_allowed_after() {
    use devrelay_core::queue::reactivation::{self, ReactivationDecision};
    use devrelay_db::models::{CooldownType, ReactivationTrigger};

    let (db_pool, db_name) = setup().await;

    let task = seed_task(&db_pool, "issue-5").await;
    sqlx::query("UPDATE tasks SET status = 'failed' WHERE id = $1")
        .bind(task.id)
        .execute(&db_pool)
        .await
        .unwrap();
    tasks_db::set_cooldown(&db_pool, task.id, chrono::Utc::now() + chrono::Duration::minutes(5), CooldownType::Normal, 1)
        .await
        .unwrap();

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    let decision = reactivation::try_reactivate(&db_pool, &task, "update-1", ReactivationTrigger::Update, serde_json::json!({}))
        .await
        .unwrap();
    assert!(matches!(decision, ReactivationDecision::Cooldown(_)), "reactivation inside the cooldown window should be refused");

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed, "a refused reactivation must not move the task out of failed");

    // The cooldown lapsing is simulated by clearing it directly; a fresh
    // update id is used since the first is already recorded as seen.
    tasks_db::clear_cooldown(&db_pool, task.id).await.unwrap();
    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    let decision = reactivation::try_reactivate(&db_pool, &task, "update-2", ReactivationTrigger::Update, serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(decision, ReactivationDecision::Reactivated);

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);

    db_pool.close().await;
    drop_test_db(&db_name).await;
}

/// S6: a worker that crashes mid-`run_tests` leaves that step `running`
/// and its run `running` with no completion recorded. The next worker to
/// pick up the task's queue entry resumes the same run and re-drives the
/// same step rather than starting a second run from scratch, so the run
/// ends up with exactly one `run_tests` Step, not two.
#[tokio::test]
async fn crash_mid_run_tests_resumes_without_duplicating_the_step() {
    use devrelay_db::models::NodeName;
    use devrelay_db::queries::steps as steps_db;

    let (db_pool, db_name) = setup().await;

    let task = seed_task(&db_pool, "issue-6").await;
    let entry = queue::enqueue(&db_pool, &task.external_item_id, Some(task.id), 0, serde_json::json!({}))
        .await
        .unwrap();

    // Simulate the state a prior worker left behind after crashing partway
    // through `run_tests`: a run and a single `running` step for that node,
    // with the task already moved into `testing` (the transition
    // `implement_task -> run_tests` applies).
    let run = runs_db::insert_run(&db_pool, task.id, 1, "dead-executor", "devrelay/task-1-run-1", false, None, 0)
        .await
        .unwrap();
    runs_db::mark_running(&db_pool, run.id).await.unwrap();
    steps_db::insert_step(&db_pool, run.id, NodeName::RunTests, 0, 3, None).await.unwrap();
    sqlx::query("UPDATE tasks SET status = 'testing' WHERE id = $1").bind(task.id).execute(&db_pool).await.unwrap();

    let w = worker(db_pool.clone(), vec![true], ChecksStatus::Passed);
    w.run_once().await.expect("run_once should resume the dangling run");

    let steps = steps_db::list_steps_for_run(&db_pool, run.id).await.unwrap();
    let run_tests_steps: Vec<_> = steps.iter().filter(|s| s.node_name == NodeName::RunTests).collect();
    assert_eq!(run_tests_steps.len(), 1, "resuming a crashed step must not insert a second row for it");

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::QualityCheck, "the resumed run should have continued on to human validation");

    let queue_entry = queue_db::get_entry(&db_pool, entry.queue_id).await.unwrap().unwrap();
    assert_eq!(queue_entry.status.to_string(), "waiting_validation");

    db_pool.close().await;
    drop_test_db(&db_name).await;
}

/// An unauthorized responder's approval is recorded but does not resume
/// the paused run (§7's "unauthorized responder" edge case).
#[tokio::test]
async fn unauthorized_responder_does_not_resume_the_run() {
    let (db_pool, db_name) = setup().await;

    let task = seed_task(&db_pool, "issue-4").await;
    queue::enqueue(&db_pool, &task.external_item_id, Some(task.id), 0, serde_json::json!({}))
        .await
        .unwrap();

    let w = worker(db_pool.clone(), vec![true], ChecksStatus::Passed);
    w.run_once().await.expect("run_once should succeed");

    let pending = validations_db::list_pending(&db_pool).await.unwrap();
    let v = pending.into_iter().next().unwrap();

    let notifier = Arc::new(StubNotifier::default());
    let (_, outcome) = validation::record_response(
        &db_pool,
        notifier.as_ref(),
        &v,
        ValidationStatus::Approved,
        None,
        None,
        true,
        false,
        10,
        Some("someone-else"),
        Some("impostor@example.com"),
        None,
    )
    .await
    .unwrap();
    assert_eq!(outcome, ValidationOutcome::Unauthorized);

    let task = tasks_db::get_task(&db_pool, task.id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::QualityCheck, "task should remain paused, not advanced");

    assert_eq!(notifier.unauthorized_calls.lock().unwrap().as_slice(), &[v.id], "exactly one unauthorized-reply notification should fire");

    let entries = audit::list_for_resource(&db_pool, &format!("human_validation:{}", v.id)).await.unwrap();
    assert_eq!(entries.len(), 1, "exactly one audit entry should be recorded");
    assert_eq!(entries[0].action, "unauthorized_reply_attempt");
    assert!(
        matches!(entries[0].severity, devrelay_db::models::AuditSeverity::Medium | devrelay_db::models::AuditSeverity::High | devrelay_db::models::AuditSeverity::Critical),
        "severity should be medium or higher"
    );

    db_pool.close().await;
    drop_test_db(&db_name).await;
}
