//! In-memory collaborator doubles used by end-to-end tests.
//!
//! Each double records the calls it received behind a `Mutex` so tests can
//! assert on what the engine actually did, and is configured up front with
//! the canned outcome it should return (e.g. "tests fail twice, then pass").

use std::sync::Mutex;

use async_trait::async_trait;
use anyhow::Result;

use devrelay_db::models::{HumanValidation, Task};

use super::{
    ChecksStatus, CodeGenClient, CodeGenOutput, Notifier, PullRequestRef, TestRunOutput, TestRunner,
    TokenUsage, TrackerClient, VcsClient,
};

/// Always succeeds, returning a fixed diff.
pub struct StubCodeGenClient {
    pub calls: Mutex<Vec<String>>,
}

impl Default for StubCodeGenClient {
    fn default() -> Self {
        Self { calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl CodeGenClient for StubCodeGenClient {
    async fn implement(&self, task: &Task, instructions: &str) -> Result<CodeGenOutput> {
        self.calls.lock().unwrap().push(format!("implement:{}:{}", task.id, instructions));
        Ok(CodeGenOutput {
            files_modified: vec!["src/lib.rs".to_string()],
            summary: "implemented the requested change".to_string(),
            diff: serde_json::json!({"files": ["src/lib.rs"]}),
            usage: TokenUsage { input_tokens: 1200, output_tokens: 400, estimated_cost: 0.02 },
        })
    }

    async fn debug(&self, task: &Task, failing_output: &str) -> Result<CodeGenOutput> {
        self.calls.lock().unwrap().push(format!("debug:{}:{}", task.id, failing_output));
        Ok(CodeGenOutput {
            files_modified: vec!["src/lib.rs".to_string()],
            summary: "patched the failing test".to_string(),
            diff: serde_json::json!({"files": ["src/lib.rs"]}),
            usage: TokenUsage { input_tokens: 1500, output_tokens: 600, estimated_cost: 0.03 },
        })
    }

    fn model_name(&self) -> &str {
        "synthetic-coder-1"
    }

    fn provider_name(&self) -> &str {
        "synthetic"
    }
}

/// Returns a caller-configured sequence of pass/fail results, one per call.
pub struct ScriptedTestRunner {
    pub results: Mutex<Vec<bool>>,
}

impl ScriptedTestRunner {
    pub fn new(results: Vec<bool>) -> Self {
        Self { results: Mutex::new(results) }
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run_tests(&self, _task: &Task, _workspace_path: &str) -> Result<TestRunOutput> {
        let mut results = self.results.lock().unwrap();
        let passed = if results.is_empty() { true } else { results.remove(0) };
        Ok(TestRunOutput {
            passed,
            output: if passed { "all tests passed".to_string() } else { "assertion failed at test_foo".to_string() },
        })
    }
}

/// Records VCS operations and returns canned responses.
pub struct StubVcsClient {
    pub checks: ChecksStatus,
    pub calls: Mutex<Vec<String>>,
}

impl StubVcsClient {
    pub fn new(checks: ChecksStatus) -> Self {
        Self { checks, calls: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl VcsClient for StubVcsClient {
    async fn create_branch(&self, repository_url: &str, base_branch: &str, branch_name: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("create_branch:{repository_url}:{base_branch}:{branch_name}"));
        Ok(())
    }

    async fn push(&self, repository_url: &str, branch_name: &str) -> Result<String> {
        self.calls.lock().unwrap().push(format!("push:{repository_url}:{branch_name}"));
        Ok("deadbeefcafef00d".to_string())
    }

    async fn open_pull_request(
        &self,
        repository_url: &str,
        branch_name: &str,
        base_branch: &str,
        title: &str,
        _body: &str,
    ) -> Result<PullRequestRef> {
        self.calls.lock().unwrap().push(format!("open_pr:{repository_url}:{branch_name}:{base_branch}:{title}"));
        Ok(PullRequestRef {
            url: format!("https://example.com/{repository_url}/pull/1"),
            number: 1,
            head_sha: "deadbeefcafef00d".to_string(),
        })
    }

    async fn checks_status(&self, _repository_url: &str, _head_sha: &str) -> Result<ChecksStatus> {
        Ok(self.checks)
    }

    async fn merge(&self, repository_url: &str, pr_number: u64) -> Result<()> {
        self.calls.lock().unwrap().push(format!("merge:{repository_url}:{pr_number}"));
        Ok(())
    }
}

/// Records tracker calls without contacting anything.
#[derive(Default)]
pub struct StubTrackerClient {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl TrackerClient for StubTrackerClient {
    async fn set_status(&self, external_item_id: &str, status: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("set_status:{external_item_id}:{status}"));
        Ok(())
    }

    async fn post_comment(&self, external_item_id: &str, body: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("post_comment:{external_item_id}:{body}"));
        Ok(())
    }
}

/// Records notifications without sending anything.
#[derive(Default)]
pub struct StubNotifier {
    pub calls: Mutex<Vec<i64>>,
    pub unauthorized_calls: Mutex<Vec<i64>>,
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn notify_validation_requested(&self, validation: &HumanValidation) -> Result<()> {
        self.calls.lock().unwrap().push(validation.id);
        Ok(())
    }

    async fn notify_validation_reminder(&self, validation: &HumanValidation) -> Result<()> {
        self.calls.lock().unwrap().push(validation.id);
        Ok(())
    }

    async fn notify_unauthorized_reply(
        &self,
        validation: &HumanValidation,
        _responder_id: Option<&str>,
        _responder_email: Option<&str>,
        _responder_name: Option<&str>,
    ) -> Result<()> {
        self.unauthorized_calls.lock().unwrap().push(validation.id);
        Ok(())
    }
}
