//! Trait seams for the external systems the engine talks to.
//!
//! Every node in the workflow graph (C3) depends on one or more of these
//! traits rather than on a concrete HTTP client, so the engine can be
//! exercised end-to-end against synthetic collaborators in tests.

pub mod synthetic;

use async_trait::async_trait;
use anyhow::Result;

use devrelay_db::models::{HumanValidation, Task};

/// Tokens and estimated spend for a single generation call, recorded into
/// `ai_usage`.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated_cost: f64,
}

/// The result of an implement/debug generation call.
#[derive(Debug, Clone)]
pub struct CodeGenOutput {
    pub files_modified: Vec<String>,
    pub summary: String,
    pub diff: serde_json::Value,
    pub usage: TokenUsage,
}

/// Generates code changes against a task's repository.
#[async_trait]
pub trait CodeGenClient: Send + Sync {
    async fn implement(&self, task: &Task, instructions: &str) -> Result<CodeGenOutput>;
    async fn debug(&self, task: &Task, failing_output: &str) -> Result<CodeGenOutput>;
    /// Model identifier used for `ai_usage.model` reporting.
    fn model_name(&self) -> &str;
    fn provider_name(&self) -> &str;
}

/// Outcome of running the task's test suite.
#[derive(Debug, Clone)]
pub struct TestRunOutput {
    pub passed: bool,
    pub output: String,
}

/// Runs a task's test suite inside its workspace.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, task: &Task, workspace_path: &str) -> Result<TestRunOutput>;
}

#[derive(Debug, Clone)]
pub struct PullRequestRef {
    pub url: String,
    pub number: u64,
    pub head_sha: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksStatus {
    Passed,
    Failed,
    Pending,
    NoneConfigured,
}

/// Source control operations: branching, pushing, opening/merging PRs.
#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn create_branch(&self, repository_url: &str, base_branch: &str, branch_name: &str) -> Result<()>;
    async fn push(&self, repository_url: &str, branch_name: &str) -> Result<String>;
    #[allow(clippy::too_many_arguments)]
    async fn open_pull_request(
        &self,
        repository_url: &str,
        branch_name: &str,
        base_branch: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequestRef>;
    async fn checks_status(&self, repository_url: &str, head_sha: &str) -> Result<ChecksStatus>;
    async fn merge(&self, repository_url: &str, pr_number: u64) -> Result<()>;
}

/// Tracker (Jira/Linear/etc.) integration: status updates and comments.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    async fn set_status(&self, external_item_id: &str, status: &str) -> Result<()>;
    async fn post_comment(&self, external_item_id: &str, body: &str) -> Result<()>;
}

/// Human notification (Slack/email/etc.) for validation requests.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_validation_requested(&self, validation: &HumanValidation) -> Result<()>;
    async fn notify_validation_reminder(&self, validation: &HumanValidation) -> Result<()>;
    /// A response to `validation` arrived from someone other than its
    /// recorded creator. Implementations post one comment on the ticket
    /// mentioning both the expected creator and the unauthorized replier.
    async fn notify_unauthorized_reply(
        &self,
        validation: &HumanValidation,
        responder_id: Option<&str>,
        responder_email: Option<&str>,
        responder_name: Option<&str>,
    ) -> Result<()>;
}
