use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Effective status of a Task, driven by the workflow engine (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Testing,
    Debugging,
    QualityCheck,
    Completed,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Testing => "testing",
            Self::Debugging => "debugging",
            Self::QualityCheck => "quality_check",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "testing" => Ok(Self::Testing),
            "debugging" => Ok(Self::Debugging),
            "quality_check" => Ok(Self::QualityCheck),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a single workflow attempt on a Task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Running,
    Completed,
    Failed,
    Retry,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "retry" => Ok(Self::Retry),
            other => Err(RunStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run status: {:?}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a single node visit (Step) within a Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retry,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Retry => "retry",
        };
        f.write_str(s)
    }
}

impl FromStr for StepStatus {
    type Err = StepStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "retry" => Ok(Self::Retry),
            other => Err(StepStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepStatusParseError(pub String);

impl fmt::Display for StepStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step status: {:?}", self.0)
    }
}

impl std::error::Error for StepStatusParseError {}

// ---------------------------------------------------------------------------

/// The node names that make up the canonical workflow graph (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    PrepareEnvironment,
    ImplementTask,
    RunTests,
    DebugCode,
    HumanValidation,
    FinalizePr,
    UpdateTracker,
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PrepareEnvironment => "prepare_environment",
            Self::ImplementTask => "implement_task",
            Self::RunTests => "run_tests",
            Self::DebugCode => "debug_code",
            Self::HumanValidation => "human_validation",
            Self::FinalizePr => "finalize_pr",
            Self::UpdateTracker => "update_tracker",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeName {
    type Err = NodeNameParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prepare_environment" => Ok(Self::PrepareEnvironment),
            "implement_task" => Ok(Self::ImplementTask),
            "run_tests" => Ok(Self::RunTests),
            "debug_code" => Ok(Self::DebugCode),
            "human_validation" => Ok(Self::HumanValidation),
            "finalize_pr" => Ok(Self::FinalizePr),
            "update_tracker" => Ok(Self::UpdateTracker),
            other => Err(NodeNameParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeNameParseError(pub String);

impl fmt::Display for NodeNameParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node name: {:?}", self.0)
    }
}

impl std::error::Error for NodeNameParseError {}

// ---------------------------------------------------------------------------

/// Queue slot status (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Pending,
    Running,
    WaitingValidation,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingValidation => "waiting_validation",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

impl FromStr for QueueEntryStatus {
    type Err = QueueEntryStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting_validation" => Ok(Self::WaitingValidation),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timeout" => Ok(Self::Timeout),
            other => Err(QueueEntryStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntryStatusParseError(pub String);

impl fmt::Display for QueueEntryStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid queue entry status: {:?}", self.0)
    }
}

impl std::error::Error for QueueEntryStatusParseError {}

// ---------------------------------------------------------------------------

/// Cooldown window kind (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CooldownType {
    Normal,
    Aggressive,
    Backoff,
}

impl fmt::Display for CooldownType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Aggressive => "aggressive",
            Self::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

impl FromStr for CooldownType {
    type Err = CooldownTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "aggressive" => Ok(Self::Aggressive),
            "backoff" => Ok(Self::Backoff),
            other => Err(CooldownTypeParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownTypeParseError(pub String);

impl fmt::Display for CooldownTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cooldown type: {:?}", self.0)
    }
}

impl std::error::Error for CooldownTypeParseError {}

// ---------------------------------------------------------------------------

/// What triggered a reactivation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReactivationTrigger {
    Update,
    StatusChange,
    Manual,
}

impl fmt::Display for ReactivationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Update => "update",
            Self::StatusChange => "status_change",
            Self::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl FromStr for ReactivationTrigger {
    type Err = ReactivationTriggerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(Self::Update),
            "status_change" => Ok(Self::StatusChange),
            "manual" => Ok(Self::Manual),
            other => Err(ReactivationTriggerParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReactivationTriggerParseError(pub String);

impl fmt::Display for ReactivationTriggerParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid reactivation trigger: {:?}", self.0)
    }
}

impl std::error::Error for ReactivationTriggerParseError {}

// ---------------------------------------------------------------------------

/// Lifecycle status of a ReactivationRecord audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReactivationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for ReactivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ReactivationStatus {
    type Err = ReactivationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ReactivationStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReactivationStatusParseError(pub String);

impl fmt::Display for ReactivationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid reactivation status: {:?}", self.0)
    }
}

impl std::error::Error for ReactivationStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a HumanValidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
    Abandoned,
    Expired,
    Cancelled,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Abandoned => "abandoned",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for ValidationStatus {
    type Err = ValidationStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "abandoned" => Ok(Self::Abandoned),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ValidationStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationStatusParseError(pub String);

impl fmt::Display for ValidationStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid validation status: {:?}", self.0)
    }
}

impl std::error::Error for ValidationStatusParseError {}

// ---------------------------------------------------------------------------

/// Processing outcome of a raw WebhookEvent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Unprocessed,
    Processed,
    Invalid,
    Failed,
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unprocessed => "unprocessed",
            Self::Processed => "processed",
            Self::Invalid => "invalid",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessingStatus {
    type Err = ProcessingStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(Self::Unprocessed),
            "processed" => Ok(Self::Processed),
            "invalid" => Ok(Self::Invalid),
            "failed" => Ok(Self::Failed),
            other => Err(ProcessingStatusParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingStatusParseError(pub String);

impl fmt::Display for ProcessingStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid processing status: {:?}", self.0)
    }
}

impl std::error::Error for ProcessingStatusParseError {}

// ---------------------------------------------------------------------------

/// Severity of an AuditLog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for AuditSeverity {
    type Err = AuditSeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(AuditSeverityParseError(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditSeverityParseError(pub String);

impl fmt::Display for AuditSeverityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid audit severity: {:?}", self.0)
    }
}

impl std::error::Error for AuditSeverityParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// One external tracker ticket, identified internally by an opaque id and
/// externally by `(source, external_item_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub source: String,
    pub external_item_id: String,
    pub title: String,
    pub description: String,
    pub priority: i32,
    pub repository_url: String,
    pub default_branch: String,
    pub status: TaskStatus,
    pub tracker_status: Option<String>,
    pub creator_id: Option<String>,
    pub creator_email: Option<String>,
    pub creator_name: Option<String>,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_owner: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub cooldown_type: Option<CooldownType>,
    pub failed_reactivation_attempts: i32,
    pub reactivation_count: i32,
    pub previous_status: Option<TaskStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One workflow attempt on a Task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Run {
    pub id: i64,
    pub task_id: i64,
    pub run_number: i32,
    pub status: RunStatus,
    pub executor_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    pub is_reactivation: bool,
    pub parent_run_id: Option<i64>,
    pub reactivation_count: i32,
    pub debug_attempts: i32,
    pub created_at: DateTime<Utc>,
}

/// One visited node execution within a Run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Step {
    pub id: i64,
    pub run_id: i64,
    pub node_name: NodeName,
    pub order_index: i32,
    pub status: StepStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub checkpoint: Option<serde_json::Value>,
    pub checkpoint_version: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub checkpoint_saved_at: Option<DateTime<Utc>>,
}

/// Raw webhook ingress record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WebhookEvent {
    pub id: i64,
    pub source: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub headers: serde_json::Value,
    pub signature: Option<String>,
    pub processed: bool,
    pub processing_status: ProcessingStatus,
    pub related_task_id: Option<i64>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Per-ticket queue slot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueEntry {
    pub queue_id: i64,
    pub external_item_id: String,
    pub task_id: Option<i64>,
    pub status: QueueEntryStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub executor_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Audit trail of lock acquisitions for a Task. The fast compare-and-set
/// path lives on [`Task::is_locked`] / [`Task::locked_at`]; this table
/// records the history those fields summarize.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lock {
    pub id: i64,
    pub task_id: i64,
    pub owner: String,
    pub is_active: bool,
    pub acquired_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Audit trail of cooldown windows applied to a Task. The fast predicate
/// path lives on [`Task::cooldown_until`]; this table records the history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cooldown {
    pub id: i64,
    pub task_id: i64,
    pub until_at: DateTime<Utc>,
    pub cooldown_type: CooldownType,
    pub failed_attempts: i32,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit row per reactivation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReactivationRecord {
    pub id: i64,
    pub task_id: i64,
    pub update_id: String,
    pub trigger_type: ReactivationTrigger,
    pub update_data: serde_json::Value,
    pub status: ReactivationStatus,
    pub run_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Dedup guard: at most one row per `(task_id, update_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UpdateTriggerHistory {
    pub task_id: i64,
    pub update_id: String,
    pub created_at: DateTime<Utc>,
}

/// A request for human sign-off, parking a Run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HumanValidation {
    pub id: i64,
    pub task_id: i64,
    pub run_id: i64,
    pub step_id: i64,
    pub title: String,
    pub generated_code: serde_json::Value,
    pub summary: String,
    pub files_modified: Vec<String>,
    pub status: ValidationStatus,
    pub rejection_count: i32,
    pub is_retry: bool,
    pub parent_validation_id: Option<i64>,
    pub tracker_update_id: String,
    pub creator_id: Option<String>,
    pub creator_email: Option<String>,
    pub creator_name: Option<String>,
    pub unauthorized_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}

/// A human's reply to a [`HumanValidation`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HumanValidationResponse {
    pub id: i64,
    pub validation_id: i64,
    pub response_status: ValidationStatus,
    pub comments: Option<String>,
    pub modification_instructions: Option<String>,
    pub should_merge: bool,
    pub should_continue_workflow: bool,
    pub should_retry_workflow: bool,
    pub validation_duration_seconds: i64,
    pub author_id: Option<String>,
    pub author_email: Option<String>,
    pub author_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One LLM call's cost-of-record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AIUsage {
    pub id: i64,
    pub run_id: i64,
    pub task_id: i64,
    pub provider: String,
    pub model: String,
    pub operation: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub estimated_cost: f64,
    pub duration_ms: i64,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A pull request opened by `finalize_pr`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PullRequest {
    pub id: i64,
    pub run_id: i64,
    pub task_id: i64,
    pub url: String,
    pub head_sha: String,
    pub base_branch: String,
    pub merged: bool,
    pub created_at: DateTime<Utc>,
}

/// Audit log entry for mutating admin actions and unauthorized reply attempts.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLogEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub severity: AuditSeverity,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Testing,
            TaskStatus::Debugging,
            TaskStatus::QualityCheck,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        assert!("nope".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn run_status_display_roundtrip() {
        let variants = [
            RunStatus::Started,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Retry,
        ];
        for v in &variants {
            let parsed: RunStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn step_status_display_roundtrip() {
        let variants = [
            StepStatus::Pending,
            StepStatus::Running,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Skipped,
            StepStatus::Retry,
        ];
        for v in &variants {
            let parsed: StepStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn node_name_display_roundtrip() {
        let variants = [
            NodeName::PrepareEnvironment,
            NodeName::ImplementTask,
            NodeName::RunTests,
            NodeName::DebugCode,
            NodeName::HumanValidation,
            NodeName::FinalizePr,
            NodeName::UpdateTracker,
        ];
        for v in &variants {
            let parsed: NodeName = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn queue_entry_status_invalid() {
        assert!("bogus".parse::<QueueEntryStatus>().is_err());
    }

    #[test]
    fn cooldown_type_display_roundtrip() {
        let variants = [
            CooldownType::Normal,
            CooldownType::Aggressive,
            CooldownType::Backoff,
        ];
        for v in &variants {
            let parsed: CooldownType = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn reactivation_trigger_display_roundtrip() {
        let variants = [
            ReactivationTrigger::Update,
            ReactivationTrigger::StatusChange,
            ReactivationTrigger::Manual,
        ];
        for v in &variants {
            let parsed: ReactivationTrigger = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn validation_status_display_roundtrip() {
        let variants = [
            ValidationStatus::Pending,
            ValidationStatus::Approved,
            ValidationStatus::Rejected,
            ValidationStatus::Abandoned,
            ValidationStatus::Expired,
            ValidationStatus::Cancelled,
        ];
        for v in &variants {
            let parsed: ValidationStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn processing_status_display_roundtrip() {
        let variants = [
            ProcessingStatus::Unprocessed,
            ProcessingStatus::Processed,
            ProcessingStatus::Invalid,
            ProcessingStatus::Failed,
        ];
        for v in &variants {
            let parsed: ProcessingStatus = v.to_string().parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn audit_severity_ordering() {
        assert!(AuditSeverity::Low < AuditSeverity::Medium);
        assert!(AuditSeverity::Medium < AuditSeverity::High);
        assert!(AuditSeverity::High < AuditSeverity::Critical);
    }
}
