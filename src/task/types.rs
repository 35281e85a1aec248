use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskStatus;

/// Category of work a task represents. Drives the complexity factor in
/// admission pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    BugFix,
    #[default]
    Feature,
    Refactor,
    Review,
    Docs,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BugFix => "bug_fix",
            Self::Feature => "feature",
            Self::Refactor => "refactor",
            Self::Review => "review",
            Self::Docs => "docs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bug_fix" => Some(Self::BugFix),
            "feature" => Some(Self::Feature),
            "refactor" => Some(Self::Refactor),
            "review" => Some(Self::Review),
            "docs" => Some(Self::Docs),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentBackend {
    #[default]
    ClaudeCode,
    Codex,
    Custom,
}

impl AgentBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude_code",
            Self::Codex => "codex",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude_code" => Some(Self::ClaudeCode),
            "codex" => Some(Self::Codex),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured context attached to a task when a failure is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl FailureContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
            occurred_at: Utc::now(),
            details: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Durable task record. Owned exclusively by the registry; every mutation
/// goes through `transition` or `record_failure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub requester_id: String,
    pub backend: AgentBackend,
    pub model: String,
    pub category: TaskCategory,
    pub description: String,
    pub branch_name: String,
    pub worktree_path: Option<String>,
    pub container_id: Option<String>,
    pub session_handle: Option<String>,
    pub status: TaskStatus,
    pub version: u64,
    pub pr_number: Option<i64>,
    pub ci_status: Option<String>,
    pub review_status: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub failure_context: Option<FailureContext>,
    /// Deterministic hash used for request deduplication.
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub spawned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Fields required to insert a new task record.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub requester_id: String,
    pub description: String,
    pub category: TaskCategory,
    pub backend: AgentBackend,
    pub model: String,
    pub branch_name: String,
    pub max_retries: Option<u32>,
    pub content_hash: Option<String>,
}

impl NewTask {
    pub fn new(requester_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            description: description.into(),
            category: TaskCategory::default(),
            backend: AgentBackend::default(),
            model: String::new(),
            branch_name: String::new(),
            max_retries: None,
            content_hash: None,
        }
    }

    pub fn with_category(mut self, category: TaskCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_backend(mut self, backend: AgentBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_branch(mut self, branch_name: impl Into<String>) -> Self {
        self.branch_name = branch_name.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// Metadata applied in the same write as a status transition.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub worktree_path: Option<String>,
    pub container_id: Option<String>,
    pub session_handle: Option<String>,
    pub pr_number: Option<i64>,
    pub ci_status: Option<String>,
    pub review_status: Option<String>,
    pub spawned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn with_worktree(mut self, path: impl Into<String>) -> Self {
        self.worktree_path = Some(path.into());
        self
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    pub fn with_session(mut self, handle: impl Into<String>) -> Self {
        self.session_handle = Some(handle.into());
        self
    }

    pub fn with_pr_number(mut self, pr_number: i64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }

    pub fn with_ci_status(mut self, ci_status: impl Into<String>) -> Self {
        self.ci_status = Some(ci_status.into());
        self
    }

    pub fn with_review_status(mut self, review_status: impl Into<String>) -> Self {
        self.review_status = Some(review_status.into());
        self
    }

    pub fn with_spawned_at(mut self, at: DateTime<Utc>) -> Self {
        self.spawned_at = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_builders() {
        let new = NewTask::new("op-1", "Fix login redirect")
            .with_category(TaskCategory::BugFix)
            .with_model("claude-sonnet-4")
            .with_branch("fleet/fix-login")
            .with_max_retries(5);

        assert_eq!(new.requester_id, "op-1");
        assert_eq!(new.category, TaskCategory::BugFix);
        assert_eq!(new.max_retries, Some(5));
        assert!(new.content_hash.is_none());
    }

    #[test]
    fn test_category_round_trip() {
        for cat in [
            TaskCategory::BugFix,
            TaskCategory::Feature,
            TaskCategory::Refactor,
            TaskCategory::Review,
            TaskCategory::Docs,
        ] {
            assert_eq!(TaskCategory::parse(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn test_failure_context_builder() {
        let ctx = FailureContext::new("launcher exploded")
            .with_step("spawn_agent")
            .with_details(serde_json::json!({"exit_code": 137}));

        assert_eq!(ctx.step.as_deref(), Some("spawn_agent"));
        assert!(ctx.details.is_some());
    }
}
