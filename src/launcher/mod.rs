//! External agent-process launcher contract.
//!
//! The launcher provisions a workspace and starts an agent process; the saga
//! only reacts to success or failure of these calls. Timeout and cancellation
//! policy belong to the implementation, not to the orchestration layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::task::AgentBackend;

/// Everything the launcher needs to provision and start one agent.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub task_id: String,
    pub requester_id: String,
    pub branch_name: String,
    pub backend: AgentBackend,
    pub model: String,
    pub prompt: String,
}

/// Handle to a launched agent process.
#[derive(Debug, Clone)]
pub struct LaunchedAgent {
    pub process_ref: String,
    pub workspace_path: String,
    pub spawned_at: DateTime<Utc>,
}

#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn spawn(&self, request: LaunchRequest) -> Result<LaunchedAgent>;

    async fn kill(&self, task_id: &str, process_ref: &str) -> Result<()>;

    async fn cleanup(&self, task_id: &str) -> Result<()>;

    async fn get_logs(&self, task_id: &str, tail_lines: Option<usize>) -> Result<String>;
}
