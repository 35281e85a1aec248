use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition: {from} -> {to} (allowed: {allowed})")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Stale version for task {task_id}: expected {expected}")]
    StaleVersion { task_id: String, expected: u64 },

    #[error("Cannot delete task {task_id} in non-terminal status {status}")]
    ActiveTaskDeletion { task_id: String, status: String },

    #[error("Spawn denied for tier {tier} (limit: {limit})")]
    SpawnDenied { tier: String, limit: u32 },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Launcher error: {0}")]
    Launcher(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FleetError {
    /// A version conflict is the only failure callers should re-read and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleVersion { .. })
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

pub(crate) fn store_err(msg: impl Into<String>) -> FleetError {
    FleetError::Store(msg.into())
}

pub(crate) fn store_err_with(msg: &str, e: impl std::fmt::Display) -> FleetError {
    FleetError::Store(format!("{}: {}", msg, e))
}
