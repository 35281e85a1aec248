//! Compensating-transaction spawn orchestrator.
//!
//! Four ordered steps: admission + insert, transition to spawning, agent
//! launch, transition to running. On failure at step k the preceding steps
//! are compensated in strict reverse order. Compensation is best-effort:
//! its own failures are logged, never escalated, and the caller always
//! receives the original failure's step and message.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::events::{EventSink, FleetEvent};
use crate::governor::{AdmissionGovernor, TrustTier};
use crate::launcher::{AgentLauncher, LaunchRequest, LaunchedAgent};
use crate::registry::TaskRegistry;
use crate::task::{AgentBackend, NewTask, TaskCategory, TaskPatch, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    AdmitAndInsert,
    TransitionToSpawning,
    SpawnAgent,
    TransitionToRunning,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmitAndInsert => "admit_and_insert",
            Self::TransitionToSpawning => "transition_to_spawning",
            Self::SpawnAgent => "spawn_agent",
            Self::TransitionToRunning => "transition_to_running",
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spawn request after the facade has resolved tier and model.
#[derive(Debug, Clone)]
pub struct SpawnInput {
    pub requester_id: String,
    pub description: String,
    pub category: TaskCategory,
    pub backend: AgentBackend,
    pub model: String,
    pub branch_name: String,
    pub max_retries: Option<u32>,
}

impl SpawnInput {
    pub fn new(requester_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            requester_id: requester_id.into(),
            description: description.into(),
            category: TaskCategory::default(),
            backend: AgentBackend::default(),
            model: String::new(),
            branch_name: String::new(),
            max_retries: None,
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
}

/// Stable, attributable result of a spawn attempt. A failed outcome names
/// the step that actually failed, never a compensation step.
#[derive(Debug, Clone)]
pub enum SpawnOutcome {
    Completed { task_id: String, deduplicated: bool },
    Failed { failed_step: SagaStep, error: String },
}

impl SpawnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Completed { task_id, .. } => Some(task_id),
            Self::Failed { .. } => None,
        }
    }
}

pub struct SpawnSaga {
    registry: Arc<TaskRegistry>,
    governor: Arc<AdmissionGovernor>,
    launcher: Arc<dyn AgentLauncher>,
    events: EventSink,
}

impl SpawnSaga {
    pub fn new(
        registry: Arc<TaskRegistry>,
        governor: Arc<AdmissionGovernor>,
        launcher: Arc<dyn AgentLauncher>,
        events: EventSink,
    ) -> Self {
        Self {
            registry,
            governor,
            launcher,
            events,
        }
    }

    pub async fn execute_spawn(
        &self,
        input: SpawnInput,
        tier: TrustTier,
        prepared_prompt: &str,
        idempotency_token: &str,
    ) -> SpawnOutcome {
        // Dedup lookup before any step: a repeated request within the same
        // day bucket returns the existing task without re-executing.
        match self.registry.find_by_content_hash(idempotency_token) {
            Ok(Some(existing)) => {
                info!(task_id = %existing.id, "Duplicate spawn request, returning existing task");
                return SpawnOutcome::Completed {
                    task_id: existing.id,
                    deduplicated: true,
                };
            }
            Ok(None) => {}
            // Best-effort: the unique index on the stored hash still blocks
            // a double insert at step 1.
            Err(e) => warn!(error = %e, "Dedup lookup failed, continuing"),
        }

        // Step 1: admission and insert. Denial needs no compensation;
        // nothing was created.
        let mut new_task = NewTask::new(&input.requester_id, &input.description)
            .with_category(input.category)
            .with_backend(input.backend)
            .with_model(&input.model)
            .with_branch(&input.branch_name)
            .with_content_hash(idempotency_token);
        if let Some(max_retries) = input.max_retries {
            new_task = new_task.with_max_retries(max_retries);
        }

        let task = match self.governor.admit_and_insert(new_task, tier) {
            Ok(task) => task,
            Err(e) => return Self::fail(SagaStep::AdmitAndInsert, e),
        };

        // Step 2: proposed -> spawning.
        let task = match self.registry.transition(
            &task.id,
            task.version,
            TaskStatus::Spawning,
            TaskPatch::default(),
        ) {
            Ok(task) => task,
            Err(e) => {
                // Compensating step 1 is a no-op; nothing preceded it.
                return Self::fail(SagaStep::TransitionToSpawning, e);
            }
        };

        // Step 3: provision a workspace and launch the agent. The one step
        // that may block for a non-trivial duration; timeout policy belongs
        // to the launcher.
        let request = LaunchRequest {
            task_id: task.id.clone(),
            requester_id: task.requester_id.clone(),
            branch_name: task.branch_name.clone(),
            backend: task.backend,
            model: task.model.clone(),
            prompt: prepared_prompt.to_string(),
        };

        let launched = match self.launcher.spawn(request).await {
            Ok(launched) => launched,
            Err(e) => {
                self.compensate_insert(&task.id);
                return Self::fail(SagaStep::SpawnAgent, e);
            }
        };

        // Step 4: spawning -> running, recording the launch metadata in the
        // same write.
        let patch = TaskPatch::default()
            .with_worktree(&launched.workspace_path)
            .with_session(&launched.process_ref)
            .with_spawned_at(launched.spawned_at);

        let task = match self
            .registry
            .transition(&task.id, task.version, TaskStatus::Running, patch)
        {
            Ok(task) => task,
            Err(e) => {
                self.compensate_launch(&task.id, &launched).await;
                self.compensate_insert(&task.id);
                return Self::fail(SagaStep::TransitionToRunning, e);
            }
        };

        info!(task_id = %task.id, requester = %task.requester_id, "Spawn completed");

        if self
            .events
            .send(FleetEvent::spawn_completed(&task.id, &task.requester_id))
            .is_err()
        {
            warn!(task_id = %task.id, "Event stream closed, spawn event dropped");
        }

        SpawnOutcome::Completed {
            task_id: task.id,
            deduplicated: false,
        }
    }

    fn fail(step: SagaStep, error: impl std::fmt::Display) -> SpawnOutcome {
        let error = error.to_string();
        warn!(%step, %error, "Spawn saga failed");
        SpawnOutcome::Failed {
            failed_step: step,
            error,
        }
    }

    /// Compensation for step 3: kill the launched process and clean up its
    /// workspace. Tolerates failures of both calls.
    async fn compensate_launch(&self, task_id: &str, launched: &LaunchedAgent) {
        if let Err(e) = self.launcher.kill(task_id, &launched.process_ref).await {
            warn!(task_id, error = %e, "Compensation: kill failed");
        }
        if let Err(e) = self.launcher.cleanup(task_id).await {
            warn!(task_id, error = %e, "Compensation: cleanup failed");
        }
    }

    /// Compensation for step 2: drive the record to a terminal status and
    /// delete it.
    fn compensate_insert(&self, task_id: &str) {
        if let Err(e) = self.drive_out_and_delete(task_id) {
            warn!(task_id, error = %e, "Compensation: task removal failed");
        } else {
            debug!(task_id, "Compensation: task removed");
        }
    }

    fn drive_out_and_delete(&self, task_id: &str) -> Result<()> {
        let mut task = self.registry.get(task_id)?;
        while !task.status.is_terminal() {
            let next = if task.status.can_transition_to(TaskStatus::Failed) {
                TaskStatus::Failed
            } else if task.status.can_transition_to(TaskStatus::Abandoned) {
                TaskStatus::Abandoned
            } else if task.status.can_transition_to(TaskStatus::Cancelled) {
                TaskStatus::Cancelled
            } else {
                break;
            };
            task = self
                .registry
                .transition(&task.id, task.version, next, TaskPatch::default())?;
        }
        self.registry.delete(task_id)
    }
}

/// Deterministic one-way hash over `(description, requester, day bucket)`.
///
/// Identical inputs within the same UTC calendar day always hash
/// identically; any change to description, requester, or day produces a
/// different token. Pure function, no I/O; the dedup lookup against the
/// stored token lives in the saga.
pub fn generate_idempotency_token(description: &str, requester_id: &str) -> String {
    idempotency_token_for_day(description, requester_id, Utc::now().date_naive())
}

/// Day-injectable variant for deterministic tests.
pub fn idempotency_token_for_day(description: &str, requester_id: &str, day: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hasher.update([0x1f]);
    hasher.update(requester_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(day.format("%Y-%m-%d").to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
