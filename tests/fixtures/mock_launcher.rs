//! Mock agent launcher for saga tests without real process management.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use taskfleet::error::FleetError;
use taskfleet::{AgentLauncher, LaunchRequest, LaunchedAgent, Result};

type SpawnHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct MockLauncher {
    fail_spawn: bool,
    fail_kill: bool,
    fail_cleanup: bool,
    pub spawn_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
    pub last_request: Mutex<Option<LaunchRequest>>,
    /// Invoked with the task id after a successful spawn, before returning.
    /// Lets tests interleave registry writes between saga steps 3 and 4.
    spawn_hook: Mutex<Option<SpawnHook>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }

    pub fn with_failing_compensation(mut self) -> Self {
        self.fail_kill = true;
        self.fail_cleanup = true;
        self
    }

    pub fn with_spawn_hook(self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        *self.spawn_hook.lock() = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl AgentLauncher for MockLauncher {
    async fn spawn(&self, request: LaunchRequest) -> Result<LaunchedAgent> {
        self.spawn_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_spawn {
            return Err(FleetError::Launcher("simulated launch failure".into()));
        }

        let task_id = request.task_id.clone();
        *self.last_request.lock() = Some(request);

        if let Some(hook) = self.spawn_hook.lock().as_ref() {
            hook(&task_id);
        }

        Ok(LaunchedAgent {
            process_ref: format!("proc-{}", task_id),
            workspace_path: format!("/tmp/fleet/worktrees/{}", task_id),
            spawned_at: Utc::now(),
        })
    }

    async fn kill(&self, _task_id: &str, _process_ref: &str) -> Result<()> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_kill {
            return Err(FleetError::Launcher("simulated kill failure".into()));
        }
        Ok(())
    }

    async fn cleanup(&self, _task_id: &str) -> Result<()> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            return Err(FleetError::Launcher("simulated cleanup failure".into()));
        }
        Ok(())
    }

    async fn get_logs(&self, task_id: &str, _tail_lines: Option<usize>) -> Result<String> {
        Ok(format!("logs for {}", task_id))
    }
}
