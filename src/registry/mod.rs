//! Durable task registry with optimistic concurrency control.
//!
//! The registry owns the task table; every mutation is a conditional write
//! keyed on the version it expects, and a version mismatch surfaces as a
//! typed `StaleVersion` failure the caller must re-read and retry.

mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{store_err_with, FleetError, Result};
use crate::task::{FailureContext, NewTask, Task, TaskPatch, TaskStatus};

use store::{init_schema, TaskRow, TASK_COLUMNS};

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Statuses excluded from active-task counts. Matches the terminal set of
/// the adjacency table.
const TERMINAL_SET_SQL: &str = "('merged', 'abandoned', 'cancelled')";

/// Query filters for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub statuses: Option<Vec<TaskStatus>>,
    pub requester_id: Option<String>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    const DEFAULT_LIMIT: usize = 50;

    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn by_statuses(statuses: Vec<TaskStatus>) -> Self {
        Self {
            statuses: Some(statuses),
            ..Self::default()
        }
    }

    pub fn by_requester(requester_id: impl Into<String>) -> Self {
        Self {
            requester_id: Some(requester_id.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[derive(Clone)]
pub struct TaskRegistry {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
    default_max_retries: u32,
}

impl TaskRegistry {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_err_with("Failed to create registry dir", e))?;
        }

        let conn = Connection::open(&db_path)
            .map_err(|e| store_err_with("Failed to open task registry", e))?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path),
            default_max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// In-memory registry, used by tests and ephemeral deployments.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| store_err_with("Failed to open in-memory registry", e))?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
            default_max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Inserts a new record in `proposed` at version 0.
    pub fn create(&self, new_task: NewTask) -> Result<Task> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let max_retries = new_task.max_retries.unwrap_or(self.default_max_retries);

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (id, requester_id, backend, model, category, description, \
             branch_name, status, version, retry_count, max_retries, content_hash, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10, ?11, ?11)",
            params![
                &id,
                &new_task.requester_id,
                new_task.backend.as_str(),
                &new_task.model,
                new_task.category.as_str(),
                &new_task.description,
                &new_task.branch_name,
                TaskStatus::Proposed.as_str(),
                max_retries,
                &new_task.content_hash,
                &now,
            ],
        )
        .map_err(|e| store_err_with("Failed to insert task", e))?;

        debug!(task_id = %id, requester = %new_task.requester_id, "Task created");

        Self::get_impl(&conn, &id)
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        let conn = self.conn.lock();
        Self::get_impl(&conn, id)
    }

    /// Indexed dedup lookup against the stored idempotency token.
    pub fn find_by_content_hash(&self, hash: &str) -> Result<Option<Task>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE content_hash = ?1", TASK_COLUMNS),
                params![hash],
                TaskRow::read,
            )
            .optional()
            .map_err(|e| store_err_with("Failed to query by content hash", e))?;

        match row {
            Some(row) => row.into_task().map(Some),
            None => Ok(None),
        }
    }

    /// Filtered listing, ordered by creation time ascending.
    pub fn query(&self, filter: TaskFilter) -> Result<Vec<Task>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            values.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("status = ?{}", values.len()));
        }

        if let Some(statuses) = &filter.statuses {
            let mut placeholders = Vec::with_capacity(statuses.len());
            for status in statuses {
                values.push(Value::Text(status.as_str().to_string()));
                placeholders.push(format!("?{}", values.len()));
            }
            clauses.push(format!("status IN ({})", placeholders.join(", ")));
        }

        if let Some(requester_id) = &filter.requester_id {
            values.push(Value::Text(requester_id.clone()));
            clauses.push(format!("requester_id = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {} FROM tasks", TASK_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        values.push(Value::Integer(filter.effective_limit() as i64));
        sql.push_str(&format!(
            " ORDER BY created_at ASC, rowid ASC LIMIT ?{}",
            values.len()
        ));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| store_err_with("Failed to prepare task query", e))?;

        let rows = stmt
            .query_map(params_from_iter(values), TaskRow::read)
            .map_err(|e| store_err_with("Failed to query tasks", e))?;

        let mut tasks = Vec::new();
        for row in rows {
            let row = row.map_err(|e| store_err_with("Failed to read task row", e))?;
            tasks.push(row.into_task()?);
        }

        Ok(tasks)
    }

    /// Count of a requester's tasks in non-terminal statuses.
    pub fn count_active(&self, requester_id: &str) -> Result<u32> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM tasks WHERE requester_id = ?1 AND status NOT IN {}",
                TERMINAL_SET_SQL
            ),
            params![requester_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u32)
        .map_err(|e| store_err_with("Failed to count active tasks", e))
    }

    /// Fleet-wide count of tasks in non-terminal statuses.
    pub fn count_all_active(&self) -> Result<u32> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM tasks WHERE status NOT IN {}",
                TERMINAL_SET_SQL
            ),
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as u32)
        .map_err(|e| store_err_with("Failed to count active tasks", e))
    }

    /// The sole mutation entry point besides `create` and `record_failure`.
    ///
    /// Legality is decided by the adjacency table before the version is even
    /// considered; the conditional update keyed on `expected_version` is the
    /// concurrency guard, detected by a zero-rows-affected result.
    pub fn transition(
        &self,
        id: &str,
        expected_version: u64,
        new_status: TaskStatus,
        patch: TaskPatch,
    ) -> Result<Task> {
        // Adjacency is checked against the record as read; the conditional
        // update below is the sole concurrency control, so a writer that
        // lost a race is told to re-read, not silently overwritten.
        let current = self.get(id)?;

        if !current.status.can_transition_to(new_status) {
            return Err(FleetError::InvalidTransition {
                from: current.status.to_string(),
                to: new_status.to_string(),
                allowed: current
                    .status
                    .allowed_transitions()
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE tasks SET \
                 status = ?1, \
                 version = version + 1, \
                 updated_at = ?2, \
                 worktree_path = COALESCE(?3, worktree_path), \
                 container_id = COALESCE(?4, container_id), \
                 session_handle = COALESCE(?5, session_handle), \
                 pr_number = COALESCE(?6, pr_number), \
                 ci_status = COALESCE(?7, ci_status), \
                 review_status = COALESCE(?8, review_status), \
                 spawned_at = COALESCE(?9, spawned_at), \
                 completed_at = COALESCE(?10, completed_at) \
                 WHERE id = ?11 AND version = ?12",
                params![
                    new_status.as_str(),
                    &now,
                    &patch.worktree_path,
                    &patch.container_id,
                    &patch.session_handle,
                    &patch.pr_number,
                    &patch.ci_status,
                    &patch.review_status,
                    patch.spawned_at.map(|t| t.to_rfc3339()),
                    patch.completed_at.map(|t| t.to_rfc3339()),
                    id,
                    expected_version as i64,
                ],
            )
            .map_err(|e| store_err_with("Failed to transition task", e))?;

        if rows == 0 {
            return Err(FleetError::StaleVersion {
                task_id: id.to_string(),
                expected: expected_version,
            });
        }

        debug!(
            task_id = %id,
            from = %current.status,
            to = %new_status,
            version = expected_version + 1,
            "Task transitioned"
        );

        Self::get_impl(&conn, id)
    }

    /// Increments the retry counter and stores the failure context, guarded
    /// atomically by `retry_count < max_retries` in the same write.
    ///
    /// Returns `Ok(None)` when no retry budget remains; an exhausted budget
    /// is expected business state, not a fault.
    pub fn record_failure(&self, id: &str, context: FailureContext) -> Result<Option<Task>> {
        let context_json = serde_json::to_string(&context)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE tasks SET \
                 retry_count = retry_count + 1, \
                 failure_context = ?1, \
                 version = version + 1, \
                 updated_at = ?2 \
                 WHERE id = ?3 AND retry_count < max_retries",
                params![&context_json, &now, id],
            )
            .map_err(|e| store_err_with("Failed to record failure", e))?;

        if rows == 0 {
            // Distinguish a missing record from an exhausted budget.
            let task = Self::get_impl(&conn, id)?;
            debug!(task_id = %id, retry_count = task.retry_count, "Retry budget exhausted");
            return Ok(None);
        }

        Self::get_impl(&conn, id).map(Some)
    }

    /// Deletes a task; permitted only in terminal statuses.
    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let current = Self::get_impl(&conn, id)?;

        if !current.status.is_terminal() {
            return Err(FleetError::ActiveTaskDeletion {
                task_id: id.to_string(),
                status: current.status.to_string(),
            });
        }

        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .map_err(|e| store_err_with("Failed to delete task", e))?;

        debug!(task_id = %id, "Task deleted");
        Ok(())
    }

    fn get_impl(conn: &Connection, id: &str) -> Result<Task> {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                TaskRow::read,
            )
            .optional()
            .map_err(|e| store_err_with("Failed to query task", e))?;

        match row {
            Some(row) => row.into_task(),
            None => Err(FleetError::TaskNotFound(id.to_string())),
        }
    }
}
