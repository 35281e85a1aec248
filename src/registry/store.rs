//! Schema and row mapping for the task table.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use crate::error::{store_err, store_err_with, Result};
use crate::task::{AgentBackend, FailureContext, Task, TaskCategory, TaskStatus};

pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            requester_id TEXT NOT NULL,
            backend TEXT NOT NULL,
            model TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT NOT NULL,
            branch_name TEXT NOT NULL,
            worktree_path TEXT,
            container_id TEXT,
            session_handle TEXT,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            pr_number INTEGER,
            ci_status TEXT,
            review_status TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            failure_context TEXT,
            content_hash TEXT,
            created_at TEXT NOT NULL,
            spawned_at TEXT,
            completed_at TEXT,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_requester_status
            ON tasks(requester_id, status);
        CREATE INDEX IF NOT EXISTS idx_tasks_status
            ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_created
            ON tasks(created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_content_hash
            ON tasks(content_hash) WHERE content_hash IS NOT NULL;
        ",
    )
    .map_err(|e| store_err_with("Failed to init task schema", e))?;

    Ok(())
}

pub(super) const TASK_COLUMNS: &str = "id, requester_id, backend, model, category, description, \
     branch_name, worktree_path, container_id, session_handle, status, version, pr_number, \
     ci_status, review_status, retry_count, max_retries, failure_context, content_hash, \
     created_at, spawned_at, completed_at, updated_at";

/// Raw task row as stored; converted to a `Task` outside the rusqlite
/// closure so parse failures surface as store errors, not mapping panics.
pub(super) struct TaskRow {
    id: String,
    requester_id: String,
    backend: String,
    model: String,
    category: String,
    description: String,
    branch_name: String,
    worktree_path: Option<String>,
    container_id: Option<String>,
    session_handle: Option<String>,
    status: String,
    version: i64,
    pr_number: Option<i64>,
    ci_status: Option<String>,
    review_status: Option<String>,
    retry_count: i64,
    max_retries: i64,
    failure_context: Option<String>,
    content_hash: Option<String>,
    created_at: String,
    spawned_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl TaskRow {
    pub(super) fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            requester_id: row.get(1)?,
            backend: row.get(2)?,
            model: row.get(3)?,
            category: row.get(4)?,
            description: row.get(5)?,
            branch_name: row.get(6)?,
            worktree_path: row.get(7)?,
            container_id: row.get(8)?,
            session_handle: row.get(9)?,
            status: row.get(10)?,
            version: row.get(11)?,
            pr_number: row.get(12)?,
            ci_status: row.get(13)?,
            review_status: row.get(14)?,
            retry_count: row.get(15)?,
            max_retries: row.get(16)?,
            failure_context: row.get(17)?,
            content_hash: row.get(18)?,
            created_at: row.get(19)?,
            spawned_at: row.get(20)?,
            completed_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }

    pub(super) fn into_task(self) -> Result<Task> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| store_err(format!("Unknown task status: {}", self.status)))?;
        let category = TaskCategory::parse(&self.category)
            .ok_or_else(|| store_err(format!("Unknown task category: {}", self.category)))?;
        let backend = AgentBackend::parse(&self.backend)
            .ok_or_else(|| store_err(format!("Unknown agent backend: {}", self.backend)))?;

        let failure_context: Option<FailureContext> = match self.failure_context {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| store_err_with("Failed to parse failure context", e))?,
            ),
            None => None,
        };

        Ok(Task {
            id: self.id,
            requester_id: self.requester_id,
            backend,
            model: self.model,
            category,
            description: self.description,
            branch_name: self.branch_name,
            worktree_path: self.worktree_path,
            container_id: self.container_id,
            session_handle: self.session_handle,
            status,
            version: self.version as u64,
            pr_number: self.pr_number,
            ci_status: self.ci_status,
            review_status: self.review_status,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            failure_context,
            content_hash: self.content_hash,
            created_at: parse_timestamp(&self.created_at)?,
            spawned_at: parse_optional_timestamp(self.spawned_at.as_deref())?,
            completed_at: parse_optional_timestamp(self.completed_at.as_deref())?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| store_err_with("Failed to parse timestamp", e))
}

fn parse_optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw {
        Some(s) => parse_timestamp(s).map(Some),
        None => Ok(None),
    }
}
