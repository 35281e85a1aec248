use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a fleet task.
///
/// `Merged`, `Abandoned`, and `Cancelled` are terminal; no outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Proposed,
    Spawning,
    Running,
    PrCreated,
    Reviewing,
    Ready,
    Merged,
    Failed,
    Rejected,
    Retrying,
    Abandoned,
    Cancelled,
}

impl TaskStatus {
    /// The adjacency table is the single source of truth for transition
    /// legality; anything not listed here is rejected.
    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Proposed => &[Spawning],
            Spawning => &[Running, Failed],
            Running => &[PrCreated, Failed, Cancelled],
            PrCreated => &[Reviewing, Cancelled],
            Reviewing => &[Ready, Rejected],
            Ready => &[Merged],
            Failed => &[Retrying, Abandoned],
            Rejected => &[Retrying],
            Retrying => &[Spawning, Abandoned],
            Merged => &[],
            Abandoned => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Merged | TaskStatus::Abandoned | TaskStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::PrCreated => "pr_created",
            Self::Reviewing => "reviewing",
            Self::Ready => "ready",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
            Self::Retrying => "retrying",
            Self::Abandoned => "abandoned",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "spawning" => Some(Self::Spawning),
            "running" => Some(Self::Running),
            "pr_created" => Some(Self::PrCreated),
            "reviewing" => Some(Self::Reviewing),
            "ready" => Some(Self::Ready),
            "merged" => Some(Self::Merged),
            "failed" => Some(Self::Failed),
            "rejected" => Some(Self::Rejected),
            "retrying" => Some(Self::Retrying),
            "abandoned" => Some(Self::Abandoned),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn all() -> &'static [TaskStatus] {
        use TaskStatus::*;
        &[
            Proposed, Spawning, Running, PrCreated, Reviewing, Ready, Merged, Failed, Rejected,
            Retrying, Abandoned, Cancelled,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
