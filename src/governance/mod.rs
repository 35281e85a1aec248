//! Shared contract for engines exposing auditable, versioned state.
//!
//! The admission governor and sibling trust/reputation engines all expose
//! the same shape: a versioned state snapshot, an append-only mutation log,
//! and named invariant checks callable on demand. It is an interface, not a
//! base type; each engine implements it independently.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One entry in an engine's append-only mutation log.
#[derive(Debug, Clone, Serialize)]
pub struct MutationRecord {
    pub seq: u64,
    pub action: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl MutationRecord {
    pub fn new(seq: u64, action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            seq,
            action: action.into(),
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

/// Result of a single named invariant check.
#[derive(Debug, Clone, Serialize)]
pub struct InvariantReport {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl InvariantReport {
    pub fn passed(name: &'static str) -> Self {
        Self {
            name,
            passed: true,
            detail: None,
        }
    }

    pub fn failed(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: Some(detail.into()),
        }
    }
}

pub trait GovernedResource {
    type State: Serialize;

    /// Monotonic version of the engine's state; bumped on every mutation.
    fn state_version(&self) -> u64;

    fn current_state(&self) -> Self::State;

    fn mutation_log(&self) -> Vec<MutationRecord>;

    fn invariant_names(&self) -> &'static [&'static str];

    fn check_invariant(&self, name: &str) -> Option<InvariantReport>;

    fn check_all_invariants(&self) -> Vec<InvariantReport> {
        self.invariant_names()
            .iter()
            .filter_map(|name| self.check_invariant(name))
            .collect()
    }
}
