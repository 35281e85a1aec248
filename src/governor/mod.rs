//! Tier-based admission control.
//!
//! The governor compares a requester's active-task count against a per-tier
//! concurrency ceiling. It fails closed: if the count cannot be established,
//! admission is denied. The check-then-create pair runs under an admission
//! lock so concurrent callers for the same requester cannot both slip under
//! the ceiling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FleetError, Result};
use crate::governance::{GovernedResource, InvariantReport, MutationRecord};
use crate::registry::TaskRegistry;
use crate::task::{NewTask, Task};

/// Trust tier of a requester, resolved externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Probation,
    #[default]
    Standard,
    Trusted,
    Core,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probation => "probation",
            Self::Standard => "standard",
            Self::Trusted => "trusted",
            Self::Core => "core",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-tier concurrency ceilings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    pub probation: u32,
    pub standard: u32,
    pub trusted: u32,
    pub core: u32,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            probation: 1,
            standard: 3,
            trusted: 6,
            core: 12,
        }
    }
}

impl TierLimits {
    pub fn limit_for(&self, tier: TrustTier) -> u32 {
        match tier {
            TrustTier::Probation => self.probation,
            TrustTier::Standard => self.standard,
            TrustTier::Trusted => self.trusted,
            TrustTier::Core => self.core,
        }
    }
}

struct CachedCount {
    count: u32,
    fetched_at: Instant,
}

#[derive(Default)]
struct AuditLog {
    version: u64,
    entries: Vec<MutationRecord>,
}

impl AuditLog {
    fn record(&mut self, action: &str, detail: String) {
        self.version += 1;
        self.entries
            .push(MutationRecord::new(self.version, action, detail));
    }
}

/// Snapshot of governor state for the governance contract.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorState {
    pub version: u64,
    pub limits: TierLimits,
    pub cached_requesters: usize,
}

pub struct AdmissionGovernor {
    registry: Arc<TaskRegistry>,
    limits: TierLimits,
    cache_ttl: Duration,
    counts: DashMap<String, CachedCount>,
    /// Serializes check-then-create so two concurrent spawns for the same
    /// requester cannot both pass the ceiling check.
    admission: Mutex<()>,
    audit: Mutex<AuditLog>,
}

impl AdmissionGovernor {
    const INVARIANTS: &'static [&'static str] = &["log_monotonic", "version_matches_log"];

    pub fn new(registry: Arc<TaskRegistry>, limits: TierLimits) -> Self {
        Self {
            registry,
            limits,
            cache_ttl: Duration::ZERO,
            counts: DashMap::new(),
            admission: Mutex::new(()),
            audit: Mutex::new(AuditLog::default()),
        }
    }

    /// Enables count caching. A zero TTL (the default) reads fresh counts on
    /// every check.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn limits(&self) -> TierLimits {
        self.limits
    }

    /// Whether the requester's tier permits another active task.
    ///
    /// Fails closed: a count that cannot be established denies admission.
    pub fn can_spawn(&self, requester_id: &str, tier: TrustTier) -> bool {
        let limit = self.limits.limit_for(tier);
        match self.active_count(requester_id) {
            Ok(count) => count < limit,
            Err(e) => {
                warn!(requester = %requester_id, error = %e, "Count unavailable, denying spawn");
                false
            }
        }
    }

    /// Check-then-create as a single guarded operation.
    ///
    /// The fresh count is read under the admission lock, bypassing the cache;
    /// correctness over performance.
    pub fn admit_and_insert(&self, new_task: NewTask, tier: TrustTier) -> Result<Task> {
        let _guard = self.admission.lock();

        let requester_id = new_task.requester_id.clone();
        let limit = self.limits.limit_for(tier);
        let count = self.registry.count_active(&requester_id)?;

        if count >= limit {
            self.audit.lock().record(
                "deny",
                format!("{} at {}/{} ({})", requester_id, count, limit, tier),
            );
            debug!(requester = %requester_id, %tier, count, limit, "Spawn denied");
            return Err(FleetError::SpawnDenied {
                tier: tier.to_string(),
                limit,
            });
        }

        let task = self.registry.create(new_task)?;
        self.counts.remove(&requester_id);
        self.audit.lock().record(
            "admit",
            format!("{} task {} at {}/{}", requester_id, task.id, count + 1, limit),
        );
        debug!(requester = %requester_id, task_id = %task.id, %tier, "Spawn admitted");

        Ok(task)
    }

    /// Drops the cached count for one requester so the next check reads fresh.
    pub fn invalidate_cache(&self, requester_id: &str) {
        self.counts.remove(requester_id);
    }

    pub fn invalidate_all_caches(&self) {
        self.counts.clear();
    }

    fn active_count(&self, requester_id: &str) -> Result<u32> {
        if !self.cache_ttl.is_zero() {
            if let Some(cached) = self.counts.get(requester_id) {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(cached.count);
                }
            }
        }

        let count = self.registry.count_active(requester_id)?;
        if !self.cache_ttl.is_zero() {
            self.counts.insert(
                requester_id.to_string(),
                CachedCount {
                    count,
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(count)
    }
}

impl GovernedResource for AdmissionGovernor {
    type State = GovernorState;

    fn state_version(&self) -> u64 {
        self.audit.lock().version
    }

    fn current_state(&self) -> GovernorState {
        GovernorState {
            version: self.audit.lock().version,
            limits: self.limits,
            cached_requesters: self.counts.len(),
        }
    }

    fn mutation_log(&self) -> Vec<MutationRecord> {
        self.audit.lock().entries.clone()
    }

    fn invariant_names(&self) -> &'static [&'static str] {
        Self::INVARIANTS
    }

    fn check_invariant(&self, name: &str) -> Option<InvariantReport> {
        let audit = self.audit.lock();
        match name {
            "log_monotonic" => {
                let monotonic = audit.entries.windows(2).all(|w| w[0].seq < w[1].seq);
                Some(if monotonic {
                    InvariantReport::passed("log_monotonic")
                } else {
                    InvariantReport::failed("log_monotonic", "mutation log sequence regressed")
                })
            }
            "version_matches_log" => {
                let expected = audit.entries.last().map(|e| e.seq).unwrap_or(0);
                Some(if audit.version == expected {
                    InvariantReport::passed("version_matches_log")
                } else {
                    InvariantReport::failed(
                        "version_matches_log",
                        format!("version {} != last seq {}", audit.version, expected),
                    )
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskCategory;

    fn governor_with_limits(limits: TierLimits) -> AdmissionGovernor {
        let registry = Arc::new(TaskRegistry::in_memory().unwrap());
        AdmissionGovernor::new(registry, limits)
    }

    fn sample_task(requester: &str) -> NewTask {
        NewTask::new(requester, "Add pagination to the user list")
            .with_category(TaskCategory::Feature)
            .with_model("claude-sonnet-4")
            .with_branch("fleet/pagination")
    }

    #[test]
    fn test_limit_for_tier() {
        let limits = TierLimits::default();
        assert_eq!(limits.limit_for(TrustTier::Probation), 1);
        assert_eq!(limits.limit_for(TrustTier::Standard), 3);
        assert_eq!(limits.limit_for(TrustTier::Trusted), 6);
        assert_eq!(limits.limit_for(TrustTier::Core), 12);
    }

    #[test]
    fn test_admit_until_ceiling() {
        let governor = governor_with_limits(TierLimits {
            standard: 2,
            ..TierLimits::default()
        });

        governor
            .admit_and_insert(sample_task("op-1"), TrustTier::Standard)
            .unwrap();
        governor
            .admit_and_insert(sample_task("op-1"), TrustTier::Standard)
            .unwrap();

        let err = governor
            .admit_and_insert(sample_task("op-1"), TrustTier::Standard)
            .unwrap_err();
        assert!(matches!(err, FleetError::SpawnDenied { limit: 2, .. }));
    }

    #[test]
    fn test_zero_limit_denies_immediately() {
        let governor = governor_with_limits(TierLimits {
            probation: 0,
            ..TierLimits::default()
        });

        assert!(!governor.can_spawn("op-9", TrustTier::Probation));
        let err = governor
            .admit_and_insert(sample_task("op-9"), TrustTier::Probation)
            .unwrap_err();
        assert!(matches!(err, FleetError::SpawnDenied { limit: 0, .. }));
    }

    #[test]
    fn test_limits_are_per_requester() {
        let governor = governor_with_limits(TierLimits {
            standard: 1,
            ..TierLimits::default()
        });

        governor
            .admit_and_insert(sample_task("op-1"), TrustTier::Standard)
            .unwrap();
        governor
            .admit_and_insert(sample_task("op-2"), TrustTier::Standard)
            .unwrap();
    }

    #[test]
    fn test_governed_resource_audit() {
        let governor = governor_with_limits(TierLimits {
            standard: 1,
            ..TierLimits::default()
        });

        governor
            .admit_and_insert(sample_task("op-1"), TrustTier::Standard)
            .unwrap();
        let _ = governor.admit_and_insert(sample_task("op-1"), TrustTier::Standard);

        assert_eq!(governor.state_version(), 2);
        let log = governor.mutation_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].action, "admit");
        assert_eq!(log[1].action, "deny");

        let reports = governor.check_all_invariants();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.passed));
    }
}
