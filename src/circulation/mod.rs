//! Dynamic admission pricing.
//!
//! Produces a continuous price signal layered on top of the governor's hard
//! ceiling: cost rises sharply as the fleet saturates, reputation earns a
//! bounded discount, and task complexity scales the base. Pricing degrades
//! to neutral multipliers when upstream data is unavailable; admission is
//! never blocked by a pricing outage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::task::TaskCategory;

/// Reputation can never offset more than half the cost.
const DISCOUNT_FLOOR: f64 = 0.5;

/// Description length thresholds for the complexity penalty.
const LONG_DESCRIPTION: usize = 500;
const VERY_LONG_DESCRIPTION: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CirculationConfig {
    pub base_cost: f64,
    pub cost_floor: f64,
    pub reputation_weight: f64,
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            base_cost: 1.0,
            cost_floor: 0.1,
            reputation_weight: 0.4,
        }
    }
}

/// Snapshot of fleet utilization from an external source.
#[derive(Debug, Clone, Copy)]
pub struct UtilizationSnapshot {
    pub active: u32,
    pub capacity: u32,
}

impl UtilizationSnapshot {
    pub fn ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.active as f64 / self.capacity as f64
    }
}

pub trait UtilizationSource: Send + Sync {
    fn snapshot(&self) -> Result<UtilizationSnapshot>;
}

pub trait ReputationSource: Send + Sync {
    fn reputation(&self, requester_id: &str) -> Result<f64>;
}

/// Ephemeral pricing result; recomputed fresh on every request.
#[derive(Debug, Clone, Serialize)]
pub struct SpawnCost {
    pub base_cost: f64,
    pub utilization_multiplier: f64,
    pub reputation_discount: f64,
    pub complexity_factor: f64,
    pub final_cost: f64,
    pub breakdown: String,
}

/// Step function of fleet utilization; the backpressure mechanism.
pub fn utilization_multiplier(utilization: f64) -> f64 {
    if utilization < 0.4 {
        0.7
    } else if utilization < 0.8 {
        1.0
    } else if utilization < 0.95 {
        1.5
    } else {
        3.0
    }
}

/// `clamp(1 - reputation * weight, floor 0.5)`. Values above 1.0 still never
/// exceed a 50% discount.
pub fn reputation_discount(reputation: f64, weight: f64) -> f64 {
    (1.0 - reputation * weight).max(DISCOUNT_FLOOR)
}

/// Category base plus an additive penalty for long descriptions.
pub fn complexity_factor(category: TaskCategory, description_length: usize) -> f64 {
    let base = match category {
        TaskCategory::BugFix => 0.8,
        TaskCategory::Refactor => 0.9,
        TaskCategory::Docs => 0.7,
        TaskCategory::Feature => 1.0,
        TaskCategory::Review => 0.6,
    };

    let penalty = if description_length > VERY_LONG_DESCRIPTION {
        0.4
    } else if description_length > LONG_DESCRIPTION {
        0.2
    } else {
        0.0
    };

    base + penalty
}

pub struct CirculationEngine {
    config: CirculationConfig,
    utilization: Option<Arc<dyn UtilizationSource>>,
    reputation: Option<Arc<dyn ReputationSource>>,
}

impl CirculationEngine {
    pub fn new(config: CirculationConfig) -> Self {
        Self {
            config,
            utilization: None,
            reputation: None,
        }
    }

    pub fn with_utilization_source(mut self, source: Arc<dyn UtilizationSource>) -> Self {
        self.utilization = Some(source);
        self
    }

    pub fn with_reputation_source(mut self, source: Arc<dyn ReputationSource>) -> Self {
        self.reputation = Some(source);
        self
    }

    /// Computes the admission price. Never fails: missing or erroring data
    /// sources degrade to neutral multipliers.
    pub fn compute_cost(
        &self,
        requester_id: &str,
        category: TaskCategory,
        description_length: usize,
    ) -> SpawnCost {
        let util_multiplier = match &self.utilization {
            Some(source) => match source.snapshot() {
                Ok(snapshot) => utilization_multiplier(snapshot.ratio()),
                Err(e) => {
                    warn!(error = %e, "Utilization source unavailable, using neutral multiplier");
                    1.0
                }
            },
            None => 1.0,
        };

        let rep_discount = match &self.reputation {
            Some(source) => match source.reputation(requester_id) {
                Ok(rep) => reputation_discount(rep, self.config.reputation_weight),
                Err(e) => {
                    warn!(
                        requester = %requester_id,
                        error = %e,
                        "Reputation source unavailable, using neutral discount"
                    );
                    1.0
                }
            },
            None => 1.0,
        };

        let complexity = complexity_factor(category, description_length);
        let base = self.config.base_cost;
        let raw = base * util_multiplier * rep_discount * complexity;
        let final_cost = raw.max(self.config.cost_floor);

        let breakdown = format!(
            "base {:.2} x utilization {:.2} x reputation {:.2} x complexity {:.2} = {:.3} (floor {:.2})",
            base, util_multiplier, rep_discount, complexity, final_cost, self.config.cost_floor
        );

        SpawnCost {
            base_cost: base,
            utilization_multiplier: util_multiplier,
            reputation_discount: rep_discount,
            complexity_factor: complexity,
            final_cost,
            breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::store_err;

    struct FixedUtilization(u32, u32);

    impl UtilizationSource for FixedUtilization {
        fn snapshot(&self) -> Result<UtilizationSnapshot> {
            Ok(UtilizationSnapshot {
                active: self.0,
                capacity: self.1,
            })
        }
    }

    struct FixedReputation(f64);

    impl ReputationSource for FixedReputation {
        fn reputation(&self, _requester_id: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct BrokenSource;

    impl UtilizationSource for BrokenSource {
        fn snapshot(&self) -> Result<UtilizationSnapshot> {
            Err(store_err("snapshot backend down"))
        }
    }

    impl ReputationSource for BrokenSource {
        fn reputation(&self, _requester_id: &str) -> Result<f64> {
            Err(store_err("reputation backend down"))
        }
    }

    #[test]
    fn test_utilization_multiplier_boundaries() {
        assert_eq!(utilization_multiplier(0.0), 0.7);
        assert_eq!(utilization_multiplier(0.39), 0.7);
        assert_eq!(utilization_multiplier(0.4), 1.0);
        assert_eq!(utilization_multiplier(0.79), 1.0);
        assert_eq!(utilization_multiplier(0.8), 1.5);
        assert_eq!(utilization_multiplier(0.94), 1.5);
        assert_eq!(utilization_multiplier(0.95), 3.0);
        assert_eq!(utilization_multiplier(1.0), 3.0);
    }

    #[test]
    fn test_reputation_discount_floor() {
        assert_eq!(reputation_discount(0.0, 0.4), 1.0);
        assert_eq!(reputation_discount(1.0, 0.4), 0.6);
        // Beyond the floor, extra reputation buys nothing.
        assert_eq!(reputation_discount(2.0, 0.4), 0.5);
        assert_eq!(reputation_discount(10.0, 0.4), 0.5);
    }

    #[test]
    fn test_complexity_factor_per_category() {
        assert_eq!(complexity_factor(TaskCategory::BugFix, 100), 0.8);
        assert_eq!(complexity_factor(TaskCategory::Refactor, 100), 0.9);
        assert_eq!(complexity_factor(TaskCategory::Docs, 100), 0.7);
        assert_eq!(complexity_factor(TaskCategory::Feature, 100), 1.0);
        assert_eq!(complexity_factor(TaskCategory::Review, 100), 0.6);
    }

    #[test]
    fn test_complexity_length_penalty() {
        assert_eq!(complexity_factor(TaskCategory::Feature, 500), 1.0);
        assert_eq!(complexity_factor(TaskCategory::Feature, 501), 1.2);
        assert_eq!(complexity_factor(TaskCategory::Feature, 1000), 1.2);
        assert!((complexity_factor(TaskCategory::Feature, 1001) - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_compute_cost_with_sources() {
        let engine = CirculationEngine::new(CirculationConfig::default())
            .with_utilization_source(Arc::new(FixedUtilization(9, 10)))
            .with_reputation_source(Arc::new(FixedReputation(1.0)));

        let cost = engine.compute_cost("op-1", TaskCategory::BugFix, 100);
        assert_eq!(cost.utilization_multiplier, 1.5);
        assert_eq!(cost.reputation_discount, 0.6);
        assert_eq!(cost.complexity_factor, 0.8);
        assert!((cost.final_cost - 1.0 * 1.5 * 0.6 * 0.8).abs() < 1e-9);
        assert!(cost.breakdown.contains("utilization 1.50"));
    }

    #[test]
    fn test_missing_sources_are_neutral() {
        let engine = CirculationEngine::new(CirculationConfig::default());
        let cost = engine.compute_cost("op-1", TaskCategory::Feature, 10);
        assert_eq!(cost.utilization_multiplier, 1.0);
        assert_eq!(cost.reputation_discount, 1.0);
        assert_eq!(cost.final_cost, 1.0);
    }

    #[test]
    fn test_broken_sources_degrade_to_neutral() {
        let engine = CirculationEngine::new(CirculationConfig::default())
            .with_utilization_source(Arc::new(BrokenSource))
            .with_reputation_source(Arc::new(BrokenSource));

        let cost = engine.compute_cost("op-1", TaskCategory::Feature, 10);
        assert_eq!(cost.utilization_multiplier, 1.0);
        assert_eq!(cost.reputation_discount, 1.0);
    }

    #[test]
    fn test_final_cost_never_below_floor() {
        let config = CirculationConfig::default();
        // Deterministic LCG; no external randomness needed for coverage.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let categories = [
            TaskCategory::BugFix,
            TaskCategory::Feature,
            TaskCategory::Refactor,
            TaskCategory::Review,
            TaskCategory::Docs,
        ];

        for _ in 0..1000 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let active = (seed >> 33) as u32 % 200;
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let reputation = ((seed >> 33) % 3000) as f64 / 1000.0;
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let category = categories[((seed >> 33) % 5) as usize];
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let length = ((seed >> 33) % 2000) as usize;

            let engine = CirculationEngine::new(config)
                .with_utilization_source(Arc::new(FixedUtilization(active, 100)))
                .with_reputation_source(Arc::new(FixedReputation(reputation)));

            let cost = engine.compute_cost("op-rand", category, length);
            assert!(
                cost.final_cost >= config.cost_floor,
                "final cost {} below floor for {:?}",
                cost.final_cost,
                (active, reputation, category, length)
            );
        }
    }

    #[test]
    fn test_zero_capacity_is_idle() {
        let snapshot = UtilizationSnapshot {
            active: 5,
            capacity: 0,
        };
        assert_eq!(snapshot.ratio(), 0.0);
    }
}
