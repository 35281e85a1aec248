use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::circulation::CirculationConfig;
use crate::error::{FleetError, Result};
use crate::governor::TierLimits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub registry: RegistryConfig,
    pub governor: GovernorConfig,
    pub circulation: CirculationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub db_file: String,
    pub default_max_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_file: "fleet.db".to_string(),
            default_max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub limits: TierLimits,
    /// Seconds a cached active-task count stays valid. Zero reads fresh on
    /// every check.
    pub cache_ttl_secs: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            limits: TierLimits::default(),
            cache_ttl_secs: 0,
        }
    }
}

impl FleetConfig {
    pub async fn load(fleet_dir: &Path) -> Result<Self> {
        let config_path = fleet_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, fleet_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = fleet_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| FleetError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.registry.db_file.is_empty() {
            errors.push("registry.db_file must not be empty".to_string());
        }
        if self.registry.default_max_retries == 0 {
            errors.push("registry.default_max_retries must be greater than 0".to_string());
        }

        if self.circulation.base_cost <= 0.0 {
            errors.push("circulation.base_cost must be positive".to_string());
        }
        if self.circulation.cost_floor <= 0.0 {
            errors.push("circulation.cost_floor must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.circulation.reputation_weight) {
            errors.push("circulation.reputation_weight must be between 0.0 and 1.0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FleetError::Config(errors.join("; ")))
        }
    }
}
