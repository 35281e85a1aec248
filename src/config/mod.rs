mod settings;

pub use settings::{FleetConfig, GovernorConfig, RegistryConfig};
