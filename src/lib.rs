//! Fleet task orchestration engine for autonomous coding-agent workers.
//!
//! Four coupled components: the task [`registry`] (lifecycle state machine
//! with optimistic concurrency), the spawn [`saga`] (compensating
//! transaction), the admission [`governor`] (per-tier concurrency ceilings),
//! and [`circulation`] (dynamic admission pricing). The process launcher,
//! prompt assembly, and wire surfaces are consumer-supplied collaborators.

pub mod circulation;
pub mod config;
pub mod error;
pub mod events;
pub mod governance;
pub mod governor;
pub mod launcher;
pub mod registry;
pub mod saga;
pub mod task;

pub use circulation::{
    CirculationConfig, CirculationEngine, ReputationSource, SpawnCost, UtilizationSnapshot,
    UtilizationSource,
};
pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use events::{event_channel, EventSink, EventStream, FleetEvent, FleetEventType};
pub use governance::{GovernedResource, InvariantReport, MutationRecord};
pub use governor::{AdmissionGovernor, TierLimits, TrustTier};
pub use launcher::{AgentLauncher, LaunchRequest, LaunchedAgent};
pub use registry::{TaskFilter, TaskRegistry};
pub use saga::{
    generate_idempotency_token, idempotency_token_for_day, SagaStep, SpawnInput, SpawnOutcome,
    SpawnSaga,
};
pub use task::{AgentBackend, FailureContext, NewTask, Task, TaskCategory, TaskPatch, TaskStatus};
