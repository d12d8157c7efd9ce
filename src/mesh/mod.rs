//! Mesh coordination state: directory, arbitration and role transitions

mod arbiter;
mod registry;
mod roles;
mod types;

pub use arbiter::{Arbiter, LockOutcome, LOCK_TTL};
pub use registry::{check_metrics, MeshRegistry};
pub use roles::{intent_matches, RoleSwitcher, LONG_HORIZON_INTENTS, STRATEGIC_INTENTS};
pub use types::{
    AgentAction, AgentId, AgentRecord, AgentRole, AgentStats, Handshake, OsResources,
    Reevaluation, ResourceLimits, FAILURE_LOG_CAPACITY,
};
