//! Resource- and intent-driven role transitions

use crate::mesh::types::{AgentRecord, AgentRole, OsResources};
use tracing::info;

/// Intents that should run without strategic priority
pub const LONG_HORIZON_INTENTS: &[&str] = &["LONG_HORIZON", "COMPILATION"];

/// Intents that warrant strategic priority
pub const STRATEGIC_INTENTS: &[&str] = &["STRATEGIC_REASONING"];

const DEFAULT_MEMORY_THRESHOLD: u64 = 800 * 1024 * 1024;
const DEFAULT_CPU_THRESHOLD: f64 = 70.0;

/// Case-insensitive substring match against a vocabulary
pub fn intent_matches(intent: &str, vocabulary: &[&str]) -> bool {
    let intent = intent.to_uppercase();
    vocabulary.iter().any(|word| intent.contains(word))
}

/// Suggests the next role for an agent
///
/// Rules are evaluated in order and the first match wins:
/// 1. long-horizon intent demotes a strategic agent,
/// 2. strategic-reasoning intent promotes an operational agent,
/// 3. memory or CPU pressure forces operational,
/// 4. otherwise the role is unchanged.
#[derive(Debug, Clone)]
pub struct RoleSwitcher {
    memory_threshold: u64,
    cpu_threshold: f64,
}

impl RoleSwitcher {
    pub fn new() -> Self {
        Self::with_thresholds(DEFAULT_MEMORY_THRESHOLD, DEFAULT_CPU_THRESHOLD)
    }

    pub fn with_thresholds(memory_threshold: u64, cpu_threshold: f64) -> Self {
        Self {
            memory_threshold,
            cpu_threshold,
        }
    }

    pub fn evaluate_transition(
        &self,
        agent: &AgentRecord,
        load: Option<&OsResources>,
        intent: &str,
    ) -> AgentRole {
        if intent_matches(intent, LONG_HORIZON_INTENTS) && agent.role == AgentRole::Strategic {
            info!(
                "Peak-aware throttling: scaling {} down for long-horizon stability",
                agent.id
            );
            return AgentRole::Operational;
        }

        if intent_matches(intent, STRATEGIC_INTENTS) && agent.role == AgentRole::Operational {
            info!("High difficulty detected: suggesting strategic promotion for {}", agent.id);
            return AgentRole::Strategic;
        }

        if let Some(load) = load {
            if load.memory_used_bytes > self.memory_threshold
                || load.cpu_usage_percent > self.cpu_threshold
            {
                return AgentRole::Operational;
            }
        }

        agent.role
    }
}

impl Default for RoleSwitcher {
    fn default() -> Self {
        Self::new()
    }
}
