//! Agent directory, neighbor topology and contribution ledger

use crate::error::{MeshError, Result};
use crate::mesh::types::{
    AgentId, AgentRecord, AgentRole, AgentStats, Handshake, Reevaluation, ResourceLimits,
    FAILURE_LOG_CAPACITY,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// Neighbors picked for a freshly registered agent
const INITIAL_NEIGHBORS: usize = 2;

const NOVELTY_REWARD: f64 = 0.1;
const REDUNDANCY_PENALTY: f64 = 0.05;
const SNAPSHOT_THRESHOLD: f64 = 0.7;
const PRUNE_THRESHOLD: f64 = 0.5;
const UTILITY_AFTER_PRUNE: f64 = 0.8;

#[derive(Debug, Default)]
struct RegistryState {
    /// Ordered so initial neighbor selection is reproducible
    agents: BTreeMap<AgentId, AgentRecord>,
    /// source -> target -> score in [0, 1]
    contributions: HashMap<AgentId, HashMap<AgentId, f64>>,
}

/// Directory of active agents and their communication neighborhoods
///
/// Constructed once per mesh node and shared behind an `Arc`. All mutation
/// goes through one writer lock; every read hands back an owned copy.
#[derive(Debug)]
pub struct MeshRegistry {
    state: RwLock<RegistryState>,
    limits: ResourceLimits,
}

impl MeshRegistry {
    pub fn new() -> Self {
        Self::with_limits(ResourceLimits::default())
    }

    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            limits,
        }
    }

    /// Register (or re-register) an agent and pick its initial neighborhood
    pub fn register(
        &self,
        id: &str,
        role: AgentRole,
        capabilities: Vec<String>,
    ) -> Handshake {
        let mut state = self.state.write();

        info!("Handshake received from agent {}", id);

        let neighbors: Vec<AgentId> = state
            .agents
            .keys()
            .filter(|other| other.as_str() != id)
            .take(INITIAL_NEIGHBORS)
            .cloned()
            .collect();

        debug!("Initial neighbors for {}: {:?}", id, neighbors);

        let mut record = AgentRecord::new(id.to_string(), role, capabilities);
        record.neighbors = neighbors;
        state.agents.insert(id.to_string(), record);

        Handshake {
            session_id: format!("mesh_sess_{}", id),
            approved: true,
            resource_limits: self.limits,
        }
    }

    /// Accumulate latency/token totals and track peak throughput
    pub fn record_metrics(&self, id: &str, latency: f32, tokens: u32, throughput: f32) -> Result<()> {
        check_metrics(latency, throughput)?;

        let mut state = self.state.write();
        let Some(agent) = state.agents.get_mut(id) else {
            debug!("Metrics for unknown agent {} ignored", id);
            return Ok(());
        };

        agent.total_latency += latency;
        agent.total_tokens += u64::from(tokens);
        agent.request_count += 1;
        if throughput > agent.max_throughput {
            agent.max_throughput = throughput;
        }
        Ok(())
    }

    /// Log the outcome of an agent operation
    pub fn record_task_result(&self, id: &str, success: bool, label: &str, tool_calls: u32) {
        let mut state = self.state.write();
        let Some(agent) = state.agents.get_mut(id) else {
            debug!("Task result for unknown agent {} ignored", id);
            return;
        };

        agent.tool_calls += u64::from(tool_calls);
        if !success {
            agent.failed_tasks.insert(0, label.to_string());
            agent.failed_tasks.truncate(FAILURE_LOG_CAPACITY);
        }
    }

    /// Add to the value-of-contribution score from `source` to `target`
    pub fn record_contribution(&self, source: &str, target: &str, score: f64) -> Result<()> {
        if !score.is_finite() || score < 0.0 {
            return Err(MeshError::invalid(format!(
                "contribution score must be a finite non-negative number, got {}",
                score
            )));
        }

        let mut state = self.state.write();
        let entry = state
            .contributions
            .entry(source.to_string())
            .or_default()
            .entry(target.to_string())
            .or_insert(0.0);
        *entry = (*entry + score).min(1.0);
        Ok(())
    }

    /// How `source` influenced others; empty if never seen
    pub fn contribution_detail(&self, source: &str) -> HashMap<AgentId, f64> {
        self.state
            .read()
            .contributions
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Owned copy of an agent record
    pub fn agent(&self, id: &str) -> Option<AgentRecord> {
        self.state.read().agents.get(id).cloned()
    }

    pub fn agent_count(&self) -> usize {
        self.state.read().agents.len()
    }

    pub fn stats_summary(&self) -> Vec<AgentStats> {
        self.state
            .read()
            .agents
            .values()
            .map(|agent| AgentStats {
                id: agent.id.clone(),
                avg_latency: if agent.request_count > 0 {
                    agent.total_latency / agent.request_count as f32
                } else {
                    0.0
                },
                requests: agent.request_count,
                tokens: agent.total_tokens,
            })
            .collect()
    }

    /// Adjust utility for novelty and prune the neighborhood when it collapses
    ///
    /// `needs_snapshot` in the outcome is advisory only; nothing here touches
    /// the arbiter.
    pub fn reevaluate_neighbors(&self, id: &str, is_novel: bool) -> Option<Reevaluation> {
        let mut state = self.state.write();
        let agent = state.agents.get_mut(id)?;

        if is_novel {
            agent.utility_score += NOVELTY_REWARD;
        } else {
            agent.utility_score -= REDUNDANCY_PENALTY;
        }

        let needs_snapshot = agent.utility_score < SNAPSHOT_THRESHOLD;
        if needs_snapshot {
            warn!(
                "Utility drop for {} ({:.2}): snapshot advised for proactive healing",
                id, agent.utility_score
            );
        }

        let mut pruned = None;
        if agent.utility_score < PRUNE_THRESHOLD && agent.neighbors.len() > 1 {
            pruned = agent.neighbors.pop();
            agent.utility_score = UTILITY_AFTER_PRUNE;
            info!(
                "Pruning communication path {:?} for {} due to low novelty",
                pruned, id
            );
        }

        Some(Reevaluation {
            utility_score: agent.utility_score,
            needs_snapshot,
            pruned,
        })
    }

    pub fn update_role(&self, id: &str, role: AgentRole) {
        let mut state = self.state.write();
        if let Some(agent) = state.agents.get_mut(id) {
            if agent.role != role {
                debug!("Role of {} changed {} -> {}", id, agent.role, role);
            }
            agent.role = role;
        }
    }
}

/// Latency and throughput must be finite and non-negative
pub fn check_metrics(latency: f32, throughput: f32) -> Result<()> {
    for (name, value) in [("latency", latency), ("throughput", throughput)] {
        if !value.is_finite() || value < 0.0 {
            return Err(MeshError::invalid(format!(
                "{} must be a finite non-negative number, got {}",
                name, value
            )));
        }
    }
    Ok(())
}

impl Default for MeshRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn registry_with(ids: &[&str]) -> MeshRegistry {
        let registry = MeshRegistry::new();
        for id in ids {
            registry.register(id, AgentRole::Operational, vec![]);
        }
        registry
    }

    #[test]
    fn test_register_handshake() {
        let registry = MeshRegistry::new();
        let handshake = registry.register("scout", AgentRole::Operational, vec!["grep".into()]);

        assert_eq!(handshake.session_id, "mesh_sess_scout");
        assert!(handshake.approved);
        assert_eq!(handshake.resource_limits.memory_total_bytes, 512 * 1024 * 1024);

        let agent = registry.agent("scout").unwrap();
        assert_eq!(agent.utility_score, 1.0);
        assert!(agent.neighbors.is_empty());
        assert_eq!(agent.capabilities, vec!["grep".to_string()]);
    }

    #[test]
    fn test_initial_neighbors_bounded_and_exclude_self() {
        let registry = registry_with(&["a", "b", "c"]);
        registry.register("d", AgentRole::Operational, vec![]);

        let d = registry.agent("d").unwrap();
        assert_eq!(d.neighbors.len(), 2);
        assert!(!d.neighbors.contains(&"d".to_string()));

        // Re-registration overwrites and still never picks itself
        registry.register("a", AgentRole::Strategic, vec![]);
        let a = registry.agent("a").unwrap();
        assert_eq!(a.role, AgentRole::Strategic);
        assert_eq!(a.neighbors.len(), 2);
        assert!(!a.neighbors.contains(&"a".to_string()));
        assert_eq!(registry.agent_count(), 4);
    }

    #[test]
    fn test_metrics_and_stats() {
        let registry = registry_with(&["test-agent"]);

        registry.record_metrics("test-agent", 100.0, 50, 8.2).unwrap();
        registry.record_metrics("test-agent", 200.0, 150, 25.0).unwrap();
        registry.record_metrics("test-agent", 0.0, 0, 12.5).unwrap();

        let stats = registry.stats_summary();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].id, "test-agent");
        assert_eq!(stats[0].avg_latency, 100.0);
        assert_eq!(stats[0].requests, 3);
        assert_eq!(stats[0].tokens, 200);

        assert_eq!(registry.agent("test-agent").unwrap().max_throughput, 25.0);
    }

    #[test]
    fn test_invalid_metrics_rejected_without_commit() {
        let registry = registry_with(&["a"]);
        assert!(registry.record_metrics("a", f32::NAN, 10, 1.0).is_err());
        assert!(registry.record_metrics("a", -5.0, 10, 1.0).is_err());
        assert!(registry.record_metrics("a", 5.0, 10, f32::INFINITY).is_err());

        let record = registry.agent("a").unwrap();
        assert_eq!(record.request_count, 0);
        assert_eq!(record.total_latency, 0.0);
        assert_eq!(registry.stats_summary()[0].avg_latency, 0.0);
    }

    #[test]
    fn test_stats_zero_requests() {
        let registry = registry_with(&["idle"]);
        let stats = registry.stats_summary();
        assert_eq!(stats[0].avg_latency, 0.0);
        assert_eq!(stats[0].requests, 0);
    }

    #[test]
    fn test_unknown_agent_is_noop() {
        let registry = MeshRegistry::new();
        registry.record_metrics("ghost", 1.0, 1, 1.0).unwrap();
        registry.record_task_result("ghost", false, "boom", 3);
        registry.update_role("ghost", AgentRole::Strategic);
        assert!(registry.reevaluate_neighbors("ghost", true).is_none());
        assert!(registry.agent("ghost").is_none());
        assert!(registry.stats_summary().is_empty());
    }

    #[test]
    fn test_failure_ring_keeps_five_most_recent() {
        let registry = registry_with(&["coder"]);
        for i in 1..=6 {
            registry.record_task_result("coder", false, &format!("task-{}", i), 1);
        }
        registry.record_task_result("coder", true, "task-ok", 2);

        let agent = registry.agent("coder").unwrap();
        assert_eq!(
            agent.failed_tasks,
            vec!["task-6", "task-5", "task-4", "task-3", "task-2"]
        );
        assert!(!agent.failed_tasks.contains(&"task-1".to_string()));
        assert_eq!(agent.tool_calls, 8);
    }

    #[test]
    fn test_contribution_accumulates_and_clamps() {
        let registry = MeshRegistry::new();
        registry.record_contribution("scout", "coder", 0.5).unwrap();
        registry.record_contribution("scout", "coder", 0.25).unwrap();
        assert_eq!(registry.contribution_detail("scout")["coder"], 0.75);

        registry.record_contribution("scout", "coder", 0.8).unwrap();
        assert_eq!(registry.contribution_detail("scout")["coder"], 1.0);

        assert!(registry.contribution_detail("nobody").is_empty());
    }

    #[test]
    fn test_contribution_rejects_invalid_scores() {
        let registry = MeshRegistry::new();
        assert!(registry.record_contribution("a", "b", -0.1).is_err());
        assert!(registry.record_contribution("a", "b", f64::NAN).is_err());
        assert!(registry.record_contribution("a", "b", f64::INFINITY).is_err());
        assert!(registry.contribution_detail("a").is_empty());
    }

    #[test]
    fn test_concurrent_contributions_lose_nothing() {
        let registry = Arc::new(MeshRegistry::new());
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.record_contribution("scout", "coder", 0.01))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let score = registry.contribution_detail("scout")["coder"];
        assert!((score - 1.0).abs() < 1e-9, "score was {}", score);
    }

    #[test]
    fn test_contribution_detail_is_a_copy() {
        let registry = MeshRegistry::new();
        registry.record_contribution("scout", "coder", 0.3).unwrap();
        let mut detail = registry.contribution_detail("scout");
        detail.insert("coder".into(), 0.0);
        detail.insert("intruder".into(), 1.0);

        let fresh = registry.contribution_detail("scout");
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh["coder"], 0.3);
    }

    #[test]
    fn test_agent_returns_copy() {
        let registry = registry_with(&["coder"]);
        registry.record_task_result("coder", false, "compile", 0);

        let mut copy = registry.agent("coder").unwrap();
        copy.failed_tasks.clear();
        copy.failed_tasks.push("forged".into());
        copy.neighbors.push("coder".into());

        let fresh = registry.agent("coder").unwrap();
        assert_eq!(fresh.failed_tasks, vec!["compile".to_string()]);
        assert!(fresh.neighbors.is_empty());
    }

    #[test]
    fn test_reevaluate_novel_raises_utility() {
        let registry = registry_with(&["a"]);
        let outcome = registry.reevaluate_neighbors("a", true).unwrap();
        assert!((outcome.utility_score - 1.1).abs() < 1e-9);
        assert!(!outcome.needs_snapshot);
        assert!(outcome.pruned.is_none());
    }

    #[test]
    fn test_reevaluate_signals_snapshot_then_prunes() {
        let registry = registry_with(&["a", "b", "c"]);
        // c was registered last and knows a and b
        assert_eq!(registry.agent("c").unwrap().neighbors, vec!["a", "b"]);

        // 1.0 -> 0.65 after 7 redundant rounds: snapshot advised, no prune yet
        let mut last = None;
        for _ in 0..7 {
            last = registry.reevaluate_neighbors("c", false);
        }
        let outcome = last.unwrap();
        assert!(outcome.needs_snapshot);
        assert!(outcome.pruned.is_none());

        // Keep going until utility dips under 0.5
        let mut pruned = None;
        for _ in 0..10 {
            let outcome = registry.reevaluate_neighbors("c", false).unwrap();
            if outcome.pruned.is_some() {
                pruned = Some(outcome);
                break;
            }
        }
        let pruned = pruned.expect("neighbor should have been pruned");
        assert_eq!(pruned.pruned.as_deref(), Some("b"));
        assert_eq!(pruned.utility_score, 0.8);

        let c = registry.agent("c").unwrap();
        assert_eq!(c.neighbors, vec!["a"]);
    }

    #[test]
    fn test_last_neighbor_is_never_pruned() {
        let registry = registry_with(&["a", "b"]);
        assert_eq!(registry.agent("b").unwrap().neighbors, vec!["a"]);

        for _ in 0..30 {
            let outcome = registry.reevaluate_neighbors("b", false).unwrap();
            assert!(outcome.pruned.is_none());
        }
        let b = registry.agent("b").unwrap();
        assert_eq!(b.neighbors, vec!["a"]);
        assert!(b.utility_score < 0.5);
    }

    #[test]
    fn test_update_role() {
        let registry = registry_with(&["a"]);
        registry.update_role("a", AgentRole::Strategic);
        assert_eq!(registry.agent("a").unwrap().role, AgentRole::Strategic);
    }
}
