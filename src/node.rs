//! Request boundary of a mesh node
//!
//! [`MeshNode`] owns one instance of every coordination component and wires
//! them together per inbound call. Components are built once from a
//! [`NodeConfig`] and shared through `Arc`s; nothing here is a process global.

use crate::config::NodeConfig;
use crate::delta::{DeltaBroadcaster, DeltaSubscription, InMemoryDeltaBus};
use crate::error::{MeshError, Result};
use crate::inference::{InferenceController, InferenceRequest, InferenceResponse};
use crate::mesh::{
    check_metrics, intent_matches, AgentAction, AgentRole, Arbiter, Handshake, LockOutcome,
    MeshRegistry, RoleSwitcher,
};
use crate::scheinfer::{ExecutionTarget, ScheInfer};
use crate::search::{
    DirectoryCorpus, HttpSearchBackend, InMemoryCorpus, LocalCorpus, SearchBackend,
    SearchController, SearchRequest, SearchResponse, SoftThrottle,
};
use crate::synthesis::{Synthesis, SynthesisController};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Action types that always contend for the strategic lock
pub const STRATEGIC_ACTIONS: &[&str] = &["HIGH_COMPLEXITY", "STRATEGIC_REASONING"];

/// Outcome of [`MeshNode::execute_action`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub required_role: AgentRole,
    /// Set when this action won the strategic lock
    pub promotion_suggested: bool,
    /// Advisory flag from neighbor reevaluation
    pub needs_snapshot: bool,
}

pub struct MeshNode {
    config: NodeConfig,
    registry: Arc<MeshRegistry>,
    arbiter: Arc<Arbiter>,
    switcher: RoleSwitcher,
    scheduler: Arc<ScheInfer>,
    inference: InferenceController,
    search: SearchController,
    synthesis: SynthesisController,
    /// Novelty of reasoning chains, separate from the search throttle
    context_throttle: SoftThrottle,
    broadcaster: Arc<dyn DeltaBroadcaster>,
}

impl MeshNode {
    /// Build a node with an in-process delta bus
    pub fn new(config: NodeConfig) -> Result<Self> {
        let broadcaster: Arc<dyn DeltaBroadcaster> =
            Arc::new(InMemoryDeltaBus::new(config.namespace.clone()));
        Self::with_broadcaster(config, broadcaster)
    }

    /// Build a node around an external delta channel. The search backend is
    /// HTTP when a search URL is set; the corpus is a directory when a corpus
    /// dir is set and empty otherwise.
    pub fn with_broadcaster(
        config: NodeConfig,
        broadcaster: Arc<dyn DeltaBroadcaster>,
    ) -> Result<Self> {
        let backend: Option<Arc<dyn SearchBackend>> = config
            .search_url
            .as_ref()
            .map(|url| Arc::new(HttpSearchBackend::new(url.clone())) as Arc<dyn SearchBackend>);

        let corpus: Arc<dyn LocalCorpus> = match &config.corpus_dir {
            Some(dir) => Arc::new(DirectoryCorpus::new(dir.clone())),
            None => Arc::new(InMemoryCorpus::default()),
        };

        Self::with_components(config, backend, corpus, broadcaster)
    }

    pub fn with_components(
        config: NodeConfig,
        backend: Option<Arc<dyn SearchBackend>>,
        corpus: Arc<dyn LocalCorpus>,
        broadcaster: Arc<dyn DeltaBroadcaster>,
    ) -> Result<Self> {
        config.validate()?;
        let scheduler = Arc::new(ScheInfer::new(config.hardware_profile()?));

        let search = SearchController::new(
            SoftThrottle::with_limits(config.throttle_window, config.throttle_capacity),
            backend,
            corpus,
        )
        .with_collections(config.collections.clone())
        .with_remote_timeout(config.search_timeout);

        let inference =
            InferenceController::new(Arc::clone(&scheduler)).with_latency_scale(config.latency_scale);

        info!(
            "Mesh node ready: namespace={}, {}",
            config.namespace,
            scheduler.mesh_capability()
        );

        Ok(Self {
            registry: Arc::new(MeshRegistry::with_limits(config.limits)),
            arbiter: Arc::new(Arbiter::with_ttl(config.lock_ttl)),
            switcher: RoleSwitcher::with_thresholds(config.memory_threshold, config.cpu_threshold),
            scheduler,
            inference,
            search,
            synthesis: SynthesisController::new(),
            context_throttle: SoftThrottle::with_limits(
                config.throttle_window,
                config.throttle_capacity,
            ),
            broadcaster,
            config,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MeshRegistry> {
        &self.registry
    }

    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    pub fn scheduler(&self) -> &Arc<ScheInfer> {
        &self.scheduler
    }

    pub fn handshake(&self, id: &str, role: AgentRole, capabilities: Vec<String>) -> Result<Handshake> {
        if id.trim().is_empty() {
            return Err(MeshError::invalid("agent id must not be empty"));
        }
        Ok(self.registry.register(id, role, capabilities))
    }

    /// Record an action and decide the role the agent should hold next
    pub fn execute_action(&self, action: AgentAction) -> Result<ActionResponse> {
        if action.agent_id.trim().is_empty() {
            return Err(MeshError::invalid("agent id must not be empty"));
        }
        check_metrics(action.latency_ms, action.throughput_gbs)?;
        let id = action.agent_id.clone();

        self.arbiter.save_state(action.clone());

        self.registry.record_metrics(
            &id,
            action.latency_ms,
            action.tokens_used,
            action.throughput_gbs,
        )?;
        self.registry
            .record_task_result(&id, action.success, &action.action_type, action.tool_calls);

        let is_novel = !action.reasoning_chain.trim().is_empty()
            && self.context_throttle.is_novel(&action.reasoning_chain);
        let needs_snapshot = self
            .registry
            .reevaluate_neighbors(&id, is_novel)
            .map(|r| r.needs_snapshot)
            .unwrap_or(false);

        let Some(record) = self.registry.agent(&id) else {
            debug!("Action from unregistered agent {}, snapshot only", id);
            return Ok(ActionResponse {
                required_role: AgentRole::Operational,
                promotion_suggested: false,
                needs_snapshot: false,
            });
        };

        let mut role = self.switcher.evaluate_transition(
            &record,
            action.resource_impact.as_ref(),
            &action.task_intent,
        );
        let mut promotion_suggested = false;

        if role == AgentRole::Strategic || intent_matches(&action.action_type, STRATEGIC_ACTIONS) {
            match self.arbiter.request_strategic_lock(&id) {
                LockOutcome::Granted => {
                    role = AgentRole::Strategic;
                    promotion_suggested = true;
                }
                LockOutcome::Denied { holder } => {
                    info!("Strategic lock held by {}, {} stays operational", holder, id);
                    role = AgentRole::Operational;
                }
            }
        }

        if role == AgentRole::Operational {
            self.arbiter.release_lock(&id);
        }
        self.registry.update_role(&id, role);

        Ok(ActionResponse {
            required_role: role,
            promotion_suggested,
            needs_snapshot,
        })
    }

    /// Last action snapshot for crash recovery
    pub fn reconstitute(&self, agent_id: &str) -> Option<AgentAction> {
        self.arbiter.state(agent_id)
    }

    pub fn request_strategic_lock(&self, agent_id: &str) -> LockOutcome {
        self.arbiter.request_strategic_lock(agent_id)
    }

    pub fn release_lock(&self, agent_id: &str) {
        self.arbiter.release_lock(agent_id)
    }

    pub fn route_task(&self, size_bytes: u64) -> ExecutionTarget {
        self.scheduler.route_task(size_bytes)
    }

    pub fn route_layer(&self, layer_index: usize) -> ExecutionTarget {
        self.scheduler.route_layer(layer_index)
    }

    pub fn mesh_capability(&self) -> String {
        self.scheduler.mesh_capability()
    }

    /// Simulated inference; metrics are recorded only on success
    pub async fn infer(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<InferenceResponse> {
        let response = self.inference.generate(request, cancel).await?;
        self.registry.record_metrics(
            &request.agent_id,
            response.latency_ms,
            response.tokens_used,
            response.throughput_gbs,
        )?;
        Ok(response)
    }

    pub async fn search(
        &self,
        request: &SearchRequest,
        cancel: &CancellationToken,
    ) -> Result<SearchResponse> {
        if request.max_results == 0 {
            let mut request = request.clone();
            request.max_results = self.config.max_results;
            return self.search.search(&request, cancel).await;
        }
        self.search.search(request, cancel).await
    }

    pub async fn broadcast_delta(&self, agent_id: &str, payload: Vec<u8>) -> Result<()> {
        self.broadcaster
            .broadcast_delta(agent_id, payload)
            .await
            .inspect_err(|e| warn!("Delta broadcast for {} failed: {}", agent_id, e))
    }

    pub async fn subscribe_deltas(&self, agent_id: &str) -> Result<DeltaSubscription> {
        self.broadcaster.subscribe(agent_id).await
    }

    pub fn synthesize(&self, goal: &str, actions: &[AgentAction]) -> Synthesis {
        self.synthesis.synthesize(goal, actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::OsResources;
    use crate::search::ResponseOrigin;
    use std::time::Duration;

    const MIB: u64 = 1024 * 1024;

    fn node() -> MeshNode {
        let config = NodeConfig {
            latency_scale: 0.0,
            ..Default::default()
        };
        let corpus = Arc::new(InMemoryCorpus::new(["notes.md:mesh topology is a ring"]));
        MeshNode::with_components(config, None, corpus, Arc::new(InMemoryDeltaBus::default()))
            .unwrap()
    }

    #[test]
    fn test_handshake_registers_agent() {
        let node = node();
        let handshake = node
            .handshake("coder", AgentRole::Operational, vec!["rust".into()])
            .unwrap();
        assert_eq!(handshake.session_id, "mesh_sess_coder");
        assert!(handshake.approved);
        assert_eq!(handshake.resource_limits.memory_total_bytes, 512 * MIB);
        assert!(node.handshake(" ", AgentRole::Operational, vec![]).is_err());
    }

    #[test]
    fn test_strategic_intent_wins_lock() {
        let node = node();
        node.handshake("planner", AgentRole::Operational, vec![]).unwrap();

        let action = AgentAction::new("planner", "PLAN").with_intent("strategic_reasoning");
        let response = node.execute_action(action).unwrap();

        assert_eq!(response.required_role, AgentRole::Strategic);
        assert!(response.promotion_suggested);
        assert_eq!(node.arbiter().holder().as_deref(), Some("planner"));
        assert_eq!(node.registry().agent("planner").unwrap().role, AgentRole::Strategic);
    }

    #[test]
    fn test_second_contender_is_denied() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();
        node.handshake("b", AgentRole::Operational, vec![]).unwrap();

        node.execute_action(AgentAction::new("a", "HIGH_COMPLEXITY")).unwrap();
        let response = node.execute_action(AgentAction::new("b", "HIGH_COMPLEXITY")).unwrap();

        assert_eq!(response.required_role, AgentRole::Operational);
        assert!(!response.promotion_suggested);
        assert_eq!(node.arbiter().holder().as_deref(), Some("a"));
    }

    #[test]
    fn test_memory_pressure_demotes_and_releases_lock() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();
        node.execute_action(AgentAction::new("a", "STRATEGIC_REASONING")).unwrap();
        assert_eq!(node.arbiter().holder().as_deref(), Some("a"));

        let heavy = AgentAction::new("a", "LONG_HORIZON").with_intent("LONG_HORIZON");
        let response = node.execute_action(heavy).unwrap();
        assert_eq!(response.required_role, AgentRole::Operational);
        assert_eq!(node.arbiter().holder(), None);

        let spike = AgentAction::new("a", "CODE").with_resources(OsResources {
            cpu_usage_percent: 10.0,
            memory_used_bytes: 1500 * MIB,
            memory_total_bytes: 4096 * MIB,
        });
        assert_eq!(
            node.execute_action(spike).unwrap().required_role,
            AgentRole::Operational
        );
    }

    #[test]
    fn test_actions_feed_registry_and_snapshot() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();

        let mut action = AgentAction::new("a", "CODE").with_reasoning("split the parser").failed();
        action.latency_ms = 40.0;
        action.tokens_used = 12;
        action.tool_calls = 2;
        node.execute_action(action.clone()).unwrap();

        let record = node.registry().agent("a").unwrap();
        assert_eq!(record.request_count, 1);
        assert_eq!(record.total_tokens, 12);
        assert_eq!(record.tool_calls, 2);
        assert_eq!(record.failed_tasks, vec!["CODE".to_string()]);
        assert!((record.utility_score - 1.1).abs() < 1e-9);
        assert_eq!(node.reconstitute("a"), Some(action));
    }

    #[test]
    fn test_repeated_reasoning_lowers_utility() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();

        for _ in 0..3 {
            node.execute_action(AgentAction::new("a", "CODE").with_reasoning("same thought"))
                .unwrap();
        }
        // +0.1 once, then -0.05 twice
        let score = node.registry().agent("a").unwrap().utility_score;
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unregistered_agent_only_snapshots() {
        let node = node();
        let response = node.execute_action(AgentAction::new("ghost", "HIGH_COMPLEXITY")).unwrap();
        assert_eq!(response.required_role, AgentRole::Operational);
        assert!(!response.promotion_suggested);
        assert!(node.reconstitute("ghost").is_some());
        assert_eq!(node.arbiter().holder(), None);
        assert!(node.execute_action(AgentAction::new("", "X")).is_err());
    }

    #[test]
    fn test_action_with_bad_metrics_is_rejected_whole() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();

        let mut action = AgentAction::new("a", "CODE");
        action.latency_ms = f32::NAN;
        assert!(matches!(
            node.execute_action(action),
            Err(MeshError::InvalidInput(_))
        ));
        assert!(node.reconstitute("a").is_none());
        assert_eq!(node.registry().agent("a").unwrap().request_count, 0);
    }

    #[tokio::test]
    async fn test_infer_records_metrics() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();

        let response = node
            .infer(&InferenceRequest::new("a", "hello"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.target, ExecutionTarget::CacheResidentCpu);

        let record = node.registry().agent("a").unwrap();
        assert_eq!(record.request_count, 1);
        assert_eq!(record.total_tokens, response.tokens_used as u64);
    }

    #[tokio::test]
    async fn test_cancelled_infer_records_nothing() {
        let node = node();
        node.handshake("a", AgentRole::Operational, vec![]).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = node
            .infer(&InferenceRequest::new("a", "hello"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(node.registry().agent("a").unwrap().request_count, 0);
    }

    #[tokio::test]
    async fn test_search_falls_back_then_throttles() {
        let node = node();
        let mut request = SearchRequest::new("a", "mesh layout");
        request.max_results = 0;

        let first = node.search(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.origin, ResponseOrigin::LocalFallback);
        assert_eq!(first.results[0].source, "notes.md");

        let second = node.search(&request, &CancellationToken::new()).await.unwrap();
        assert!(second.is_throttled());
    }

    #[tokio::test]
    async fn test_delta_round_trip() {
        let node = node();
        let mut sub = node.subscribe_deltas("a").await.unwrap();
        node.broadcast_delta("a", vec![1, 2, 3]).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap();
        assert_eq!(payload, Some(vec![1, 2, 3]));
        assert!(node.broadcast_delta("", vec![]).await.is_err());
    }

    #[test]
    fn test_synthesize_and_routing_passthrough() {
        let node = node();
        let synthesis = node.synthesize("goal", &[AgentAction::new("a", "X").with_reasoning("r")]);
        assert_eq!(synthesis.synthesized_state, "Merged State: [a: r]");
        assert_eq!(node.route_task(32 * MIB), ExecutionTarget::BaselineCpu);
        assert_eq!(node.route_layer(3), ExecutionTarget::BaselineCpu);
        assert!(node.mesh_capability().starts_with("CPU:"));
    }
}
