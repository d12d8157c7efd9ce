//! Shared data model for the mesh core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MeshError;

/// Unique identifier for an agent in the mesh
pub type AgentId = String;

/// Capacity of the per-agent failure ring
pub const FAILURE_LOG_CAPACITY: usize = 5;

/// Two-state authority classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    /// Execution and tool use
    Operational,
    /// Exclusive reasoning priority
    Strategic,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Operational => write!(f, "OPERATIONAL"),
            AgentRole::Strategic => write!(f, "STRATEGIC"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "operational" | "op" => Ok(AgentRole::Operational),
            "strategic" | "st" => Ok(AgentRole::Strategic),
            other => Err(MeshError::invalid(format!("unknown role: {}", other))),
        }
    }
}

/// Operating-system resource snapshot reported by an agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OsResources {
    pub cpu_usage_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

/// Limits handed to an agent on registration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_usage_percent: f64,
    pub memory_total_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_usage_percent: 75.0,
            memory_total_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Result of the registration handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub session_id: String,
    pub approved: bool,
    pub resource_limits: ResourceLimits,
}

/// Directory entry for a registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub role: AgentRole,
    pub capabilities: Vec<String>,
    /// Bounded neighborhood, never contains `id`
    pub neighbors: Vec<AgentId>,
    pub utility_score: f64,
    pub total_latency: f32,
    pub total_tokens: u64,
    pub request_count: u64,
    pub tool_calls: u64,
    /// Most recent failure first, at most [`FAILURE_LOG_CAPACITY`] entries
    pub failed_tasks: Vec<String>,
    /// Peak observed throughput (GB/s)
    pub max_throughput: f32,
}

impl AgentRecord {
    pub fn new(id: AgentId, role: AgentRole, capabilities: Vec<String>) -> Self {
        Self {
            id,
            role,
            capabilities,
            neighbors: Vec::new(),
            utility_score: 1.0,
            total_latency: 0.0,
            total_tokens: 0,
            request_count: 0,
            tool_calls: 0,
            failed_tasks: Vec::new(),
            max_throughput: 0.0,
        }
    }
}

/// Per-agent performance summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub id: AgentId,
    pub avg_latency: f32,
    pub requests: u64,
    pub tokens: u64,
}

/// Outcome of a neighbor reevaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Reevaluation {
    pub utility_score: f64,
    /// Advisory signal for an external snapshot hook
    pub needs_snapshot: bool,
    /// Neighbor dropped by this reevaluation, if any
    pub pruned: Option<AgentId>,
}

/// An agent action as delivered by the request boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub agent_id: AgentId,
    pub action_type: String,
    #[serde(default)]
    pub task_intent: String,
    #[serde(default)]
    pub reasoning_chain: String,
    #[serde(default)]
    pub resource_impact: Option<OsResources>,
    #[serde(default)]
    pub latency_ms: f32,
    #[serde(default)]
    pub tokens_used: u32,
    #[serde(default)]
    pub throughput_gbs: f32,
    #[serde(default)]
    pub tool_calls: u32,
    #[serde(default = "default_success")]
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

fn default_success() -> bool {
    true
}

impl AgentAction {
    pub fn new(agent_id: impl Into<AgentId>, action_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            action_type: action_type.into(),
            task_intent: String::new(),
            reasoning_chain: String::new(),
            resource_impact: None,
            latency_ms: 0.0,
            tokens_used: 0,
            throughput_gbs: 0.0,
            tool_calls: 0,
            success: true,
            timestamp: Utc::now(),
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.task_intent = intent.into();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_chain = reasoning.into();
        self
    }

    pub fn with_resources(mut self, resources: OsResources) -> Self {
        self.resource_impact = Some(resources);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}
