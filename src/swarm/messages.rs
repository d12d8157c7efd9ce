//! Control messages exchanged between mesh nodes
//!
//! Delta payloads travel raw on their own topics; only node presence goes
//! through these JSON-encoded messages.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Unique identifier for a node in the swarm
pub type NodeId = String;

/// Hardware capability advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAnnouncement {
    pub node_id: NodeId,
    /// Output of the scheduler's capability summary
    pub capability: String,
    /// Agents registered on this node
    pub agent_count: usize,
    /// Seconds since the epoch
    pub last_seen: u64,
}

impl NodeAnnouncement {
    pub fn new(node_id: NodeId, capability: String, agent_count: usize) -> Self {
        Self {
            node_id,
            capability,
            agent_count,
            last_seen: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshMessage {
    /// Node announces its presence and capability
    Announce(NodeAnnouncement),

    /// Node is leaving the swarm
    Leave { node_id: NodeId },
}

impl MeshMessage {
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}
