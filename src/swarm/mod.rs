//! P2P swarm mode: deltas and node announcements over gossipsub
//!
//! Nodes on the same LAN find each other through mDNS; remote nodes are
//! reached through bootstrap addresses.

#[cfg(feature = "swarm")]
mod behaviour;
#[cfg(feature = "swarm")]
mod broadcaster;
#[cfg(feature = "swarm")]
mod messages;
#[cfg(feature = "swarm")]
mod node;

#[cfg(feature = "swarm")]
pub use behaviour::{delta_message_id, MeshBehaviour, MAX_DELTA_BYTES, MESH_PROTOCOL};
#[cfg(feature = "swarm")]
pub use broadcaster::{spawn_swarm, SwarmDeltaBroadcaster};
#[cfg(feature = "swarm")]
pub use messages::{MeshMessage, NodeAnnouncement, NodeId};
#[cfg(feature = "swarm")]
pub use node::{NodeEvent, SwarmCommand, SwarmConfig, SwarmNode, SwarmStatus};

#[cfg(not(feature = "swarm"))]
pub fn swarm_not_available() {
    eprintln!("Swarm mode requires the 'swarm' feature. Rebuild with:");
    eprintln!("  cargo build --release --features swarm");
}
