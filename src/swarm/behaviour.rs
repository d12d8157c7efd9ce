//! Network behaviour for the mesh swarm

use libp2p::{
    gossipsub::{self, IdentTopic, MessageAuthenticity, ValidationMode},
    identify,
    identity::Keypair,
    mdns, ping,
    swarm::NetworkBehaviour,
    PeerId,
};
use std::time::Duration;
use std::{collections::hash_map::DefaultHasher, hash::Hash, hash::Hasher};
use tracing::debug;

/// Protocol name announced through identify
pub const MESH_PROTOCOL: &str = "/agent-mesh/1.0.0";

/// Gossip payloads above this size are rejected
pub const MAX_DELTA_BYTES: usize = 1024 * 1024;

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "MeshBehaviourEvent")]
pub struct MeshBehaviour {
    /// mDNS for local network discovery
    pub mdns: mdns::tokio::Behaviour,

    /// Gossipsub carries deltas and announcements
    pub gossipsub: gossipsub::Behaviour,

    /// Ping for connection health
    pub ping: ping::Behaviour,

    /// Identify for peer information exchange
    pub identify: identify::Behaviour,
}

#[derive(Debug)]
pub enum MeshBehaviourEvent {
    Mdns(mdns::Event),
    Gossipsub(gossipsub::Event),
    Ping(ping::Event),
    Identify(identify::Event),
}

impl From<mdns::Event> for MeshBehaviourEvent {
    fn from(event: mdns::Event) -> Self {
        MeshBehaviourEvent::Mdns(event)
    }
}

impl From<gossipsub::Event> for MeshBehaviourEvent {
    fn from(event: gossipsub::Event) -> Self {
        MeshBehaviourEvent::Gossipsub(event)
    }
}

impl From<ping::Event> for MeshBehaviourEvent {
    fn from(event: ping::Event) -> Self {
        MeshBehaviourEvent::Ping(event)
    }
}

impl From<identify::Event> for MeshBehaviourEvent {
    fn from(event: identify::Event) -> Self {
        MeshBehaviourEvent::Identify(event)
    }
}

/// Gossip message id: one id per publish, so re-sending identical bytes later
/// still reaches peers. Unsigned messages fall back to hashing the payload.
pub fn delta_message_id(message: &gossipsub::Message) -> gossipsub::MessageId {
    let mut hasher = DefaultHasher::new();
    message.source.hash(&mut hasher);
    message.topic.hash(&mut hasher);
    match message.sequence_number {
        Some(seqno) => seqno.hash(&mut hasher),
        None => message.data.hash(&mut hasher),
    }
    gossipsub::MessageId::from(hasher.finish().to_string())
}

impl MeshBehaviour {
    /// Build the behaviour signed with the node's own identity
    pub fn new(keypair: &Keypair, control_topic: &str) -> anyhow::Result<Self> {
        let local_peer_id = PeerId::from(keypair.public());

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(1))
            .validation_mode(ValidationMode::Strict)
            .max_transmit_size(MAX_DELTA_BYTES)
            .message_id_fn(delta_message_id)
            .build()
            .map_err(|e| anyhow::anyhow!("Gossipsub config error: {}", e))?;

        let mut gossipsub =
            gossipsub::Behaviour::new(MessageAuthenticity::Signed(keypair.clone()), gossipsub_config)
                .map_err(|e| anyhow::anyhow!("Gossipsub error: {}", e))?;

        let topic = IdentTopic::new(control_topic);
        gossipsub.subscribe(&topic)?;
        debug!("Subscribed to control topic: {}", topic);

        let ping = ping::Behaviour::new(ping::Config::new());

        let identify = identify::Behaviour::new(identify::Config::new(
            MESH_PROTOCOL.to_string(),
            keypair.public(),
        ));

        Ok(Self {
            mdns,
            gossipsub,
            ping,
            identify,
        })
    }

    /// Subscribe to a topic; `false` when already subscribed
    pub fn subscribe(&mut self, topic: &str) -> anyhow::Result<bool> {
        let topic = IdentTopic::new(topic);
        Ok(self.gossipsub.subscribe(&topic)?)
    }

    /// Publish raw bytes to a topic
    pub fn publish(
        &mut self,
        topic: &str,
        data: Vec<u8>,
    ) -> Result<gossipsub::MessageId, gossipsub::PublishError> {
        self.gossipsub.publish(IdentTopic::new(topic), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(data: &[u8], seqno: Option<u64>, source: Option<PeerId>) -> gossipsub::Message {
        gossipsub::Message {
            source,
            data: data.to_vec(),
            sequence_number: seqno,
            topic: IdentTopic::new("mesh.kv_cache.a").hash(),
        }
    }

    #[test]
    fn test_republished_payload_gets_new_id() {
        let peer = Some(PeerId::from(Keypair::generate_ed25519().public()));
        let first = delta_message_id(&message(b"state-a", Some(1), peer));
        let again = delta_message_id(&message(b"state-a", Some(3), peer));
        assert_ne!(first, again);
    }

    #[test]
    fn test_same_publish_keeps_its_id() {
        let peer = Some(PeerId::from(Keypair::generate_ed25519().public()));
        assert_eq!(
            delta_message_id(&message(b"state-a", Some(7), peer)),
            delta_message_id(&message(b"state-a", Some(7), peer))
        );
    }

    #[test]
    fn test_unsigned_messages_hash_payload() {
        let a = delta_message_id(&message(b"state-a", None, None));
        let b = delta_message_id(&message(b"state-b", None, None));
        assert_ne!(a, b);
    }
}
