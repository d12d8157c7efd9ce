//! Swarm node - owns the libp2p swarm and serves broadcaster commands

use crate::delta::{DeltaSubscription, SubscriberTable};
use crate::error::MeshError;
use crate::swarm::behaviour::{MeshBehaviour, MeshBehaviourEvent};
use crate::swarm::messages::{MeshMessage, NodeAnnouncement, NodeId};
use anyhow::Result;
use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic, TopicHash},
    identity::Keypair,
    mdns,
    swarm::SwarmEvent,
    Multiaddr, PeerId, Swarm,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Listen address (default: /ip4/0.0.0.0/tcp/0)
    pub listen_addr: String,
    /// Prefix of every delta topic
    pub namespace: String,
    /// Peers dialed at startup
    pub bootstrap_peers: Vec<String>,
    /// Capability summary advertised to peers
    pub capability: String,
}

impl SwarmConfig {
    pub fn new(namespace: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            namespace: namespace.into(),
            bootstrap_peers: vec![],
            capability: capability.into(),
        }
    }

    /// Topic for node announcements; `/` keeps it apart from `<ns>.<agent>`
    pub fn control_topic(&self) -> String {
        format!("{}/announce", self.namespace)
    }
}

#[derive(Debug)]
pub enum SwarmCommand {
    /// Publish a payload on a topic
    Publish {
        topic: String,
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), MeshError>>,
    },
    /// Subscribe to a topic
    Subscribe {
        topic: String,
        reply: oneshot::Sender<Result<DeltaSubscription, MeshError>>,
    },
    /// Update the agent count carried by announcements
    SetAgentCount { count: usize },
    /// Get swarm status
    GetStatus { reply: oneshot::Sender<SwarmStatus> },
    /// Shutdown the swarm
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SwarmStatus {
    pub node_id: NodeId,
    pub peer_id: String,
    pub peer_count: usize,
    pub listen_addrs: Vec<String>,
    pub topics: Vec<String>,
    pub known_nodes: Vec<NodeAnnouncement>,
}

/// Events surfaced to the console
#[derive(Debug, Clone)]
pub enum NodeEvent {
    PeerDiscovered { peer_id: String },
    PeerLeft { peer_id: String },
    NodeAnnounced(NodeAnnouncement),
    NodeLeft { node_id: NodeId },
}

pub struct SwarmNode {
    swarm: Swarm<MeshBehaviour>,
    config: SwarmConfig,
    node_id: NodeId,
    peer_id: PeerId,
    control_topic: TopicHash,
    known_peers: HashSet<PeerId>,
    known_nodes: HashMap<NodeId, NodeAnnouncement>,
    /// Hash → name for every delta topic we joined
    topics: HashMap<TopicHash, String>,
    subscribers: SubscriberTable,
    listen_addrs: Vec<String>,
    agent_count: usize,
}

impl SwarmNode {
    pub fn new(config: SwarmConfig) -> Result<Self> {
        let node_id = format!(
            "node-{}",
            Uuid::new_v4().to_string().split('-').next().unwrap_or("unknown")
        );

        let keypair = Keypair::generate_ed25519();
        let peer_id = PeerId::from(keypair.public());

        info!("Creating swarm node: {}", node_id);
        info!("  Listen: {}", config.listen_addr);
        info!("  Namespace: {}", config.namespace);
        info!("  PeerId: {}", peer_id);

        let control_topic = config.control_topic();
        let behaviour = MeshBehaviour::new(&keypair, &control_topic)?;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )?
            .with_behaviour(move |_| behaviour)?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        Ok(Self {
            swarm,
            control_topic: IdentTopic::new(control_topic).hash(),
            config,
            node_id,
            peer_id,
            known_peers: HashSet::new(),
            known_nodes: HashMap::new(),
            topics: HashMap::new(),
            subscribers: SubscriberTable::default(),
            listen_addrs: Vec::new(),
            agent_count: 0,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SwarmCommand>,
        event_tx: mpsc::Sender<NodeEvent>,
    ) -> Result<()> {
        let listen_addr: Multiaddr = self.config.listen_addr.parse()?;
        self.swarm.listen_on(listen_addr)?;

        for addr_str in &self.config.bootstrap_peers {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => {
                    info!("Dialing bootstrap peer: {}", addr);
                    if let Err(e) = self.swarm.dial(addr) {
                        warn!("Failed to dial bootstrap peer: {}", e);
                    }
                }
                Err(e) => warn!("Ignoring bootstrap peer {}: {}", addr_str, e),
            }
        }

        let mut announce_timer = tokio::time::interval(ANNOUNCE_INTERVAL);

        info!("Swarm node started, entering event loop");

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event, &event_tx).await;
                }

                cmd = cmd_rx.recv() => {
                    match cmd {
                        // All broadcaster handles dropped
                        None | Some(SwarmCommand::Shutdown) => {
                            info!("Shutting down swarm");
                            let msg = MeshMessage::Leave { node_id: self.node_id.clone() };
                            self.publish_control(&msg);
                            break;
                        }
                        Some(SwarmCommand::Publish { topic, payload, reply }) => {
                            let _ = reply.send(self.publish_delta(&topic, payload));
                        }
                        Some(SwarmCommand::Subscribe { topic, reply }) => {
                            let _ = reply.send(self.subscribe_delta(&topic));
                        }
                        Some(SwarmCommand::SetAgentCount { count }) => {
                            self.agent_count = count;
                        }
                        Some(SwarmCommand::GetStatus { reply }) => {
                            let _ = reply.send(self.status());
                        }
                    }
                }

                _ = announce_timer.tick() => {
                    let msg = MeshMessage::Announce(NodeAnnouncement::new(
                        self.node_id.clone(),
                        self.config.capability.clone(),
                        self.agent_count,
                    ));
                    self.publish_control(&msg);
                }
            }
        }

        Ok(())
    }

    fn status(&self) -> SwarmStatus {
        let mut topics: Vec<String> = self.topics.values().cloned().collect();
        topics.sort();
        let mut known_nodes: Vec<NodeAnnouncement> = self.known_nodes.values().cloned().collect();
        known_nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        SwarmStatus {
            node_id: self.node_id.clone(),
            peer_id: self.peer_id.to_string(),
            peer_count: self.known_peers.len(),
            listen_addrs: self.listen_addrs.clone(),
            topics,
            known_nodes,
        }
    }

    /// Local subscribers first, then the network
    fn publish_delta(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), MeshError> {
        let local = self.subscribers.deliver(topic, &payload);
        let size = payload.len();

        match self.swarm.behaviour_mut().publish(topic, payload) {
            Ok(id) => {
                debug!("Published {} bytes on {} as {} ({} local)", size, topic, id, local);
                Ok(())
            }
            Err(gossipsub::PublishError::InsufficientPeers) => {
                debug!("No peers for {}, delivered locally to {}", topic, local);
                Ok(())
            }
            Err(e) => Err(MeshError::Broadcast(format!("publish on {} failed: {:?}", topic, e))),
        }
    }

    fn subscribe_delta(&mut self, topic: &str) -> Result<DeltaSubscription, MeshError> {
        self.swarm
            .behaviour_mut()
            .subscribe(topic)
            .map_err(|e| MeshError::Broadcast(format!("subscribe to {} failed: {}", topic, e)))?;
        self.topics
            .insert(IdentTopic::new(topic).hash(), topic.to_string());
        debug!("Subscribed to delta topic: {}", topic);
        Ok(self.subscribers.add(topic))
    }

    fn publish_control(&mut self, msg: &MeshMessage) {
        let data = match msg.encode() {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode control message: {}", e);
                return;
            }
        };
        let topic = self.config.control_topic();
        if let Err(e) = self.swarm.behaviour_mut().publish(&topic, data) {
            // InsufficientPeers is normal while alone
            debug!("Control publish skipped: {:?}", e);
        }
    }

    async fn handle_swarm_event(
        &mut self,
        event: SwarmEvent<MeshBehaviourEvent>,
        event_tx: &mpsc::Sender<NodeEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                let full_addr = format!("{}/p2p/{}", address, self.peer_id);
                info!("Listening on {}", full_addr);
                self.listen_addrs.push(full_addr);
            }

            SwarmEvent::Behaviour(MeshBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id != self.peer_id && self.known_peers.insert(peer_id) {
                        info!("Discovered peer via mDNS: {} at {}", peer_id, addr);
                        self.swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        let _ = event_tx
                            .send(NodeEvent::PeerDiscovered {
                                peer_id: peer_id.to_string(),
                            })
                            .await;
                    }
                }
            }

            SwarmEvent::Behaviour(MeshBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    if self.known_peers.remove(&peer_id) {
                        info!("Peer expired: {}", peer_id);
                        self.swarm
                            .behaviour_mut()
                            .gossipsub
                            .remove_explicit_peer(&peer_id);
                        let _ = event_tx
                            .send(NodeEvent::PeerLeft {
                                peer_id: peer_id.to_string(),
                            })
                            .await;
                    }
                }
            }

            SwarmEvent::Behaviour(MeshBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                message,
                propagation_source,
                ..
            })) => {
                if message.topic == self.control_topic {
                    match MeshMessage::decode(&message.data) {
                        Ok(msg) => self.handle_control(msg, event_tx).await,
                        Err(e) => warn!("Bad control message from {}: {}", propagation_source, e),
                    }
                } else if let Some(topic) = self.topics.get(&message.topic) {
                    let delivered = self.subscribers.deliver(topic, &message.data);
                    debug!(
                        "Delta from {} on {} ({} bytes) to {} subscriber(s)",
                        propagation_source,
                        topic,
                        message.data.len(),
                        delivered
                    );
                }
            }

            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!("Connection established: {}", peer_id);
                if peer_id != self.peer_id {
                    self.known_peers.insert(peer_id);
                }
            }

            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!("Connection closed: {}", peer_id);
            }

            _ => {}
        }
    }

    async fn handle_control(&mut self, msg: MeshMessage, event_tx: &mpsc::Sender<NodeEvent>) {
        match msg {
            MeshMessage::Announce(announcement) => {
                if announcement.node_id == self.node_id {
                    return;
                }
                let is_new = !self.known_nodes.contains_key(&announcement.node_id);
                self.known_nodes
                    .insert(announcement.node_id.clone(), announcement.clone());
                if is_new {
                    info!(
                        "Node announced: {} ({})",
                        announcement.node_id, announcement.capability
                    );
                    let _ = event_tx.send(NodeEvent::NodeAnnounced(announcement)).await;
                }
            }

            MeshMessage::Leave { node_id } => {
                if self.known_nodes.remove(&node_id).is_some() {
                    info!("Node left: {}", node_id);
                    let _ = event_tx.send(NodeEvent::NodeLeft { node_id }).await;
                }
            }
        }
    }
}
