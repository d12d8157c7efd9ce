//! Delta-broadcast contract
//!
//! State deltas are opaque byte payloads published under
//! `<namespace>.<agent_id>`. The core never looks inside a payload; delivery
//! is at-least-once, so subscribers must tolerate duplicates.

use crate::error::{MeshError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Namespace used when the configuration names none
pub const DEFAULT_NAMESPACE: &str = "mesh.kv_cache";

/// Topic carrying deltas for one agent
pub fn delta_topic(namespace: &str, agent_id: &str) -> Result<String> {
    if namespace.trim().is_empty() {
        return Err(MeshError::invalid("delta namespace must not be empty"));
    }
    if agent_id.trim().is_empty() {
        return Err(MeshError::invalid("agent id must not be empty"));
    }
    Ok(format!("{}.{}", namespace, agent_id))
}

/// Stream of payloads for one topic
#[derive(Debug)]
pub struct DeltaSubscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl DeltaSubscription {
    pub fn new(topic: String, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { topic, rx }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload, or `None` once the channel has shut down
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait DeltaBroadcaster: Send + Sync {
    fn namespace(&self) -> &str;

    async fn broadcast_delta(&self, agent_id: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, agent_id: &str) -> Result<DeltaSubscription>;
}

/// Topic → live subscriber sinks; closed sinks are dropped on publish
#[derive(Debug, Default)]
pub struct SubscriberTable {
    sinks: HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl SubscriberTable {
    /// Register a subscriber, first dropping any whose receiver is gone
    pub fn add(&mut self, topic: &str) -> DeltaSubscription {
        self.sinks.retain(|_, sinks| {
            sinks.retain(|sink| !sink.is_closed());
            !sinks.is_empty()
        });

        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.entry(topic.to_string()).or_default().push(tx);
        DeltaSubscription::new(topic.to_string(), rx)
    }

    /// Fan a payload out to every live subscriber; returns how many got it
    pub fn deliver(&mut self, topic: &str, payload: &[u8]) -> usize {
        let Some(sinks) = self.sinks.get_mut(topic) else {
            return 0;
        };
        sinks.retain(|sink| sink.send(payload.to_vec()).is_ok());
        let delivered = sinks.len();
        if sinks.is_empty() {
            self.sinks.remove(topic);
        }
        delivered
    }

    pub fn topics(&self) -> impl Iterator<Item = &String> {
        self.sinks.keys()
    }
}

/// In-process bus for single-node meshes and tests
#[derive(Debug)]
pub struct InMemoryDeltaBus {
    namespace: String,
    subscribers: Mutex<SubscriberTable>,
}

impl InMemoryDeltaBus {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subscribers: Mutex::new(SubscriberTable::default()),
        }
    }
}

impl Default for InMemoryDeltaBus {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

#[async_trait]
impl DeltaBroadcaster for InMemoryDeltaBus {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn broadcast_delta(&self, agent_id: &str, payload: Vec<u8>) -> Result<()> {
        let topic = delta_topic(&self.namespace, agent_id)?;
        let delivered = self.subscribers.lock().deliver(&topic, &payload);
        debug!(
            "Broadcast {} bytes on {} to {} subscriber(s)",
            payload.len(),
            topic,
            delivered
        );
        Ok(())
    }

    async fn subscribe(&self, agent_id: &str) -> Result<DeltaSubscription> {
        let topic = delta_topic(&self.namespace, agent_id)?;
        Ok(self.subscribers.lock().add(&topic))
    }
}
