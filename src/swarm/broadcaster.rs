//! Delta broadcaster backed by a running [`SwarmNode`]

use crate::delta::{delta_topic, DeltaBroadcaster, DeltaSubscription};
use crate::error::{MeshError, Result};
use crate::swarm::node::{NodeEvent, SwarmCommand, SwarmConfig, SwarmNode, SwarmStatus};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

const COMMAND_BUFFER: usize = 100;

fn node_gone() -> MeshError {
    MeshError::Broadcast("swarm node has shut down".to_string())
}

/// Cheap handle; clones talk to the same node
#[derive(Debug, Clone)]
pub struct SwarmDeltaBroadcaster {
    namespace: String,
    commands: mpsc::Sender<SwarmCommand>,
}

impl SwarmDeltaBroadcaster {
    pub fn new(namespace: impl Into<String>, commands: mpsc::Sender<SwarmCommand>) -> Self {
        Self {
            namespace: namespace.into(),
            commands,
        }
    }

    async fn send(&self, cmd: SwarmCommand) -> Result<()> {
        self.commands.send(cmd).await.map_err(|_| node_gone())
    }

    pub async fn status(&self) -> Result<SwarmStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::GetStatus { reply }).await?;
        rx.await.map_err(|_| node_gone())
    }

    pub async fn set_agent_count(&self, count: usize) -> Result<()> {
        self.send(SwarmCommand::SetAgentCount { count }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(SwarmCommand::Shutdown).await
    }
}

#[async_trait]
impl DeltaBroadcaster for SwarmDeltaBroadcaster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn broadcast_delta(&self, agent_id: &str, payload: Vec<u8>) -> Result<()> {
        let topic = delta_topic(&self.namespace, agent_id)?;
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::Publish {
            topic,
            payload,
            reply,
        })
        .await?;
        rx.await.map_err(|_| node_gone())?
    }

    async fn subscribe(&self, agent_id: &str) -> Result<DeltaSubscription> {
        let topic = delta_topic(&self.namespace, agent_id)?;
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::Subscribe { topic, reply }).await?;
        rx.await.map_err(|_| node_gone())?
    }
}

/// Start a swarm node on the runtime and hand back its broadcaster
pub fn spawn_swarm(
    config: SwarmConfig,
) -> anyhow::Result<(SwarmDeltaBroadcaster, mpsc::Receiver<NodeEvent>)> {
    let namespace = config.namespace.clone();
    let node = SwarmNode::new(config)?;

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(COMMAND_BUFFER);

    tokio::spawn(async move {
        if let Err(e) = node.run(cmd_rx, event_tx).await {
            error!("Swarm node stopped: {}", e);
        }
    });

    Ok((SwarmDeltaBroadcaster::new(namespace, cmd_tx), event_rx))
}
