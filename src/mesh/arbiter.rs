//! Strategic lease lock and last-known-state cache

use crate::mesh::types::{AgentAction, AgentId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Lease length of the strategic lock
pub const LOCK_TTL: Duration = Duration::from_secs(30);

/// Result of a strategic lock request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// Caller now holds (or renewed) the lease
    Granted,
    /// Another agent holds a live lease
    Denied { holder: AgentId },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted)
    }
}

#[derive(Debug)]
struct Lease {
    holder: AgentId,
    acquired_at: Instant,
}

#[derive(Debug, Default)]
struct ArbiterState {
    lease: Option<Lease>,
    last_states: HashMap<AgentId, AgentAction>,
}

/// Global advisory lock over strategic decision-making
///
/// Requests never block or queue: a caller is granted or denied on the spot
/// and is expected to retry on its own schedule.
#[derive(Debug)]
pub struct Arbiter {
    state: Mutex<ArbiterState>,
    ttl: Duration,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::with_ttl(LOCK_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(ArbiterState::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Grant, renew, reclaim-and-grant, or deny the strategic lease
    pub fn request_strategic_lock(&self, agent_id: &str) -> LockOutcome {
        let mut state = self.state.lock();

        if let Some(lease) = &state.lease {
            if lease.holder != agent_id && lease.acquired_at.elapsed() > self.ttl {
                warn!(
                    "Reclaiming stale strategic lock from {} (expired after {:?})",
                    lease.holder, self.ttl
                );
                state.lease = None;
            }
        }

        match &state.lease {
            Some(lease) if lease.holder != agent_id => {
                info!(
                    "Strategic lock denied to {} (held by {})",
                    agent_id, lease.holder
                );
                LockOutcome::Denied {
                    holder: lease.holder.clone(),
                }
            }
            _ => {
                state.lease = Some(Lease {
                    holder: agent_id.to_string(),
                    acquired_at: Instant::now(),
                });
                info!("Strategic lock granted to {}", agent_id);
                LockOutcome::Granted
            }
        }
    }

    /// Free the strategic path; ignored unless `agent_id` is the holder
    pub fn release_lock(&self, agent_id: &str) {
        let mut state = self.state.lock();
        if state
            .lease
            .as_ref()
            .is_some_and(|lease| lease.holder == agent_id)
        {
            state.lease = None;
            info!("Strategic lock released by {}", agent_id);
        } else {
            debug!("Ignoring release from non-holder {}", agent_id);
        }
    }

    /// Current holder, stale or not
    pub fn holder(&self) -> Option<AgentId> {
        self.state.lock().lease.as_ref().map(|l| l.holder.clone())
    }

    /// Record the last known state of an agent for reconstitution
    pub fn save_state(&self, action: AgentAction) {
        let mut state = self.state.lock();
        state.last_states.insert(action.agent_id.clone(), action);
    }

    pub fn state(&self, agent_id: &str) -> Option<AgentAction> {
        self.state.lock().last_states.get(agent_id).cloned()
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}
