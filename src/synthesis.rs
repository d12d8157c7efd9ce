//! Merging of parallel agent outputs into one state

use crate::mesh::AgentAction;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Heuristic consistency score for a non-empty merge
const MERGE_CONFIDENCE: f32 = 0.88;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub synthesized_state: String,
    pub confidence_score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisController;

impl SynthesisController {
    pub fn new() -> Self {
        Self
    }

    pub fn synthesize(&self, goal: &str, actions: &[AgentAction]) -> Synthesis {
        let agents: Vec<&str> = actions.iter().map(|a| a.agent_id.as_str()).collect();
        info!("Merging outputs from {:?} for goal: {}", agents, goal);

        let fragments: Vec<String> = actions
            .iter()
            .map(|a| format!("[{}: {}]", a.agent_id, a.reasoning_chain))
            .collect();

        Synthesis {
            synthesized_state: format!("Merged State: {}", fragments.join(" ")),
            confidence_score: if actions.is_empty() {
                0.0
            } else {
                MERGE_CONFIDENCE
            },
        }
    }
}
