//! Simulated hardware-aware inference
//!
//! No model runs here. A request is routed through [`ScheInfer`] and then
//! waits for a latency typical of the chosen path, racing the caller's
//! cancellation token.

use crate::error::{MeshError, Result};
use crate::scheinfer::{ExecutionTarget, ScheInfer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Largest accepted latency multiplier
pub const MAX_LATENCY_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub agent_id: String,
    pub prompt: String,
    /// Overrides the prompt length as the routing size when non-zero
    #[serde(default)]
    pub expected_kv_cache_bytes: u64,
}

impl InferenceRequest {
    pub fn new(agent_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            prompt: prompt.into(),
            expected_kv_cache_bytes: 0,
        }
    }

    /// Bytes the routing decision is based on
    pub fn data_size(&self) -> u64 {
        if self.expected_kv_cache_bytes > 0 {
            self.expected_kv_cache_bytes
        } else {
            self.prompt.len() as u64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    pub tokens_used: u32,
    pub target: ExecutionTarget,
    pub latency_ms: f32,
    pub throughput_gbs: f32,
    pub vector_tier_used: bool,
}

/// Simulated latency and throughput (GB/s) for an execution path
fn simulated_cost(target: ExecutionTarget) -> (Duration, f32) {
    match target {
        ExecutionTarget::WideVectorCpu => (Duration::from_millis(35), 12.5),
        // Includes host-to-device transfer overhead
        ExecutionTarget::PrimaryAccelerator | ExecutionTarget::SecondaryAccelerator => {
            (Duration::from_millis(120), 25.0)
        }
        ExecutionTarget::CacheResidentCpu | ExecutionTarget::BaselineCpu => {
            (Duration::from_millis(50), 8.2)
        }
    }
}

pub struct InferenceController {
    scheduler: Arc<ScheInfer>,
    latency_scale: f64,
}

impl InferenceController {
    pub fn new(scheduler: Arc<ScheInfer>) -> Self {
        Self {
            scheduler,
            latency_scale: 1.0,
        }
    }

    /// Multiply simulated latencies; 0 disables the wait
    pub fn with_latency_scale(mut self, scale: f64) -> Self {
        self.latency_scale = if scale.is_finite() {
            scale.clamp(0.0, MAX_LATENCY_SCALE)
        } else {
            1.0
        };
        self
    }

    pub async fn generate(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<InferenceResponse> {
        if cancel.is_cancelled() {
            return Err(MeshError::Cancelled);
        }

        let start = Instant::now();
        let size = request.data_size();
        let target = self.scheduler.route_task(size);

        info!(
            "Inference request from {}: {} bytes via {}",
            request.agent_id, size, target
        );

        let (latency, throughput) = simulated_cost(target);
        let latency = latency.mul_f64(self.latency_scale);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MeshError::Cancelled),
            _ = tokio::time::sleep(latency) => {}
        }

        let text = format!(
            "[Hardware: {}] Simulated response for: {}",
            target, request.prompt
        );
        let tokens_used = u32::try_from(text.len() / 4).unwrap_or(u32::MAX);

        Ok(InferenceResponse {
            text,
            tokens_used,
            target,
            latency_ms: start.elapsed().as_secs_f32() * 1000.0,
            throughput_gbs: throughput,
            vector_tier_used: target == ExecutionTarget::WideVectorCpu,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheinfer::{AcceleratorInfo, HardwareProfile};

    const MIB: u64 = 1024 * 1024;

    fn controller(accelerator: Option<AcceleratorInfo>, vector: bool) -> InferenceController {
        let profile = HardwareProfile::new(16 * MIB, accelerator, vector).unwrap();
        InferenceController::new(Arc::new(ScheInfer::new(profile)))
    }

    #[tokio::test]
    async fn test_small_prompt_stays_on_cpu() {
        let ctl = controller(None, true).with_latency_scale(0.0);
        let response = ctl
            .generate(&InferenceRequest::new("coder", "hello"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.target, ExecutionTarget::CacheResidentCpu);
        assert_eq!(
            response.text,
            "[Hardware: cache-resident CPU] Simulated response for: hello"
        );
        assert_eq!(response.tokens_used, response.text.len() as u32 / 4);
        assert_eq!(response.throughput_gbs, 8.2);
        assert!(!response.vector_tier_used);
    }

    #[tokio::test]
    async fn test_kv_cache_size_drives_routing() {
        let ctl = controller(None, true).with_latency_scale(0.0);
        let mut request = InferenceRequest::new("coder", "hello");
        request.expected_kv_cache_bytes = 64 * MIB;

        let response = ctl.generate(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(response.target, ExecutionTarget::WideVectorCpu);
        assert_eq!(response.throughput_gbs, 12.5);
        assert!(response.vector_tier_used);
    }

    #[tokio::test]
    async fn test_simulated_latency_is_observed() {
        let ctl = controller(None, false);
        let response = ctl
            .generate(&InferenceRequest::new("coder", "hi"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(response.latency_ms >= 50.0);
    }

    #[tokio::test]
    async fn test_cancellation_wins_the_race() {
        let accelerator = Some(AcceleratorInfo {
            name: "gpu".into(),
            compute_tier: 86,
        });
        let ctl = controller(accelerator, false).with_latency_scale(100.0);
        let mut request = InferenceRequest::new("coder", "long");
        request.expected_kv_cache_bytes = 64 * MIB;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = ctl.generate(&request, &cancel).await.unwrap_err();
        assert_eq!(err, MeshError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_data_size_prefers_kv_estimate() {
        let mut request = InferenceRequest::new("a", "12345");
        assert_eq!(request.data_size(), 5);
        request.expected_kv_cache_bytes = 42;
        assert_eq!(request.data_size(), 42);
    }
}
