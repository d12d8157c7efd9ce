//! Hardware-aware task routing
//!
//! `ScheInfer` is built once from a [`HardwareProfile`] and never re-queries
//! the hardware. Routing is a fixed priority list with no randomness, so the
//! same profile always yields the same target for the same input.

use crate::error::{MeshError, Result};
use crate::utils::format_size;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Compute tier at or above which an accelerator is the primary path
pub const PRIMARY_TIER: u32 = 70;
/// Compute tier at or above which an accelerator is usable as a secondary path
pub const SECONDARY_TIER: u32 = 60;
/// Layers below this index are compute-heavy and prefer the accelerator
pub const ACCELERATED_LAYERS: usize = 16;

const MAX_TIER: u32 = 100;

/// Detected accelerator device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorInfo {
    pub name: String,
    /// Compute capability times ten (8.6 -> 86)
    pub compute_tier: u32,
}

/// Static description of a node's cache and accelerator capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareProfile {
    cache_threshold: u64,
    accelerator: Option<AcceleratorInfo>,
    vector_tier: bool,
}

impl HardwareProfile {
    pub fn new(
        cache_threshold: u64,
        accelerator: Option<AcceleratorInfo>,
        vector_tier: bool,
    ) -> Result<Self> {
        if cache_threshold == 0 {
            return Err(MeshError::invalid("cache threshold must be positive"));
        }
        if let Some(acc) = &accelerator {
            if acc.name.trim().is_empty() {
                return Err(MeshError::invalid("accelerator name must not be empty"));
            }
            if acc.compute_tier > MAX_TIER {
                return Err(MeshError::invalid(format!(
                    "compute tier {} out of range 0..={}",
                    acc.compute_tier, MAX_TIER
                )));
            }
        }

        Ok(Self {
            cache_threshold,
            accelerator,
            vector_tier,
        })
    }

    pub fn cache_threshold(&self) -> u64 {
        self.cache_threshold
    }

    pub fn accelerator(&self) -> Option<&AcceleratorInfo> {
        self.accelerator.as_ref()
    }

    pub fn primary_accelerator_available(&self) -> bool {
        self.accelerator
            .as_ref()
            .is_some_and(|a| a.compute_tier >= PRIMARY_TIER)
    }

    pub fn secondary_accelerator_available(&self) -> bool {
        self.accelerator
            .as_ref()
            .is_some_and(|a| (SECONDARY_TIER..PRIMARY_TIER).contains(&a.compute_tier))
    }

    pub fn vector_tier_available(&self) -> bool {
        self.vector_tier
    }
}

/// Execution path chosen for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionTarget {
    CacheResidentCpu,
    PrimaryAccelerator,
    SecondaryAccelerator,
    WideVectorCpu,
    BaselineCpu,
}

impl ExecutionTarget {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionTarget::CacheResidentCpu => "cache-resident CPU",
            ExecutionTarget::PrimaryAccelerator => "primary accelerator",
            ExecutionTarget::SecondaryAccelerator => "secondary accelerator",
            ExecutionTarget::WideVectorCpu => "wide-vector CPU",
            ExecutionTarget::BaselineCpu => "baseline CPU",
        }
    }

    pub fn is_accelerator(&self) -> bool {
        matches!(
            self,
            ExecutionTarget::PrimaryAccelerator | ExecutionTarget::SecondaryAccelerator
        )
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Static-policy router from task size or layer index to an execution target
#[derive(Debug, Clone)]
pub struct ScheInfer {
    profile: HardwareProfile,
}

impl ScheInfer {
    pub fn new(profile: HardwareProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &HardwareProfile {
        &self.profile
    }

    /// Pick the execution path for a tensor of `size_bytes`
    pub fn route_task(&self, size_bytes: u64) -> ExecutionTarget {
        let target = if size_bytes < self.profile.cache_threshold {
            ExecutionTarget::CacheResidentCpu
        } else if self.profile.primary_accelerator_available() {
            ExecutionTarget::PrimaryAccelerator
        } else if self.profile.secondary_accelerator_available() {
            ExecutionTarget::SecondaryAccelerator
        } else if self.profile.vector_tier_available() {
            ExecutionTarget::WideVectorCpu
        } else {
            ExecutionTarget::BaselineCpu
        };

        debug!("Task of {} routed to {}", format_size(size_bytes), target);
        target
    }

    /// Early layers are compute-heavy, late layers latency-sensitive
    pub fn route_layer(&self, layer_index: usize) -> ExecutionTarget {
        if layer_index < ACCELERATED_LAYERS && self.profile.primary_accelerator_available() {
            ExecutionTarget::PrimaryAccelerator
        } else {
            ExecutionTarget::BaselineCpu
        }
    }

    /// Performance profile advertised to peers
    pub fn mesh_capability(&self) -> String {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut profile = format!("CPU:{} cores", cores);
        if self.profile.primary_accelerator_available() {
            profile.push_str(" | GPU:primary");
        } else if self.profile.secondary_accelerator_available() {
            profile.push_str(" | GPU:secondary");
        } else if self.profile.vector_tier_available() {
            profile.push_str(" | CPU:wide-vector");
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn gpu(tier: u32) -> Option<AcceleratorInfo> {
        Some(AcceleratorInfo {
            name: "NVIDIA GeForce RTX 3070 Laptop GPU".into(),
            compute_tier: tier,
        })
    }

    fn router(accelerator: Option<AcceleratorInfo>, vector: bool) -> ScheInfer {
        ScheInfer::new(HardwareProfile::new(16 * MIB, accelerator, vector).unwrap())
    }

    #[test]
    fn test_route_task_table() {
        struct Case {
            name: &'static str,
            accelerator: Option<AcceleratorInfo>,
            vector: bool,
            size: u64,
            expected: ExecutionTarget,
        }

        let cases = [
            Case {
                name: "small task on primary",
                accelerator: gpu(86),
                vector: false,
                size: MIB,
                expected: ExecutionTarget::CacheResidentCpu,
            },
            Case {
                name: "large task on primary",
                accelerator: gpu(86),
                vector: false,
                size: 32 * MIB,
                expected: ExecutionTarget::PrimaryAccelerator,
            },
            Case {
                name: "small task on secondary",
                accelerator: gpu(61),
                vector: false,
                size: MIB,
                expected: ExecutionTarget::CacheResidentCpu,
            },
            Case {
                name: "large task on secondary",
                accelerator: gpu(61),
                vector: false,
                size: 32 * MIB,
                expected: ExecutionTarget::SecondaryAccelerator,
            },
            Case {
                name: "large task with vector tier",
                accelerator: None,
                vector: true,
                size: 32 * MIB,
                expected: ExecutionTarget::WideVectorCpu,
            },
            Case {
                name: "large task on bare CPU",
                accelerator: None,
                vector: false,
                size: 32 * MIB,
                expected: ExecutionTarget::BaselineCpu,
            },
            Case {
                name: "weak accelerator falls through to vector tier",
                accelerator: gpu(52),
                vector: true,
                size: 32 * MIB,
                expected: ExecutionTarget::WideVectorCpu,
            },
        ];

        for case in cases {
            let got = router(case.accelerator, case.vector).route_task(case.size);
            assert_eq!(got, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn test_cache_boundary_is_exclusive() {
        let s = router(gpu(86), true);
        assert_eq!(s.route_task(16 * MIB - 1), ExecutionTarget::CacheResidentCpu);
        assert_eq!(s.route_task(16 * MIB), ExecutionTarget::PrimaryAccelerator);
    }

    #[test]
    fn test_labels() {
        let s = router(gpu(86), false);
        assert_eq!(s.route_task(MIB).label(), "cache-resident CPU");
        assert_eq!(s.route_task(32 * MIB).to_string(), "primary accelerator");
        assert_eq!(router(None, false).route_task(32 * MIB).label(), "baseline CPU");
    }

    #[test]
    fn test_route_is_deterministic() {
        let s = router(gpu(61), true);
        let first = s.route_task(64 * MIB);
        for _ in 0..100 {
            assert_eq!(s.route_task(64 * MIB), first);
        }
    }

    #[test]
    fn test_layer_partitioning() {
        let s = router(gpu(86), false);
        for layer in [0, 10, 15] {
            assert_eq!(s.route_layer(layer), ExecutionTarget::PrimaryAccelerator);
        }
        for layer in [16, 20, 30, 1000] {
            assert_eq!(s.route_layer(layer), ExecutionTarget::BaselineCpu);
        }
    }

    #[test]
    fn test_layer_partitioning_without_primary() {
        for s in [router(gpu(61), true), router(None, true)] {
            assert_eq!(s.route_layer(0), ExecutionTarget::BaselineCpu);
            assert_eq!(s.route_layer(20), ExecutionTarget::BaselineCpu);
        }
    }

    #[test]
    fn test_mesh_capability() {
        assert!(router(gpu(86), false).mesh_capability().ends_with("| GPU:primary"));
        assert!(router(gpu(61), false).mesh_capability().ends_with("| GPU:secondary"));
        assert!(router(None, true).mesh_capability().ends_with("| CPU:wide-vector"));

        let bare = router(None, false).mesh_capability();
        assert!(bare.starts_with("CPU:"));
        assert!(bare.ends_with("cores"));
    }

    #[test]
    fn test_invalid_profiles_rejected() {
        assert!(HardwareProfile::new(0, None, false).is_err());
        assert!(HardwareProfile::new(
            MIB,
            Some(AcceleratorInfo {
                name: " ".into(),
                compute_tier: 86
            }),
            false
        )
        .is_err());
        assert!(HardwareProfile::new(
            MIB,
            Some(AcceleratorInfo {
                name: "gpu".into(),
                compute_tier: 860
            }),
            false
        )
        .is_err());
    }
}
