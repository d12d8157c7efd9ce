//! Resolved node configuration
//!
//! Layers, lowest first: built-in defaults, the merged config files,
//! `MESH_*` environment variables, then command-line flags (applied by the
//! binary).

use crate::config_loader::{ConfigFile, Quantity};
use crate::delta::DEFAULT_NAMESPACE;
use crate::error::{MeshError, Result};
use crate::inference::MAX_LATENCY_SCALE;
use crate::mesh::{ResourceLimits, LOCK_TTL};
use crate::scheinfer::{AcceleratorInfo, HardwareProfile};
use crate::search::{DEFAULT_CAPACITY, DEFAULT_COLLECTIONS, REMOTE_TIMEOUT, THROTTLE_WINDOW};
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

pub const ENV_SEARCH_URL: &str = "MESH_SEARCH_URL";
pub const ENV_CORPUS_DIR: &str = "MESH_CORPUS_DIR";
pub const ENV_NAMESPACE: &str = "MESH_NAMESPACE";

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub namespace: String,
    pub latency_scale: f64,

    pub cache_threshold: u64,
    pub accelerator: Option<AcceleratorInfo>,
    pub vector_tier: bool,

    pub search_url: Option<String>,
    pub corpus_dir: Option<PathBuf>,
    pub collections: Vec<String>,
    pub search_timeout: Duration,
    pub max_results: u32,

    pub throttle_window: Duration,
    pub throttle_capacity: usize,

    pub lock_ttl: Duration,
    pub limits: ResourceLimits,

    pub memory_threshold: u64,
    pub cpu_threshold: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            latency_scale: 1.0,
            cache_threshold: 16 * MIB,
            accelerator: None,
            vector_tier: false,
            search_url: None,
            corpus_dir: None,
            collections: DEFAULT_COLLECTIONS.iter().map(|c| c.to_string()).collect(),
            search_timeout: REMOTE_TIMEOUT,
            max_results: 5,
            throttle_window: THROTTLE_WINDOW,
            throttle_capacity: DEFAULT_CAPACITY,
            lock_ttl: LOCK_TTL,
            limits: ResourceLimits::default(),
            memory_threshold: 800 * MIB,
            cpu_threshold: 70.0,
        }
    }
}

fn config_err(field: &str, err: MeshError) -> MeshError {
    MeshError::Config(format!("{}: {}", field, err))
}

fn bytes(field: &str, q: &Quantity) -> Result<u64> {
    q.to_bytes().map_err(|e| config_err(field, e))
}

fn duration(field: &str, q: &Quantity) -> Result<Duration> {
    q.to_duration().map_err(|e| config_err(field, e))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl NodeConfig {
    /// Defaults overlaid with a merged config file
    pub fn from_file(file: &ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ns) = file.namespace.clone().and_then(non_empty) {
            config.namespace = ns;
        }
        if let Some(scale) = file.latency_scale {
            config.latency_scale = scale;
        }

        if let Some(hw) = &file.hardware {
            if let Some(q) = &hw.cache_threshold {
                config.cache_threshold = bytes("hardware.cacheThreshold", q)?;
            }
            if hw.accelerator.is_some() {
                config.accelerator = hw.accelerator.clone();
            }
            if let Some(vector) = hw.vector_tier {
                config.vector_tier = vector;
            }
        }

        if let Some(search) = &file.search {
            if let Some(url) = search.url.clone().and_then(non_empty) {
                config.search_url = Some(url);
            }
            if let Some(dir) = search.corpus_dir.clone().and_then(non_empty) {
                config.corpus_dir = Some(PathBuf::from(dir));
            }
            if let Some(collections) = &search.collections {
                if !collections.is_empty() {
                    config.collections = collections.clone();
                }
            }
            if let Some(q) = &search.timeout {
                config.search_timeout = duration("search.timeout", q)?;
            }
            if let Some(max) = search.max_results {
                config.max_results = max;
            }
        }

        if let Some(throttle) = &file.throttle {
            if let Some(q) = &throttle.window {
                config.throttle_window = duration("throttle.window", q)?;
            }
            if let Some(capacity) = throttle.capacity {
                config.throttle_capacity = capacity;
            }
        }

        if let Some(q) = file.lock.as_ref().and_then(|l| l.ttl.as_ref()) {
            config.lock_ttl = duration("lock.ttl", q)?;
        }

        if let Some(limits) = &file.limits {
            if let Some(cpu) = limits.cpu_percent {
                config.limits.cpu_usage_percent = cpu;
            }
            if let Some(q) = &limits.memory {
                config.limits.memory_total_bytes = bytes("limits.memory", q)?;
            }
        }

        if let Some(roles) = &file.roles {
            if let Some(q) = &roles.memory_threshold {
                config.memory_threshold = bytes("roles.memoryThreshold", q)?;
            }
            if let Some(cpu) = roles.cpu_threshold {
                config.cpu_threshold = cpu;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply `MESH_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SEARCH_URL).and_then(non_empty) {
            self.search_url = Some(url);
        }
        if let Some(dir) = lookup(ENV_CORPUS_DIR).and_then(non_empty) {
            self.corpus_dir = Some(PathBuf::from(dir));
        }
        if let Some(ns) = lookup(ENV_NAMESPACE).and_then(non_empty) {
            self.namespace = ns;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(MeshError::Config("namespace must not be empty".into()));
        }
        if !self.latency_scale.is_finite()
            || !(0.0..=MAX_LATENCY_SCALE).contains(&self.latency_scale)
        {
            return Err(MeshError::Config(format!(
                "latencyScale must be within 0..={}, got {}",
                MAX_LATENCY_SCALE, self.latency_scale
            )));
        }
        if self.throttle_capacity == 0 {
            return Err(MeshError::Config("throttle.capacity must be positive".into()));
        }
        if self.lock_ttl.is_zero() {
            return Err(MeshError::Config("lock.ttl must be positive".into()));
        }
        for (field, value) in [
            ("limits.cpuPercent", self.limits.cpu_usage_percent),
            ("roles.cpuThreshold", self.cpu_threshold),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(MeshError::Config(format!(
                    "{} must be within 0..=100, got {}",
                    field, value
                )));
            }
        }
        Ok(())
    }

    pub fn hardware_profile(&self) -> Result<HardwareProfile> {
        HardwareProfile::new(self.cache_threshold, self.accelerator.clone(), self.vector_tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_loader::{HardwareSection, LockSection, SearchSection, ThrottleSection};
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::from_file(&ConfigFile::default()).unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.namespace, "mesh.kv_cache");
        assert_eq!(config.cache_threshold, 16 * MIB);
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.limits.memory_total_bytes, 512 * MIB);
        assert_eq!(config.collections, vec!["llama_research", "research_corpus"]);
    }

    #[test]
    fn test_file_values_resolve_units() {
        let file = ConfigFile {
            hardware: Some(HardwareSection {
                cache_threshold: Some(Quantity::Text("8MiB".into())),
                accelerator: Some(AcceleratorInfo {
                    name: "gpu0".into(),
                    compute_tier: 61,
                }),
                vector_tier: Some(true),
            }),
            throttle: Some(ThrottleSection {
                window: Some(Quantity::Text("250ms".into())),
                capacity: Some(16),
            }),
            lock: Some(LockSection {
                ttl: Some(Quantity::Number(5)),
            }),
            ..Default::default()
        };

        let config = NodeConfig::from_file(&file).unwrap();
        assert_eq!(config.cache_threshold, 8 * MIB);
        assert_eq!(config.throttle_window, Duration::from_millis(250));
        assert_eq!(config.throttle_capacity, 16);
        assert_eq!(config.lock_ttl, Duration::from_secs(5));

        let profile = config.hardware_profile().unwrap();
        assert!(profile.secondary_accelerator_available());
        assert!(profile.vector_tier_available());
    }

    #[test]
    fn test_bad_values_name_the_field() {
        let file = ConfigFile {
            search: Some(SearchSection {
                timeout: Some(Quantity::Text("soon".into())),
                ..Default::default()
            }),
            ..Default::default()
        };
        match NodeConfig::from_file(&file) {
            Err(MeshError::Config(msg)) => assert!(msg.contains("search.timeout")),
            other => panic!("expected config error, got {:?}", other),
        }

        let file = ConfigFile {
            latency_scale: Some(-1.0),
            ..Default::default()
        };
        assert!(NodeConfig::from_file(&file).is_err());
    }

    #[test]
    fn test_oversized_latency_scale_rejected() {
        let config = NodeConfig {
            latency_scale: 5000.0,
            ..Default::default()
        };
        match config.validate() {
            Err(MeshError::Config(msg)) => assert!(msg.contains("latencyScale")),
            other => panic!("expected config error, got {:?}", other),
        }

        let config = NodeConfig {
            latency_scale: MAX_LATENCY_SCALE,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            namespace: Some("from.file".into()),
            search: Some(SearchSection {
                url: Some("http://file/search".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut config = NodeConfig::from_file(&file).unwrap();

        let env: HashMap<&str, &str> = [
            (ENV_NAMESPACE, "from.env"),
            (ENV_CORPUS_DIR, "/srv/corpus"),
            (ENV_SEARCH_URL, "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.namespace, "from.env");
        assert_eq!(config.corpus_dir, Some(PathBuf::from("/srv/corpus")));
        // Blank values do not clear file settings
        assert_eq!(config.search_url.as_deref(), Some("http://file/search"));
    }

    #[test]
    fn test_invalid_hardware_profile_rejected() {
        let config = NodeConfig {
            cache_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.hardware_profile(),
            Err(MeshError::InvalidInput(_))
        ));
    }
}
