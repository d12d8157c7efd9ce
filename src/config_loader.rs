//! Config file loader with cascading support
//! Supports JSON, YAML, YML formats
//! Priority: explicit path > project-dir > home-dir > exe-dir

use crate::scheinfer::AcceleratorInfo;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_FILENAME: &str = ".agent-mesh.config";
const CONFIG_EXTENSIONS: &[&str] = &[".json", ".yml", ".yaml"];

/// A size or duration written either as a bare number or a unit string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(u64),
    Text(String),
}

impl Quantity {
    /// Bytes; bare numbers are bytes
    pub fn to_bytes(&self) -> crate::error::Result<u64> {
        match self {
            Quantity::Number(n) => Ok(*n),
            Quantity::Text(s) => crate::utils::parse_size(s),
        }
    }

    /// Duration; bare numbers are seconds
    pub fn to_duration(&self) -> crate::error::Result<std::time::Duration> {
        match self {
            Quantity::Number(n) => Ok(std::time::Duration::from_secs(*n)),
            Quantity::Text(s) => crate::utils::parse_duration(s),
        }
    }
}

/// Field-wise override merge; `other` takes precedence
pub trait Merge {
    fn merge(&mut self, other: Self);
}

fn take<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

fn merge_section<T: Merge>(dst: &mut Option<T>, src: Option<T>) {
    match (dst.as_mut(), src) {
        (Some(existing), Some(other)) => existing.merge(other),
        (None, Some(other)) => *dst = Some(other),
        (_, None) => {}
    }
}

/// Hardware telemetry, read once at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSection {
    #[serde(default)]
    pub cache_threshold: Option<Quantity>,
    #[serde(default)]
    pub accelerator: Option<AcceleratorInfo>,
    #[serde(default)]
    pub vector_tier: Option<bool>,
}

impl Merge for HardwareSection {
    fn merge(&mut self, other: Self) {
        take(&mut self.cache_threshold, other.cache_threshold);
        take(&mut self.accelerator, other.accelerator);
        take(&mut self.vector_tier, other.vector_tier);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSection {
    /// Remote search endpoint
    #[serde(default)]
    pub url: Option<String>,
    /// Directory scanned by the local fallback
    #[serde(default)]
    pub corpus_dir: Option<String>,
    #[serde(default)]
    pub collections: Option<Vec<String>>,
    #[serde(default)]
    pub timeout: Option<Quantity>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

impl Merge for SearchSection {
    fn merge(&mut self, other: Self) {
        take(&mut self.url, other.url);
        take(&mut self.corpus_dir, other.corpus_dir);
        take(&mut self.collections, other.collections);
        take(&mut self.timeout, other.timeout);
        take(&mut self.max_results, other.max_results);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleSection {
    #[serde(default)]
    pub window: Option<Quantity>,
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Merge for ThrottleSection {
    fn merge(&mut self, other: Self) {
        take(&mut self.window, other.window);
        take(&mut self.capacity, other.capacity);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSection {
    #[serde(default)]
    pub ttl: Option<Quantity>,
}

impl Merge for LockSection {
    fn merge(&mut self, other: Self) {
        take(&mut self.ttl, other.ttl);
    }
}

/// Limits handed out in the registration handshake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsSection {
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory: Option<Quantity>,
}

impl Merge for LimitsSection {
    fn merge(&mut self, other: Self) {
        take(&mut self.cpu_percent, other.cpu_percent);
        take(&mut self.memory, other.memory);
    }
}

/// Resource thresholds of the role state machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolesSection {
    #[serde(default)]
    pub memory_threshold: Option<Quantity>,
    #[serde(default)]
    pub cpu_threshold: Option<f64>,
}

impl Merge for RolesSection {
    fn merge(&mut self, other: Self) {
        take(&mut self.memory_threshold, other.memory_threshold);
        take(&mut self.cpu_threshold, other.cpu_threshold);
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Delta topic namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// Multiplier on simulated inference latency
    #[serde(default)]
    pub latency_scale: Option<f64>,
    #[serde(default)]
    pub hardware: Option<HardwareSection>,
    #[serde(default)]
    pub search: Option<SearchSection>,
    #[serde(default)]
    pub throttle: Option<ThrottleSection>,
    #[serde(default)]
    pub lock: Option<LockSection>,
    #[serde(default)]
    pub limits: Option<LimitsSection>,
    #[serde(default)]
    pub roles: Option<RolesSection>,
}

impl Merge for ConfigFile {
    fn merge(&mut self, other: ConfigFile) {
        take(&mut self.namespace, other.namespace);
        take(&mut self.latency_scale, other.latency_scale);
        merge_section(&mut self.hardware, other.hardware);
        merge_section(&mut self.search, other.search);
        merge_section(&mut self.throttle, other.throttle);
        merge_section(&mut self.lock, other.lock);
        merge_section(&mut self.limits, other.limits);
        merge_section(&mut self.roles, other.roles);
    }
}

/// Find config file in a directory (checks all supported extensions)
fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}{}", CONFIG_FILENAME, ext)))
        .find(|path| path.exists())
}

/// Parse a config file based on its extension
pub fn parse_config_file(filepath: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(filepath)
        .with_context(|| format!("Failed to read config file {:?}", filepath))?;
    let ext = filepath
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match ext {
        "json" => serde_json::from_str(&content).map_err(|e| anyhow!("JSON parse error: {}", e)),
        "yml" | "yaml" => {
            serde_yaml::from_str(&content).map_err(|e| anyhow!("YAML parse error: {}", e))
        }
        _ => Err(anyhow!("Unsupported config file extension: {}", ext)),
    }
}

/// Load config from a directory if it exists; broken files are skipped
fn load_config_from_dir(dir: &Path) -> ConfigFile {
    if let Some(filepath) = find_config_in_dir(dir) {
        match parse_config_file(&filepath) {
            Ok(config) => {
                debug!("Loaded config from: {:?}", filepath);
                return config;
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", filepath, e);
            }
        }
    }
    ConfigFile::default()
}

/// Directories searched, lowest priority first
fn cascade_dirs() -> Vec<PathBuf> {
    let mut dirs_found = Vec::new();

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            dirs_found.push(exe_dir.to_path_buf());
        }
    }

    if let Some(home_dir) = dirs::home_dir() {
        dirs_found.push(home_dir);
    }

    if let Ok(cwd) = std::env::current_dir() {
        dirs_found.push(cwd);
    }

    dirs_found
}

/// Merge configs from `dirs` in order, then the explicit file on top.
/// An explicit file that cannot be read or parsed is an error.
pub fn load_from(dirs: &[PathBuf], explicit: Option<&Path>) -> Result<ConfigFile> {
    let mut merged = ConfigFile::default();

    for dir in dirs {
        merged.merge(load_config_from_dir(dir));
    }

    if let Some(path) = explicit {
        let config = parse_config_file(path)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded explicit config from: {:?}", path);
        merged.merge(config);
    }

    Ok(merged)
}

/// Load configs from cascading locations and merge them
/// Priority (highest to lowest): explicit > cwd > home-dir > exe-dir
pub fn load_cascading_config(explicit: Option<&Path>) -> Result<ConfigFile> {
    load_from(&cascade_dirs(), explicit)
}
