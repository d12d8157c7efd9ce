//! Utility functions

use crate::error::{MeshError, Result};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Parse a human-readable byte size ("16MiB", "512KiB", "2GiB", "4096")
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(MeshError::invalid("empty size"));
    }

    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| MeshError::invalid(format!("invalid size: {}", s)))?;

    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        other => {
            return Err(MeshError::invalid(format!(
                "unknown size unit '{}' in {}",
                other, s
            )))
        }
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| MeshError::invalid(format!("size overflows u64: {}", s)))
}

/// Parse a human-readable duration ("5s", "250ms", "1m"); plain numbers are seconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if let Ok(duration) = humantime::parse_duration(s) {
        return Ok(duration);
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(MeshError::invalid(format!("invalid duration format: {}", s)))
}

/// Render a byte count for log lines
pub fn format_size(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{} MB", bytes / MIB)
    } else {
        format!("{} KB", bytes / KIB)
    }
}
