// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Worker configuration: TOML file, environment overrides, defaults.
//!
//! # TOML Format
//! ```toml
//! pipeline_dir = "./pipelines"
//! reserved_memory = "1G"
//! batch_optimisations = true
//! gc_interval_secs = 30
//! idle_warning_secs = 1.0
//! idle_warning = true
//! ```
//!
//! Every field can also be overridden from the environment
//! (`BRIDGE_PIPELINE_DIR`, `BRIDGE_RESERVED_MEMORY`, ...), which is how
//! the worker process configures the bridge in production. An unparseable
//! environment value is logged and ignored rather than failing startup.

use crate::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// An accelerator-memory margin with human-readable parsing.
///
/// # Parsing
/// SI-style suffixes, case-insensitive: `"512M"`/`"512MB"`, `"1G"`/`"1GB"`,
/// `"2048K"`, a plain byte count, or `"0"` for no margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMargin {
    /// Margin in bytes.
    bytes: u64,
}

impl MemoryMargin {
    /// No reserved margin.
    pub fn none() -> Self {
        Self { bytes: 0 }
    }

    /// Creates a margin from a byte count.
    pub fn from_bytes(bytes: u64) -> Self {
        Self { bytes }
    }

    /// Creates a margin from megabytes.
    pub fn from_mb(mb: u64) -> Self {
        Self {
            bytes: mb * 1024 * 1024,
        }
    }

    /// Returns the margin in bytes.
    pub fn as_bytes(&self) -> u64 {
        self.bytes
    }

    /// Returns the margin in megabytes (truncated).
    pub fn as_mb(&self) -> u64 {
        self.bytes / (1024 * 1024)
    }

    /// Parses a human-readable margin string.
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BridgeError::Config(
                "empty memory margin string".to_string(),
            ));
        }

        let upper = s.to_uppercase();
        let (num, multiplier): (&str, u64) = if upper.ends_with("GB") {
            (&s[..s.len() - 2], 1024 * 1024 * 1024)
        } else if upper.ends_with('G') {
            (&s[..s.len() - 1], 1024 * 1024 * 1024)
        } else if upper.ends_with("MB") {
            (&s[..s.len() - 2], 1024 * 1024)
        } else if upper.ends_with('M') {
            (&s[..s.len() - 1], 1024 * 1024)
        } else if upper.ends_with("KB") {
            (&s[..s.len() - 2], 1024)
        } else if upper.ends_with('K') {
            (&s[..s.len() - 1], 1024)
        } else if upper.ends_with('B') {
            (&s[..s.len() - 1], 1)
        } else {
            (s, 1)
        };

        let value: u64 = num.trim().parse().map_err(|_| {
            BridgeError::Config(format!(
                "invalid memory margin: '{s}' — expected a number with an optional suffix (K, M, G)"
            ))
        })?;

        let bytes = value.checked_mul(multiplier).ok_or_else(|| {
            BridgeError::Config(format!("memory margin overflow: '{s}'"))
        })?;

        Ok(Self { bytes })
    }
}

impl fmt::Display for MemoryMargin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GB: u64 = 1024 * 1024 * 1024;
        const MB: u64 = 1024 * 1024;
        if self.bytes >= GB && self.bytes % GB == 0 {
            write!(f, "{} GB", self.bytes / GB)
        } else if self.bytes >= MB && self.bytes % MB == 0 {
            write!(f, "{} MB", self.bytes / MB)
        } else {
            write!(f, "{} B", self.bytes)
        }
    }
}

/// Configuration for the worker bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory of `pipeline_*.json` files.
    pub pipeline_dir: PathBuf,
    /// Accelerator memory to leave untouched (human-readable, e.g. `"1G"`).
    pub reserved_memory: String,
    /// Whether the engine's batch optimisations are enabled.
    #[serde(default = "default_true")]
    pub batch_optimisations: bool,
    /// Seconds between forced full garbage-collection passes.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
    /// Idle time (seconds) after which a newly arriving call logs a warning.
    #[serde(default = "default_idle_warning_secs")]
    pub idle_warning_secs: f64,
    /// Whether the idle warning is emitted at all.
    #[serde(default = "default_true")]
    pub idle_warning: bool,
}

fn default_true() -> bool {
    true
}

fn default_gc_interval() -> u64 {
    30
}

fn default_idle_warning_secs() -> f64 {
    1.0
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pipeline_dir: PathBuf::from("./pipelines"),
            reserved_memory: "0".to_string(),
            batch_optimisations: true,
            gc_interval_secs: default_gc_interval(),
            idle_warning_secs: default_idle_warning_secs(),
            idle_warning: true,
        }
    }
}

impl WorkerConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, BridgeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, BridgeError> {
        toml::from_str(toml_str)
            .map_err(|e| BridgeError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, BridgeError> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("TOML serialise error: {e}")))
    }

    /// Defaults plus any environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Applies `BRIDGE_*` environment overrides in place. Unparseable
    /// values are logged and ignored.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("BRIDGE_PIPELINE_DIR") {
            self.pipeline_dir = PathBuf::from(dir);
        }
        if let Ok(margin) = std::env::var("BRIDGE_RESERVED_MEMORY") {
            match MemoryMargin::parse(&margin) {
                Ok(_) => self.reserved_memory = margin,
                Err(e) => tracing::warn!("ignoring BRIDGE_RESERVED_MEMORY: {e}"),
            }
        }
        if let Ok(flag) = std::env::var("BRIDGE_BATCH_OPTIMISATIONS") {
            match parse_bool(&flag) {
                Some(enabled) => self.batch_optimisations = enabled,
                None => tracing::warn!("ignoring BRIDGE_BATCH_OPTIMISATIONS: '{flag}'"),
            }
        }
        if let Ok(secs) = std::env::var("BRIDGE_GC_INTERVAL_SECS") {
            match secs.parse() {
                Ok(secs) => self.gc_interval_secs = secs,
                Err(_) => tracing::warn!("ignoring BRIDGE_GC_INTERVAL_SECS: '{secs}'"),
            }
        }
        if let Ok(secs) = std::env::var("BRIDGE_IDLE_WARNING_SECS") {
            match secs.parse() {
                Ok(secs) => self.idle_warning_secs = secs,
                Err(_) => tracing::warn!("ignoring BRIDGE_IDLE_WARNING_SECS: '{secs}'"),
            }
        }
        if let Ok(flag) = std::env::var("BRIDGE_IDLE_WARNING") {
            match parse_bool(&flag) {
                Some(enabled) => self.idle_warning = enabled,
                None => tracing::warn!("ignoring BRIDGE_IDLE_WARNING: '{flag}'"),
            }
        }
    }

    /// Parses the reserved-memory string into a [`MemoryMargin`].
    pub fn parse_reserved_memory(&self) -> Result<MemoryMargin, BridgeError> {
        MemoryMargin::parse(&self.reserved_memory)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
