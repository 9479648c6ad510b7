//! Simulation configuration.
//!
//! Settings are stored as TOML. The CLI reads an explicit `--config` file;
//! embedders can use [`SimulationConfig::load_or_default`], which looks in the
//! platform config directory:
//!
//! - **Linux**: `~/.config/dev.hxyulin.rxvis-rs/simulation.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.rxvis-rs/simulation.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.rxvis-rs\simulation.toml`
//!
//! Every field has a default, so a partial file is valid.

use crate::error::{Result, RxVisError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.rxvis-rs";

/// Config filename
pub const CONFIG_FILE: &str = "simulation.toml";

/// Emissions produced by an `interval` (or periodic `timer`) without `count`
pub const DEFAULT_INTERVAL_COUNT: u64 = 5;

/// Virtual ticks between periodic emissions without `period`
pub const DEFAULT_INTERVAL_PERIOD: u64 = 1;

pub const DEFAULT_MAX_EXPAND_DEPTH: usize = 8;

pub const DEFAULT_MAX_GENERATE_ITERATIONS: usize = 1_000;

/// Maximum number of propagation steps in one run
pub const DEFAULT_STEP_LIMIT: u64 = 100_000;

pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Safety limits applied to the expression engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 10_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_function_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 1_000,
            max_map_size: 1_000,
        }
    }
}

/// Settings for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Disable elements with element-scoped structural errors instead of
    /// rejecting the whole graph.
    pub tolerate_partial_graphs: bool,

    pub default_interval_count: u64,

    pub default_interval_period: u64,

    /// Recursion cap for `expand` without `maxDepth`.
    pub max_expand_depth: usize,

    pub max_generate_iterations: usize,

    /// Guard against runaway graphs; the run is aborted when exceeded.
    pub step_limit: u64,

    pub script_limits: ScriptLimits,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tolerate_partial_graphs: false,
            default_interval_count: DEFAULT_INTERVAL_COUNT,
            default_interval_period: DEFAULT_INTERVAL_PERIOD,
            max_expand_depth: DEFAULT_MAX_EXPAND_DEPTH,
            max_generate_iterations: DEFAULT_MAX_GENERATE_ITERATIONS,
            step_limit: DEFAULT_STEP_LIMIT,
            script_limits: ScriptLimits::default(),
        }
    }
}

impl SimulationConfig {
    /// Load a config file. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RxVisError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| e.with_context(format!("Failed to load {}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RxVisError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load simulation config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RxVisError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| RxVisError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| RxVisError::Config(format!("Failed to write config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_interval_period == 0 {
            return Err(RxVisError::Config(
                "default_interval_period must be at least 1".to_string(),
            ));
        }
        if self.step_limit == 0 {
            return Err(RxVisError::Config("step_limit must be at least 1".to_string()));
        }
        if self.max_expand_depth == 0 {
            return Err(RxVisError::Config(
                "max_expand_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
