//! YAML-loadable configuration for speculation and the executor, validated
//! against its declared bounds at load time rather than left to fail later
//! inside the scheduler.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::collections::HashMap;

/// A configuration value that failed its declared bounds at load time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be in [{min}, {max}], got {value}")]
    OutOfRange { field: String, value: f64, min: f64, max: f64 },

    #[error("{field} must be >= {min}, got {value}")]
    BelowMinimum { field: String, value: i64, min: i64 },

    #[error("adaptive.max_threshold ({max}) must be > adaptive.min_threshold ({min})")]
    AdaptiveRangeInverted { min: f64, max: f64 },

    #[error("YAML parsing error: {0}")]
    YamlParse(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::YamlParse(e.to_string())
    }
}

/// Adaptive confidence-threshold bounds for the speculation cache. When
/// enabled, the threshold is allowed to drift between `min_threshold` and
/// `max_threshold` based on observed hit rate (the drift policy itself lives
/// with the caller; this type only carries and validates the bounds).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default)]
    pub enabled: bool,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

/// Speculation cache configuration as loaded from YAML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpeculationConfig {
    #[serde(default)]
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub max_concurrent_speculations: i64,
    pub speculation_timeout_ms: i64,
    #[serde(default)]
    pub adaptive: Option<AdaptiveConfig>,
}

const CONFIDENCE_RANGE: (f64, f64) = (0.40, 0.90);

impl SpeculationConfig {
    /// Validates every field against its declared bounds, returning the
    /// first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_confidence("confidence_threshold", self.confidence_threshold)?;

        if !(1..=10).contains(&self.max_concurrent_speculations) {
            return Err(ConfigError::OutOfRange {
                field: "max_concurrent_speculations".to_string(),
                value: self.max_concurrent_speculations as f64,
                min: 1.0,
                max: 10.0,
            });
        }

        if !(1..=300_000).contains(&self.speculation_timeout_ms) {
            return Err(ConfigError::OutOfRange {
                field: "speculation_timeout".to_string(),
                value: self.speculation_timeout_ms as f64,
                min: 1.0,
                max: 300_000.0,
            });
        }

        if let Some(adaptive) = &self.adaptive {
            validate_confidence("adaptive.min_threshold", adaptive.min_threshold)?;
            validate_confidence("adaptive.max_threshold", adaptive.max_threshold)?;
            if adaptive.max_threshold <= adaptive.min_threshold {
                return Err(ConfigError::AdaptiveRangeInverted {
                    min: adaptive.min_threshold,
                    max: adaptive.max_threshold,
                });
            }
        }

        Ok(())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_confidence(field: &str, value: f64) -> Result<(), ConfigError> {
    if value < CONFIDENCE_RANGE.0 || value > CONFIDENCE_RANGE.1 {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min: CONFIDENCE_RANGE.0,
            max: CONFIDENCE_RANGE.1,
        });
    }
    Ok(())
}

/// When the scheduler raises an agent-in-the-loop decision point between
/// layers: never, after every layer, or only after a layer that produced an
/// error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AilMode {
    #[default]
    Never,
    PerLayer,
    OnError,
}

/// Agent-in-the-loop gating: the cadence at which the scheduler pauses for
/// an agent `continue`/`abort` decision between layers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AilConfig {
    #[serde(default)]
    pub mode: AilMode,
}

/// When the scheduler raises a human-in-the-loop approval gate between
/// layers: never, after every layer, or only after a layer that produced an
/// error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HilMode {
    #[default]
    Never,
    Always,
    OnError,
}

/// Human-in-the-loop gating: the cadence at which the scheduler blocks for
/// an explicit human approval before continuing past a layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HilConfig {
    #[serde(default)]
    pub mode: HilMode,
}

/// Maximum number of tasks the scheduler may run concurrently within a
/// layer. `Unbounded` defers entirely to the layer's own width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxConcurrency {
    Unbounded,
    Bounded(u32),
}

/// Executor-level configuration as loaded from YAML.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: MaxConcurrency,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: i64,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub ail: AilConfig,
    #[serde(default)]
    pub hil: HilConfig,
    pub user_id: String,
}

fn default_max_concurrency() -> MaxConcurrency {
    MaxConcurrency::Unbounded
}

fn default_task_timeout_ms() -> i64 {
    30_000
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let MaxConcurrency::Bounded(n) = self.max_concurrency {
            if n < 1 {
                return Err(ConfigError::BelowMinimum {
                    field: "max_concurrency".to_string(),
                    value: n as i64,
                    min: 1,
                });
            }
        }
        if self.task_timeout_ms < 1 {
            return Err(ConfigError::BelowMinimum {
                field: "task_timeout_ms".to_string(),
                value: self.task_timeout_ms,
                min: 1,
            });
        }
        Ok(())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}

/// Host-populated key/value context merged into the argument resolver's
/// execution context at workflow start, kept alongside the executor config
/// so both load from the same file.
pub type HostContext = HashMap<String, serde_json::Value>;
