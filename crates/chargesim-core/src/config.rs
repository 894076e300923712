//! # Core Configuration
//!
//! Tuning knobs for the scenario executor and the meter value scheduler.
//! Defaults match the documented timing contract; embedders can deserialize
//! overrides from their own configuration files.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the simulation core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Scenario executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Meter scheduler settings
    #[serde(default)]
    pub meter: MeterConfig,
}

/// Scenario executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Cadence of delay/timeout countdown notifications in milliseconds
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: default_progress_tick_ms(),
        }
    }
}

/// Meter scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Lower bound for increment strategy intervals in seconds
    #[serde(default = "default_min_increment_interval_secs")]
    pub min_increment_interval_secs: u64,
    /// Lower bound for auto-derived curve tick intervals in seconds
    #[serde(default = "default_auto_tick_min_secs")]
    pub auto_tick_min_secs: u64,
    /// Upper bound for auto-derived curve tick intervals in seconds
    #[serde(default = "default_auto_tick_max_secs")]
    pub auto_tick_max_secs: u64,
    /// Target number of samples across a curve's time span
    #[serde(default = "default_auto_tick_target_samples")]
    pub auto_tick_target_samples: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            min_increment_interval_secs: default_min_increment_interval_secs(),
            auto_tick_min_secs: default_auto_tick_min_secs(),
            auto_tick_max_secs: default_auto_tick_max_secs(),
            auto_tick_target_samples: default_auto_tick_target_samples(),
        }
    }
}

fn default_progress_tick_ms() -> u64 {
    250
}

fn default_min_increment_interval_secs() -> u64 {
    1
}

fn default_auto_tick_min_secs() -> u64 {
    5
}

fn default_auto_tick_max_secs() -> u64 {
    60
}

fn default_auto_tick_target_samples() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.executor.progress_tick_ms, 250);
        assert_eq!(config.meter.min_increment_interval_secs, 1);
        assert_eq!(config.meter.auto_tick_min_secs, 5);
        assert_eq!(config.meter.auto_tick_max_secs, 60);
        assert_eq!(config.meter.auto_tick_target_samples, 100);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"executor": {"progress_tick_ms": 100}}"#).unwrap();
        assert_eq!(config.executor.progress_tick_ms, 100);
        assert_eq!(config.meter.auto_tick_target_samples, 100);
    }
}
