//! Engine configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Overrides passed to `CoreEngine::initialize` / `update_config`
//! 2. A YAML config file loaded by the host (`EngineConfig::from_file`)
//! 3. Defaults
//!
//! The config is owned by the engine instance; there is no process-wide
//! cached copy, so multiple engines with different settings can coexist.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Tunable settings recognized by the core engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Active-pipeline threshold used for health derivation (default: 5).
    /// Observational only; the engine does not throttle admissions.
    #[serde(default = "default_max_concurrent_pipelines")]
    pub max_concurrent_pipelines: usize,

    /// Advisory global timeout in milliseconds (default: 60000).
    #[serde(default = "default_global_timeout_ms")]
    pub global_timeout_ms: u64,

    /// Verbose metrics logging from the health monitor (default: false).
    #[serde(default)]
    pub debug: bool,

    /// Gates the periodic health-monitor task (default: true).
    #[serde(default = "default_collect_metrics")]
    pub collect_metrics: bool,

    /// Health monitor tick interval in seconds (default: 30).
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,

    /// Event bus history bound (default: 100).
    #[serde(default = "default_max_event_history")]
    pub max_event_history: usize,
}

fn default_max_concurrent_pipelines() -> usize {
    5
}
fn default_global_timeout_ms() -> u64 {
    60_000
}
fn default_collect_metrics() -> bool {
    true
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_max_event_history() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pipelines: default_max_concurrent_pipelines(),
            global_timeout_ms: default_global_timeout_ms(),
            debug: false,
            collect_metrics: default_collect_metrics(),
            health_check_interval_secs: default_health_check_interval(),
            max_event_history: default_max_event_history(),
        }
    }
}

impl EngineConfig {
    /// Load a config from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a config from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse engine config YAML")
    }

    /// Merge the set fields of `overrides` into this config.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(max) = overrides.max_concurrent_pipelines {
            self.max_concurrent_pipelines = max;
        }
        if let Some(timeout) = overrides.global_timeout_ms {
            self.global_timeout_ms = timeout;
        }
        if let Some(debug) = overrides.debug {
            self.debug = debug;
        }
        if let Some(collect) = overrides.collect_metrics {
            self.collect_metrics = collect;
        }
        if let Some(interval) = overrides.health_check_interval_secs {
            self.health_check_interval_secs = interval;
        }
        if let Some(history) = overrides.max_event_history {
            self.max_event_history = history;
        }
    }
}

/// Partial config accepted by `initialize` and `update_config`.
///
/// Unset fields leave the current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub max_concurrent_pipelines: Option<usize>,
    pub global_timeout_ms: Option<u64>,
    pub debug: Option<bool>,
    pub collect_metrics: Option<bool>,
    pub health_check_interval_secs: Option<u64>,
    pub max_event_history: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();

        assert_eq!(config.max_concurrent_pipelines, 5);
        assert_eq!(config.global_timeout_ms, 60_000);
        assert!(!config.debug);
        assert!(config.collect_metrics);
        assert_eq!(config.health_check_interval_secs, 30);
        assert_eq!(config.max_event_history, 100);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml(
            r#"
max_concurrent_pipelines: 8
debug: true
"#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_pipelines, 8);
        assert!(config.debug);
        // Unspecified fields fall back to defaults
        assert_eq!(config.global_timeout_ms, 60_000);
        assert_eq!(config.max_event_history, 100);
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("engine.yaml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
max_concurrent_pipelines: 12
collect_metrics: false
max_event_history: 50
"#
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_concurrent_pipelines, 12);
        assert!(!config.collect_metrics);
        assert_eq!(config.max_event_history, 50);
    }

    #[test]
    fn test_from_file_missing() {
        let temp = TempDir::new().unwrap();
        let result = EngineConfig::from_file(&temp.path().join("nope.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = EngineConfig::default();

        config.apply(&ConfigOverrides {
            max_concurrent_pipelines: Some(10),
            debug: Some(true),
            ..Default::default()
        });

        assert_eq!(config.max_concurrent_pipelines, 10);
        assert!(config.debug);
        // Untouched fields keep their values
        assert_eq!(config.health_check_interval_secs, 30);
        assert!(config.collect_metrics);
    }
}
