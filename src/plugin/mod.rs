//! Pluggable units of work with an explicit lifecycle.
//!
//! A plugin moves through register → validate → load → initialize →
//! enable/disable → unregister, driven by the [`registry::PluginRegistry`].
//! Lifecycle hooks default to no-ops so simple plugins only implement
//! `metadata` and `execute`.

pub mod registry;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::PluginRegistry;

/// Identity and dependency declaration for a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Plugin name (unique key in the registry)
    pub name: String,

    /// Semantic version string
    pub version: String,

    /// Grouping key for `plugins_by_category`
    pub category: String,

    /// Names of plugins that must already be registered
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PluginMetadata {
    /// Create metadata with no dependencies
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            category: category.into(),
            dependencies: Vec::new(),
        }
    }

    /// Declare a dependency on another plugin
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// Per-plugin configuration held by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Whether the plugin should be enabled once registered (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Free-form plugin settings; the registry never interprets them
    #[serde(default)]
    pub settings: Value,
}

fn default_enabled() -> bool {
    true
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            settings: Value::Null,
        }
    }
}

/// Rolling call statistics for one plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginCallMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub average_execution_ms: f64,
}

impl PluginCallMetrics {
    pub(crate) fn record(&mut self, success: bool, duration_ms: u64) {
        let total_duration = self.average_execution_ms * self.total_calls as f64;
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }
        self.average_execution_ms = (total_duration + duration_ms as f64) / self.total_calls as f64;
    }
}

/// Registry-side status record for one plugin.
///
/// `healthy` flips to false on the first execution error and is not cleared
/// automatically; `reset_metrics` restores it together with the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatus {
    pub loaded: bool,
    pub enabled: bool,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub metrics: PluginCallMetrics,

    /// Plugin-reported detail from its `status` hook, attached on query
    pub details: Option<Value>,
}

impl PluginStatus {
    pub(crate) fn new() -> Self {
        Self {
            loaded: false,
            enabled: false,
            healthy: true,
            last_error: None,
            metrics: PluginCallMetrics::default(),
            details: None,
        }
    }
}

/// A registered unit of work.
///
/// Only `metadata` and `execute` are required; every lifecycle hook has a
/// no-op default. Hooks run at the documented points of the registry
/// lifecycle and abort the transition by returning an error.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Identity and dependency declaration
    fn metadata(&self) -> &PluginMetadata;

    /// Initial configuration stored by the registry at registration
    fn default_config(&self) -> PluginConfig {
        PluginConfig::default()
    }

    /// Perform this plugin's unit of work
    async fn execute(&self, input: Value) -> Result<Value>;

    /// Self-check during registration; `Ok(false)` aborts it
    async fn validate(&self) -> Result<bool> {
        Ok(true)
    }

    /// Runs before the plugin is added to the registry
    async fn on_load(&self) -> Result<()> {
        Ok(())
    }

    /// Runs after the plugin is added to the registry
    async fn on_initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Runs before the enabled flag flips on
    async fn on_enable(&self) -> Result<()> {
        Ok(())
    }

    /// Runs before the enabled flag flips off
    async fn on_disable(&self) -> Result<()> {
        Ok(())
    }

    /// Runs during unregistration, after the plugin is disabled
    async fn on_unload(&self) -> Result<()> {
        Ok(())
    }

    /// Optional plugin-specific status detail, surfaced by the registry's
    /// `status` query
    async fn status(&self) -> Option<Value> {
        None
    }
}
