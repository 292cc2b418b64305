//! Plugin registration, lifecycle, and execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::bus::{topic, EventBus};
use crate::error::PluginError;

use super::{Plugin, PluginCallMetrics, PluginConfig, PluginMetadata, PluginStatus};

const SOURCE: &str = "plugin-registry";

/// Registry owning every plugin, its status record, and its config.
///
/// All mutation goes through the methods here; callers only ever receive
/// snapshots of status and config.
pub struct PluginRegistry {
    bus: Arc<EventBus>,
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    statuses: RwLock<HashMap<String, PluginStatus>>,
    configs: RwLock<HashMap<String, PluginConfig>>,
}

impl PluginRegistry {
    /// Create a registry publishing lifecycle events to `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            plugins: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a plugin, driving the full load lifecycle.
    ///
    /// Steps run sequentially: dependency check, `validate`, `on_load`,
    /// insertion (loaded=true), `on_initialize`, then `enable` if the
    /// plugin's config asks for it. A failure at any step aborts the
    /// registration and leaves the registry without the plugin; the
    /// `plugin.loaded` event fires only after every step succeeded.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let meta = plugin.metadata().clone();
        let name = meta.name.clone();

        // Fresh status record; inserted together with the plugin below so a
        // failed registration leaves no trace.
        let mut status = PluginStatus::new();

        {
            let plugins = self.plugins.read().await;
            if plugins.contains_key(&name) {
                warn!(plugin = %name, "overwriting existing plugin registration");
            }
            for dependency in &meta.dependencies {
                if !plugins.contains_key(dependency) {
                    return Err(PluginError::MissingDependency {
                        plugin: name,
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        match plugin.validate().await {
            Ok(true) => {}
            Ok(false) => return Err(PluginError::Validation { name }),
            Err(e) => {
                return Err(PluginError::Lifecycle {
                    name,
                    hook: "validate",
                    reason: e.to_string(),
                })
            }
        }

        plugin.on_load().await.map_err(|e| PluginError::Lifecycle {
            name: name.clone(),
            hook: "on_load",
            reason: e.to_string(),
        })?;

        let config = plugin.default_config();
        status.loaded = true;
        self.plugins
            .write()
            .await
            .insert(name.clone(), Arc::clone(&plugin));
        self.statuses.write().await.insert(name.clone(), status);
        self.configs.write().await.insert(name.clone(), config.clone());

        if let Err(e) = plugin.on_initialize().await {
            self.remove_entries(&name).await;
            return Err(PluginError::Lifecycle {
                name,
                hook: "on_initialize",
                reason: e.to_string(),
            });
        }

        if config.enabled {
            if let Err(e) = self.enable(&name).await {
                self.remove_entries(&name).await;
                return Err(e);
            }
        }

        info!(plugin = %name, version = %meta.version, "plugin registered");
        self.bus
            .emit_sync(
                topic::PLUGIN_LOADED,
                json!({
                    "plugin": name,
                    "version": meta.version,
                    "category": meta.category,
                }),
                SOURCE,
            )
            .await;

        Ok(())
    }

    /// Remove a plugin: disable it if needed, run `on_unload`, drop its
    /// status and config.
    ///
    /// An `on_unload` failure is logged but does not keep the plugin
    /// registered; a stuck hook must not wedge the registry.
    pub async fn unregister(&self, name: &str) -> Result<(), PluginError> {
        let plugin = self.get(name).await.ok_or_else(|| PluginError::Unknown {
            name: name.to_string(),
        })?;

        if self.is_enabled(name).await {
            self.disable(name).await?;
        }

        if let Err(e) = plugin.on_unload().await {
            warn!(plugin = %name, error = %e, "on_unload hook failed");
        }

        self.remove_entries(name).await;
        info!(plugin = %name, "plugin unregistered");
        Ok(())
    }

    /// Enable a plugin. A no-op if it is already enabled.
    ///
    /// `on_enable` runs before the flag flips; a hook failure leaves the
    /// plugin disabled and surfaces the error.
    pub async fn enable(&self, name: &str) -> Result<(), PluginError> {
        let plugin = self.get(name).await.ok_or_else(|| PluginError::Unknown {
            name: name.to_string(),
        })?;

        if self.is_enabled(name).await {
            debug!(plugin = %name, "plugin already enabled");
            return Ok(());
        }

        plugin.on_enable().await.map_err(|e| PluginError::Lifecycle {
            name: name.to_string(),
            hook: "on_enable",
            reason: e.to_string(),
        })?;

        if let Some(status) = self.statuses.write().await.get_mut(name) {
            status.enabled = true;
        }
        if let Some(config) = self.configs.write().await.get_mut(name) {
            config.enabled = true;
        }

        info!(plugin = %name, "plugin enabled");
        self.bus
            .emit_sync(topic::PLUGIN_ENABLED, json!({ "plugin": name }), SOURCE)
            .await;
        Ok(())
    }

    /// Disable a plugin. A no-op if it is already disabled.
    pub async fn disable(&self, name: &str) -> Result<(), PluginError> {
        let plugin = self.get(name).await.ok_or_else(|| PluginError::Unknown {
            name: name.to_string(),
        })?;

        if !self.is_enabled(name).await {
            debug!(plugin = %name, "plugin already disabled");
            return Ok(());
        }

        plugin
            .on_disable()
            .await
            .map_err(|e| PluginError::Lifecycle {
                name: name.to_string(),
                hook: "on_disable",
                reason: e.to_string(),
            })?;

        if let Some(status) = self.statuses.write().await.get_mut(name) {
            status.enabled = false;
        }
        if let Some(config) = self.configs.write().await.get_mut(name) {
            config.enabled = false;
        }

        info!(plugin = %name, "plugin disabled");
        self.bus
            .emit_sync(topic::PLUGIN_DISABLED, json!({ "plugin": name }), SOURCE)
            .await;
        Ok(())
    }

    /// Execute a plugin's unit of work.
    ///
    /// Unknown or disabled plugins are caller errors and do not touch the
    /// call metrics. Execution failures update metrics and health, emit a
    /// `plugin.error` event, and propagate to the caller.
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value, PluginError> {
        let plugin = self.get(name).await.ok_or_else(|| PluginError::Unknown {
            name: name.to_string(),
        })?;

        if !self.is_enabled(name).await {
            return Err(PluginError::Disabled {
                name: name.to_string(),
            });
        }

        let started = Instant::now();
        let result = plugin.execute(input).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                if let Some(status) = self.statuses.write().await.get_mut(name) {
                    status.metrics.record(true, duration_ms);
                }
                debug!(plugin = %name, duration_ms, "plugin call completed");
                Ok(output)
            }
            Err(e) => {
                let reason = e.to_string();
                if let Some(status) = self.statuses.write().await.get_mut(name) {
                    status.metrics.record(false, duration_ms);
                    status.healthy = false;
                    status.last_error = Some(reason.clone());
                }

                error!(plugin = %name, error = %reason, "plugin execution failed");
                self.bus
                    .emit_sync(
                        topic::PLUGIN_ERROR,
                        json!({ "plugin": name, "error": reason }),
                        SOURCE,
                    )
                    .await;

                Err(PluginError::Execution {
                    name: name.to_string(),
                    reason,
                })
            }
        }
    }

    /// Merge a partial config into a plugin's stored config.
    ///
    /// A recognized `enabled` key routes through `enable`/`disable` so the
    /// lifecycle hooks still run; `settings` keys are shallow-merged.
    /// Returns the updated config.
    pub async fn update_config(
        &self,
        name: &str,
        partial: Value,
    ) -> Result<PluginConfig, PluginError> {
        if !self.contains(name).await {
            return Err(PluginError::Unknown {
                name: name.to_string(),
            });
        }

        if let Some(enabled) = partial.get("enabled").and_then(Value::as_bool) {
            if enabled {
                self.enable(name).await?;
            } else {
                self.disable(name).await?;
            }
        }

        let mut configs = self.configs.write().await;
        let config = configs.get_mut(name).ok_or_else(|| PluginError::Unknown {
            name: name.to_string(),
        })?;

        if let Some(settings) = partial.get("settings") {
            merge_settings(&mut config.settings, settings);
        }

        debug!(plugin = %name, "plugin config updated");
        Ok(config.clone())
    }

    /// Zero a plugin's call metrics and restore its health flags.
    pub async fn reset_metrics(&self, name: &str) -> Result<(), PluginError> {
        let mut statuses = self.statuses.write().await;
        let status = statuses.get_mut(name).ok_or_else(|| PluginError::Unknown {
            name: name.to_string(),
        })?;

        status.metrics = PluginCallMetrics::default();
        status.healthy = true;
        status.last_error = None;
        Ok(())
    }

    /// Look up a plugin by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().await.get(name).cloned()
    }

    /// Metadata for every registered plugin.
    pub async fn all(&self) -> Vec<PluginMetadata> {
        self.plugins
            .read()
            .await
            .values()
            .map(|p| p.metadata().clone())
            .collect()
    }

    /// Metadata for every plugin in a category.
    pub async fn by_category(&self, category: &str) -> Vec<PluginMetadata> {
        self.plugins
            .read()
            .await
            .values()
            .map(|p| p.metadata().clone())
            .filter(|m| m.category == category)
            .collect()
    }

    /// Status snapshot for one plugin, with its `status` hook detail attached.
    pub async fn status(&self, name: &str) -> Option<PluginStatus> {
        let plugin = self.get(name).await?;
        let mut status = self.statuses.read().await.get(name).cloned()?;
        status.details = plugin.status().await;
        Some(status)
    }

    /// Status snapshots for every plugin (without the `status` hook detail).
    pub async fn all_statuses(&self) -> HashMap<String, PluginStatus> {
        self.statuses.read().await.clone()
    }

    /// Stored config snapshot for one plugin.
    pub async fn config(&self, name: &str) -> Option<PluginConfig> {
        self.configs.read().await.get(name).cloned()
    }

    /// Whether a plugin is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.plugins.read().await.contains_key(name)
    }

    /// Number of registered plugins.
    pub async fn count(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Number of currently enabled plugins.
    pub async fn enabled_count(&self) -> usize {
        self.statuses
            .read()
            .await
            .values()
            .filter(|s| s.enabled)
            .count()
    }

    async fn is_enabled(&self, name: &str) -> bool {
        self.statuses
            .read()
            .await
            .get(name)
            .map(|s| s.enabled)
            .unwrap_or(false)
    }

    async fn remove_entries(&self, name: &str) {
        self.plugins.write().await.remove(name);
        self.statuses.write().await.remove(name);
        self.configs.write().await.remove(name);
    }
}

/// Shallow merge: object keys overwrite, anything else replaces wholesale.
fn merge_settings(current: &mut Value, update: &Value) {
    match (current.as_object_mut(), update.as_object()) {
        (Some(target), Some(patch)) => {
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *current = update.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Uppercase {
        meta: PluginMetadata,
    }

    impl Uppercase {
        fn new(name: &str, category: &str) -> Arc<Self> {
            Arc::new(Self {
                meta: PluginMetadata::new(name, "0.1.0", category),
            })
        }
    }

    #[async_trait]
    impl Plugin for Uppercase {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            let text = input.as_str().unwrap_or_default();
            Ok(Value::String(text.to_uppercase()))
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = registry();
        registry
            .register(Uppercase::new("shout", "text"))
            .await
            .unwrap();

        assert!(registry.contains("shout").await);
        assert_eq!(registry.count().await, 1);
        assert_eq!(registry.enabled_count().await, 1);

        let output = registry
            .execute("shout", Value::String("hi".to_string()))
            .await
            .unwrap();
        assert_eq!(output, Value::String("HI".to_string()));

        let status = registry.status("shout").await.unwrap();
        assert!(status.loaded && status.enabled && status.healthy);
        assert_eq!(status.metrics.total_calls, 1);
        assert_eq!(status.metrics.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_rejected() {
        let registry = registry();
        let err = registry.execute("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::Unknown { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_disabled_plugin_is_rejected_without_metrics() {
        let registry = registry();
        registry
            .register(Uppercase::new("shout", "text"))
            .await
            .unwrap();
        registry.disable("shout").await.unwrap();

        let err = registry.execute("shout", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::Disabled { .. }));

        let status = registry.status("shout").await.unwrap();
        assert_eq!(status.metrics.total_calls, 0);
    }

    #[tokio::test]
    async fn test_by_category() {
        let registry = registry();
        registry
            .register(Uppercase::new("a", "text"))
            .await
            .unwrap();
        registry
            .register(Uppercase::new("b", "text"))
            .await
            .unwrap();
        registry
            .register(Uppercase::new("c", "audio"))
            .await
            .unwrap();

        assert_eq!(registry.by_category("text").await.len(), 2);
        assert_eq!(registry.by_category("audio").await.len(), 1);
        assert!(registry.by_category("video").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_config_merges_settings() {
        let registry = registry();
        registry
            .register(Uppercase::new("shout", "text"))
            .await
            .unwrap();

        let config = registry
            .update_config("shout", json!({ "settings": { "limit": 5 } }))
            .await
            .unwrap();
        assert_eq!(config.settings["limit"], 5);

        let config = registry
            .update_config("shout", json!({ "settings": { "mode": "loud" } }))
            .await
            .unwrap();
        assert_eq!(config.settings["limit"], 5);
        assert_eq!(config.settings["mode"], "loud");

        let config = registry
            .update_config("shout", json!({ "enabled": false }))
            .await
            .unwrap();
        assert!(!config.enabled);
        assert_eq!(registry.enabled_count().await, 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_everything() {
        let registry = registry();
        registry
            .register(Uppercase::new("shout", "text"))
            .await
            .unwrap();

        registry.unregister("shout").await.unwrap();
        assert!(!registry.contains("shout").await);
        assert!(registry.status("shout").await.is_none());
        assert!(registry.config("shout").await.is_none());

        let err = registry.unregister("shout").await.unwrap_err();
        assert!(matches!(err, PluginError::Unknown { .. }));
    }
}
