//! Process-wide coordinator over the bus, pipeline manager, and plugin
//! registry.
//!
//! Hosts construct one engine per composition root, call `initialize` once,
//! then drive work through the component accessors. Nothing here is a
//! singleton; independent engines can coexist in one process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::{ConfigOverrides, EngineConfig};
use crate::error::EngineError;
use crate::pipeline::{PipelineManager, PipelineMetrics, PipelineResult};
use crate::plugin::{PluginRegistry, PluginStatus};

/// Coarse engine health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Threshold heuristic over running state and active-pipeline load.
///
/// Observational only; the engine never throttles admissions based on it.
fn derive_health(running: bool, active_pipelines: usize, max_concurrent: usize) -> Health {
    if !running {
        Health::Unhealthy
    } else if active_pipelines as f64 > 0.8 * max_concurrent as f64 {
        Health::Degraded
    } else {
        Health::Healthy
    }
}

/// Point-in-time status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub active_pipelines: usize,
    pub loaded_plugins: usize,
    pub active_subscriptions: usize,
    pub health: Health,
}

/// Aggregated metrics snapshot across all components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub uptime_ms: u64,
    pub health: Health,
    pub pipelines: HashMap<String, PipelineMetrics>,
    pub plugins: HashMap<String, PluginStatus>,
    pub event_history_len: usize,
    pub subscriptions: HashMap<String, usize>,
}

/// The coordination core's root object.
pub struct CoreEngine {
    config: Arc<RwLock<EngineConfig>>,
    bus: Arc<EventBus>,
    pipelines: Arc<PipelineManager>,
    plugins: Arc<PluginRegistry>,
    running: Arc<AtomicBool>,
    started_at: RwLock<Option<Instant>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CoreEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl CoreEngine {
    /// Construct an engine and wire its components together.
    pub fn new(config: EngineConfig) -> Self {
        let bus = Arc::new(EventBus::new(config.max_event_history));
        let pipelines = Arc::new(PipelineManager::new(Arc::clone(&bus)));
        let plugins = Arc::new(PluginRegistry::new(Arc::clone(&bus)));

        Self {
            config: Arc::new(RwLock::new(config)),
            bus,
            pipelines,
            plugins,
            running: Arc::new(AtomicBool::new(false)),
            started_at: RwLock::new(None),
            monitor: Mutex::new(None),
        }
    }

    /// Start the engine.
    ///
    /// Applies config overrides and spawns the periodic health monitor when
    /// `collect_metrics` is set. Calling this while already running is a
    /// warned no-op, not an error.
    pub async fn initialize(&self, overrides: Option<ConfigOverrides>) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            warn!("engine already initialized; ignoring");
            return Ok(());
        }

        if let Some(ref overrides) = overrides {
            self.apply_overrides(overrides).await;
        }

        let config = self.config.read().await.clone();

        *self.started_at.write().await = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);

        if config.collect_metrics {
            let handle = self.spawn_monitor(&config);
            *self.monitor.lock().await = Some(handle);
        }

        info!(
            max_concurrent_pipelines = config.max_concurrent_pipelines,
            collect_metrics = config.collect_metrics,
            "engine initialized"
        );
        Ok(())
    }

    /// Stop the engine: cancel the monitor, clear bus subscriptions and
    /// history, reset running state. Safe to call when not running.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("engine not running; shutdown is a no-op");
            return;
        }

        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }

        self.bus.clear_all_subscriptions().await;
        self.bus.clear_history().await;
        *self.started_at.write().await = None;

        info!("engine shut down");
    }

    /// Current status summary.
    pub async fn status(&self) -> EngineStatus {
        let running = self.running.load(Ordering::SeqCst);
        let active_pipelines = self.pipelines.active_count().await;
        let max_concurrent = self.config.read().await.max_concurrent_pipelines;

        EngineStatus {
            running,
            active_pipelines,
            loaded_plugins: self.plugins.count().await,
            active_subscriptions: self.bus.subscription_total().await,
            health: derive_health(running, active_pipelines, max_concurrent),
        }
    }

    /// Aggregated metrics snapshot across all components.
    pub async fn metrics(&self) -> EngineSnapshot {
        let running = self.running.load(Ordering::SeqCst);
        let active_pipelines = self.pipelines.active_count().await;
        let max_concurrent = self.config.read().await.max_concurrent_pipelines;

        EngineSnapshot {
            uptime_ms: self.uptime().await.as_millis() as u64,
            health: derive_health(running, active_pipelines, max_concurrent),
            pipelines: self.pipelines.all_metrics().await,
            plugins: self.plugins.all_statuses().await,
            event_history_len: self.bus.history(None).await.len(),
            subscriptions: self.bus.subscription_counts().await,
        }
    }

    /// Execute a pipeline through the engine.
    pub async fn execute_pipeline(
        &self,
        name: &str,
        input: Value,
        user: Option<String>,
    ) -> Result<PipelineResult, EngineError> {
        Ok(self.pipelines.execute(name, input, user).await?)
    }

    /// Execute a plugin through the engine.
    pub async fn execute_plugin(&self, name: &str, input: Value) -> Result<Value, EngineError> {
        Ok(self.plugins.execute(name, input).await?)
    }

    /// The shared event bus.
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// The pipeline manager.
    pub fn pipeline_manager(&self) -> Arc<PipelineManager> {
        Arc::clone(&self.pipelines)
    }

    /// The plugin registry.
    pub fn plugin_registry(&self) -> Arc<PluginRegistry> {
        Arc::clone(&self.plugins)
    }

    /// Merge overrides into the live config.
    pub async fn update_config(&self, overrides: &ConfigOverrides) {
        self.apply_overrides(overrides).await;
        info!("engine config updated");
    }

    /// Snapshot of the current config.
    pub async fn config(&self) -> EngineConfig {
        self.config.read().await.clone()
    }

    /// Whether `initialize` has run and `shutdown` has not.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Time since `initialize`; zero when not running.
    pub async fn uptime(&self) -> Duration {
        self.started_at
            .read()
            .await
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    async fn apply_overrides(&self, overrides: &ConfigOverrides) {
        let mut config = self.config.write().await;
        config.apply(overrides);
        self.bus.set_max_history(config.max_event_history).await;
    }

    fn spawn_monitor(&self, config: &EngineConfig) -> JoinHandle<()> {
        let interval_secs = config.health_check_interval_secs.max(1);
        let running = Arc::clone(&self.running);
        let engine_config = Arc::clone(&self.config);
        let pipelines = Arc::clone(&self.pipelines);
        let plugins = Arc::clone(&self.plugins);
        let bus = Arc::clone(&self.bus);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            // The first tick fires immediately; skip it so checks start one
            // interval after initialize.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let config = engine_config.read().await.clone();
                let active = pipelines.active_count().await;
                let health = derive_health(
                    running.load(Ordering::SeqCst),
                    active,
                    config.max_concurrent_pipelines,
                );

                match health {
                    Health::Healthy => debug!(active, "health check"),
                    Health::Degraded | Health::Unhealthy => {
                        warn!(%health, active, "health check")
                    }
                }

                if config.debug {
                    let pipeline_metrics = pipelines.all_metrics().await;
                    let plugin_statuses = plugins.all_statuses().await;
                    let history_len = bus.history(None).await.len();
                    debug!(
                        pipelines = ?pipeline_metrics,
                        plugins = ?plugin_statuses,
                        event_history_len = history_len,
                        "metrics snapshot"
                    );
                }
            }
        })
    }
}
