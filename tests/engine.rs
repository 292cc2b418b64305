//! Core Engine Integration Tests
//!
//! Covers health derivation under load, shutdown semantics, and the
//! aggregated metrics snapshot.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axle::{
    ConfigOverrides, CoreEngine, EngineConfig, ExecutionContext, Health, PipelineConfig, Plugin,
    PluginMetadata, Stage,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Stage that parks until released, signalling when it has started.
struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Stage for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn execute(&self, _ctx: &mut ExecutionContext) -> Result<Value> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(Value::Null)
    }
}

struct Echo {
    meta: PluginMetadata,
}

impl Echo {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            meta: PluginMetadata::new("echo", "1.0.0", "util"),
        })
    }
}

#[async_trait]
impl Plugin for Echo {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        Ok(input)
    }
}

#[tokio::test]
async fn test_health_unhealthy_when_not_running() {
    init_tracing();
    let engine = CoreEngine::default();

    let status = engine.status().await;
    assert!(!status.running);
    assert_eq!(status.health, Health::Unhealthy);
}

#[tokio::test]
async fn test_health_degrades_under_pipeline_load() {
    init_tracing();
    let engine = CoreEngine::new(EngineConfig {
        max_concurrent_pipelines: 1,
        collect_metrics: false,
        ..EngineConfig::default()
    });
    engine.initialize(None).await.unwrap();

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    engine
        .pipeline_manager()
        .register(PipelineConfig::new("held").with_stage(Arc::new(Gate {
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        })))
        .await;

    assert_eq!(engine.status().await.health, Health::Healthy);

    let manager = engine.pipeline_manager();
    let execution = tokio::spawn(async move { manager.execute("held", Value::Null, None).await });

    // One active execution out of max 1 exceeds the 80% threshold
    started.notified().await;
    let status = engine.status().await;
    assert_eq!(status.active_pipelines, 1);
    assert_eq!(status.health, Health::Degraded);

    let manager = engine.pipeline_manager();
    assert_eq!(manager.active_pipelines().await, vec!["held"]);
    assert_eq!(manager.registered_pipelines().await, vec!["held"]);

    release.notify_one();
    let result = execution.await.unwrap().unwrap();
    assert!(result.success);

    // Load drained; healthy again
    let status = engine.status().await;
    assert_eq!(status.active_pipelines, 0);
    assert_eq!(status.health, Health::Healthy);

    engine.shutdown().await;
    assert_eq!(engine.status().await.health, Health::Unhealthy);
}

#[tokio::test]
async fn test_shutdown_clears_bus_state() {
    init_tracing();
    let engine = CoreEngine::default();
    engine.initialize(None).await.unwrap();

    let bus = engine.event_bus();
    struct Noop;

    #[async_trait]
    impl axle::EventHandler for Noop {
        async fn handle(&self, _event: &axle::BusEvent) -> Result<()> {
            Ok(())
        }
    }

    bus.subscribe("evt", Arc::new(Noop)).await;
    bus.emit("evt", Value::Null, "tests").await;
    assert_eq!(bus.subscription_total().await, 1);
    assert_eq!(bus.history(None).await.len(), 1);

    engine.shutdown().await;

    assert_eq!(bus.subscription_total().await, 0);
    assert!(bus.history(None).await.is_empty());
    assert!(!engine.is_running());
}

#[tokio::test]
async fn test_metrics_snapshot_aggregates_components() {
    init_tracing();
    let engine = CoreEngine::new(EngineConfig {
        collect_metrics: false,
        ..EngineConfig::default()
    });
    engine.initialize(None).await.unwrap();

    struct AddOne;

    #[async_trait]
    impl Stage for AddOne {
        fn name(&self) -> &str {
            "add_one"
        }

        async fn execute(&self, ctx: &mut ExecutionContext) -> Result<Value> {
            Ok(json!(ctx.data.as_i64().unwrap_or(0) + 1))
        }
    }

    engine
        .pipeline_manager()
        .register(PipelineConfig::new("math").with_stage(Arc::new(AddOne)))
        .await;
    engine.plugin_registry().register(Echo::new()).await.unwrap();

    let result = engine.execute_pipeline("math", json!(1), None).await.unwrap();
    assert_eq!(result.data, Some(json!(2)));

    let output = engine.execute_plugin("echo", json!("ping")).await.unwrap();
    assert_eq!(output, json!("ping"));

    let snapshot = engine.metrics().await;
    assert_eq!(snapshot.health, Health::Healthy);
    assert_eq!(
        snapshot.pipelines.get("math").unwrap().total_executions,
        1
    );
    assert_eq!(
        snapshot.plugins.get("echo").unwrap().metrics.total_calls,
        1
    );
    assert!(snapshot.event_history_len > 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_status_counts_components() {
    init_tracing();
    let engine = CoreEngine::new(EngineConfig {
        collect_metrics: false,
        ..EngineConfig::default()
    });
    engine.initialize(None).await.unwrap();

    engine.plugin_registry().register(Echo::new()).await.unwrap();

    let status = engine.status().await;
    assert!(status.running);
    assert_eq!(status.loaded_plugins, 1);
    assert_eq!(status.active_pipelines, 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_update_config_is_live() {
    init_tracing();
    let engine = CoreEngine::default();
    engine.initialize(None).await.unwrap();

    engine
        .update_config(&ConfigOverrides {
            max_concurrent_pipelines: Some(50),
            debug: Some(true),
            ..Default::default()
        })
        .await;

    let config = engine.config().await;
    assert_eq!(config.max_concurrent_pipelines, 50);
    assert!(config.debug);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_engine_config_from_yaml_drives_bus_capacity() {
    init_tracing();
    let config = EngineConfig::from_yaml(
        r#"
max_event_history: 2
collect_metrics: false
"#,
    )
    .unwrap();

    let engine = CoreEngine::new(config);
    engine.initialize(None).await.unwrap();

    let bus = engine.event_bus();
    for n in 0..5 {
        bus.emit("tick", json!({ "n": n }), "tests").await;
    }
    assert_eq!(bus.history(None).await.len(), 2);

    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_survives_time_passing() {
    // The monitor task must keep ticking without panicking while the
    // engine is otherwise idle.
    let engine = CoreEngine::new(EngineConfig {
        health_check_interval_secs: 1,
        ..EngineConfig::default()
    });
    engine.initialize(None).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(engine.is_running());

    engine.shutdown().await;
    assert!(!engine.is_running());
}
