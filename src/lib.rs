//! axle - in-process coordination core
//!
//! A staged pipeline executor, a plugin lifecycle registry, and a
//! publish/subscribe event bus, unified by a coordinating engine.
//!
//! # Architecture
//!
//! Components compose bottom-up:
//! - The [`bus::EventBus`] is shared infrastructure every component
//!   publishes lifecycle events into
//! - The [`pipeline::PipelineManager`] executes named stage sequences with
//!   per-stage validation, timeout, retry, and rollback
//! - The [`plugin::PluginRegistry`] drives plugins through an explicit
//!   lifecycle with dependency checks and call metrics
//! - The [`engine::CoreEngine`] owns configuration, health monitoring, and
//!   aggregated status; it is the only type hosts need to hold
//!
//! # Usage
//!
//! ```no_run
//! use axle::{CoreEngine, EngineConfig, PipelineConfig};
//! use serde_json::json;
//!
//! # async fn run(stage: std::sync::Arc<dyn axle::Stage>) -> anyhow::Result<()> {
//! let engine = CoreEngine::new(EngineConfig::default());
//! engine.initialize(None).await?;
//!
//! engine
//!     .pipeline_manager()
//!     .register(PipelineConfig::new("ingest").with_stage(stage))
//!     .await;
//!
//! let result = engine
//!     .execute_pipeline("ingest", json!({ "path": "notes.md" }), None)
//!     .await?;
//! assert!(result.success);
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod plugin;

// Re-export main types at crate root for convenience
pub use bus::{topic, BusEvent, EventBus, EventHandler, Subscription};
pub use config::{ConfigOverrides, EngineConfig};
pub use engine::{CoreEngine, EngineSnapshot, EngineStatus, Health};
pub use error::{EngineError, PipelineError, PluginError};
pub use pipeline::{
    ExecutionContext, PipelineConfig, PipelineManager, PipelineMetrics, PipelineResult, Stage,
};
pub use plugin::{Plugin, PluginConfig, PluginMetadata, PluginRegistry, PluginStatus};
