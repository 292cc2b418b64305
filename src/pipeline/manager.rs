//! Pipeline registration and execution.
//!
//! Coordinates per-stage validation, timeout enforcement, retry handling,
//! rollback, metrics, and lifecycle event emission.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bus::{topic, EventBus};
use crate::error::PipelineError;

use super::context::{ExecutionContext, PipelineResult};
use super::definition::{PipelineConfig, Stage};

const SOURCE: &str = "pipeline-manager";

/// Aggregated execution statistics for one registered pipeline.
///
/// Updated exactly once per `execute` call, regardless of how many retry
/// attempts ran internally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl PipelineMetrics {
    fn record(&mut self, success: bool, duration_ms: u64) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.total_duration_ms += duration_ms;
        self.average_duration_ms = self.total_duration_ms as f64 / self.total_executions as f64;
        self.last_execution = Some(Utc::now());
    }
}

struct ActiveExecution {
    pipeline: String,
    started_at: DateTime<Utc>,
}

/// Registry and executor for named pipelines.
pub struct PipelineManager {
    bus: Arc<EventBus>,
    pipelines: RwLock<HashMap<String, PipelineConfig>>,
    metrics: RwLock<HashMap<String, PipelineMetrics>>,
    active: RwLock<HashMap<Uuid, ActiveExecution>>,
}

impl PipelineManager {
    /// Create a manager publishing lifecycle events to `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pipelines: RwLock::new(HashMap::new()),
            metrics: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Register a pipeline definition.
    ///
    /// Re-registering an existing name overwrites the previous definition
    /// (and resets its metrics); this is logged as a warning, not an error.
    pub async fn register(&self, config: PipelineConfig) {
        let name = config.name.clone();
        let mut pipelines = self.pipelines.write().await;

        if pipelines.contains_key(&name) {
            warn!(pipeline = %name, "overwriting existing pipeline definition");
        } else {
            info!(pipeline = %name, stages = config.stages.len(), "pipeline registered");
        }

        pipelines.insert(name.clone(), config);
        self.metrics
            .write()
            .await
            .insert(name, PipelineMetrics::default());
    }

    /// Remove a pipeline and its metrics. Returns false if it was unknown.
    pub async fn unregister(&self, name: &str) -> bool {
        let removed = self.pipelines.write().await.remove(name).is_some();
        if removed {
            self.metrics.write().await.remove(name);
            info!(pipeline = %name, "pipeline unregistered");
        }
        removed
    }

    /// Flip a registered pipeline's enabled flag.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), PipelineError> {
        let mut pipelines = self.pipelines.write().await;
        let config = pipelines.get_mut(name).ok_or_else(|| PipelineError::Unknown {
            name: name.to_string(),
        })?;
        config.enabled = enabled;
        info!(pipeline = %name, enabled, "pipeline enabled flag updated");
        Ok(())
    }

    /// Execute a registered pipeline.
    ///
    /// Unknown or disabled pipelines are configuration errors and return
    /// `Err` before any stage runs. Everything else resolves to
    /// `Ok(PipelineResult)`: stage failures are retried up to the
    /// configured attempt count and then folded into a failed result.
    #[instrument(skip(self, input, user), fields(pipeline = %name))]
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        user: Option<String>,
    ) -> Result<PipelineResult, PipelineError> {
        let config = {
            let pipelines = self.pipelines.read().await;
            pipelines
                .get(name)
                .cloned()
                .ok_or_else(|| PipelineError::Unknown {
                    name: name.to_string(),
                })?
        };

        if !config.enabled {
            return Err(PipelineError::Disabled {
                name: name.to_string(),
            });
        }

        let mut ctx = ExecutionContext::new(name, input.clone(), user);
        let execution_id = ctx.execution_id;
        let started = Instant::now();

        self.active.write().await.insert(
            execution_id,
            ActiveExecution {
                pipeline: name.to_string(),
                started_at: ctx.started_at,
            },
        );

        info!(%execution_id, "pipeline execution started");
        self.bus
            .emit_sync(
                topic::PIPELINE_STARTED,
                json!({ "pipeline": name, "execution_id": execution_id }),
                SOURCE,
            )
            .await;

        let attempts = config.retry_attempts.max(1);
        let mut stages_executed = Vec::new();
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            ctx.attempt = attempt;
            ctx.data = input.clone();
            stages_executed.clear();

            match self.run_stages(&config, &mut ctx, &mut stages_executed).await {
                Ok(output) => break Ok(output),
                Err(e) => {
                    warn!(%execution_id, attempt, error = %e, "pipeline attempt failed");
                    if attempt >= attempts {
                        break Err(e);
                    }
                    tokio::time::sleep(config.retry_delay()).await;
                }
            }
        };

        // The context leaves the active table no matter how execution ended.
        self.active.write().await.remove(&execution_id);

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(output) => {
                info!(%execution_id, duration_ms, "pipeline execution completed");
                self.bus
                    .emit_sync(
                        topic::PIPELINE_COMPLETED,
                        json!({
                            "pipeline": name,
                            "execution_id": execution_id,
                            "duration_ms": duration_ms,
                        }),
                        SOURCE,
                    )
                    .await;
                PipelineResult::completed(execution_id, output, duration_ms, stages_executed)
            }
            Err(error) => {
                warn!(%execution_id, duration_ms, error = %error, "pipeline execution failed");
                self.bus
                    .emit_sync(
                        topic::PIPELINE_FAILED,
                        json!({
                            "pipeline": name,
                            "execution_id": execution_id,
                            "duration_ms": duration_ms,
                            "error": error.to_string(),
                        }),
                        SOURCE,
                    )
                    .await;
                PipelineResult::failed(execution_id, error.to_string(), duration_ms, stages_executed)
            }
        };

        if let Some(metrics) = self.metrics.write().await.get_mut(name) {
            metrics.record(result.success, duration_ms);
        }

        Ok(result)
    }

    /// Run all stages for one attempt, rolling back on failure.
    async fn run_stages(
        &self,
        config: &PipelineConfig,
        ctx: &mut ExecutionContext,
        stages_executed: &mut Vec<String>,
    ) -> Result<Value, PipelineError> {
        let mut completed: Vec<Arc<dyn Stage>> = Vec::new();

        for stage in &config.stages {
            let stage_name = stage.name().to_string();
            ctx.current_stage = Some(stage_name.clone());
            let stage_started = Instant::now();

            match self.run_stage(config, stage.as_ref(), ctx).await {
                Ok(output) => {
                    ctx.data = output;
                    stages_executed.push(stage_name.clone());

                    let stage_duration_ms = stage_started.elapsed().as_millis() as u64;
                    debug!(stage = %stage_name, duration_ms = stage_duration_ms, "stage completed");
                    self.bus
                        .emit_sync(
                            topic::PIPELINE_STAGE_COMPLETED,
                            json!({
                                "pipeline": config.name,
                                "execution_id": ctx.execution_id,
                                "stage": stage_name,
                                "duration_ms": stage_duration_ms,
                            }),
                            SOURCE,
                        )
                        .await;

                    // Forward finalizer; runs again during rollback of a
                    // later failure, so stages must keep cleanup idempotent.
                    if let Err(e) = stage.cleanup(ctx).await {
                        warn!(stage = %stage_name, error = %e, "stage cleanup failed");
                    }

                    completed.push(Arc::clone(stage));
                }
                Err(error) => {
                    stage.on_error(&error, ctx).await;

                    if config.rollback_on_error {
                        self.rollback(&completed, ctx).await;
                    }

                    return Err(error);
                }
            }
        }

        Ok(ctx.data.clone())
    }

    /// Run one stage: validation, then execution raced against the timeout.
    async fn run_stage(
        &self,
        config: &PipelineConfig,
        stage: &dyn Stage,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, PipelineError> {
        let stage_name = stage.name().to_string();

        match stage.validate(ctx).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(PipelineError::StageValidation { stage: stage_name });
            }
            Err(e) => {
                return Err(PipelineError::StageFailed {
                    stage: stage_name,
                    reason: format!("validation failed: {e}"),
                });
            }
        }

        match tokio::time::timeout(config.timeout(), stage.execute(ctx)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(PipelineError::StageFailed {
                stage: stage_name,
                reason: e.to_string(),
            }),
            // The raced future is dropped here, cancelling the stage at its
            // next await point.
            Err(_) => Err(PipelineError::StageTimeout {
                stage: stage_name,
                timeout_ms: config.timeout_ms,
            }),
        }
    }

    /// Invoke cleanup on previously successful stages in reverse order.
    ///
    /// Cleanup failures are logged and never interrupt the sweep or mask
    /// the original error.
    async fn rollback(&self, completed: &[Arc<dyn Stage>], ctx: &ExecutionContext) {
        for stage in completed.iter().rev() {
            debug!(stage = stage.name(), "rolling back stage");
            if let Err(e) = stage.cleanup(ctx).await {
                warn!(stage = stage.name(), error = %e, "rollback cleanup failed");
            }
        }
    }

    /// Metrics for one pipeline.
    pub async fn metrics(&self, name: &str) -> Option<PipelineMetrics> {
        self.metrics.read().await.get(name).cloned()
    }

    /// Metrics for every registered pipeline.
    pub async fn all_metrics(&self) -> HashMap<String, PipelineMetrics> {
        self.metrics.read().await.clone()
    }

    /// Names of all registered pipelines.
    pub async fn registered_pipelines(&self) -> Vec<String> {
        self.pipelines.read().await.keys().cloned().collect()
    }

    /// Whether a pipeline is registered.
    pub async fn contains(&self, name: &str) -> bool {
        self.pipelines.read().await.contains_key(name)
    }

    /// Number of executions currently in flight.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Pipeline names with executions currently in flight, oldest first.
    pub async fn active_pipelines(&self) -> Vec<String> {
        let active = self.active.read().await;
        let mut entries: Vec<_> = active.values().collect();
        entries.sort_by_key(|e| e.started_at);
        entries.iter().map(|e| e.pipeline.clone()).collect()
    }
}
