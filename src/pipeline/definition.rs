//! Pipeline definitions.
//!
//! Execution policy (timeouts, retries, rollback) is plain data and can be
//! kept in YAML; stages are code, attached through the builder methods.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

use super::context::ExecutionContext;

/// One step of a pipeline.
///
/// `execute` is required; the remaining hooks default to no-ops. `cleanup`
/// runs in two situations: immediately after this stage succeeds, and again
/// in reverse order during rollback if a later stage fails. Implementations
/// should therefore be idempotent.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name (unique within its pipeline; used in events and errors)
    fn name(&self) -> &str;

    /// Transform the current data into this stage's output
    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<Value>;

    /// Pre-execution check; returning `Ok(false)` fails the stage immediately
    async fn validate(&self, _ctx: &ExecutionContext) -> Result<bool> {
        Ok(true)
    }

    /// Invoked when this stage fails, before any rollback
    async fn on_error(&self, _error: &PipelineError, _ctx: &ExecutionContext) {}

    /// Finalizer; see the trait docs for when this runs
    async fn cleanup(&self, _ctx: &ExecutionContext) -> Result<()> {
        Ok(())
    }
}

/// A complete pipeline definition
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name (unique key in the manager's registry)
    pub name: String,

    /// Ordered stages; not serialized, attached in code
    #[serde(skip)]
    pub stages: Vec<Arc<dyn Stage>>,

    /// Per-stage timeout in milliseconds (default: 30s)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Total execution attempts, including the first try (default: 3)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between attempts in milliseconds (default: 1s)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Run cleanup of completed stages in reverse order on failure (default: true)
    #[serde(default = "default_true")]
    pub rollback_on_error: bool,

    /// Disabled pipelines reject execution before any stage runs (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Create a definition with default policy and no stages
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            rollback_on_error: true,
            enabled: true,
        }
    }

    /// Parse policy settings from YAML; stages must be attached afterwards
    pub fn from_yaml(content: &str) -> Result<Self> {
        use anyhow::Context;
        serde_yaml::from_str(content).context("Failed to parse pipeline config YAML")
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Set the per-stage timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the number of execution attempts
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the fixed delay between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the rollback-on-error policy
    pub fn with_rollback_on_error(mut self, rollback: bool) -> Self {
        self.rollback_on_error = rollback;
        self
    }

    /// Set the enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Per-stage timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay between attempts as a `Duration`
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("name", &self.name)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("timeout_ms", &self.timeout_ms)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("rollback_on_error", &self.rollback_on_error)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("demo");

        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert!(config.rollback_on_error);
        assert!(config.enabled);
        assert!(config.stages.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::new("demo")
            .with_timeout(Duration::from_millis(250))
            .with_retry_attempts(5)
            .with_retry_delay(Duration::from_millis(10))
            .with_rollback_on_error(false)
            .with_enabled(false);

        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay_ms, 10);
        assert!(!config.rollback_on_error);
        assert!(!config.enabled);
    }

    #[test]
    fn test_yaml_parsing_with_defaults() {
        let config = PipelineConfig::from_yaml(
            r#"
name: ingest
timeout_ms: 5000
retry_attempts: 2
"#,
        )
        .unwrap();

        assert_eq!(config.name, "ingest");
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.retry_attempts, 2);
        // Unspecified policy fields fall back to defaults
        assert_eq!(config.retry_delay_ms, 1000);
        assert!(config.rollback_on_error);
        assert!(config.enabled);
        assert!(config.stages.is_empty());
    }
}
