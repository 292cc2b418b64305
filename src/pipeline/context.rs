//! Per-execution state threaded through a pipeline's stages.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// State for a single `execute` call.
///
/// Created fresh at execution start and discarded when the call finishes.
/// `data` holds the value flowing between stages: the pipeline input before
/// the first stage, then each stage's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Unique identifier for this execution
    pub execution_id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline: String,

    /// Current data; rewritten after every successful stage
    pub data: Value,

    /// Optional reference to the user the execution runs for
    pub user: Option<String>,

    /// When the execution started
    pub started_at: DateTime<Utc>,

    /// Current attempt number (1-indexed)
    pub attempt: u32,

    /// Name of the stage currently executing
    pub current_stage: Option<String>,

    /// Free-form bag stages may use to pass extra data forward
    pub state: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Create a context for a new execution
    pub fn new(pipeline: &str, input: Value, user: Option<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            data: input,
            user,
            started_at: Utc::now(),
            attempt: 0,
            current_stage: None,
            state: HashMap::new(),
        }
    }

    /// Store a value in the state bag
    pub fn set_state(&mut self, key: impl Into<String>, value: Value) {
        self.state.insert(key.into(), value);
    }

    /// Read a value from the state bag
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }
}

/// Outcome of a pipeline execution.
///
/// `execute` always produces one of these for a registered, enabled
/// pipeline; stage failures never escape as errors. Exactly one of `data`
/// and `error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Whether the execution completed
    pub success: bool,

    /// Final stage's output on success
    pub data: Option<Value>,

    /// Failure description after retries were exhausted
    pub error: Option<String>,

    /// Identifier of the execution this result belongs to
    pub execution_id: Uuid,

    /// Wall-clock duration of the whole call, retries included
    pub duration_ms: u64,

    /// Names of the stages that completed, in order, for the final attempt
    pub stages_executed: Vec<String>,
}

impl PipelineResult {
    pub(crate) fn completed(
        execution_id: Uuid,
        data: Value,
        duration_ms: u64,
        stages_executed: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_id,
            duration_ms,
            stages_executed,
        }
    }

    pub(crate) fn failed(
        execution_id: Uuid,
        error: String,
        duration_ms: u64,
        stages_executed: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            execution_id,
            duration_ms,
            stages_executed,
        }
    }
}
