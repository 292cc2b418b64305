//! Error taxonomy for the coordination core.
//!
//! Configuration errors (unknown names, disabled components, missing
//! dependencies) are distinct variants from execution failures, because the
//! two classes propagate differently: configuration errors always surface to
//! the caller and are never retried, while execution failures are subject to
//! the pipeline retry loop or plugin metrics bookkeeping first.

use thiserror::Error;

/// Errors raised by the pipeline manager.
///
/// `Unknown` and `Disabled` are returned directly from `execute`; the
/// stage-level variants travel through the retry loop and are folded into a
/// failed [`PipelineResult`](crate::pipeline::PipelineResult) once attempts
/// are exhausted.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown pipeline '{name}'")]
    Unknown { name: String },

    #[error("pipeline '{name}' is disabled")]
    Disabled { name: String },

    #[error("stage '{stage}' rejected its input during validation")]
    StageValidation { stage: String },

    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout { stage: String, timeout_ms: u64 },

    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

impl PipelineError {
    /// Name of the stage this error originated from, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageValidation { stage }
            | Self::StageTimeout { stage, .. }
            | Self::StageFailed { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Whether this is a configuration error rather than an execution failure.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Unknown { .. } | Self::Disabled { .. })
    }
}

/// Errors raised by the plugin registry.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin '{name}'")]
    Unknown { name: String },

    #[error("plugin '{name}' is disabled")]
    Disabled { name: String },

    #[error("plugin '{plugin}' depends on unregistered plugin '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    #[error("plugin '{name}' failed self-validation")]
    Validation { name: String },

    #[error("plugin '{name}' {hook} hook failed: {reason}")]
    Lifecycle {
        name: String,
        hook: &'static str,
        reason: String,
    },

    #[error("plugin '{name}' execution failed: {reason}")]
    Execution { name: String, reason: String },
}

/// Errors surfaced by engine-level convenience calls.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_names_stage() {
        let err = PipelineError::StageTimeout {
            stage: "transform".to_string(),
            timeout_ms: 500,
        };
        let message = err.to_string();
        assert!(message.contains("transform"));
        assert!(message.contains("500"));
        assert_eq!(err.stage(), Some("transform"));
    }

    #[test]
    fn test_configuration_classification() {
        let unknown = PipelineError::Unknown {
            name: "missing".to_string(),
        };
        assert!(unknown.is_configuration());
        assert_eq!(unknown.stage(), None);

        let failed = PipelineError::StageFailed {
            stage: "load".to_string(),
            reason: "boom".to_string(),
        };
        assert!(!failed.is_configuration());
    }

    #[test]
    fn test_unknown_plugin_names_plugin() {
        let err = PluginError::Unknown {
            name: "metrics-exporter".to_string(),
        };
        assert!(err.to_string().contains("metrics-exporter"));
    }
}
