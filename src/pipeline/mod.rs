//! Staged pipeline execution.
//!
//! A pipeline is a named, ordered sequence of stages executed as one logical
//! unit of work with shared timeout, retry, and rollback policy.

pub mod context;
pub mod definition;
pub mod manager;

pub use context::{ExecutionContext, PipelineResult};
pub use definition::{PipelineConfig, Stage};
pub use manager::{PipelineManager, PipelineMetrics};
