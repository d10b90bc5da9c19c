/*
 * Indexwork Orchestration - Index Write Orchestration Engine
 *
 * Turns a stream of index mutations into ordered, batched backend calls.
 *
 * Architecture:
 * - Works and execution contexts (pluggable backends)
 * - Work sequences with skip-on-failure chaining
 * - Bulking of consecutive bulkable works
 * - Batch processor (commit/refresh state machine)
 * - Barrier orchestrator (shutdown-safe submission)
 */

// Public modules
pub mod bulker;
pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod error_handler;
pub mod failure;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod orchestrator;
pub mod processor;
pub mod sequence;
pub mod work;
pub mod workset;

mod executor;

#[cfg(test)]
mod test_support;

// Re-exports
pub use bulker::WorkBulker;
pub use capability::{
    parse_version, resolve, BulkFormat, CapabilityBundle, Dialect, Distribution,
    FieldTypeMapping, HitsTotalFormat,
};
pub use config::OrchestratorConfig;
pub use context::{BulkExecution, ExecutionContext, IndexResource};
pub use error::{Failure, OrchestratorError, Result};
pub use error_handler::ContextualErrorHandler;
pub use failure::{FailureEvent, FailureHandler, TracingFailureHandler};
#[cfg(feature = "metrics")]
pub use metrics::OrchestratorMetrics;
pub use orchestrator::BarrierOrchestrator;
pub use processor::{BatchProcessor, CommitStrategy, ProcessorState, RefreshStrategy};
pub use sequence::{
    BulkResultExtractionStep, BulkResultFuture, SequenceAborted, WorkHandle, WorkOutcome,
    WorkSequenceBuilder,
};
pub use work::{BulkWork, BulkableWork, Work, WorkInfo};
pub use workset::{BulkWorkSet, CompletionSignal, SingleWorkSet, WorkSet};
