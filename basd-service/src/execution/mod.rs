// Execution Engine Module
// Stage ordering, per-task execution and run reporting

pub mod events;
pub mod executor;
pub mod graph;
pub mod report;
pub mod stage;

#[cfg(test)]
pub(crate) mod fixtures;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use executor::{ExecutorConfig, PipelineRunner, StageExecutor};
pub use graph::{GraphError, GraphErrorKind, PipelineGraph, StageNode};
pub use report::{PipelineReport, SkipReason, SkippedStage, StageReport, TaskOutcome, TaskStatus};
pub use stage::{Stage, UnknownStage};
