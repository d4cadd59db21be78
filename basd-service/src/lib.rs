// BASD Service Library
// Task matrix, stage executor, temperature transforms and scheduler rendering
// for bias-adjustment/downscaling batches

pub mod adjust;
pub mod artifacts;
pub mod batch;
pub mod config;
pub mod error;
pub mod execution;
pub mod runners;
pub mod scheduler;
pub mod sources;
pub mod stages;
pub mod stitch;
pub mod tasks;
pub mod transform;

// Re-export commonly used types
pub use error::{ServiceError, ServiceResult};

pub use batch::{expand_request, Batch, ExpandedRequest};

pub use config::{ConfigError, RunConfig};

pub use artifacts::{ArtifactGate, ArtifactKey, Period, WriteOutcome};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutorConfig, PipelineGraph, PipelineReport,
    PipelineRunner, ProgressSender, SkipReason, Stage, StageExecutor, StageReport, TaskStatus,
};

pub use scheduler::{SchedulerRenderer, SlurmRenderer};

pub use stages::StageServices;

// Re-export task types
pub use tasks::{MatrixExpander, RunRequest, TaskContext, TaskEntry, TaskManifest};

pub use transform::{derive_minmax, derive_rangeskew, GriddedDataset, ZeroRangePolicy};
