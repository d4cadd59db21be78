// Tasks Module
// Run request expansion into the task manifest, and per-task context

pub mod context;
pub mod manifest;
pub mod matrix;
pub mod request;

pub use context::{Segment, TaskContext};
pub use manifest::{ManifestError, TaskManifest};
pub use matrix::{DataSourceKind, InvalidTask, JoinError, MatrixExpander, TaskEntry, TaskMatrix};
pub use request::{RequestError, RunRequest};
