// Service Errors
// Top-level error for batch preparation, loading and scheduling

use crate::config::ConfigError;
use crate::execution::GraphError;
use crate::scheduler::SchedulerError;
use crate::tasks::{ManifestError, RequestError};

use std::path::PathBuf;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Invalid stage graph: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Request '{0}' resolved to no runnable tasks")]
    NoTasks(String),

    #[error("Failed to write report {}: {source}", .path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
