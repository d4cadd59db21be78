// Stitched Trajectories
// Synthetic model series generated to follow a target temperature path

pub mod command;
pub mod trajectory;

pub use command::CommandStitcher;
pub use trajectory::Trajectory;

use crate::artifacts::gate::GateError;
use crate::artifacts::naming::Period;
use crate::runners::CommandError;
use crate::transform::{DatasetError, GriddedDataset};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid trajectory table: {0}")]
    Csv(#[from] csv::Error),

    #[error("Trajectory has no usable years")]
    EmptyTrajectory,

    #[error("Trajectory has no years inside baseline {0}")]
    NoBaselineYears(Period),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Artifact(#[from] GateError),

    #[error("Generator wrote no output for '{0}'")]
    MissingOutput(String),

    #[error("Generated '{variable}' is unusable: {source}")]
    Dataset {
        variable: String,
        #[source]
        source: DatasetError,
    },
}

/// One generation job: every listed variable for a model and scenario
#[derive(Debug, Clone)]
pub struct StitchRequest {
    pub model: String,
    pub scenario: String,
    pub experiment: String,
    pub variables: Vec<String>,
    /// Annual anomaly the output must follow
    pub trajectory: Trajectory,
    pub ensemble_label: String,
    pub trajectory_source: String,
    pub chunk_years: u32,
    pub work_dir: PathBuf,
}

/// Recombines archived model segments into a series matching a trajectory
#[async_trait]
pub trait StitchGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request: &StitchRequest,
    ) -> Result<BTreeMap<String, GriddedDataset>, StitchError>;
}
