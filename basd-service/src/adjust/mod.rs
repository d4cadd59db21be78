// Bias Adjustment and Downscaling
// Interface to the external adjustment/downscaling capability

pub mod command;

pub use command::CommandAdjuster;

use crate::artifacts::gate::GateError;
use crate::config::VariableParameters;
use crate::runners::CommandError;
use crate::transform::GriddedDataset;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdjustmentError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Artifact(#[from] GateError),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend produced no {0} output")]
    MissingOutput(String),

    #[error("{0}")]
    Backend(String),
}

/// The three series an adjustment is fitted on
#[derive(Debug, Clone)]
pub struct AdjustmentInputs {
    /// Observations over the target period
    pub obs_reference: GriddedDataset,
    /// Model over the target period
    pub sim_reference: GriddedDataset,
    /// Model over the application period
    pub sim_application: GriddedDataset,
}

/// Settings for one adjustment run
#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub variable: String,
    pub parameters: VariableParameters,
    /// Working chunk sizes (time, lat, lon)
    pub chunks: [usize; 3],
    /// Scratch directory owned by this run
    pub work_dir: PathBuf,
    /// Also produce monthly aggregates
    pub monthly: bool,
}

/// A daily result and its optional monthly aggregate
#[derive(Debug, Clone)]
pub struct AdjustedOutput {
    pub daily: GriddedDataset,
    pub monthly: Option<GriddedDataset>,
}

/// Factory for prepared adjustments
#[async_trait]
pub trait AdjustmentBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(
        &self,
        inputs: AdjustmentInputs,
        request: AdjustmentRequest,
    ) -> Result<Box<dyn Adjustment>, AdjustmentError>;
}

/// An adjustment fitted on one set of inputs
#[async_trait]
pub trait Adjustment: Send {
    /// Bias adjust the application series
    async fn adjust(&mut self) -> Result<AdjustedOutput, AdjustmentError>;

    /// Downscale an adjusted series to the observation grid
    async fn downscale(
        &mut self,
        adjusted: &GriddedDataset,
        parameters: &VariableParameters,
    ) -> Result<AdjustedOutput, AdjustmentError>;
}
