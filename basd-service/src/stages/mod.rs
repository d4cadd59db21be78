// Stage Work
// What each stage does for one task, and the services it draws on

pub mod adjust;
pub mod minmax;
pub mod rangeskew;
pub mod stitch;

pub use adjust::AdjustAndDownscaleWork;
pub use minmax::DeriveMinMaxWork;
pub use rangeskew::DeriveRangeSkewWork;
pub use stitch::StitchWork;

use crate::adjust::{AdjustmentBackend, AdjustmentError, CommandAdjuster};
use crate::artifacts::gate::{ArtifactGate, GateError, WriteOutcome};
use crate::config::RunConfig;
use crate::execution::stage::Stage;
use crate::sources::{
    AcquisitionError, CommandArchive, DataSource, LocalDirectorySource, ObservedReference,
    StitchedSource,
};
use crate::stitch::{CommandStitcher, StitchError, StitchGenerator};
use crate::tasks::{DataSourceKind, Segment, TaskContext};
use crate::transform::{DatasetError, GriddedDataset, TransformError};

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why one task failed in one stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing input: {0}")]
    MissingPrecondition(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    #[error(transparent)]
    Artifact(#[from] GateError),

    #[error("Failed variants: {}", .0.join("; "))]
    Variants(Vec<String>),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl From<DatasetError> for StageError {
    fn from(err: DatasetError) -> Self {
        StageError::Transform(TransformError::Dataset(err))
    }
}

/// Artifacts a task produced or found in place
#[derive(Debug, Clone, Default)]
pub struct TaskRunSummary {
    pub written: Vec<PathBuf>,
    pub already_present: Vec<PathBuf>,
    pub notes: Vec<String>,
}

impl TaskRunSummary {
    pub fn record(&mut self, path: PathBuf, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Written => self.written.push(path),
            WriteOutcome::AlreadyPresent => self.already_present.push(path),
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Shared, read-only collaborators for every task of a run
#[derive(Clone)]
pub struct StageServices {
    pub config: Arc<RunConfig>,
    pub gate: ArtifactGate,
    pub archive: Option<Arc<dyn DataSource>>,
    pub adjuster: Option<Arc<dyn AdjustmentBackend>>,
    pub stitcher: Option<Arc<dyn StitchGenerator>>,
}

impl StageServices {
    /// Services without any external adapters
    pub fn new(config: RunConfig, gate: ArtifactGate) -> Self {
        Self {
            config: Arc::new(config),
            gate,
            archive: None,
            adjuster: None,
            stitcher: None,
        }
    }

    /// Services with the command adapters named in the configuration.
    ///
    /// An adapter whose program cannot be found is left out with a warning;
    /// tasks that need it then fail with a configuration error.
    pub fn from_config(config: RunConfig, gate: ArtifactGate) -> Self {
        let mut services = Self::new(config.clone(), gate.clone());

        if let Some(archive) = &config.archive {
            match CommandArchive::from_config(archive, gate.clone()) {
                Ok(source) => services.archive = Some(Arc::new(source)),
                Err(e) => warn!(error = %e, "Remote archive unavailable"),
            }
        }
        if let Some(spec) = &config.adjustment {
            match CommandAdjuster::from_spec(spec, gate.clone()) {
                Ok(backend) => services.adjuster = Some(Arc::new(backend)),
                Err(e) => warn!(error = %e, "Adjustment backend unavailable"),
            }
        }
        if let Some(stitching) = &config.stitching {
            match CommandStitcher::from_spec(&stitching.command, gate) {
                Ok(generator) => services.stitcher = Some(Arc::new(generator)),
                Err(e) => warn!(error = %e, "Stitching generator unavailable"),
            }
        }

        services
    }

    pub fn with_archive(mut self, archive: Arc<dyn DataSource>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_adjuster(mut self, adjuster: Arc<dyn AdjustmentBackend>) -> Self {
        self.adjuster = Some(adjuster);
        self
    }

    pub fn with_stitcher(mut self, stitcher: Arc<dyn StitchGenerator>) -> Self {
        self.stitcher = Some(stitcher);
        self
    }

    /// Where this task's base variables come from
    pub fn source_for(&self, ctx: &TaskContext) -> Result<Arc<dyn DataSource>, StageError> {
        match ctx.task.data_source() {
            DataSourceKind::Local(dir) => {
                Ok(Arc::new(LocalDirectorySource::new(dir, self.gate.clone())))
            }
            DataSourceKind::Stitched(dir) => {
                Ok(Arc::new(StitchedSource::new(dir, self.gate.clone())))
            }
            DataSourceKind::RemoteArchive => self.archive.clone().ok_or_else(|| {
                StageError::Configuration(format!(
                    "{} has no input location and no remote archive is configured",
                    ctx.task.model
                ))
            }),
        }
    }

    pub fn observed(&self, ctx: &TaskContext) -> ObservedReference {
        ObservedReference::new(&ctx.task.reference_input, self.gate.clone())
    }

    /// Write through the idempotency gate and record the outcome
    pub fn write(
        &self,
        path: PathBuf,
        data: &GriddedDataset,
        summary: &mut TaskRunSummary,
    ) -> Result<(), StageError> {
        let outcome = self.gate.write_if_absent(&path, data)?;
        summary.record(path, outcome);
        Ok(())
    }

    /// Attach configured encoding for the data actually written
    pub fn encode(&self, mut data: GriddedDataset) -> GriddedDataset {
        data.encoding = self.config.encoding.for_dataset(data.dims());
        data
    }
}

/// Fetch one base variable for a segment, trimmed to the segment's years
pub(crate) async fn acquire_segment(
    source: &dyn DataSource,
    ctx: &TaskContext,
    variable: &str,
    segment: Segment,
) -> Result<GriddedDataset, StageError> {
    let key = ctx.acquisition_key(variable, segment);
    let (_, period) = ctx.segment(segment);
    debug!(key = %key, source = source.name(), period = %period, "Acquiring");
    let data = source.fetch(&key).await?;
    Ok(data.select_years(&period)?)
}

/// Keys of base variables the source does not have, deduplicated
pub(crate) async fn missing_base_inputs(
    source: &dyn DataSource,
    ctx: &TaskContext,
    variables: &[&str],
) -> Vec<String> {
    let mut missing = Vec::new();
    for segment in [Segment::Reference, Segment::Application] {
        for variable in variables {
            let key = ctx.acquisition_key(variable, segment);
            let label = format!("{} ({})", key, source.name());
            if !missing.contains(&label) && !source.contains(&key).await {
                missing.push(label);
            }
        }
    }
    missing
}

pub(crate) fn remove_work_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            warn!(path = %dir.display(), error = %e, "Failed to remove temporary directory");
        }
    }
}

/// The work one stage does for one task
#[async_trait]
pub trait StageWork: Send + Sync {
    /// Inputs that must exist before the task can run
    async fn missing_inputs(&self, ctx: &TaskContext, services: &StageServices) -> Vec<String>;

    /// Canonical artifacts the task produces
    fn outputs(&self, ctx: &TaskContext) -> Vec<PathBuf>;

    async fn run(
        &self,
        ctx: &TaskContext,
        services: &StageServices,
    ) -> Result<TaskRunSummary, StageError>;
}

pub fn work_for(stage: Stage) -> Arc<dyn StageWork> {
    match stage {
        Stage::Stitch => Arc::new(StitchWork),
        Stage::DeriveRangeSkew => Arc::new(DeriveRangeSkewWork),
        Stage::AdjustAndDownscale => Arc::new(AdjustAndDownscaleWork),
        Stage::DeriveMinMax => Arc::new(DeriveMinMaxWork),
    }
}
