// Batch
// A run configuration paired with its task manifest and stage graph

use crate::artifacts::gate::ArtifactGate;
use crate::config::RunConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::execution::{ExecutorConfig, PipelineGraph, StageExecutor};
use crate::scheduler::{JobBatch, RenderedBatch, SchedulerRenderer};
use crate::stages::StageServices;
use crate::tasks::{InvalidTask, MatrixExpander, RunRequest, TaskManifest};

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const MANIFEST_SUFFIX: &str = "_explicit_list";

/// Outcome of expanding a request table
#[derive(Debug)]
pub struct ExpandedRequest {
    pub manifest_path: PathBuf,
    pub manifest: TaskManifest,
    /// Combinations considered before location joins
    pub candidates: usize,
    pub invalid: Vec<InvalidTask>,
}

/// Expand a request table and write its manifest into `intermediate_dir`
pub fn expand_request(
    request_path: impl AsRef<Path>,
    intermediate_dir: impl AsRef<Path>,
) -> ServiceResult<ExpandedRequest> {
    let request = RunRequest::from_file(request_path)?;
    let matrix = MatrixExpander::expand(&request);
    if matrix.entries.is_empty() {
        return Err(ServiceError::NoTasks(request.name));
    }

    let manifest = TaskManifest::new(matrix.entries);
    let manifest_path = intermediate_dir
        .as_ref()
        .join(TaskManifest::file_name(&request.name));
    manifest.save(&manifest_path)?;

    info!(
        request = %request.name,
        tasks = manifest.len(),
        excluded = matrix.invalid.len(),
        manifest = %manifest_path.display(),
        "Wrote task manifest"
    );

    Ok(ExpandedRequest {
        manifest_path,
        manifest,
        candidates: matrix.candidates,
        invalid: matrix.invalid,
    })
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Everything needed to run or schedule one batch
#[derive(Debug)]
pub struct Batch {
    /// Request stem the manifest was named after
    pub name: String,
    pub config_path: PathBuf,
    pub manifest_path: PathBuf,
    pub config: RunConfig,
    pub manifest: TaskManifest,
    pub graph: PipelineGraph,
}

impl Batch {
    pub fn load(config_path: impl AsRef<Path>, manifest_path: impl AsRef<Path>) -> ServiceResult<Self> {
        let config_path = config_path.as_ref();
        let manifest_path = manifest_path.as_ref();

        let config = RunConfig::from_file(config_path)?;
        let manifest = TaskManifest::load(manifest_path)?;
        let graph = PipelineGraph::from_manifest(&manifest)?;

        let stem = manifest_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = stem
            .strip_suffix(MANIFEST_SUFFIX)
            .map(str::to_string)
            .unwrap_or(stem);

        Ok(Self {
            name,
            config_path: absolute(config_path),
            manifest_path: absolute(manifest_path),
            config,
            manifest,
            graph,
        })
    }

    pub fn services(&self) -> StageServices {
        StageServices::from_config(self.config.clone(), ArtifactGate::default())
    }

    pub fn executor(&self, config: ExecutorConfig) -> StageExecutor {
        StageExecutor::new(self.services()).with_config(config)
    }

    pub fn render(&self, renderer: &dyn SchedulerRenderer) -> ServiceResult<RenderedBatch> {
        let job_batch = JobBatch {
            name: self.name.clone(),
            config_path: self.config_path.clone(),
            manifest_path: self.manifest_path.clone(),
            task_count: self.manifest.len(),
            graph: &self.graph,
        };
        Ok(renderer.render(&job_batch)?)
    }

    /// Locations named by the manifest that do not exist yet.
    ///
    /// Stitched input directories are produced by the batch itself and are
    /// not reported.
    pub fn missing_locations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (index, task) in self.manifest.iter() {
            if !task.reference_input.is_dir() {
                problems.push(format!(
                    "#{} reference input {} does not exist",
                    index,
                    task.reference_input.display()
                ));
            }
            if let (Some(dir), false) = (&task.model_input, task.stitched) {
                if !dir.is_dir() {
                    problems.push(format!("#{} model input {} does not exist", index, dir.display()));
                }
            }
            if task.model_input.is_none() && !task.stitched && self.config.archive.is_none() {
                problems.push(format!(
                    "#{} has no model input and no archive is configured",
                    index
                ));
            }
        }
        if self.manifest.uses_stitched() && self.config.stitching.is_none() {
            problems.push("stitched tasks present but no stitching section configured".to_string());
        }
        for problem in &problems {
            warn!(batch = %self.name, "{}", problem);
        }
        problems
    }
}
