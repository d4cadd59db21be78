// Scheduler Rendering
// Turns the stage graph of a batch into job scripts for an external scheduler

pub mod slurm;

pub use slurm::SlurmRenderer;

use crate::config::CommandSpec;
use crate::execution::graph::PipelineGraph;
use crate::execution::stage::Stage;
use crate::runners::{CommandError, CommandOutput, ExternalCommand};

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Manifest has no tasks to schedule")]
    EmptyManifest,

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not on PATH; submit the scripts manually")]
    Unavailable(String),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// One batch as the scheduler sees it
#[derive(Debug, Clone)]
pub struct JobBatch<'a> {
    /// Request stem, used for job and file names
    pub name: String,
    pub config_path: PathBuf,
    pub manifest_path: PathBuf,
    /// Manifest rows; one array element each
    pub task_count: usize,
    pub graph: &'a PipelineGraph,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedScript {
    pub file_name: String,
    pub content: String,
}

/// Per-stage job scripts plus the script that submits them in order
#[derive(Debug, Clone)]
pub struct RenderedBatch {
    pub stages: Vec<(Stage, RenderedScript)>,
    pub submit: RenderedScript,
}

impl RenderedBatch {
    pub fn stage_script(&self, stage: Stage) -> Option<&RenderedScript> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, script)| script)
    }

    /// Write every script into `dir`; returns the submit script path
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, SchedulerError> {
        fs::create_dir_all(dir).map_err(|source| SchedulerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for script in self.stages.iter().map(|(_, s)| s).chain([&self.submit]) {
            let path = dir.join(&script.file_name);
            fs::write(&path, &script.content).map_err(|source| SchedulerError::Io {
                path: path.clone(),
                source,
            })?;
            make_executable(&path)?;
        }

        Ok(dir.join(&self.submit.file_name))
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), SchedulerError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
        SchedulerError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), SchedulerError> {
    Ok(())
}

/// Renders a batch into a scheduler's job script format
pub trait SchedulerRenderer {
    fn name(&self) -> &str;

    /// Program that must be on PATH for submission to work
    fn submit_program(&self) -> &str;

    fn render(&self, batch: &JobBatch<'_>) -> Result<RenderedBatch, SchedulerError>;
}

/// Whether the renderer's submission program can be found
pub fn can_submit(renderer: &dyn SchedulerRenderer) -> bool {
    which::which(renderer.submit_program()).is_ok()
}

/// Run a written submit script
pub async fn submit(
    renderer: &dyn SchedulerRenderer,
    submit_script: &Path,
) -> Result<CommandOutput, SchedulerError> {
    if !can_submit(renderer) {
        return Err(SchedulerError::Unavailable(
            renderer.submit_program().to_string(),
        ));
    }

    let shell = ExternalCommand::resolve(&CommandSpec {
        program: "bash".to_string(),
        args: Vec::new(),
        env: Default::default(),
    })?;
    info!(script = %submit_script.display(), scheduler = renderer.name(), "Submitting batch");
    let output = shell
        .run(&[submit_script.display().to_string()], submit_script.parent())
        .await?;
    Ok(output)
}

/// Single-quote a value for a POSIX shell
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
