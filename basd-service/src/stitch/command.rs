// Command Stitcher
// Stitch generator backed by an external program

use crate::artifacts::gate::ArtifactGate;
use crate::config::CommandSpec;
use crate::runners::{CommandError, ExternalCommand};
use crate::stitch::{StitchError, StitchGenerator, StitchRequest};
use crate::transform::GriddedDataset;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::PathBuf;
use tracing::info;

/// Runs `<program> <args> generate <work_dir>/stitch_request.json`; the program
/// writes `<work_dir>/<variable>.<ext>` for each requested variable
pub struct CommandStitcher {
    command: ExternalCommand,
    gate: ArtifactGate,
}

#[derive(Serialize)]
struct GeneratorRequest<'a> {
    model: &'a str,
    scenario: &'a str,
    experiment: &'a str,
    variables: &'a [String],
    trajectory: PathBuf,
    ensemble_label: &'a str,
    trajectory_source: &'a str,
    chunk_years: u32,
    outputs: BTreeMap<&'a str, PathBuf>,
}

impl CommandStitcher {
    pub fn new(command: ExternalCommand, gate: ArtifactGate) -> Self {
        Self { command, gate }
    }

    pub fn from_spec(spec: &CommandSpec, gate: ArtifactGate) -> Result<Self, CommandError> {
        Ok(Self::new(ExternalCommand::resolve(spec)?, gate))
    }

    fn output_path(&self, request: &StitchRequest, variable: &str) -> PathBuf {
        request
            .work_dir
            .join(format!("{}.{}", variable, self.gate.extension()))
    }
}

fn io_error(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> StitchError + '_ {
    move |source| StitchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl StitchGenerator for CommandStitcher {
    fn name(&self) -> &str {
        self.command.name()
    }

    async fn generate(
        &self,
        request: &StitchRequest,
    ) -> Result<BTreeMap<String, GriddedDataset>, StitchError> {
        fs::create_dir_all(&request.work_dir).map_err(io_error(&request.work_dir))?;

        let trajectory_path = request.work_dir.join("trajectory.csv");
        let file = File::create(&trajectory_path).map_err(io_error(&trajectory_path))?;
        request.trajectory.write_csv(file)?;

        let body = GeneratorRequest {
            model: &request.model,
            scenario: &request.scenario,
            experiment: &request.experiment,
            variables: &request.variables,
            trajectory: trajectory_path,
            ensemble_label: &request.ensemble_label,
            trajectory_source: &request.trajectory_source,
            chunk_years: request.chunk_years,
            outputs: request
                .variables
                .iter()
                .map(|v| (v.as_str(), self.output_path(request, v)))
                .collect(),
        };
        let request_path = request.work_dir.join("stitch_request.json");
        let json = serde_json::to_vec_pretty(&body).map_err(|e| StitchError::Io {
            path: request_path.clone(),
            source: e.into(),
        })?;
        fs::write(&request_path, json).map_err(io_error(&request_path))?;

        info!(
            model = %request.model,
            scenario = %request.scenario,
            variables = ?request.variables,
            generator = %self.command.name(),
            "Generating stitched data"
        );
        self.command
            .run(
                &[
                    "generate".to_string(),
                    request_path.to_string_lossy().to_string(),
                ],
                Some(&request.work_dir),
            )
            .await?;

        let mut generated = BTreeMap::new();
        for variable in &request.variables {
            let path = self.output_path(request, variable);
            if !self.gate.exists(&path) {
                return Err(StitchError::MissingOutput(variable.clone()));
            }
            let data = self.gate.read(&path)?;
            data.expect_variable(variable)
                .map_err(|source| StitchError::Dataset {
                    variable: variable.clone(),
                    source,
                })?;
            generated.insert(variable.clone(), data);
        }
        Ok(generated)
    }
}
