// Command Adjuster
// Adjustment backend that exchanges files with an external program

use crate::adjust::{
    AdjustedOutput, Adjustment, AdjustmentBackend, AdjustmentError, AdjustmentInputs,
    AdjustmentRequest,
};
use crate::artifacts::gate::ArtifactGate;
use crate::config::{CommandSpec, VariableParameters};
use crate::runners::{CommandError, ExternalCommand};
use crate::transform::GriddedDataset;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Runs `<program> <args> adjust|downscale <work_dir>/request.json`.
///
/// Inputs are written into the work directory and the program is expected
/// to write the outputs named in the request file next to them.
pub struct CommandAdjuster {
    command: ExternalCommand,
    gate: ArtifactGate,
}

impl CommandAdjuster {
    pub fn new(command: ExternalCommand, gate: ArtifactGate) -> Self {
        Self { command, gate }
    }

    pub fn from_spec(spec: &CommandSpec, gate: ArtifactGate) -> Result<Self, CommandError> {
        Ok(Self::new(ExternalCommand::resolve(spec)?, gate))
    }
}

/// Request file read by the external program
#[derive(Serialize)]
struct BackendRequest<'a> {
    operation: &'a str,
    variable: &'a str,
    parameters: &'a VariableParameters,
    chunks: [usize; 3],
    monthly: bool,
    inputs: BTreeMap<&'static str, PathBuf>,
    outputs: BTreeMap<&'static str, PathBuf>,
}

#[async_trait]
impl AdjustmentBackend for CommandAdjuster {
    fn name(&self) -> &str {
        self.command.name()
    }

    async fn prepare(
        &self,
        inputs: AdjustmentInputs,
        request: AdjustmentRequest,
    ) -> Result<Box<dyn Adjustment>, AdjustmentError> {
        fs::create_dir_all(&request.work_dir).map_err(|source| AdjustmentError::Io {
            path: request.work_dir.clone(),
            source,
        })?;

        let ext = self.gate.extension().to_string();
        let file = |name: &str| request.work_dir.join(format!("{}.{}", name, ext));
        for (name, data) in [
            ("obs_reference", &inputs.obs_reference),
            ("sim_reference", &inputs.sim_reference),
            ("sim_application", &inputs.sim_application),
        ] {
            self.gate.write_if_absent(&file(name), data)?;
        }

        Ok(Box::new(CommandAdjustment {
            command: self.command.clone(),
            gate: self.gate.clone(),
            request,
        }))
    }
}

struct CommandAdjustment {
    command: ExternalCommand,
    gate: ArtifactGate,
    request: AdjustmentRequest,
}

impl CommandAdjustment {
    fn file(&self, name: &str) -> PathBuf {
        self.request
            .work_dir
            .join(format!("{}.{}", name, self.gate.extension()))
    }

    fn write_request(
        &self,
        operation: &str,
        parameters: &VariableParameters,
        inputs: &[&'static str],
        outputs: &[&'static str],
    ) -> Result<PathBuf, AdjustmentError> {
        let body = BackendRequest {
            operation,
            variable: &self.request.variable,
            parameters,
            chunks: self.request.chunks,
            monthly: self.request.monthly,
            inputs: inputs.iter().map(|name| (*name, self.file(name))).collect(),
            outputs: outputs.iter().map(|name| (*name, self.file(name))).collect(),
        };
        let path = self.request.work_dir.join(format!("{}_request.json", operation));
        let json = serde_json::to_vec_pretty(&body)
            .map_err(|e| AdjustmentError::Backend(format!("cannot encode request: {}", e)))?;
        fs::write(&path, json).map_err(|source| AdjustmentError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    async fn invoke(&self, operation: &str, request_path: &Path) -> Result<(), AdjustmentError> {
        info!(
            variable = %self.request.variable,
            backend = %self.command.name(),
            operation,
            "Running external adjustment"
        );
        self.command
            .run(
                &[operation.to_string(), request_path.to_string_lossy().to_string()],
                Some(&self.request.work_dir),
            )
            .await?;
        Ok(())
    }

    fn collect(&self, daily: &str, monthly: &str) -> Result<AdjustedOutput, AdjustmentError> {
        let daily_path = self.file(daily);
        if !self.gate.exists(&daily_path) {
            return Err(AdjustmentError::MissingOutput(daily.to_string()));
        }
        let daily = self.gate.read(&daily_path)?;

        let monthly = if self.request.monthly {
            let path = self.file(monthly);
            if !self.gate.exists(&path) {
                return Err(AdjustmentError::MissingOutput(monthly.to_string()));
            }
            Some(self.gate.read(&path)?)
        } else {
            None
        };

        Ok(AdjustedOutput { daily, monthly })
    }
}

#[async_trait]
impl Adjustment for CommandAdjustment {
    async fn adjust(&mut self) -> Result<AdjustedOutput, AdjustmentError> {
        let mut outputs = vec!["ba_daily"];
        if self.request.monthly {
            outputs.push("ba_monthly");
        }
        let parameters = self.request.parameters.clone();
        let request_path = self.write_request(
            "adjust",
            &parameters,
            &["obs_reference", "sim_reference", "sim_application"],
            &outputs,
        )?;
        self.invoke("adjust", &request_path).await?;
        self.collect("ba_daily", "ba_monthly")
    }

    async fn downscale(
        &mut self,
        adjusted: &GriddedDataset,
        parameters: &VariableParameters,
    ) -> Result<AdjustedOutput, AdjustmentError> {
        self.gate.write_if_absent(&self.file("ba_input"), adjusted)?;

        let mut outputs = vec!["basd_daily"];
        if self.request.monthly {
            outputs.push("basd_monthly");
        }
        let request_path =
            self.write_request("downscale", parameters, &["obs_reference", "ba_input"], &outputs)?;
        self.invoke("downscale", &request_path).await?;
        self.collect("basd_daily", "basd_monthly")
    }
}
