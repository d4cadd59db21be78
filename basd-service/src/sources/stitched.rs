// Stitched Source
// Synthetic trajectories written by the Stitch stage

use crate::artifacts::gate::ArtifactGate;
use crate::sources::{AcquisitionError, AcquisitionKey, DataSource};
use crate::transform::GriddedDataset;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Reads `<dir>/stitched_<model>_<var>_<scenario>.<ext>`; one file holds the
/// whole series, reference and application years alike
pub struct StitchedSource {
    dir: PathBuf,
    gate: ArtifactGate,
}

impl StitchedSource {
    pub fn new(dir: impl Into<PathBuf>, gate: ArtifactGate) -> Self {
        Self {
            dir: dir.into(),
            gate,
        }
    }

    /// Location of one stitched variable
    pub fn file_path(dir: &Path, model: &str, variable: &str, scenario: &str, extension: &str) -> PathBuf {
        dir.join(format!(
            "stitched_{}_{}_{}.{}",
            model, variable, scenario, extension
        ))
    }

    fn path(&self, key: &AcquisitionKey) -> PathBuf {
        Self::file_path(
            &self.dir,
            &key.model,
            &key.variable,
            &key.scenario,
            self.gate.extension(),
        )
    }
}

#[async_trait]
impl DataSource for StitchedSource {
    fn name(&self) -> &str {
        "stitched"
    }

    async fn contains(&self, key: &AcquisitionKey) -> bool {
        self.gate.exists(&self.path(key))
    }

    async fn fetch(&self, key: &AcquisitionKey) -> Result<GriddedDataset, AcquisitionError> {
        let path = self.path(key);
        if !self.gate.exists(&path) {
            return Err(AcquisitionError::NotFound {
                key: key.to_string(),
                location: path,
            });
        }
        let data = self.gate.read(&path)?;
        data.expect_variable(&key.variable)
            .map_err(|source| AcquisitionError::Dataset {
                key: key.to_string(),
                source,
            })?;
        Ok(data)
    }
}
