// Local Directory Source
// Model output already downloaded to disk, possibly split across files

use crate::artifacts::gate::ArtifactGate;
use crate::sources::{matching_files, read_joined, AcquisitionError, AcquisitionKey, DataSource};
use crate::transform::GriddedDataset;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads `<dir>/<var>_day_<model>_<scenario>_<ensemble>_*.<ext>`
pub struct LocalDirectorySource {
    dir: PathBuf,
    gate: ArtifactGate,
}

impl LocalDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, gate: ArtifactGate) -> Self {
        Self {
            dir: dir.into(),
            gate,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn prefix(key: &AcquisitionKey) -> Result<String, AcquisitionError> {
        let ensemble = key.ensemble.as_deref().ok_or_else(|| {
            AcquisitionError::Unsupported(format!(
                "local model data needs an ensemble member ({})",
                key
            ))
        })?;
        Ok(format!(
            "{}_day_{}_{}_{}_",
            key.variable, key.model, key.scenario, ensemble
        ))
    }

    fn files(&self, key: &AcquisitionKey) -> Result<Vec<PathBuf>, AcquisitionError> {
        let prefix = Self::prefix(key)?;
        let suffix = format!(".{}", self.gate.extension());
        Ok(matching_files(&self.dir, &prefix, &suffix))
    }
}

#[async_trait]
impl DataSource for LocalDirectorySource {
    fn name(&self) -> &str {
        "local"
    }

    async fn contains(&self, key: &AcquisitionKey) -> bool {
        self.files(key).map(|f| !f.is_empty()).unwrap_or(false)
    }

    async fn fetch(&self, key: &AcquisitionKey) -> Result<GriddedDataset, AcquisitionError> {
        let files = self.files(key)?;
        if files.is_empty() {
            return Err(AcquisitionError::NotFound {
                key: key.to_string(),
                location: self.dir.clone(),
            });
        }
        debug!(key = %key, files = files.len(), "Reading local model data");
        read_joined(&self.gate, &files, &key.variable, &key.to_string())
    }
}
