// Observed Reference
// Observational reference data for one reference dataset

use crate::artifacts::gate::ArtifactGate;
use crate::sources::{matching_files, read_joined, AcquisitionError};
use crate::transform::GriddedDataset;

use std::path::{Path, PathBuf};

/// Reads `<root>/<var>/<var>_*.<ext>`, falling back to `<root>/<var>_*.<ext>`
/// when the per-variable directory does not exist
pub struct ObservedReference {
    root: PathBuf,
    gate: ArtifactGate,
}

impl ObservedReference {
    pub fn new(root: impl Into<PathBuf>, gate: ArtifactGate) -> Self {
        Self {
            root: root.into(),
            gate,
        }
    }

    fn variable_dir(&self, variable: &str) -> PathBuf {
        let nested = self.root.join(variable);
        if nested.is_dir() {
            nested
        } else {
            self.root.clone()
        }
    }

    fn files(&self, variable: &str) -> (PathBuf, Vec<PathBuf>) {
        let dir = self.variable_dir(variable);
        let files = matching_files(
            &dir,
            &format!("{}_", variable),
            &format!(".{}", self.gate.extension()),
        );
        (dir, files)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, variable: &str) -> bool {
        !self.files(variable).1.is_empty()
    }

    pub fn load(&self, variable: &str) -> Result<GriddedDataset, AcquisitionError> {
        let (dir, files) = self.files(variable);
        let key = format!("observed {}", variable);
        if files.is_empty() {
            return Err(AcquisitionError::NotFound { key, location: dir });
        }
        read_joined(&self.gate, &files, variable, &key)
    }
}
