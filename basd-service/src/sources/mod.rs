// Data Sources
// Acquisition of base variables by (variable, model, scenario, ensemble)

pub mod archive;
pub mod local;
pub mod observed;
pub mod stitched;

pub use archive::CommandArchive;
pub use local::LocalDirectorySource;
pub use observed::ObservedReference;
pub use stitched::StitchedSource;

use crate::artifacts::gate::{ArtifactGate, GateError};
use crate::runners::CommandError;
use crate::transform::{DatasetError, GriddedDataset};

use async_trait::async_trait;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What to acquire
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AcquisitionKey {
    pub variable: String,
    pub model: String,
    pub scenario: String,
    /// Absent for stitched trajectories
    pub ensemble: Option<String>,
}

impl fmt::Display for AcquisitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.variable,
            self.model,
            self.scenario,
            self.ensemble.as_deref().unwrap_or("-")
        )
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("No data for {key} in {}", .location.display())]
    NotFound { key: String, location: PathBuf },

    #[error(transparent)]
    Read(#[from] GateError),

    #[error("Unusable data for {key}: {source}")]
    Dataset {
        key: String,
        #[source]
        source: DatasetError,
    },

    #[error("Archive fetch failed for {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: CommandError,
    },

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unsupported(String),
}

/// A place base variables can be acquired from
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap check that `fetch` has something to read. Sources that cannot
    /// tell without fetching report true.
    async fn contains(&self, _key: &AcquisitionKey) -> bool {
        true
    }

    async fn fetch(&self, key: &AcquisitionKey) -> Result<GriddedDataset, AcquisitionError>;
}

/// Files in `dir` named `<prefix>*<suffix>`, sorted by name
pub(crate) fn matching_files(dir: &Path, prefix: &str, suffix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(prefix) && name.ends_with(suffix) && name.len() >= prefix.len() + suffix.len()
        })
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files
}

/// Read every file and join them along time, checking the variable name
pub(crate) fn read_joined(
    gate: &ArtifactGate,
    files: &[PathBuf],
    variable: &str,
    key: &str,
) -> Result<GriddedDataset, AcquisitionError> {
    let mut parts = Vec::with_capacity(files.len());
    for file in files {
        let part = gate.read(file)?;
        part.expect_variable(variable)
            .map_err(|source| AcquisitionError::Dataset {
                key: key.to_string(),
                source,
            })?;
        parts.push(part);
    }
    GriddedDataset::concat_time(parts).map_err(|source| AcquisitionError::Dataset {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_files_sorted() {
        let temp = tempfile::tempdir().unwrap();
        for name in [
            "tas_day_X_ssp245_r1_20510101-21001231.json",
            "tas_day_X_ssp245_r1_20150101-20501231.json",
            "tasmax_day_X_ssp245_r1_20150101-20501231.json",
            "tas_day_X_ssp245_r1_notes.txt",
        ] {
            fs::write(temp.path().join(name), "{}").unwrap();
        }

        let files = matching_files(temp.path(), "tas_day_X_ssp245_r1_", ".json");

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "tas_day_X_ssp245_r1_20150101-20501231.json",
                "tas_day_X_ssp245_r1_20510101-21001231.json"
            ]
        );
    }

    #[test]
    fn test_matching_files_missing_dir() {
        assert!(matching_files(Path::new("/nonexistent/basd"), "a", ".json").is_empty());
    }
}
