// Task Manifest
// The flat task table shared by every stage and the scheduler

use crate::tasks::matrix::TaskEntry;
use crate::transform::base_variables;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur reading or writing a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to access manifest {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest: {0}")]
    Csv(#[from] csv::Error),

    #[error("Task index {index} out of range (manifest has {len} tasks)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Task table; the row index is the scheduler array index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskManifest {
    pub entries: Vec<TaskEntry>,
}

impl TaskManifest {
    pub fn new(entries: Vec<TaskEntry>) -> Self {
        Self { entries }
    }

    /// File name of the manifest for a request table stem
    pub fn file_name(request_name: &str) -> String {
        format!("{}_explicit_list.csv", request_name)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = csv::Reader::from_reader(file);
        let entries = reader
            .deserialize::<TaskEntry>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ManifestError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush().map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&TaskEntry, ManifestError> {
        self.entries.get(index).ok_or(ManifestError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TaskEntry)> {
        self.entries.iter().enumerate()
    }

    /// Whether any task reads stitched trajectories
    pub fn uses_stitched(&self) -> bool {
        self.entries.iter().any(|e| e.stitched)
    }

    /// Whether any task needs tasmin/tasmax rebuilt
    pub fn derives_minmax(&self) -> bool {
        self.entries.iter().any(|e| e.derive_minmax)
    }

    /// Base variables needed from the stitched trajectory of one model and scenario
    pub fn stitch_variables(&self, model: &str, scenario: &str) -> Vec<String> {
        let mut variables: Vec<String> = Vec::new();
        for entry in self
            .entries
            .iter()
            .filter(|e| e.stitched && e.model == model && e.scenario == scenario)
        {
            for variable in base_variables(&entry.variable) {
                if !variables.iter().any(|v| v == variable) {
                    variables.push(variable.to_string());
                }
            }
        }
        variables
    }
}
