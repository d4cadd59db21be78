// Artifact Gate
// Create-if-absent persistence of datasets at their canonical paths

use crate::artifacts::codec::{CodecError, DatasetCodec, JsonCodec};
use crate::transform::GriddedDataset;

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Codec error at {}: {source}", .path.display())]
    Codec {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    #[error("Artifact not found: {}", .0.display())]
    NotFound(PathBuf),
}

impl GateError {
    fn io(path: &Path, source: io::Error) -> Self {
        GateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of a create-if-absent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another run or task already produced this artifact; left untouched
    AlreadyPresent,
}

/// Reads and writes artifacts, never overwriting one that exists
#[derive(Clone)]
pub struct ArtifactGate {
    codec: Arc<dyn DatasetCodec>,
}

impl Default for ArtifactGate {
    fn default() -> Self {
        Self::new(Arc::new(JsonCodec))
    }
}

impl ArtifactGate {
    pub fn new(codec: Arc<dyn DatasetCodec>) -> Self {
        Self { codec }
    }

    /// File extension of artifacts written through this gate
    pub fn extension(&self) -> &str {
        self.codec.extension()
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Persist `dataset` at `path` unless something is already there.
    ///
    /// The bytes go to a hidden temp file in the destination directory and are
    /// linked into place only once complete, so a reader never observes a
    /// partial artifact and two writers racing on one path cannot both win.
    pub fn write_if_absent(
        &self,
        path: &Path,
        dataset: &GriddedDataset,
    ) -> Result<WriteOutcome, GateError> {
        if self.exists(path) {
            warn!(path = %path.display(), "Artifact already exists, not overwriting");
            return Ok(WriteOutcome::AlreadyPresent);
        }

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| GateError::io(parent, e))?;

        let mut temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".partial")
            .tempfile_in(parent)
            .map_err(|e| GateError::io(parent, e))?;

        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            self.codec
                .encode(dataset, &mut writer)
                .map_err(|source| GateError::Codec {
                    path: path.to_path_buf(),
                    source,
                })?;
            writer.flush().map_err(|e| GateError::io(path, e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| GateError::io(path, e))?;

        match temp.persist_noclobber(path) {
            Ok(_) => {
                debug!(path = %path.display(), variable = %dataset.variable, "Wrote artifact");
                Ok(WriteOutcome::Written)
            }
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "Artifact appeared while writing, keeping the existing file");
                Ok(WriteOutcome::AlreadyPresent)
            }
            Err(err) => Err(GateError::io(path, err.error)),
        }
    }

    pub fn read(&self, path: &Path) -> Result<GriddedDataset, GateError> {
        if !self.exists(path) {
            return Err(GateError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|e| GateError::io(path, e))?;
        self.codec.decode(&bytes).map_err(|source| GateError::Codec {
            path: path.to_path_buf(),
            source,
        })
    }
}
