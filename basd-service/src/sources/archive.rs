// Remote Archive Source
// Fetches model output through an external command into a local cache

use crate::artifacts::gate::ArtifactGate;
use crate::config::ArchiveConfig;
use crate::runners::{CommandError, ExternalCommand};
use crate::sources::{AcquisitionError, AcquisitionKey, DataSource};
use crate::transform::GriddedDataset;

use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Runs `<program> <args> <variable> <model> <scenario> <ensemble> <destination>`
/// for keys not yet in the cache. The program must write one dataset in the
/// configured codec to `destination`.
pub struct CommandArchive {
    command: ExternalCommand,
    cache_dir: PathBuf,
    gate: ArtifactGate,
}

impl CommandArchive {
    pub fn new(command: ExternalCommand, cache_dir: impl Into<PathBuf>, gate: ArtifactGate) -> Self {
        Self {
            command,
            cache_dir: cache_dir.into(),
            gate,
        }
    }

    pub fn from_config(config: &ArchiveConfig, gate: ArtifactGate) -> Result<Self, CommandError> {
        Ok(Self::new(
            ExternalCommand::resolve(&config.command)?,
            config.cache_dir.clone(),
            gate,
        ))
    }

    fn cache_path(&self, key: &AcquisitionKey, ensemble: &str) -> PathBuf {
        self.cache_dir.join(format!(
            "{}_day_{}_{}_{}.{}",
            key.variable,
            key.model,
            key.scenario,
            ensemble,
            self.gate.extension()
        ))
    }
}

#[async_trait]
impl DataSource for CommandArchive {
    fn name(&self) -> &str {
        "archive"
    }

    async fn fetch(&self, key: &AcquisitionKey) -> Result<GriddedDataset, AcquisitionError> {
        let ensemble = key.ensemble.as_deref().ok_or_else(|| {
            AcquisitionError::Unsupported(format!("archive lookups need an ensemble member ({})", key))
        })?;
        let path = self.cache_path(key, ensemble);

        if !self.gate.exists(&path) {
            fs::create_dir_all(&self.cache_dir).map_err(|source| AcquisitionError::Io {
                path: self.cache_dir.clone(),
                source,
            })?;

            // Fetch next to the final name, then link into place, so an
            // interrupted fetch never looks cached
            let partial = path.with_extension(format!("{}.partial", self.gate.extension()));
            info!(key = %key, archive = %self.command.name(), "Fetching from archive");
            self.command
                .run(
                    &[
                        key.variable.clone(),
                        key.model.clone(),
                        key.scenario.clone(),
                        ensemble.to_string(),
                        partial.to_string_lossy().to_string(),
                    ],
                    None,
                )
                .await
                .map_err(|source| AcquisitionError::Fetch {
                    key: key.to_string(),
                    source,
                })?;

            if !partial.is_file() {
                return Err(AcquisitionError::NotFound {
                    key: key.to_string(),
                    location: partial,
                });
            }
            fs::rename(&partial, &path).map_err(|source| AcquisitionError::Io {
                path: path.clone(),
                source,
            })?;
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
