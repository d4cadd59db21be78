// Run Configuration
// Loads and validates the YAML run configuration

pub mod models;

pub use models::{
    ArchiveConfig, AttributesConfig, ChunkSize, ChunkSpec, CommandSpec, EncodingConfig,
    RunConfig, SchedulerConfig, StitchingConfig, VariableParameters,
};

use crate::transform::ZeroRangePolicy;

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl RunConfig {
    /// Load a configuration file. Relative paths inside it are taken
    /// relative to the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::parse_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = if content.trim().is_empty() {
            RunConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let ZeroRangePolicy::Fill(value) = self.zero_range_policy {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(
                    "zero_range_policy fill value must be finite".to_string(),
                ));
            }
        }
        if self.scheduler.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.scheduler.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "scheduler.command must not be empty".to_string(),
            ));
        }
        for (name, spec) in [
            ("adjustment", self.adjustment.as_ref()),
            ("archive", self.archive.as_ref().map(|a| &a.command)),
            ("stitching", self.stitching.as_ref().map(|s| &s.command)),
        ] {
            if let Some(spec) = spec {
                if spec.program.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("{}.program must not be empty", name)));
                }
            }
        }
        if let Some(stitching) = &self.stitching {
            if stitching.chunk_years == 0 {
                return Err(ConfigError::Invalid(
                    "stitching.chunk_years must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(archive) = &mut self.archive {
            resolve(&mut archive.cache_dir);
        }
        if let Some(stitching) = &mut self.stitching {
            resolve(&mut stitching.trajectory);
        }
    }
}
