// Run Configuration Models
// Serde models for the YAML run configuration

use crate::artifacts::naming::{Period, Resolution};
use crate::transform::{GridDims, OutputAttributes, ZeroRangePolicy};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Parameters that must not reach the downscaling step for solar radiation
const RSDS_DOWNSCALING_EXCLUDED: [&str; 3] = ["upper_bound", "upper_threshold", "trend_preservation"];

/// Full run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Adjustment parameters keyed by variable
    pub parameters: BTreeMap<String, VariableParameters>,

    /// Output storage hints
    pub encoding: EncodingConfig,

    /// Working chunk sizes handed to the adjustment backend
    pub chunks: ChunkSpec,

    /// Metadata attached to outputs
    pub attributes: AttributesConfig,

    /// What tasskew becomes where the daily range is zero
    pub zero_range_policy: ZeroRangePolicy,

    /// Batch scheduler settings
    pub scheduler: SchedulerConfig,

    /// External bias adjustment / downscaling program
    pub adjustment: Option<CommandSpec>,

    /// External archive fetcher for tasks without a local input location
    pub archive: Option<ArchiveConfig>,

    /// External stitching generator
    pub stitching: Option<StitchingConfig>,
}

impl RunConfig {
    /// Adjustment parameters for a variable (empty when not configured)
    pub fn parameters_for(&self, variable: &str) -> VariableParameters {
        self.parameters.get(variable).cloned().unwrap_or_default()
    }
}

/// Free-form parameter map passed through to the adjustment backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableParameters(pub BTreeMap<String, serde_json::Value>);

impl VariableParameters {
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    /// Parameter set for the downscaling step.
    ///
    /// rsds is not scaled to a bounded interval when downscaling, so its bound
    /// and trend settings are removed.
    pub fn for_downscaling(&self, variable: &str) -> VariableParameters {
        let mut params = self.clone();
        if variable == "rsds" {
            for name in RSDS_DOWNSCALING_EXCLUDED {
                params.0.remove(name);
            }
        }
        params
    }
}

/// A chunk length, or the full length of the dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChunkSizeRepr", into = "ChunkSizeRepr")]
pub enum ChunkSize {
    Fixed(usize),
    Max,
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::Max
    }
}

impl ChunkSize {
    pub fn resolve(&self, dimension: usize) -> usize {
        match self {
            ChunkSize::Fixed(size) => *size,
            ChunkSize::Max => dimension,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ChunkSizeRepr {
    Number(usize),
    Text(String),
}

impl TryFrom<ChunkSizeRepr> for ChunkSize {
    type Error = String;

    fn try_from(repr: ChunkSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            ChunkSizeRepr::Number(0) => Err("chunk size must be positive".to_string()),
            ChunkSizeRepr::Number(n) => Ok(ChunkSize::Fixed(n)),
            ChunkSizeRepr::Text(s) if s.eq_ignore_ascii_case("max") => Ok(ChunkSize::Max),
            ChunkSizeRepr::Text(s) => s
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(ChunkSize::Fixed)
                .ok_or_else(|| format!("invalid chunk size '{}': expected a positive integer or \"max\"", s)),
        }
    }
}

impl From<ChunkSize> for ChunkSizeRepr {
    fn from(size: ChunkSize) -> Self {
        match size {
            ChunkSize::Fixed(n) => ChunkSizeRepr::Number(n),
            ChunkSize::Max => ChunkSizeRepr::Text("max".to_string()),
        }
    }
}

/// Chunk sizes per dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSpec {
    pub time: ChunkSize,
    pub lat: ChunkSize,
    pub lon: ChunkSize,
}

impl ChunkSpec {
    /// Concrete sizes for data of the given shape; "max" becomes the dimension length
    pub fn resolve(&self, dims: GridDims) -> [usize; 3] {
        [
            self.time.resolve(dims.time),
            self.lat.resolve(dims.lat),
            self.lon.resolve(dims.lon),
        ]
    }
}

/// Output encoding settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub chunks: ChunkSpec,
    /// Extra codec options copied verbatim into each output's encoding
    pub options: BTreeMap<String, serde_json::Value>,
}

impl EncodingConfig {
    /// Encoding map for an output of the given shape
    pub fn for_dataset(&self, dims: GridDims) -> BTreeMap<String, serde_json::Value> {
        let mut encoding = self.options.clone();
        encoding.insert(
            "chunksizes".to_string(),
            serde_json::json!(self.chunks.resolve(dims)),
        );
        encoding
    }
}

/// Output metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributesConfig {
    pub global_daily: BTreeMap<String, String>,
    pub global_monthly: BTreeMap<String, String>,
    pub variables: BTreeMap<String, BTreeMap<String, String>>,
}

impl AttributesConfig {
    pub fn for_resolution(&self, resolution: Resolution) -> OutputAttributes {
        let global = match resolution {
            Resolution::Daily => self.global_daily.clone(),
            Resolution::Monthly => self.global_monthly.clone(),
        };
        OutputAttributes {
            global,
            variables: self.variables.clone(),
        }
    }
}

/// Settings for rendering batch job scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub account: Option<String>,
    pub partition: Option<String>,
    /// Wall time per array element
    pub time: String,
    /// Array elements allowed to run at once
    pub max_concurrent: usize,
    pub mail_user: Option<String>,
    pub mail_type: Option<String>,
    pub cpus_per_task: Option<u32>,
    pub memory: Option<String>,
    /// Shell lines run before the task (module loads, environment activation)
    pub setup: Vec<String>,
    /// How job scripts invoke this tool
    pub command: String,
    /// Directory for scheduler log files
    pub log_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            account: None,
            partition: None,
            time: "24:00:00".to_string(),
            max_concurrent: 20,
            mail_user: None,
            mail_type: None,
            cpus_per_task: None,
            memory: None,
            setup: Vec::new(),
            command: "basd".to_string(),
            log_dir: PathBuf::from(".out"),
        }
    }
}

/// An external program invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Remote archive fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub command: CommandSpec,
    /// Where fetched datasets are kept between tasks
    pub cache_dir: PathBuf,
}

/// Stitched trajectory generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchingConfig {
    pub command: CommandSpec,
    /// CSV with `year` and `temp` columns
    pub trajectory: PathBuf,
    /// Experiment name recorded on the generated data
    pub experiment: String,
    #[serde(default = "default_trajectory_source")]
    pub trajectory_source: String,
    #[serde(default = "default_ensemble_label")]
    pub ensemble_label: String,
    /// Length of the archive segments recombined by the generator
    #[serde(default = "default_chunk_years")]
    pub chunk_years: u32,
    /// Period the trajectory anomaly is taken against
    #[serde(default = "default_baseline")]
    pub baseline: Period,
}

fn default_trajectory_source() -> String {
    "user".to_string()
}

fn default_ensemble_label() -> String {
    "traj1".to_string()
}

fn default_chunk_years() -> u32 {
    9
}

fn default_baseline() -> Period {
    Period {
        start: 1995,
        end: 2014,
    }
}
