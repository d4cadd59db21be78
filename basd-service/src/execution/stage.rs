// Pipeline Stages
// The four batch stages and which tasks each one applies to

use crate::tasks::TaskEntry;
use crate::transform::{is_decomposed, TAS};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Stage {
    /// Generate synthetic model series following a temperature trajectory
    Stitch,
    /// Decompose tas/tasmin/tasmax into tasrange/tasskew
    DeriveRangeSkew,
    /// Bias adjust and downscale one variable
    AdjustAndDownscale,
    /// Reconstruct tasmin/tasmax from the adjusted decomposition
    DeriveMinMax,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Stitch,
        Stage::DeriveRangeSkew,
        Stage::AdjustAndDownscale,
        Stage::DeriveMinMax,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Stitch => "stitch",
            Stage::DeriveRangeSkew => "derive-range-skew",
            Stage::AdjustAndDownscale => "adjust-downscale",
            Stage::DeriveMinMax => "derive-min-max",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Stage::Stitch => "Generate stitched trajectories",
            Stage::DeriveRangeSkew => "Derive tasrange and tasskew",
            Stage::AdjustAndDownscale => "Bias adjust and downscale",
            Stage::DeriveMinMax => "Derive tasmin and tasmax",
        }
    }

    /// Stages that must have succeeded before this one, when they are part of the batch
    pub fn prerequisites(&self) -> &'static [Stage] {
        match self {
            Stage::Stitch => &[],
            Stage::DeriveRangeSkew => &[Stage::Stitch],
            Stage::AdjustAndDownscale => &[Stage::DeriveRangeSkew, Stage::Stitch],
            Stage::DeriveMinMax => &[Stage::AdjustAndDownscale],
        }
    }

    /// Whether this stage has work to do for `task`
    pub fn applies_to(&self, task: &TaskEntry) -> bool {
        match self {
            Stage::Stitch => task.stitched,
            Stage::DeriveRangeSkew => is_decomposed(&task.variable),
            Stage::AdjustAndDownscale => true,
            Stage::DeriveMinMax => task.derive_minmax && task.variable == TAS,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown stage '{0}' (expected one of: stitch, derive-range-skew, adjust-downscale, derive-min-max)")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == normalized)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

impl TryFrom<String> for Stage {
    type Error = UnknownStage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        stage.name().to_string()
    }
}
