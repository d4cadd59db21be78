// Canonical Artifact Naming
// Deterministic file locations for every (model, member, reference, scenario, stage, variable, resolution, period)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Member label used in place of an ensemble for stitched trajectories
pub const STITCHED_MEMBER: &str = "STITCHES";

/// Scenario label of the reference segment of directly-downloaded model data
pub const HISTORICAL: &str = "historical";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("invalid period '{0}': expected YYYY-YYYY")]
    InvalidPeriod(String),

    #[error("period '{0}' ends before it starts")]
    ReversedPeriod(String),

    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} '{value}' contains '{found}', which cannot appear in an artifact name")]
    ForbiddenCharacter {
        field: &'static str,
        value: String,
        found: char,
    },

    #[error("ensemble '{0}' is reserved for stitched data")]
    ReservedMember(String),
}

/// Inclusive year range written as "YYYY-YYYY"
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub start: i32,
    pub end: i32,
}

impl Period {
    pub fn new(start: i32, end: i32) -> Result<Self, NamingError> {
        if end < start {
            return Err(NamingError::ReversedPeriod(format!("{}-{}", start, end)));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.start && year <= self.end
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for Period {
    type Err = NamingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (start, end) = trimmed
            .split_once('-')
            .ok_or_else(|| NamingError::InvalidPeriod(trimmed.to_string()))?;

        let parse_year = |part: &str| -> Result<i32, NamingError> {
            let part = part.trim();
            if part.len() != 4 || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(NamingError::InvalidPeriod(trimmed.to_string()));
            }
            part.parse()
                .map_err(|_| NamingError::InvalidPeriod(trimmed.to_string()))
        };

        Period::new(parse_year(start)?, parse_year(end)?)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ensemble member, or the stitched marker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Member {
    Ensemble(String),
    Stitched,
}

impl Member {
    pub fn from_ensemble(ensemble: Option<&str>) -> Self {
        match ensemble {
            Some(name) => Member::Ensemble(name.to_string()),
            None => Member::Stitched,
        }
    }

    pub fn ensemble(&self) -> Option<&str> {
        match self {
            Member::Ensemble(name) => Some(name),
            Member::Stitched => None,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Ensemble(name) => f.write_str(name),
            Member::Stitched => f.write_str(STITCHED_MEMBER),
        }
    }
}

/// Pipeline stage directory an artifact lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageDir {
    /// Derived from model data before adjustment
    Raw,
    /// Bias adjusted
    Ba,
    /// Bias adjusted and statistically downscaled
    Basd,
}

impl StageDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageDir::Raw => "raw",
            StageDir::Ba => "ba",
            StageDir::Basd => "basd",
        }
    }
}

impl fmt::Display for StageDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Daily,
    Monthly,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Daily => "daily",
            Resolution::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that identifies one persisted artifact.
///
/// The path is a pure function of these fields, so two tasks computing the
/// same artifact always meet at the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub model: String,
    pub member: Member,
    pub reference: String,
    pub scenario: String,
    pub stage_dir: StageDir,
    pub variable: String,
    pub resolution: Resolution,
    pub period: Period,
}

impl ArtifactKey {
    /// `<model>_<member>_<reference>_<scenario>_<variable>_global_<resolution>_<start>_<end>.<ext>`
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "{}_{}_{}_{}_{}_global_{}_{}_{}.{}",
            self.model,
            self.member,
            self.reference,
            self.scenario,
            self.variable,
            self.resolution,
            self.period.start,
            self.period.end,
            extension
        )
    }

    /// `<reference>/<model>/<scenario>/<stage_dir>`
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(&self.reference)
            .join(&self.model)
            .join(&self.scenario)
            .join(self.stage_dir.as_str())
    }

    pub fn path(&self, output_root: &Path, extension: &str) -> PathBuf {
        output_root
            .join(self.relative_dir())
            .join(self.file_name(extension))
    }

    pub fn with_variable(&self, variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
            ..self.clone()
        }
    }

    pub fn with_stage(&self, stage_dir: StageDir, resolution: Resolution) -> Self {
        Self {
            stage_dir,
            resolution,
            ..self.clone()
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{} {} {}",
            self.model,
            self.member,
            self.reference,
            self.scenario,
            self.stage_dir,
            self.variable,
            self.resolution,
            self.period
        )
    }
}

/// Check a value that becomes a directory name
pub fn validate_path_component(field: &'static str, value: &str) -> Result<(), NamingError> {
    if value.trim().is_empty() {
        return Err(NamingError::Empty { field });
    }
    if let Some(found) = value.chars().find(|c| matches!(c, '/' | '\\')) {
        return Err(NamingError::ForbiddenCharacter {
            field,
            value: value.to_string(),
            found,
        });
    }
    if value == "." || value == ".." {
        return Err(NamingError::ForbiddenCharacter {
            field,
            value: value.to_string(),
            found: '.',
        });
    }
    Ok(())
}

/// Check a value that only appears inside a file name.
///
/// Member and variable are the only name fields not also fixed by the
/// directory, so an underscore in them could make two keys collide.
pub fn validate_name_field(field: &'static str, value: &str) -> Result<(), NamingError> {
    validate_path_component(field, value)?;
    if value.contains('_') {
        return Err(NamingError::ForbiddenCharacter {
            field,
            value: value.to_string(),
            found: '_',
        });
    }
    Ok(())
}

/// Check an ensemble name; the stitched marker cannot be requested directly
pub fn validate_ensemble(value: &str) -> Result<(), NamingError> {
    validate_name_field("Ensemble", value)?;
    if value == STITCHED_MEMBER {
        return Err(NamingError::ReservedMember(value.to_string()));
    }
    Ok(())
}
