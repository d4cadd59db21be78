// Gridded Dataset
// In-memory (time, lat, lon) series tagged with a variable name and metadata

use crate::artifacts::naming::Period;

use ndarray::{concatenate, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised when building or combining datasets
#[derive(Debug, Error, PartialEq)]
pub enum DatasetError {
    #[error("values have shape {actual:?} but coordinates describe {expected:?}")]
    ShapeMismatch {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("datasets are not on the same grid: {0}")]
    GridMismatch(String),

    #[error("expected variable '{expected}', found '{found}'")]
    VariableMismatch { expected: String, found: String },

    #[error("no time steps of '{variable}' fall within {period}")]
    EmptySelection { variable: String, period: Period },

    #[error("nothing to concatenate")]
    NothingToConcatenate,
}

/// A calendar time step. Daily data uses the day of month, monthly data uses day 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeStamp {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl TimeStamp {
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Dimension lengths of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    pub time: usize,
    pub lat: usize,
    pub lon: usize,
}

/// A gridded time series for one variable.
///
/// Missing cells are stored as NaN in `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedDataset {
    pub variable: String,
    pub time: Vec<TimeStamp>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    pub values: Array3<f64>,
    /// Global (provenance) attributes
    pub attributes: BTreeMap<String, String>,
    /// Attributes of the data variable itself (units, description, ...)
    pub variable_attributes: BTreeMap<String, String>,
    /// Storage hints handed to the codec (chunk sizes, compression, ...)
    pub encoding: BTreeMap<String, serde_json::Value>,
}

impl GriddedDataset {
    /// Build a dataset, checking that `values` matches the coordinate lengths
    pub fn new(
        variable: impl Into<String>,
        time: Vec<TimeStamp>,
        lat: Vec<f64>,
        lon: Vec<f64>,
        values: Array3<f64>,
    ) -> Result<Self, DatasetError> {
        let expected = [time.len(), lat.len(), lon.len()];
        let shape = values.shape();
        let actual = [shape[0], shape[1], shape[2]];
        if expected != actual {
            return Err(DatasetError::ShapeMismatch { expected, actual });
        }

        Ok(Self {
            variable: variable.into(),
            time,
            lat,
            lon,
            values,
            attributes: BTreeMap::new(),
            variable_attributes: BTreeMap::new(),
            encoding: BTreeMap::new(),
        })
    }

    pub fn dims(&self) -> GridDims {
        GridDims {
            time: self.time.len(),
            lat: self.lat.len(),
            lon: self.lon.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// First and last year covered by the time axis
    pub fn year_span(&self) -> Option<(i32, i32)> {
        let first = self.time.first()?;
        let last = self.time.last()?;
        Some((first.year, last.year))
    }

    /// Check that two datasets share time, lat and lon coordinates
    pub fn ensure_aligned(&self, other: &GriddedDataset) -> Result<(), DatasetError> {
        if self.time != other.time {
            return Err(DatasetError::GridMismatch(format!(
                "'{}' has {} time steps, '{}' has {} (or they differ in dates)",
                self.variable,
                self.time.len(),
                other.variable,
                other.time.len()
            )));
        }
        if self.lat != other.lat || self.lon != other.lon {
            return Err(DatasetError::GridMismatch(format!(
                "'{}' and '{}' have different lat/lon coordinates",
                self.variable, other.variable
            )));
        }
        Ok(())
    }

    /// Check the variable name, as datasets read from disk may hold anything
    pub fn expect_variable(&self, expected: &str) -> Result<(), DatasetError> {
        if self.variable != expected {
            return Err(DatasetError::VariableMismatch {
                expected: expected.to_string(),
                found: self.variable.clone(),
            });
        }
        Ok(())
    }

    /// Keep only the time steps whose year lies within `period` (inclusive)
    pub fn select_years(&self, period: &Period) -> Result<GriddedDataset, DatasetError> {
        let indices: Vec<usize> = self
            .time
            .iter()
            .enumerate()
            .filter(|(_, t)| period.contains(t.year))
            .map(|(i, _)| i)
            .collect();

        if indices.is_empty() {
            return Err(DatasetError::EmptySelection {
                variable: self.variable.clone(),
                period: *period,
            });
        }

        Ok(GriddedDataset {
            variable: self.variable.clone(),
            time: indices.iter().map(|&i| self.time[i]).collect(),
            lat: self.lat.clone(),
            lon: self.lon.clone(),
            values: self.values.select(Axis(0), &indices),
            attributes: self.attributes.clone(),
            variable_attributes: self.variable_attributes.clone(),
            encoding: self.encoding.clone(),
        })
    }

    /// Join datasets split across files along the time axis, ordered by their first time step
    pub fn concat_time(mut parts: Vec<GriddedDataset>) -> Result<GriddedDataset, DatasetError> {
        if parts.is_empty() {
            return Err(DatasetError::NothingToConcatenate);
        }
        parts.sort_by_key(|p| p.time.first().copied());

        let first = &parts[0];
        for part in &parts[1..] {
            part.expect_variable(&first.variable)?;
            if part.lat != first.lat || part.lon != first.lon {
                return Err(DatasetError::GridMismatch(format!(
                    "file segments of '{}' have different lat/lon coordinates",
                    first.variable
                )));
            }
        }

        let views: Vec<_> = parts.iter().map(|p| p.values.view()).collect();
        let values = concatenate(Axis(0), &views)
            .map_err(|e| DatasetError::GridMismatch(e.to_string()))?;
        let time = parts.iter().flat_map(|p| p.time.iter().copied()).collect();

        let mut joined = GriddedDataset::new(
            first.variable.clone(),
            time,
            first.lat.clone(),
            first.lon.clone(),
            values,
        )?;
        joined.attributes = first.attributes.clone();
        joined.variable_attributes = first.variable_attributes.clone();
        joined.encoding = first.encoding.clone();
        Ok(joined)
    }

    /// Same grid and time axis, new variable name and values, no metadata
    pub fn derive(&self, variable: impl Into<String>, values: Array3<f64>) -> Result<Self, DatasetError> {
        GriddedDataset::new(
            variable,
            self.time.clone(),
            self.lat.clone(),
            self.lon.clone(),
            values,
        )
    }

    pub fn with_attributes(
        mut self,
        global: &BTreeMap<String, String>,
        variable: &BTreeMap<String, String>,
    ) -> Self {
        self.attributes = global.clone();
        self.variable_attributes = variable.clone();
        self
    }
}
