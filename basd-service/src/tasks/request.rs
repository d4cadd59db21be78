// Run Request
// Reads the sparse run request table into axes and lookup tables

use crate::artifacts::naming::{
    validate_ensemble, validate_name_field, validate_path_component, NamingError, Period,
};

use serde::Deserialize;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Failed to read run request: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Row {row}, column {column}: {source}")]
    InvalidCell {
        row: usize,
        column: &'static str,
        #[source]
        source: NamingError,
    },

    #[error("Row {row}, column {column}: '{value}' is not a boolean")]
    InvalidFlag {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("Column {0} has no values")]
    EmptyAxis(&'static str),
}

/// One line of the request table; every cell may be blank
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestRow {
    #[serde(rename = "ESM")]
    esm: Option<String>,
    #[serde(rename = "ESM_Input_Location")]
    esm_input_location: Option<String>,
    #[serde(rename = "Output_Location")]
    output_location: Option<String>,
    #[serde(rename = "Reference_Dataset")]
    reference_dataset: Option<String>,
    #[serde(rename = "Reference_Input_Location")]
    reference_input_location: Option<String>,
    #[serde(rename = "Variable")]
    variable: Option<String>,
    #[serde(rename = "Scenario")]
    scenario: Option<String>,
    #[serde(rename = "Ensemble")]
    ensemble: Option<String>,
    target_period: Option<String>,
    application_period: Option<String>,
    daily: Option<String>,
    monthly: Option<String>,
    stitched: Option<String>,
}

/// A (key, location) pair taken from one row of the request table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRow {
    pub key: String,
    pub location: Option<String>,
}

/// Everything the user asked for in one batch
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// File stem of the request table, used to name the manifest
    pub name: String,
    pub models: Vec<String>,
    pub variables: Vec<String>,
    pub scenarios: Vec<String>,
    /// Empty when the batch uses stitched trajectories
    pub ensembles: Vec<String>,
    pub references: Vec<String>,
    pub target_periods: Vec<Period>,
    pub application_periods: Vec<Period>,
    pub model_inputs: Vec<LookupRow>,
    pub reference_inputs: Vec<LookupRow>,
    pub model_outputs: Vec<LookupRow>,
    pub daily: bool,
    pub monthly: bool,
    pub stitched: bool,
}

fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn push_unique<T: PartialEq>(axis: &mut Vec<T>, value: T) {
    if !axis.contains(&value) {
        axis.push(value);
    }
}

fn parse_flag(row: usize, column: &'static str, value: &str) -> Result<bool, RequestError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(RequestError::InvalidFlag {
            row,
            column,
            value: value.to_string(),
        }),
    }
}

impl RunRequest {
    /// Read a request table from disk; the manifest is named after its stem
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RequestError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "run_manager".to_string());
        let file = std::fs::File::open(path)?;
        Self::from_reader(name, file)
    }

    pub fn from_reader(name: impl Into<String>, reader: impl io::Read) -> Result<Self, RequestError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut request = RunRequest {
            name: name.into(),
            models: Vec::new(),
            variables: Vec::new(),
            scenarios: Vec::new(),
            ensembles: Vec::new(),
            references: Vec::new(),
            target_periods: Vec::new(),
            application_periods: Vec::new(),
            model_inputs: Vec::new(),
            reference_inputs: Vec::new(),
            model_outputs: Vec::new(),
            daily: true,
            monthly: false,
            stitched: false,
        };
        let (mut daily, mut monthly, mut stitched) = (None, None, None);

        for (index, record) in csv_reader.deserialize::<RequestRow>().enumerate() {
            let row = record?;
            // Header is line 1
            let line = index + 2;

            let check = |column: &'static str, value: &str, name_field: bool| {
                let result = if name_field {
                    validate_name_field(column, value)
                } else {
                    validate_path_component(column, value)
                };
                result.map_err(|source| RequestError::InvalidCell {
                    row: line,
                    column,
                    source,
                })
            };

            if let Some(model) = cell(&row.esm) {
                check("ESM", model, false)?;
                push_unique(&mut request.models, model.to_string());
                request.model_inputs.push(LookupRow {
                    key: model.to_string(),
                    location: cell(&row.esm_input_location).map(str::to_string),
                });
                request.model_outputs.push(LookupRow {
                    key: model.to_string(),
                    location: cell(&row.output_location).map(str::to_string),
                });
            }
            if let Some(reference) = cell(&row.reference_dataset) {
                check("Reference_Dataset", reference, false)?;
                push_unique(&mut request.references, reference.to_string());
                request.reference_inputs.push(LookupRow {
                    key: reference.to_string(),
                    location: cell(&row.reference_input_location).map(str::to_string),
                });
            }
            if let Some(variable) = cell(&row.variable) {
                check("Variable", variable, true)?;
                push_unique(&mut request.variables, variable.to_string());
            }
            if let Some(scenario) = cell(&row.scenario) {
                check("Scenario", scenario, false)?;
                push_unique(&mut request.scenarios, scenario.to_string());
            }
            if let Some(ensemble) = cell(&row.ensemble) {
                validate_ensemble(ensemble).map_err(|source| RequestError::InvalidCell {
                    row: line,
                    column: "Ensemble",
                    source,
                })?;
                push_unique(&mut request.ensembles, ensemble.to_string());
            }
            for (column, value, axis) in [
                ("target_period", &row.target_period, &mut request.target_periods),
                ("application_period", &row.application_period, &mut request.application_periods),
            ] {
                if let Some(text) = cell(value) {
                    let period = text.parse::<Period>().map_err(|source| RequestError::InvalidCell {
                        row: line,
                        column,
                        source,
                    })?;
                    push_unique(axis, period);
                }
            }
            for (column, value, flag) in [
                ("daily", &row.daily, &mut daily),
                ("monthly", &row.monthly, &mut monthly),
                ("stitched", &row.stitched, &mut stitched),
            ] {
                if flag.is_some() {
                    continue;
                }
                if let Some(text) = cell(value) {
                    *flag = Some(parse_flag(line, column, text)?);
                }
            }
        }

        request.daily = daily.unwrap_or(true);
        request.monthly = monthly.unwrap_or(false);
        request.stitched = stitched.unwrap_or(false);
        request.validate()?;
        Ok(request)
    }

    fn validate(&mut self) -> Result<(), RequestError> {
        for (column, empty) in [
            ("ESM", self.models.is_empty()),
            ("Variable", self.variables.is_empty()),
            ("Scenario", self.scenarios.is_empty()),
            ("Reference_Dataset", self.references.is_empty()),
            ("target_period", self.target_periods.is_empty()),
            ("application_period", self.application_periods.is_empty()),
        ] {
            if empty {
                return Err(RequestError::EmptyAxis(column));
            }
        }

        if self.stitched {
            if !self.ensembles.is_empty() {
                warn!(
                    ensembles = ?self.ensembles,
                    "Stitched request lists ensembles; they are ignored"
                );
                self.ensembles.clear();
            }
        } else if self.ensembles.is_empty() {
            return Err(RequestError::EmptyAxis("Ensemble"));
        }
        Ok(())
    }
}
