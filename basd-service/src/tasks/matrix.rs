// Task Matrix Expansion
// Expands a run request into concrete task entries

use crate::artifacts::naming::{Member, Period};
use crate::tasks::request::{LookupRow, RunRequest};
use crate::transform::{is_extreme, TAS, TASRANGE, TASSKEW};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Why a candidate task could not be resolved
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("No {table} entry for '{key}'")]
    Missing { table: &'static str, key: String },

    #[error("{table} has {count} different locations for '{key}'")]
    Ambiguous {
        table: &'static str,
        key: String,
        count: usize,
    },

    #[error("Another task already produces the same artifacts ({0})")]
    DuplicateKey(String),
}

/// Where a task's base variables come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceKind {
    /// Files already on disk
    Local(PathBuf),
    /// Stitched trajectories generated by the Stitch stage
    Stitched(PathBuf),
    /// Fetched by (variable, model, scenario, ensemble)
    RemoteArchive,
}

/// One concrete combination; one manifest row, one scheduler array element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    #[serde(rename = "ESM")]
    pub model: String,
    #[serde(rename = "Variable")]
    pub variable: String,
    #[serde(rename = "Scenario")]
    pub scenario: String,
    #[serde(rename = "Ensemble")]
    pub ensemble: Option<String>,
    #[serde(rename = "Reference_Dataset")]
    pub reference: String,
    pub target_period: Period,
    pub application_period: Period,
    #[serde(rename = "ESM_Input_Location")]
    pub model_input: Option<PathBuf>,
    #[serde(rename = "Reference_Input_Location")]
    pub reference_input: PathBuf,
    #[serde(rename = "Output_Location")]
    pub output_location: PathBuf,
    pub daily: bool,
    pub monthly: bool,
    pub stitched: bool,
    /// tasmin/tasmax were requested and must be rebuilt from tas, tasrange, tasskew
    pub derive_minmax: bool,
}

impl TaskEntry {
    pub fn member(&self) -> Member {
        Member::from_ensemble(self.ensemble.as_deref())
    }

    /// Identity of the artifacts this task produces
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}/{}",
            self.model,
            self.variable,
            self.scenario,
            self.member(),
            self.reference,
            self.application_period
        )
    }

    /// Directory stitched trajectories for this model are written to
    pub fn stitched_dir(&self) -> PathBuf {
        match &self.model_input {
            Some(dir) => dir.clone(),
            None => self.output_location.join(&self.model).join("stitched"),
        }
    }

    pub fn data_source(&self) -> DataSourceKind {
        if self.stitched {
            DataSourceKind::Stitched(self.stitched_dir())
        } else if let Some(dir) = &self.model_input {
            DataSourceKind::Local(dir.clone())
        } else {
            DataSourceKind::RemoteArchive
        }
    }
}

impl fmt::Display for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A candidate that failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTask {
    pub label: String,
    pub reason: JoinError,
}

/// Result of expanding a request
#[derive(Debug, Clone, Default)]
pub struct TaskMatrix {
    pub entries: Vec<TaskEntry>,
    pub invalid: Vec<InvalidTask>,
    /// Size of the cross product before joins
    pub candidates: usize,
}

/// Request variables after replacing tasmin/tasmax by their decomposition
pub fn expand_variables(variables: &[String]) -> (Vec<String>, bool) {
    if !variables.iter().any(|v| is_extreme(v)) {
        return (variables.to_vec(), false);
    }

    let mut expanded: Vec<String> = variables
        .iter()
        .filter(|v| !is_extreme(v))
        .cloned()
        .collect();
    for derived in [TAS, TASRANGE, TASSKEW] {
        if !expanded.iter().any(|v| v == derived) {
            expanded.push(derived.to_string());
        }
    }
    (expanded, true)
}

/// Find the single distinct location paired with `key`
fn join(
    table: &'static str,
    rows: &[LookupRow],
    key: &str,
) -> Result<Option<String>, JoinError> {
    let mut matches: Vec<&Option<String>> = Vec::new();
    for row in rows.iter().filter(|r| r.key == key) {
        if !matches.contains(&&row.location) {
            matches.push(&row.location);
        }
    }

    match matches.len() {
        0 => Err(JoinError::Missing {
            table,
            key: key.to_string(),
        }),
        1 => Ok(matches[0].clone()),
        count => Err(JoinError::Ambiguous {
            table,
            key: key.to_string(),
            count,
        }),
    }
}

fn require(table: &'static str, key: &str, location: Option<String>) -> Result<PathBuf, JoinError> {
    location.map(PathBuf::from).ok_or_else(|| JoinError::Missing {
        table,
        key: key.to_string(),
    })
}

/// Task matrix expander
pub struct MatrixExpander;

impl MatrixExpander {
    /// Cross the request axes and resolve locations for every combination
    pub fn expand(request: &RunRequest) -> TaskMatrix {
        let (variables, derive_minmax) = expand_variables(&request.variables);
        let ensembles: Vec<Option<String>> = if request.stitched {
            vec![None]
        } else {
            request.ensembles.iter().cloned().map(Some).collect()
        };

        let mut matrix = TaskMatrix::default();
        let mut seen = HashSet::new();

        for model in &request.models {
            for variable in &variables {
                for scenario in &request.scenarios {
                    for ensemble in &ensembles {
                        for reference in &request.references {
                            for target in &request.target_periods {
                                for application in &request.application_periods {
                                    matrix.candidates += 1;
                                    let label = format!(
                                        "{}/{}/{}/{}/{}/{}/{}",
                                        model,
                                        variable,
                                        scenario,
                                        Member::from_ensemble(ensemble.as_deref()),
                                        reference,
                                        target,
                                        application
                                    );

                                    let resolved = Self::resolve(
                                        request,
                                        model,
                                        reference,
                                    )
                                    .map(|(model_input, reference_input, output_location)| {
                                        TaskEntry {
                                            model: model.clone(),
                                            variable: variable.clone(),
                                            scenario: scenario.clone(),
                                            ensemble: ensemble.clone(),
                                            reference: reference.clone(),
                                            target_period: *target,
                                            application_period: *application,
                                            model_input,
                                            reference_input,
                                            output_location,
                                            daily: request.daily,
                                            monthly: request.monthly,
                                            stitched: request.stitched,
                                            derive_minmax,
                                        }
                                    })
                                    .and_then(|entry| {
                                        if seen.insert(entry.key()) {
                                            Ok(entry)
                                        } else {
                                            Err(JoinError::DuplicateKey(entry.key()))
                                        }
                                    });

                                    match resolved {
                                        Ok(entry) => matrix.entries.push(entry),
                                        Err(reason) => {
                                            warn!(task = %label, %reason, "Excluding task");
                                            matrix.invalid.push(InvalidTask { label, reason });
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        matrix
    }

    fn resolve(
        request: &RunRequest,
        model: &str,
        reference: &str,
    ) -> Result<(Option<PathBuf>, PathBuf, PathBuf), JoinError> {
        let model_input = join("ESM_Input_Location", &request.model_inputs, model)?.map(PathBuf::from);
        let reference_input = require(
            "Reference_Input_Location",
            reference,
            join("Reference_Input_Location", &request.reference_inputs, reference)?,
        )?;
        let output_location = require(
            "Output_Location",
            model,
            join("Output_Location", &request.model_outputs, model)?,
        )?;
        Ok((model_input, reference_input, output_location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    fn lookup(key: &str, location: Option<&str>) -> LookupRow {
        LookupRow {
            key: key.to_string(),
            location: location.map(str::to_string),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn request() -> RunRequest {
        RunRequest {
            name: "run_manager".to_string(),
            models: strings(&["A", "B"]),
            variables: strings(&["pr"]),
            scenarios: strings(&["ssp126", "ssp245", "ssp585"]),
            ensembles: strings(&["r1i1p1f1", "r2i1p1f1"]),
            references: strings(&["W5E5v2", "CHELSA"]),
            target_periods: vec![period("1980-2014")],
            application_periods: vec![period("2015-2050"), period("2051-2100")],
            model_inputs: vec![lookup("A", Some("/in/A")), lookup("B", None)],
            reference_inputs: vec![
                lookup("W5E5v2", Some("/obs/W5E5v2")),
                lookup("CHELSA", Some("/obs/CHELSA")),
            ],
            model_outputs: vec![lookup("A", Some("/out/A")), lookup("B", Some("/out/B"))],
            daily: true,
            monthly: false,
            stitched: false,
        }
    }

    #[test]
    fn test_cross_product_size() {
        let matrix = MatrixExpander::expand(&request());

        // 2 models * 3 scenarios * 2 ensembles * 2 references * 2 application periods
        assert_eq!(matrix.candidates, 48);
        assert_eq!(matrix.entries.len(), 48);
        assert!(matrix.invalid.is_empty());

        let keys: HashSet<_> = matrix.entries.iter().map(|e| e.key()).collect();
        assert_eq!(keys.len(), 48);
    }

    #[test]
    fn test_locations_come_from_matching_lookup_row() {
        let matrix = MatrixExpander::expand(&request());

        for entry in &matrix.entries {
            assert_eq!(
                entry.output_location,
                PathBuf::from(format!("/out/{}", entry.model))
            );
            assert_eq!(
                entry.reference_input,
                PathBuf::from(format!("/obs/{}", entry.reference))
            );
            match entry.model.as_str() {
                "A" => assert_eq!(entry.data_source(), DataSourceKind::Local("/in/A".into())),
                _ => assert_eq!(entry.data_source(), DataSourceKind::RemoteArchive),
            }
        }
    }

    #[test]
    fn test_ambiguous_and_missing_joins_are_excluded() {
        let mut req = request();
        req.model_outputs.push(lookup("B", Some("/elsewhere/B")));
        req.reference_inputs = vec![lookup("W5E5v2", Some("/obs/W5E5v2")), lookup("CHELSA", None)];

        let matrix = MatrixExpander::expand(&req);

        assert_eq!(matrix.candidates, 48);
        // Only model A with W5E5v2 resolves
        assert_eq!(matrix.entries.len(), 12);
        assert_eq!(matrix.invalid.len(), 36);
        assert!(matrix.invalid.iter().any(|t| matches!(
            t.reason,
            JoinError::Ambiguous { table: "Output_Location", count: 2, .. }
        )));
        assert!(matrix.invalid.iter().any(|t| matches!(
            t.reason,
            JoinError::Missing { table: "Reference_Input_Location", .. }
        )));
    }

    #[test]
    fn test_repeated_identical_lookup_rows_are_one_match() {
        let mut req = request();
        req.model_outputs.push(lookup("A", Some("/out/A")));

        let matrix = MatrixExpander::expand(&req);
        assert!(matrix.invalid.is_empty());
    }

    #[test]
    fn test_extremes_are_replaced_by_decomposition() {
        let mut req = request();
        req.models = strings(&["X"]);
        req.model_inputs = vec![lookup("X", Some("/in/X"))];
        req.model_outputs = vec![lookup("X", Some("/out/X"))];
        req.variables = strings(&["tasmax"]);
        req.scenarios = strings(&["ssp245"]);
        req.ensembles = strings(&["r1i1p1f1"]);
        req.references = strings(&["W5E5"]);
        req.reference_inputs = vec![lookup("W5E5", Some("/obs/W5E5"))];
        req.application_periods = vec![period("2015-2100")];

        let matrix = MatrixExpander::expand(&req);

        let variables: Vec<_> = matrix.entries.iter().map(|e| e.variable.as_str()).collect();
        assert_eq!(variables, vec!["tas", "tasrange", "tasskew"]);
        assert!(matrix.entries.iter().all(|e| e.derive_minmax));
    }

    #[test]
    fn test_expand_variables_keeps_others() {
        let (vars, derive) = expand_variables(&strings(&["pr", "tasmin", "tas", "tasmax"]));
        assert_eq!(vars, strings(&["pr", "tas", "tasrange", "tasskew"]));
        assert!(derive);

        let (vars, derive) = expand_variables(&strings(&["pr"]));
        assert_eq!(vars, strings(&["pr"]));
        assert!(!derive);
    }

    #[test]
    fn test_stitched_tasks_have_no_ensemble() {
        let mut req = request();
        req.stitched = true;
        req.ensembles.clear();

        let matrix = MatrixExpander::expand(&req);

        assert_eq!(matrix.entries.len(), 24);
        assert!(matrix.entries.iter().all(|e| e.ensemble.is_none()));
        let b = matrix.entries.iter().find(|e| e.model == "B").unwrap();
        assert_eq!(
            b.data_source(),
            DataSourceKind::Stitched(PathBuf::from("/out/B/B/stitched"))
        );
    }

    #[test]
    fn test_second_target_period_collides() {
        let mut req = request();
        req.target_periods.push(period("1990-2014"));

        let matrix = MatrixExpander::expand(&req);

        assert_eq!(matrix.candidates, 96);
        assert_eq!(matrix.entries.len(), 48);
        assert!(matrix
            .invalid
            .iter()
            .all(|t| matches!(t.reason, JoinError::DuplicateKey(_))));
    }
}
