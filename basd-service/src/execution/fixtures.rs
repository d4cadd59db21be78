// Test Fixtures
// In-memory data source, stitch generator and adjustment backends for executor tests

use crate::adjust::{
    AdjustedOutput, Adjustment, AdjustmentBackend, AdjustmentError, AdjustmentInputs,
    AdjustmentRequest,
};
use crate::artifacts::gate::ArtifactGate;
use crate::artifacts::naming::HISTORICAL;
use crate::config::VariableParameters;
use crate::sources::{AcquisitionError, AcquisitionKey, DataSource};
use crate::stitch::{StitchError, StitchGenerator, StitchRequest};
use crate::tasks::TaskEntry;
use crate::transform::{GriddedDataset, TimeStamp, TAS, TASMAX, TASMIN};

use async_trait::async_trait;
use ndarray::Array3;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const SCENARIO: &str = "ssp245";

/// Years covered by generated stitched series
pub const STITCHED_YEARS: (i32, i32) = (2015, 2020);

fn years(scenario: &str) -> (i32, i32) {
    if scenario == HISTORICAL {
        (1980, 1983)
    } else {
        (2015, 2016)
    }
}

/// Two steps per year on a 2x2 grid
fn series(variable: &str, first: i32, last: i32, value: impl Fn(i32, usize, usize) -> f64) -> GriddedDataset {
    let mut time = Vec::new();
    for year in first..=last {
        time.push(TimeStamp::new(year, 1, 1));
        time.push(TimeStamp::new(year, 7, 1));
    }
    let values = Array3::from_shape_fn((time.len(), 2, 2), |(t, i, j)| {
        value(time[t].year, t, i * 2 + j)
    });
    GriddedDataset::new(variable, time, vec![-45.0, 45.0], vec![0.0, 180.0], values)
        .expect("fixture grid")
}

/// tas, tasmin and tasmax for a scenario; cell 3 has a zero daily range
pub fn base_triplet(scenario: &str) -> (GriddedDataset, GriddedDataset, GriddedDataset) {
    let (first, last) = years(scenario);
    triplet(first, last)
}

pub fn triplet(first: i32, last: i32) -> (GriddedDataset, GriddedDataset, GriddedDataset) {
    let tas_value =
        |year: i32, t: usize, cell: usize| 280.0 + cell as f64 + (year - 1980) as f64 * 0.1 + t as f64 * 0.01;
    let tas = series(TAS, first, last, tas_value);
    let tasmin = series(TASMIN, first, last, |y, t, c| {
        if c == 3 {
            tas_value(y, t, c)
        } else {
            tas_value(y, t, c) - 4.0 - 0.5 * c as f64
        }
    });
    let tasmax = series(TASMAX, first, last, |y, t, c| {
        if c == 3 {
            tas_value(y, t, c)
        } else {
            tas_value(y, t, c) + 3.0 + 0.25 * c as f64
        }
    });
    (tas, tasmin, tasmax)
}

fn generic(variable: &str, first: i32, last: i32) -> GriddedDataset {
    series(variable, first, last, |y, t, c| {
        10.0 + c as f64 + (y % 100) as f64 * 0.01 + t as f64 * 0.001
    })
}

/// Task for model X against W5E5, reading base data from the archive
pub fn task(variable: &str, root: &Path) -> TaskEntry {
    TaskEntry {
        model: "X".to_string(),
        variable: variable.to_string(),
        scenario: SCENARIO.to_string(),
        ensemble: Some("r1i1p1f1".to_string()),
        reference: "W5E5".to_string(),
        target_period: "1981-1982".parse().expect("period"),
        application_period: "2015-2016".parse().expect("period"),
        model_input: None,
        reference_input: root.join("obs"),
        output_location: root.join("out"),
        daily: true,
        monthly: false,
        stitched: false,
        derive_minmax: true,
    }
}

/// Stitched task whose target and application periods both lie in one
/// generated ssp245 series
pub fn stitched_task(variable: &str, root: &Path) -> TaskEntry {
    TaskEntry {
        ensemble: None,
        target_period: "2015-2017".parse().expect("period"),
        application_period: "2018-2020".parse().expect("period"),
        stitched: true,
        ..task(variable, root)
    }
}

/// Observations for each variable under `<root>/obs`
pub fn write_observed(root: &Path, variables: &[&str]) {
    write_observed_years(root, variables, 1980, 1983);
}

pub fn write_observed_years(root: &Path, variables: &[&str], first: i32, last: i32) {
    let gate = ArtifactGate::default();
    let dir: PathBuf = root.join("obs");
    for variable in variables {
        let data = generic(variable, first, last);
        let name = format!("{}_W5E5_{}_{}.json", variable, first, last);
        gate.write_if_absent(&dir.join(name), &data)
            .expect("write observed");
    }
}

/// Archive stand-in keyed by (variable, scenario)
#[derive(Default)]
pub struct MemorySource {
    data: HashMap<(String, String), GriddedDataset>,
    failing: HashSet<String>,
}

impl MemorySource {
    pub fn with_variables(variables: &[&str]) -> Self {
        let mut source = Self::default();
        for scenario in [HISTORICAL, SCENARIO] {
            let (first, last) = years(scenario);
            let (tas, tasmin, tasmax) = base_triplet(scenario);
            for variable in variables {
                let data = match *variable {
                    TAS => tas.clone(),
                    TASMIN => tasmin.clone(),
                    TASMAX => tasmax.clone(),
                    other => generic(other, first, last),
                };
                source
                    .data
                    .insert((variable.to_string(), scenario.to_string()), data);
            }
        }
        source
    }

    /// Every fetch of `variable` fails
    pub fn failing(mut self, variable: &str) -> Self {
        self.failing.insert(variable.to_string());
        self
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn contains(&self, key: &AcquisitionKey) -> bool {
        self.data
            .contains_key(&(key.variable.clone(), key.scenario.clone()))
    }

    async fn fetch(&self, key: &AcquisitionKey) -> Result<GriddedDataset, AcquisitionError> {
        if self.failing.contains(&key.variable) {
            return Err(AcquisitionError::Io {
                path: PathBuf::from("memory"),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
            });
        }
        self.data
            .get(&(key.variable.clone(), key.scenario.clone()))
            .cloned()
            .ok_or_else(|| AcquisitionError::NotFound {
                key: key.to_string(),
                location: PathBuf::from("memory"),
            })
    }
}

/// Generator returning fixture series over [`STITCHED_YEARS`]
#[derive(Default)]
pub struct FixtureStitcher {
    calls: AtomicUsize,
}

impl FixtureStitcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StitchGenerator for FixtureStitcher {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn generate(
        &self,
        request: &StitchRequest,
    ) -> Result<BTreeMap<String, GriddedDataset>, StitchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (first, last) = STITCHED_YEARS;
        let (tas, tasmin, tasmax) = triplet(first, last);
        Ok(request
            .variables
            .iter()
            .map(|variable| {
                let data = match variable.as_str() {
                    TAS => tas.clone(),
                    TASMIN => tasmin.clone(),
                    TASMAX => tasmax.clone(),
                    other => generic(other, first, last),
                };
                (variable.clone(), data)
            })
            .collect())
    }
}

/// Backend whose adjusted and downscaled outputs equal its input
#[derive(Default)]
pub struct IdentityAdjuster {
    prepared: AtomicUsize,
    through_work_dir: bool,
    without_monthly: bool,
}

impl IdentityAdjuster {
    /// Stage the application series in the work dir and read it back after a
    /// pause, the way a file-exchanging backend does
    pub fn through_work_dir() -> Self {
        Self {
            through_work_dir: true,
            ..Self::default()
        }
    }

    /// Never return monthly aggregates, even when asked for them
    pub fn without_monthly() -> Self {
        Self {
            without_monthly: true,
            ..Self::default()
        }
    }

    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

struct IdentityAdjustment {
    application: GriddedDataset,
    monthly: bool,
}

impl IdentityAdjustment {
    fn output(&self, data: &GriddedDataset) -> AdjustedOutput {
        AdjustedOutput {
            daily: data.clone(),
            monthly: self.monthly.then(|| data.clone()),
        }
    }
}

#[async_trait]
impl Adjustment for IdentityAdjustment {
    async fn adjust(&mut self) -> Result<AdjustedOutput, AdjustmentError> {
        Ok(self.output(&self.application))
    }

    async fn downscale(
        &mut self,
        adjusted: &GriddedDataset,
        _parameters: &VariableParameters,
    ) -> Result<AdjustedOutput, AdjustmentError> {
        Ok(self.output(adjusted))
    }
}

#[async_trait]
impl AdjustmentBackend for IdentityAdjuster {
    fn name(&self) -> &str {
        "identity"
    }

    async fn prepare(
        &self,
        inputs: AdjustmentInputs,
        request: AdjustmentRequest,
    ) -> Result<Box<dyn Adjustment>, AdjustmentError> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        let application = if self.through_work_dir {
            let gate = ArtifactGate::default();
            let path = request.work_dir.join("sim_application.json");
            gate.write_if_absent(&path, &inputs.sim_application)?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            gate.read(&path)?
        } else {
            inputs.sim_application
        };
        Ok(Box::new(IdentityAdjustment {
            application,
            monthly: request.monthly && !self.without_monthly,
        }))
    }
}

/// Identity backend that panics while preparing one variable
pub struct PanickingAdjuster {
    variable: String,
    inner: IdentityAdjuster,
}

impl PanickingAdjuster {
    pub fn on(variable: &str) -> Self {
        Self {
            variable: variable.to_string(),
            inner: IdentityAdjuster::default(),
        }
    }
}

#[async_trait]
impl AdjustmentBackend for PanickingAdjuster {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn prepare(
        &self,
        inputs: AdjustmentInputs,
        request: AdjustmentRequest,
    ) -> Result<Box<dyn Adjustment>, AdjustmentError> {
        if request.variable == self.variable {
            panic!("backend crashed on {}", request.variable);
        }
        self.inner.prepare(inputs, request).await
    }
}
