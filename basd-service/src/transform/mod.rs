// Variable Transform Engine
// Converts between (tas, tasmin, tasmax) and (tas, tasrange, tasskew)

pub mod dataset;

pub use dataset::{DatasetError, GridDims, GriddedDataset, TimeStamp};

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

pub const TAS: &str = "tas";
pub const TASMIN: &str = "tasmin";
pub const TASMAX: &str = "tasmax";
pub const TASRANGE: &str = "tasrange";
pub const TASSKEW: &str = "tasskew";

/// Variable attribute naming the zero-range policy applied to a tasskew dataset
pub const ZERO_RANGE_POLICY_ATTR: &str = "zero_range_policy";

/// Errors raised by the transforms
#[derive(Debug, Error, PartialEq)]
pub enum TransformError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// What tasskew becomes where tasmax == tasmin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroRangePolicy {
    /// Write this finite sentinel
    Fill(f64),
    /// Mark the cell as missing
    Mask,
}

impl Default for ZeroRangePolicy {
    fn default() -> Self {
        ZeroRangePolicy::Fill(0.0)
    }
}

impl fmt::Display for ZeroRangePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZeroRangePolicy::Fill(value) => write!(f, "fill:{}", value),
            ZeroRangePolicy::Mask => write!(f, "mask"),
        }
    }
}

/// Attributes the calling stage wants on the transform outputs
#[derive(Debug, Clone, Default)]
pub struct OutputAttributes {
    pub global: BTreeMap<String, String>,
    pub variables: BTreeMap<String, BTreeMap<String, String>>,
}

impl OutputAttributes {
    pub fn for_variable(&self, variable: &str) -> BTreeMap<String, String> {
        self.variables.get(variable).cloned().unwrap_or_default()
    }
}

/// Cell counts gathered while decomposing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformSummary {
    pub cells: usize,
    /// Cells where tasmax == tasmin
    pub zero_range: usize,
    /// Cells where tasmax < tasmin
    pub inverted_range: usize,
    /// Cells with a non-finite input
    pub missing: usize,
}

/// Forward transform output
#[derive(Debug, Clone)]
pub struct RangeSkew {
    pub tasrange: GriddedDataset,
    pub tasskew: GriddedDataset,
    pub summary: TransformSummary,
}

/// Inverse transform output
#[derive(Debug, Clone)]
pub struct MinMax {
    pub tasmin: GriddedDataset,
    pub tasmax: GriddedDataset,
}

/// Decompose daily extremes into range and skew.
///
/// `tasrange = tasmax - tasmin` and `tasskew = (tas - tasmin) / tasrange`.
/// Where the range is zero the skew is undefined and `policy` decides the
/// stored value. The policy is written into the tasskew variable attributes.
pub fn derive_rangeskew(
    tas: &GriddedDataset,
    tasmin: &GriddedDataset,
    tasmax: &GriddedDataset,
    policy: ZeroRangePolicy,
    attributes: &OutputAttributes,
) -> Result<RangeSkew, TransformError> {
    tas.ensure_aligned(tasmin)?;
    tas.ensure_aligned(tasmax)?;

    let shape = tas.values.raw_dim();
    let mut range = Array3::<f64>::zeros(shape);
    let mut skew = Array3::<f64>::zeros(shape);
    let mut summary = TransformSummary::default();

    Zip::from(&mut range)
        .and(&mut skew)
        .and(&tas.values)
        .and(&tasmin.values)
        .and(&tasmax.values)
        .for_each(|r, s, &mean, &low, &high| {
            summary.cells += 1;
            if !(mean.is_finite() && low.is_finite() && high.is_finite()) {
                summary.missing += 1;
                *r = f64::NAN;
                *s = f64::NAN;
                return;
            }

            let diff = high - low;
            *r = diff;
            if diff == 0.0 {
                summary.zero_range += 1;
                *s = match policy {
                    ZeroRangePolicy::Fill(value) => value,
                    ZeroRangePolicy::Mask => f64::NAN,
                };
                return;
            }
            if diff < 0.0 {
                summary.inverted_range += 1;
            }
            *s = (mean - low) / diff;
        });

    if summary.inverted_range > 0 {
        warn!(
            cells = summary.inverted_range,
            "tasmax is below tasmin in some cells; range is negative there"
        );
    }

    let tasrange = tas
        .derive(TASRANGE, range)?
        .with_attributes(&attributes.global, &attributes.for_variable(TASRANGE));

    let mut skew_attributes = attributes.for_variable(TASSKEW);
    skew_attributes.insert(ZERO_RANGE_POLICY_ATTR.to_string(), policy.to_string());
    let tasskew = tas
        .derive(TASSKEW, skew)?
        .with_attributes(&attributes.global, &skew_attributes);

    Ok(RangeSkew {
        tasrange,
        tasskew,
        summary,
    })
}

/// Reconstruct daily extremes from range and skew.
///
/// `tasmin = tas - tasskew * tasrange` and `tasmax = tasmin + tasrange`.
/// A zero range contributes no skew term, so cells written under either
/// zero-range policy come back as `tasmin = tasmax = tas`.
pub fn derive_minmax(
    tas: &GriddedDataset,
    tasrange: &GriddedDataset,
    tasskew: &GriddedDataset,
    attributes: &OutputAttributes,
) -> Result<MinMax, TransformError> {
    tas.ensure_aligned(tasrange)?;
    tas.ensure_aligned(tasskew)?;

    let shape = tas.values.raw_dim();
    let mut low = Array3::<f64>::zeros(shape);
    let mut high = Array3::<f64>::zeros(shape);

    Zip::from(&mut low)
        .and(&mut high)
        .and(&tas.values)
        .and(&tasrange.values)
        .and(&tasskew.values)
        .for_each(|lo, hi, &mean, &r, &s| {
            if r == 0.0 {
                *lo = mean;
                *hi = mean;
                return;
            }
            *lo = mean - s * r;
            *hi = *lo + r;
        });

    let tasmin = tas
        .derive(TASMIN, low)?
        .with_attributes(&attributes.global, &attributes.for_variable(TASMIN));
    let tasmax = tas
        .derive(TASMAX, high)?
        .with_attributes(&attributes.global, &attributes.for_variable(TASMAX));

    Ok(MinMax { tasmin, tasmax })
}

/// Whether a requested variable is one of the daily extremes
pub fn is_extreme(variable: &str) -> bool {
    variable == TASMIN || variable == TASMAX
}

/// Whether a variable is produced by the forward transform
pub fn is_decomposed(variable: &str) -> bool {
    variable == TASRANGE || variable == TASSKEW
}

/// Base variables that must be acquired to produce `variable`
pub fn base_variables(variable: &str) -> Vec<&str> {
    if is_decomposed(variable) {
        vec![TAS, TASMIN, TASMAX]
    } else {
        vec![variable]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(variable: &str, values: Vec<f64>) -> GriddedDataset {
        let n = values.len();
        let time = (0..n)
            .map(|i| TimeStamp::new(2000, 1, (i + 1) as u8))
            .collect();
        GriddedDataset::new(
            variable,
            time,
            vec![45.0],
            vec![7.5],
            Array3::from_shape_vec((n, 1, 1), values).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_recovers_extremes() {
        let tasmin = grid(TASMIN, vec![270.1, 281.35, 290.0, 255.5, 300.25]);
        let tasmax = grid(TASMAX, vec![279.9, 290.0, 301.75, 266.0, 311.0]);
        let tas = grid(TAS, vec![275.0, 286.2, 293.3, 260.0, 305.0]);
        let attrs = OutputAttributes::default();

        let decomposed =
            derive_rangeskew(&tas, &tasmin, &tasmax, ZeroRangePolicy::default(), &attrs).unwrap();
        let rebuilt =
            derive_minmax(&tas, &decomposed.tasrange, &decomposed.tasskew, &attrs).unwrap();

        for i in 0..5 {
            let idx = [i, 0, 0];
            assert!((rebuilt.tasmin.values[idx] - tasmin.values[idx]).abs() < 1e-10);
            assert!((rebuilt.tasmax.values[idx] - tasmax.values[idx]).abs() < 1e-10);
        }
        assert_eq!(decomposed.summary.zero_range, 0);
        assert_eq!(decomposed.summary.cells, 5);
    }

    #[test]
    fn test_forward_values() {
        let tas = grid(TAS, vec![285.0]);
        let tasmin = grid(TASMIN, vec![280.0]);
        let tasmax = grid(TASMAX, vec![300.0]);

        let out = derive_rangeskew(
            &tas,
            &tasmin,
            &tasmax,
            ZeroRangePolicy::default(),
            &OutputAttributes::default(),
        )
        .unwrap();

        assert_eq!(out.tasrange.variable, TASRANGE);
        assert_eq!(out.tasskew.variable, TASSKEW);
        assert_eq!(out.tasrange.values[[0, 0, 0]], 20.0);
        assert_eq!(out.tasskew.values[[0, 0, 0]], 0.25);
    }

    #[test]
    fn test_zero_range_uses_fill_sentinel() {
        let tas = grid(TAS, vec![280.0, 285.0]);
        let tasmin = grid(TASMIN, vec![280.0, 280.0]);
        let tasmax = grid(TASMAX, vec![280.0, 290.0]);

        let out = derive_rangeskew(
            &tas,
            &tasmin,
            &tasmax,
            ZeroRangePolicy::Fill(0.0),
            &OutputAttributes::default(),
        )
        .unwrap();

        assert_eq!(out.tasrange.values[[0, 0, 0]], 0.0);
        assert_eq!(out.tasskew.values[[0, 0, 0]], 0.0);
        assert_eq!(out.tasskew.values[[1, 0, 0]], 0.5);
        assert_eq!(out.summary.zero_range, 1);
        assert!(out.tasskew.values.iter().all(|v| v.is_finite()));
        assert_eq!(
            out.tasskew.variable_attributes.get(ZERO_RANGE_POLICY_ATTR),
            Some(&"fill:0".to_string())
        );

        // Any sentinel reconstructs tasmin == tasmax == tas at that cell
        let rebuilt = derive_minmax(
            &tas,
            &out.tasrange,
            &out.tasskew,
            &OutputAttributes::default(),
        )
        .unwrap();
        assert_eq!(rebuilt.tasmin.values[[0, 0, 0]], 280.0);
        assert_eq!(rebuilt.tasmax.values[[0, 0, 0]], 280.0);
    }

    #[test]
    fn test_zero_range_mask_policy() {
        let tas = grid(TAS, vec![280.0]);
        let tasmin = grid(TASMIN, vec![280.0]);
        let tasmax = grid(TASMAX, vec![280.0]);

        let out = derive_rangeskew(
            &tas,
            &tasmin,
            &tasmax,
            ZeroRangePolicy::Mask,
            &OutputAttributes::default(),
        )
        .unwrap();

        assert!(out.tasskew.values[[0, 0, 0]].is_nan());
        assert_eq!(
            out.tasskew.variable_attributes.get(ZERO_RANGE_POLICY_ATTR),
            Some(&"mask".to_string())
        );

        let rebuilt = derive_minmax(
            &tas,
            &out.tasrange,
            &out.tasskew,
            &OutputAttributes::default(),
        )
        .unwrap();
        assert_eq!(rebuilt.tasmin.values[[0, 0, 0]], 280.0);
        assert_eq!(rebuilt.tasmax.values[[0, 0, 0]], 280.0);
    }

    #[test]
    fn test_missing_range_stays_missing_on_rebuild() {
        let tas = grid(TAS, vec![280.0]);
        let range = grid(TASRANGE, vec![f64::NAN]);
        let skew = grid(TASSKEW, vec![0.5]);

        let out = derive_minmax(&tas, &range, &skew, &OutputAttributes::default()).unwrap();

        assert!(out.tasmin.values[[0, 0, 0]].is_nan());
        assert!(out.tasmax.values[[0, 0, 0]].is_nan());
    }

    #[test]
    fn test_missing_inputs_propagate() {
        let tas = grid(TAS, vec![f64::NAN, 281.0]);
        let tasmin = grid(TASMIN, vec![280.0, 280.0]);
        let tasmax = grid(TASMAX, vec![290.0, 290.0]);

        let out = derive_rangeskew(
            &tas,
            &tasmin,
            &tasmax,
            ZeroRangePolicy::default(),
            &OutputAttributes::default(),
        )
        .unwrap();

        assert_eq!(out.summary.missing, 1);
        assert!(out.tasrange.values[[0, 0, 0]].is_nan());
        assert!((out.tasskew.values[[1, 0, 0]] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_misaligned_grids_are_rejected() {
        let tas = grid(TAS, vec![280.0, 281.0]);
        let tasmin = grid(TASMIN, vec![279.0]);
        let tasmax = grid(TASMAX, vec![290.0, 291.0]);

        let err = derive_rangeskew(
            &tas,
            &tasmin,
            &tasmax,
            ZeroRangePolicy::default(),
            &OutputAttributes::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TransformError::Dataset(DatasetError::GridMismatch(_))
        ));
    }

    #[test]
    fn test_attributes_come_from_caller() {
        let mut attrs = OutputAttributes::default();
        attrs
            .global
            .insert("title".to_string(), "reconstructed".to_string());
        attrs.variables.insert(
            TASMIN.to_string(),
            BTreeMap::from([("units".to_string(), "K".to_string())]),
        );

        let tas = grid(TAS, vec![285.0]);
        let range = grid(TASRANGE, vec![10.0]);
        let skew = grid(TASSKEW, vec![0.5]);
        let out = derive_minmax(&tas, &range, &skew, &attrs).unwrap();

        assert_eq!(out.tasmin.values[[0, 0, 0]], 280.0);
        assert_eq!(out.tasmax.values[[0, 0, 0]], 290.0);
        assert_eq!(out.tasmin.attributes.get("title").unwrap(), "reconstructed");
        assert_eq!(out.tasmin.variable_attributes.get("units").unwrap(), "K");
        assert!(out.tasmax.variable_attributes.is_empty());
    }

    #[test]
    fn test_base_variables() {
        assert_eq!(base_variables(TASSKEW), vec![TAS, TASMIN, TASMAX]);
        assert_eq!(base_variables("pr"), vec!["pr"]);
        assert!(is_extreme(TASMAX));
        assert!(!is_extreme(TAS));
    }
}
