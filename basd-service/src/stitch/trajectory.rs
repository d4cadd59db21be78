// Temperature Trajectory
// Global-mean temperature path that stitched data is generated to follow

use crate::artifacts::naming::Period;
use crate::stitch::StitchError;

use serde::Deserialize;
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TrajectoryRow {
    year: f64,
    temp: f64,
}

/// Yearly temperature values, sorted by year
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub years: Vec<i32>,
    pub values: Vec<f64>,
}

impl Trajectory {
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| StitchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    /// Read `year,temp` rows and interpolate them to every whole year
    pub fn from_reader(reader: impl io::Read) -> Result<Self, StitchError> {
        let mut points = Vec::new();
        let mut csv = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        for row in csv.deserialize::<TrajectoryRow>() {
            let row = row?;
            if row.year.is_finite() && row.temp.is_finite() {
                points.push((row.year, row.temp));
            }
        }
        Self::interpolate_annual(points)
    }

    /// Linear interpolation of arbitrary (year, value) points onto whole years
    pub fn interpolate_annual(mut points: Vec<(f64, f64)>) -> Result<Self, StitchError> {
        if points.is_empty() {
            return Err(StitchError::EmptyTrajectory);
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        points.dedup_by(|a, b| a.0 == b.0);

        let first = points[0].0.ceil() as i32;
        let last = points[points.len() - 1].0.floor() as i32;
        if first > last {
            return Err(StitchError::EmptyTrajectory);
        }

        let count = (last - first + 1) as usize;
        let mut years = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);
        let mut segment = 0;
        for year in first..=last {
            let x = year as f64;
            while segment + 1 < points.len() && points[segment + 1].0 < x {
                segment += 1;
            }
            let (x0, y0) = points[segment];
            let value = match points.get(segment + 1) {
                Some(&(x1, y1)) if x > x0 => y0 + (y1 - y0) * (x - x0) / (x1 - x0),
                _ => y0,
            };
            years.push(year);
            values.push(value);
        }

        Ok(Self { years, values })
    }

    /// Subtract the mean over `baseline`
    pub fn to_anomaly(&self, baseline: &Period) -> Result<Self, StitchError> {
        let in_baseline: Vec<f64> = self
            .years
            .iter()
            .zip(&self.values)
            .filter(|(year, _)| baseline.contains(**year))
            .map(|(_, value)| *value)
            .collect();
        if in_baseline.is_empty() {
            return Err(StitchError::NoBaselineYears(*baseline));
        }
        let mean = in_baseline.iter().sum::<f64>() / in_baseline.len() as f64;

        Ok(Self {
            years: self.years.clone(),
            values: self.values.iter().map(|v| v - mean).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    pub fn write_csv(&self, writer: impl io::Write) -> Result<(), StitchError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(["year", "temp"])?;
        for (year, value) in self.years.iter().zip(&self.values) {
            csv.write_record([year.to_string(), value.to_string()])?;
        }
        csv.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
