// Dataset Codec
// Encodes gridded datasets to bytes and back

use crate::transform::{GriddedDataset, TimeStamp};

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode dataset: {0}")]
    Encode(String),

    #[error("Failed to decode dataset: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk representation of a dataset.
///
/// Implementations own the file extension, so the canonical path of an
/// artifact depends on which codec the run is configured with.
pub trait DatasetCodec: Send + Sync {
    fn extension(&self) -> &str;

    fn encode(&self, dataset: &GriddedDataset, writer: &mut dyn Write) -> Result<(), CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<GriddedDataset, CodecError>;
}

/// Self-describing JSON layout
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize, Deserialize)]
struct StoredDataset {
    variable: String,
    time: Vec<TimeStamp>,
    lat: Vec<f64>,
    lon: Vec<f64>,
    shape: [usize; 3],
    /// Row-major (time, lat, lon); missing cells are null
    values: Vec<Option<f64>>,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    variable_attributes: BTreeMap<String, String>,
    #[serde(default)]
    encoding: BTreeMap<String, serde_json::Value>,
}

impl DatasetCodec for JsonCodec {
    fn extension(&self) -> &str {
        "json"
    }

    fn encode(&self, dataset: &GriddedDataset, writer: &mut dyn Write) -> Result<(), CodecError> {
        let dims = dataset.dims();
        let stored = StoredDataset {
            variable: dataset.variable.clone(),
            time: dataset.time.clone(),
            lat: dataset.lat.clone(),
            lon: dataset.lon.clone(),
            shape: [dims.time, dims.lat, dims.lon],
            values: dataset
                .values
                .iter()
                .map(|v| v.is_finite().then_some(*v))
                .collect(),
            attributes: dataset.attributes.clone(),
            variable_attributes: dataset.variable_attributes.clone(),
            encoding: dataset.encoding.clone(),
        };

        serde_json::to_writer(writer, &stored).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<GriddedDataset, CodecError> {
        let stored: StoredDataset =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;

        let [t, la, lo] = stored.shape;
        let flat: Vec<f64> = stored
            .values
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        let values = Array3::from_shape_vec((t, la, lo), flat)
            .map_err(|e| CodecError::Decode(e.to_string()))?;

        let mut dataset = GriddedDataset::new(stored.variable, stored.time, stored.lat, stored.lon, values)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        dataset.attributes = stored.attributes;
        dataset.variable_attributes = stored.variable_attributes;
        dataset.encoding = stored.encoding;
        Ok(dataset)
    }
}
