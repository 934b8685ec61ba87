use std::{fs, path::Path};

use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::enums::Device;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to read model parameters: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse model parameters: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid model parameters: {0}")]
    InvalidParameters(String),

    #[error("Device {0} is not available")]
    UnsupportedDevice(Device),

    #[error("Model returned confidences of shape {actual:?}, expected {expected:?}")]
    OutputShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
}

/// A trained per-pixel classifier.
///
/// `predict` takes one normalized `(patch, patch)` slice and returns
/// confidences shaped `(num_classes, patch, patch)`. Implementations must be
/// usable from several threads; the agent serializes calls itself when the
/// device can not evaluate concurrently.
pub trait SegmentationModel: Send + Sync {
    fn num_classes(&self) -> usize;

    fn predict(
        &self,
        patch: ArrayView2<'_, f32>,
        device: &Device,
    ) -> Result<Array3<f32>, ModelError>;
}

/// A model whose learned parameters live in an external file.
pub trait LoadableModel: SegmentationModel + Sized {
    fn load(parameter_path: &Path, device: &Device) -> Result<Self, ModelError>;
}

/// Classifies each pixel by the intensity centroid it is closest to.
///
/// The confidence for class `c` is `-(x - centroid[c])^2`, so the arg-max is the
/// nearest centroid, with ties going to the lower class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroidModel {
    pub centroids: Vec<f32>,
}

impl NearestCentroidModel {
    pub fn new(centroids: Vec<f32>) -> Result<Self, ModelError> {
        if centroids.is_empty() {
            return Err(ModelError::InvalidParameters(
                "at least one class centroid is required".to_string(),
            ));
        }
        if let Some(bad) = centroids.iter().find(|c| !c.is_finite()) {
            return Err(ModelError::InvalidParameters(format!(
                "centroid {bad} is not finite"
            )));
        }
        if centroids.len() > u8::MAX as usize + 1 {
            return Err(ModelError::InvalidParameters(format!(
                "{} classes do not fit an 8-bit label",
                centroids.len()
            )));
        }
        Ok(Self { centroids })
    }
}

impl SegmentationModel for NearestCentroidModel {
    fn num_classes(&self) -> usize {
        self.centroids.len()
    }

    fn predict(
        &self,
        patch: ArrayView2<'_, f32>,
        _device: &Device,
    ) -> Result<Array3<f32>, ModelError> {
        let (rows, columns) = patch.dim();
        let mut confidences = Array3::<f32>::zeros((self.centroids.len(), rows, columns));
        for (mut plane, &centroid) in confidences.axis_iter_mut(Axis(0)).zip(&self.centroids) {
            plane.zip_mut_with(&patch, |out, &x| *out = -(x - centroid).powi(2));
        }
        Ok(confidences)
    }
}

impl LoadableModel for NearestCentroidModel {
    fn load(parameter_path: &Path, device: &Device) -> Result<Self, ModelError> {
        if !matches!(device, Device::Cpu) {
            return Err(ModelError::UnsupportedDevice(*device));
        }
        let raw = fs::read_to_string(parameter_path)?;
        let parameters: NearestCentroidModel = serde_json::from_str(&raw)?;
        Self::new(parameters.centroids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn confidence_peaks_at_nearest_centroid() {
        let model = NearestCentroidModel::new(vec![0.0, 0.5, 1.0]).unwrap();
        let patch = array![[0.1f32, 0.45], [0.9, 0.75]];

        let confidences = model.predict(patch.view(), &Device::Cpu).unwrap();
        assert_eq!(confidences.dim(), (3, 2, 2));

        let best = |r: usize, c: usize| {
            (0..3)
                .max_by(|&a, &b| confidences[[a, r, c]].total_cmp(&confidences[[b, r, c]]))
                .unwrap()
        };
        assert_eq!(best(0, 0), 0);
        assert_eq!(best(0, 1), 1);
        assert_eq!(best(1, 0), 2);
    }

    #[test]
    fn loads_parameters_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, r#"{ "centroids": [0.0, 0.4, 0.8] }"#).unwrap();

        let model = NearestCentroidModel::load(&path, &Device::Cpu).unwrap();
        assert_eq!(model.num_classes(), 3);
    }

    #[test]
    fn rejects_bad_parameter_stores() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        fs::write(&empty, r#"{ "centroids": [] }"#).unwrap();
        assert!(matches!(
            NearestCentroidModel::load(&empty, &Device::Cpu),
            Err(ModelError::InvalidParameters(_))
        ));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "not json").unwrap();
        assert!(matches!(
            NearestCentroidModel::load(&garbage, &Device::Cpu),
            Err(ModelError::Parse(_))
        ));

        assert!(matches!(
            NearestCentroidModel::load(&dir.path().join("missing.json"), &Device::Cpu),
            Err(ModelError::Io(_))
        ));
        assert!(matches!(
            NearestCentroidModel::load(&empty, &Device::Cuda(0)),
            Err(ModelError::UnsupportedDevice(Device::Cuda(0)))
        ));
    }
}
