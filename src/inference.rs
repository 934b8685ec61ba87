use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

use crate::{
    conform::conform,
    enums::{DegenerateSlicePolicy, Device},
    model::{LoadableModel, ModelError, SegmentationModel},
    volume::{LabelVolume, Volume},
};

/// Patch edge length the reference model was trained with.
pub const DEFAULT_PATCH_SIZE: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Slice {index} has maximum intensity 0 and can not be normalized")]
pub struct DegenerateSliceError {
    pub index: usize,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to load model parameters from {path}: {source}")]
    Startup {
        path: PathBuf,
        #[source]
        source: ModelError,
    },

    #[error("Expected a {expected}x{expected} slice extent, got {rows}x{columns}")]
    ShapeMismatch {
        expected: usize,
        rows: usize,
        columns: usize,
    },

    #[error(transparent)]
    DegenerateSlice(#[from] DegenerateSliceError),

    #[error("Model evaluation failed on slice {index}: {source}")]
    Model {
        index: usize,
        #[source]
        source: ModelError,
    },
}

/// Runs a segmentation model slice by slice over a volume.
///
/// The agent owns its model and device, so agents bound to different devices
/// can live side by side.
pub struct InferenceAgent<M> {
    model: M,
    device: Device,
    patch_size: usize,
    degenerate_policy: DegenerateSlicePolicy,
    evaluation_lock: Mutex<()>,
}

impl<M: LoadableModel> InferenceAgent<M> {
    /// Load the model's parameters for `device`.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Startup`] if the parameters can not be loaded
    pub fn load(
        parameter_path: impl AsRef<Path>,
        device: Device,
        patch_size: usize,
    ) -> Result<Self, InferenceError> {
        let path = parameter_path.as_ref();
        let model = M::load(path, &device).map_err(|source| InferenceError::Startup {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), %device, patch_size, "loaded model parameters");
        Ok(Self::new(model, device, patch_size))
    }
}

impl<M: SegmentationModel> InferenceAgent<M> {
    pub fn new(model: M, device: Device, patch_size: usize) -> Self {
        Self {
            model,
            device,
            patch_size,
            degenerate_policy: DegenerateSlicePolicy::default(),
            evaluation_lock: Mutex::new(()),
        }
    }

    pub fn with_degenerate_policy(mut self, policy: DegenerateSlicePolicy) -> Self {
        self.degenerate_policy = policy;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Classify a volume of any row/column extent.
    ///
    /// The volume is first padded or cropped around its center to the patch
    /// size; the labels keep that conformed extent. Use
    /// [`ConformTransform::restore`](crate::conform::ConformTransform::restore)
    /// to map them back.
    pub fn infer_unpadded(&self, volume: &Volume) -> Result<LabelVolume, InferenceError> {
        let (conformed, transform) = conform(volume.data(), self.patch_size);
        debug!(?transform, "conformed volume to patch size");
        self.classify_volume(conformed.view())
    }

    /// Classify a volume whose rows and columns already equal the patch size.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::ShapeMismatch`] for any other extent
    pub fn infer_conformant(&self, volume: &Volume) -> Result<LabelVolume, InferenceError> {
        let (_, rows, columns) = volume.dim();
        if rows != self.patch_size || columns != self.patch_size {
            return Err(InferenceError::ShapeMismatch {
                expected: self.patch_size,
                rows,
                columns,
            });
        }
        self.classify_volume(volume.data().view())
    }

    fn classify_volume(&self, data: ArrayView3<'_, u16>) -> Result<LabelVolume, InferenceError> {
        let start = Instant::now();
        let mut labels = Array3::<u8>::zeros(data.dim());

        // every slice writes only its own plane of the output
        labels
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(data.axis_iter(Axis(0)))
            .enumerate()
            .try_for_each(|(index, (mut plane, slice))| {
                plane.assign(&self.classify_slice(index, slice)?);
                Ok::<_, InferenceError>(())
            })?;

        info!(
            slices = data.dim().0,
            device = %self.device,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "inference finished"
        );
        Ok(LabelVolume::new(labels))
    }

    fn classify_slice(
        &self,
        index: usize,
        slice: ArrayView2<'_, u16>,
    ) -> Result<Array2<u8>, InferenceError> {
        let (rows, columns) = slice.dim();
        let max = slice.iter().copied().max().unwrap_or(0);

        // each slice is scaled by its own maximum, not the volume's
        let normalized = if max == 0 {
            let err = DegenerateSliceError { index };
            match self.degenerate_policy {
                DegenerateSlicePolicy::Fail => return Err(err.into()),
                DegenerateSlicePolicy::ZeroInput => {
                    warn!(%err, "evaluating slice with an all-zero input");
                    Array2::<f32>::zeros((rows, columns))
                }
            }
        } else {
            let max = f32::from(max);
            slice.mapv(|v| f32::from(v) / max)
        };

        let confidences = self
            .evaluate(normalized.view())
            .map_err(|source| InferenceError::Model { index, source })?;

        let expected = (self.model.num_classes(), rows, columns);
        if confidences.dim() != expected {
            return Err(InferenceError::Model {
                index,
                source: ModelError::OutputShape {
                    expected,
                    actual: confidences.dim(),
                },
            });
        }

        Ok(Self::argmax(confidences.view()))
    }

    fn evaluate(&self, patch: ArrayView2<'_, f32>) -> Result<Array3<f32>, ModelError> {
        if self.device.supports_concurrent_evaluation() {
            return self.model.predict(patch, &self.device);
        }
        let _guard = self
            .evaluation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.model.predict(patch, &self.device)
    }

    /// Highest-confidence class per pixel; ties go to the lowest class index.
    fn argmax(confidences: ArrayView3<'_, f32>) -> Array2<u8> {
        let (_, rows, columns) = confidences.dim();
        Array2::from_shape_fn((rows, columns), |(r, c)| {
            let scores = confidences.slice(s![.., r, c]);
            let mut best = 0;
            for (class, &score) in scores.iter().enumerate().skip(1) {
                if score > scores[best] {
                    best = class;
                }
            }
            best as u8
        })
    }
}
