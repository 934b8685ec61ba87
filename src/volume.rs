use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

use crate::orientation::to_viewing;

/// Intensity volume with axes (stack, row, column).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Volume {
    data: Array3<u16>,
    /// Voxel edge lengths in millimetres, per axis
    spacing: Option<(f32, f32, f32)>,
}

/// Per-voxel class labels in the same layout as a [`Volume`]; 0 is background.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelVolume {
    data: Array3<u8>,
}

impl Volume {
    pub fn new(data: Array3<u16>) -> Self {
        Self {
            data,
            spacing: None,
        }
    }

    pub fn with_spacing(mut self, spacing: Option<(f32, f32, f32)>) -> Self {
        self.spacing = spacing;
        self
    }

    /// Get the dimensions of the volume (stack, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<u16> {
        &self.data
    }

    pub fn into_data(self) -> Array3<u16> {
        self.data
    }

    pub fn spacing(&self) -> Option<(f32, f32, f32)> {
        self.spacing
    }

    /// Volume of a single voxel in cubic millimetres, when spacing is known
    pub fn voxel_volume_mm3(&self) -> Option<f32> {
        self.spacing.map(|(a, b, c)| a * b * c)
    }

    pub fn max(&self) -> u16 {
        self.data.par_iter().copied().max().unwrap_or(0)
    }

    pub fn get_slice_from_axis(&self, index: usize, axis: usize) -> Option<ArrayView2<'_, u16>> {
        is_valid_index(self.data.dim(), index, axis)
            .then(|| self.data.index_axis(Axis(axis), index))
    }

    #[inline]
    fn normalize_to_u8(value: u16, max: u16) -> u8 {
        if max == 0 {
            return 0;
        }
        ((value as f32 / max as f32) * 255.0).clamp(0.0, 255.0) as u8
    }

    /// Grayscale rendering of one cross-section in viewing orientation,
    /// scaled so the volume's maximum maps to full white.
    pub fn cross_section_image(&self, index: usize, axis: usize) -> Option<GrayImage> {
        let max = self.max();
        let slice = to_viewing(self.get_slice_from_axis(index, axis)?);
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice
            .par_iter()
            .map(|&v| Self::normalize_to_u8(v, max))
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }
}

impl From<Array3<u16>> for Volume {
    fn from(data: Array3<u16>) -> Self {
        Self::new(data)
    }
}

impl LabelVolume {
    pub fn new(data: Array3<u8>) -> Self {
        Self { data }
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<u8> {
        &self.data
    }

    pub fn into_data(self) -> Array3<u8> {
        self.data
    }

    pub fn count_class(&self, class: u8) -> usize {
        self.data.iter().filter(|&&v| v == class).count()
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v > 0).count()
    }

    pub fn get_slice_from_axis(&self, index: usize, axis: usize) -> Option<ArrayView2<'_, u8>> {
        is_valid_index(self.data.dim(), index, axis)
            .then(|| self.data.index_axis(Axis(axis), index))
    }
}

impl From<Array3<u8>> for LabelVolume {
    fn from(data: Array3<u8>) -> Self {
        Self::new(data)
    }
}

fn is_valid_index(dim: (usize, usize, usize), index: usize, axis: usize) -> bool {
    let max_index = match axis {
        0 => dim.0,
        1 => dim.1,
        2 => dim.2,
        _ => return false,
    };
    index < max_index
}
