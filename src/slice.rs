use ndarray::Array2;

use crate::header::Header;

/// One decoded 2D image and the metadata needed to place it in a series.
#[derive(Clone, Debug)]
pub struct Slice {
    pub header: Header,
    pub instance_number: Option<i32>,
    pub image_position: Option<[f32; 3]>,
    /// (row spacing, column spacing, slice thickness) in millimetres
    pub spacing: Option<(f32, f32, f32)>,
    pub pixels: Array2<u16>,
}

impl Slice {
    pub fn new(header: Header, pixels: Array2<u16>) -> Self {
        Self {
            header,
            instance_number: None,
            image_position: None,
            spacing: None,
            pixels,
        }
    }

    pub fn with_instance_number(mut self, instance_number: i32) -> Self {
        self.instance_number = Some(instance_number);
        self
    }

    pub fn with_image_position(mut self, position: [f32; 3]) -> Self {
        self.image_position = Some(position);
        self
    }

    pub fn with_spacing(mut self, spacing: (f32, f32, f32)) -> Self {
        self.spacing = Some(spacing);
        self
    }

    pub fn series_instance_uid(&self) -> &str {
        &self.header.series_instance_uid
    }

    pub fn series_description(&self) -> &str {
        &self.header.series_description
    }

    /// Position of the slice along patient axis `axis` (0 = x, 1 = y, 2 = z)
    pub fn position_along(&self, axis: usize) -> Option<f32> {
        self.image_position.and_then(|pos| pos.get(axis).copied())
    }
}
