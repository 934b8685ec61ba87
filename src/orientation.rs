//! Orientation normalization shared by volume building and report rendering.
//!
//! Stored DICOM pixel arrays are row/column-major in an orientation that does
//! not match the radiological viewing convention. Both axes are flipped and
//! the result transposed, so a `(rows, columns)` slice comes out as
//! `(columns, rows)`. Every consumer goes through [`to_viewing`] so the volume
//! and the report panels can never disagree.

use ndarray::{Array2, ArrayView2, Axis};

/// Flip both axes of `slice`, then transpose it.
pub fn to_viewing<T: Clone>(slice: ArrayView2<'_, T>) -> Array2<T> {
    let mut view = slice;
    view.invert_axis(Axis(0));
    view.invert_axis(Axis(1));
    view.reversed_axes().as_standard_layout().into_owned()
}
