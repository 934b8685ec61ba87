//! Centered pad/crop of the row and column axes to the model's patch size.
//!
//! Padding adds background (the element's `Default`) symmetrically, with the
//! odd pixel on the trailing side. Cropping removes pixels symmetrically,
//! again taking the odd pixel from the trailing side.

use std::ops::Range;

use ndarray::{Array3, ArrayBase, Data, Ix3, s};

/// How one axis is brought from `original` to `target` length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AxisConform {
    pub original: usize,
    pub target: usize,
}

impl AxisConform {
    pub fn new(original: usize, target: usize) -> Self {
        Self { original, target }
    }

    /// Pixels added (padding) or removed (cropping) before the data
    pub fn leading(&self) -> usize {
        self.original.abs_diff(self.target) / 2
    }

    /// Pixels added or removed after the data; takes the odd one
    pub fn trailing(&self) -> usize {
        self.original.abs_diff(self.target) - self.leading()
    }

    pub fn is_padding(&self) -> bool {
        self.target > self.original
    }

    /// Range read from the source when going original -> target
    fn source_range(&self) -> Range<usize> {
        if self.is_padding() {
            0..self.original
        } else {
            self.leading()..self.leading() + self.target
        }
    }

    /// Range written in the destination when going original -> target
    fn destination_range(&self) -> Range<usize> {
        if self.is_padding() {
            self.leading()..self.leading() + self.original
        } else {
            0..self.target
        }
    }

    fn inverse(&self) -> Self {
        Self {
            original: self.target,
            target: self.original,
        }
    }
}

/// Record of how a `(stack, rows, columns)` array was conformed, so it can be undone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConformTransform {
    pub rows: AxisConform,
    pub columns: AxisConform,
}

impl ConformTransform {
    pub fn for_extent((rows, columns): (usize, usize), patch_size: usize) -> Self {
        Self {
            rows: AxisConform::new(rows, patch_size),
            columns: AxisConform::new(columns, patch_size),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rows.original == self.rows.target && self.columns.original == self.columns.target
    }

    /// Bring `input` from the original to the conformed extent.
    ///
    /// # Panics
    ///
    /// Panics if the row/column extent of `input` is not the original extent.
    pub fn apply<S, T>(&self, input: &ArrayBase<S, Ix3>) -> Array3<T>
    where
        S: Data<Elem = T>,
        T: Clone + Default,
    {
        Self::resize(input, self.rows, self.columns)
    }

    /// Bring a conformed array back to the original extent.
    ///
    /// Pixels that were cropped away come back as background.
    pub fn restore<S, T>(&self, input: &ArrayBase<S, Ix3>) -> Array3<T>
    where
        S: Data<Elem = T>,
        T: Clone + Default,
    {
        Self::resize(input, self.rows.inverse(), self.columns.inverse())
    }

    fn resize<S, T>(
        input: &ArrayBase<S, Ix3>,
        rows: AxisConform,
        columns: AxisConform,
    ) -> Array3<T>
    where
        S: Data<Elem = T>,
        T: Clone + Default,
    {
        let (depth, in_rows, in_columns) = input.dim();
        assert_eq!(
            (in_rows, in_columns),
            (rows.original, columns.original),
            "array extent does not match the conform transform"
        );

        let mut output = Array3::<T>::default((depth, rows.target, columns.target));
        output
            .slice_mut(s![.., rows.destination_range(), columns.destination_range()])
            .assign(&input.slice(s![.., rows.source_range(), columns.source_range()]));
        output
    }
}

/// Conform the row/column extent of `input` to `patch_size` x `patch_size`.
pub fn conform<S, T>(
    input: &ArrayBase<S, Ix3>,
    patch_size: usize,
) -> (Array3<T>, ConformTransform)
where
    S: Data<Elem = T>,
    T: Clone + Default,
{
    let (_, rows, columns) = input.dim();
    let transform = ConformTransform::for_extent((rows, columns), patch_size);
    (transform.apply(input), transform)
}
