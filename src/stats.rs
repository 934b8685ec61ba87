//! Overlap and classification statistics between two label volumes.
//!
//! Every function treats any label greater than the element's `Default`
//! (zero) as foreground, regardless of class. `a` is the prediction and `b`
//! the reference; dice and jaccard are symmetric, sensitivity and specificity
//! are not.
//!
//! When a ratio's denominator is zero the functions return [`UNDEFINED`]
//! instead of a score. Callers must check for it with [`is_defined`] before
//! averaging or comparing scores.

use ndarray::{ArrayBase, Data, Dimension};
use serde::Serialize;
use thiserror::Error;

/// Score returned when a metric's denominator is zero.
pub const UNDEFINED: f64 = -1.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Expecting 3 dimensional inputs, got {a:?} and {b:?}")]
    NotThreeDimensional { a: Vec<usize>, b: Vec<usize> },

    #[error("Expecting inputs of the same shape, got {a:?} and {b:?}")]
    Mismatch { a: Vec<usize>, b: Vec<usize> },
}

pub fn is_defined(score: f64) -> bool {
    score != UNDEFINED
}

fn check_shapes<S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<(), ShapeError>
where
    S1: Data,
    S2: Data,
    D1: Dimension,
    D2: Dimension,
{
    if a.ndim() != 3 || b.ndim() != 3 {
        return Err(ShapeError::NotThreeDimensional {
            a: a.shape().to_vec(),
            b: b.shape().to_vec(),
        });
    }
    if a.shape() != b.shape() {
        return Err(ShapeError::Mismatch {
            a: a.shape().to_vec(),
            b: b.shape().to_vec(),
        });
    }
    Ok(())
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return UNDEFINED;
    }
    numerator as f64 / denominator as f64
}

/// Pairs of (a is foreground, b is foreground) in logical order.
fn foreground_pairs<'a, T, S1, S2, D1, D2>(
    a: &'a ArrayBase<S1, D1>,
    b: &'a ArrayBase<S2, D2>,
) -> impl Iterator<Item = (bool, bool)>
where
    T: PartialOrd + Default + 'a,
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    D1: Dimension,
    D2: Dimension,
{
    let background = T::default();
    a.iter()
        .zip(b.iter())
        .map(move |(x, y)| (*x > background, *y > background))
}

/// Dice similarity coefficient: `2 |A ∩ B| / (|A| + |B|)`.
pub fn dice<T, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, ShapeError>
where
    T: PartialOrd + Default,
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    D1: Dimension,
    D2: Dimension,
{
    check_shapes(a, b)?;
    let (intersection, sum) = foreground_pairs(a, b).fold((0, 0), |(i, s), (x, y)| {
        (i + usize::from(x && y), s + usize::from(x) + usize::from(y))
    });
    Ok(ratio(2 * intersection, sum))
}

/// Jaccard similarity coefficient: `|A ∩ B| / |A ∪ B|`.
pub fn jaccard<T, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, ShapeError>
where
    T: PartialOrd + Default,
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    D1: Dimension,
    D2: Dimension,
{
    check_shapes(a, b)?;
    let (intersection, union) = foreground_pairs(a, b).fold((0, 0), |(i, u), (x, y)| {
        (i + usize::from(x && y), u + usize::from(x || y))
    });
    Ok(ratio(intersection, union))
}

/// True negative rate of prediction `a` against reference `b`.
pub fn specificity<T, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, ShapeError>
where
    T: PartialOrd + Default,
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    D1: Dimension,
    D2: Dimension,
{
    check_shapes(a, b)?;
    let (true_negatives, negatives) = foreground_pairs(a, b)
        .filter(|&(_, y)| !y)
        .fold((0, 0), |(tn, n), (x, _)| (tn + usize::from(!x), n + 1));
    Ok(ratio(true_negatives, negatives))
}

/// True positive rate of prediction `a` against reference `b`.
pub fn sensitivity<T, S1, S2, D1, D2>(
    a: &ArrayBase<S1, D1>,
    b: &ArrayBase<S2, D2>,
) -> Result<f64, ShapeError>
where
    T: PartialOrd + Default,
    S1: Data<Elem = T>,
    S2: Data<Elem = T>,
    D1: Dimension,
    D2: Dimension,
{
    check_shapes(a, b)?;
    let (true_positives, positives) = foreground_pairs(a, b)
        .filter(|&(_, y)| y)
        .fold((0, 0), |(tp, p), (x, _)| (tp + usize::from(x), p + 1));
    Ok(ratio(true_positives, positives))
}

/// All four scores of one prediction against its reference.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricResult {
    pub dice: f64,
    pub jaccard: f64,
    pub sensitivity: f64,
    pub specificity: f64,
}

impl MetricResult {
    pub fn compute<T, S1, S2, D1, D2>(
        prediction: &ArrayBase<S1, D1>,
        reference: &ArrayBase<S2, D2>,
    ) -> Result<Self, ShapeError>
    where
        T: PartialOrd + Default,
        S1: Data<Elem = T>,
        S2: Data<Elem = T>,
        D1: Dimension,
        D2: Dimension,
    {
        Ok(Self {
            dice: dice(prediction, reference)?,
            jaccard: jaccard(prediction, reference)?,
            sensitivity: sensitivity(prediction, reference)?,
            specificity: specificity(prediction, reference)?,
        })
    }
}
