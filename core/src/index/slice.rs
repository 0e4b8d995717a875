//! Per-axis index arguments.
//!
//! An index expression has one entry per axis. Users write [`AxisArg`]s, which may be negative or
//! open-ended; [`normalize`] resolves them against a shape into [`AxisIndex`]es whose bounds are
//! absolute. Only normalized entries travel to workers.
//!
//! Normalization follows the usual rules for half-open slices:
//!
//! - negative values count from the end of the axis,
//! - out-of-range bounds are clamped,
//! - a negative step walks backwards, defaulting to the whole axis in reverse.

use super::range::Span;
use crate::error::{Error, Result};
use distarray_kernels::Window;
use serde::{Deserialize, Serialize};
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

/// One axis of an un-normalized index expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisArg {
    /// Selects a single position and removes the axis from the result.
    Index(isize),
    /// Selects a strided range. Missing bounds default to the whole axis.
    Slice {
        start: Option<isize>,
        stop: Option<isize>,
        step: Option<isize>,
    },
}

impl AxisArg {
    /// `..`
    pub fn full() -> Self {
        Self::Slice {
            start: None,
            stop: None,
            step: None,
        }
    }

    /// `start..stop`
    pub fn range(start: isize, stop: isize) -> Self {
        Self::Slice {
            start: Some(start),
            stop: Some(stop),
            step: None,
        }
    }

    /// Replaces the step of a slice argument. Has no effect on an integer index.
    pub fn step(self, step: isize) -> Self {
        match self {
            Self::Slice { start, stop, .. } => Self::Slice {
                start,
                stop,
                step: Some(step),
            },
            index => index,
        }
    }
}

/// Converts to `isize`, clamping values outside its range.
fn saturate<T: TryInto<isize> + PartialOrd + Default + Copy>(value: T) -> isize {
    value.try_into().unwrap_or(if value < T::default() {
        isize::MIN
    } else {
        isize::MAX
    })
}

macro_rules! impl_axis_arg_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AxisArg {
                fn from(index: $ty) -> Self {
                    AxisArg::Index(saturate(index))
                }
            }

            impl From<Range<$ty>> for AxisArg {
                fn from(r: Range<$ty>) -> Self {
                    AxisArg::Slice {
                        start: Some(saturate(r.start)),
                        stop: Some(saturate(r.end)),
                        step: None,
                    }
                }
            }

            impl From<RangeFrom<$ty>> for AxisArg {
                fn from(r: RangeFrom<$ty>) -> Self {
                    AxisArg::Slice { start: Some(saturate(r.start)), stop: None, step: None }
                }
            }

            impl From<RangeTo<$ty>> for AxisArg {
                fn from(r: RangeTo<$ty>) -> Self {
                    AxisArg::Slice { start: None, stop: Some(saturate(r.end)), step: None }
                }
            }
        )*
    };
}

impl_axis_arg_from!(i32, i64, isize, u32, usize);

impl From<RangeFull> for AxisArg {
    fn from(_: RangeFull) -> Self {
        AxisArg::full()
    }
}

/// A normalized slice: absolute `start`, exclusive `stop`, non-zero `step`.
///
/// With a negative step, `stop` may be `-1` (walk down to and including index 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slice {
    pub start: isize,
    pub stop: isize,
    pub step: isize,
}

impl Slice {
    pub fn new(start: isize, stop: isize, step: isize) -> Self {
        debug_assert!(step != 0);
        Self { start, stop, step }
    }

    /// The whole axis `[0, len)` with step 1.
    pub fn full(len: usize) -> Self {
        Self::new(0, len as isize, 1)
    }

    /// Number of selected positions.
    ///
    /// `floor((stop - 1 - start) / step) + 1` for a positive step, mirrored for a negative one,
    /// and never below zero.
    pub fn len(&self) -> usize {
        if self.step > 0 && self.stop > self.start {
            ((self.stop - self.start - 1) / self.step + 1) as usize
        } else if self.step < 0 && self.start > self.stop {
            ((self.start - self.stop - 1) / -self.step + 1) as usize
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k`-th selected position.
    pub fn position(&self, k: usize) -> isize {
        self.start + k as isize * self.step
    }

    /// All selected positions, in selection order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map(|k| self.position(k) as usize)
    }
}

/// One axis of a normalized index expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisIndex {
    Index(usize),
    Slice(Slice),
}

impl AxisIndex {
    pub fn is_index(&self) -> bool {
        matches!(self, AxisIndex::Index(_))
    }

    /// Length of this axis in the result, or `None` if the axis is dropped.
    pub fn result_len(&self) -> Option<usize> {
        match self {
            AxisIndex::Index(_) => None,
            AxisIndex::Slice(s) => Some(s.len()),
        }
    }

    /// The kernel window selecting the same positions. An integer index keeps a unit axis.
    pub fn window(&self) -> Window {
        match *self {
            AxisIndex::Index(i) => Window::single(i),
            AxisIndex::Slice(s) => {
                let len = s.len();
                let start = if len == 0 { 0 } else { s.start as usize };
                Window::new(start, len, s.step)
            }
        }
    }
}

/// Selects every element of an array with `shape`.
pub fn full_selection(shape: &[usize]) -> Vec<AxisIndex> {
    shape
        .iter()
        .map(|&len| AxisIndex::Slice(Slice::full(len)))
        .collect()
}

/// Selects the block described by `spans`, one span per axis.
pub fn span_selection(spans: &[Span]) -> Vec<AxisIndex> {
    spans
        .iter()
        .map(|s| AxisIndex::Slice(Slice::new(s.begin as isize, s.end as isize, 1)))
        .collect()
}

/// Shape of the array selected by `entries`: integer entries are dropped.
pub fn result_shape(entries: &[AxisIndex]) -> Vec<usize> {
    entries.iter().filter_map(AxisIndex::result_len).collect()
}

/// Resolves `args` against `shape`.
///
/// # Errors
///
/// - `Error::Dimension` if `args` does not have one entry per axis.
/// - `Error::IndexOutOfRange` for an integer outside `[-len, len)`.
/// - `Error::ZeroStep` for a slice with step 0.
pub fn normalize(shape: &[usize], args: &[AxisArg]) -> Result<Vec<AxisIndex>> {
    if shape.len() != args.len() {
        return Err(Error::Dimension {
            expected: shape.len(),
            got: args.len(),
        });
    }

    shape
        .iter()
        .zip(args.iter())
        .enumerate()
        .map(|(axis, (&size, arg))| normalize_axis(axis, size, arg))
        .collect()
}

fn normalize_axis(axis: usize, size: usize, arg: &AxisArg) -> Result<AxisIndex> {
    let len = size as isize;
    match *arg {
        AxisArg::Index(index) => {
            let resolved = if index < 0 { index + len } else { index };
            if resolved < 0 || resolved >= len {
                return Err(Error::IndexOutOfRange { axis, index, size });
            }
            Ok(AxisIndex::Index(resolved as usize))
        }
        AxisArg::Slice { start, stop, step } => {
            let step = step.unwrap_or(1);
            if step == 0 {
                return Err(Error::ZeroStep { axis });
            }
            let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
            let clamp = |bound: isize| {
                if bound < 0 {
                    (bound + len).max(lower)
                } else {
                    bound.min(upper)
                }
            };
            let start = start.map_or(if step < 0 { upper } else { lower }, clamp);
            let stop = stop.map_or(if step < 0 { lower } else { upper }, clamp);
            Ok(AxisIndex::Slice(Slice::new(start, stop, step)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s;

    fn slice(entry: AxisIndex) -> Slice {
        match entry {
            AxisIndex::Slice(s) => s,
            AxisIndex::Index(_) => panic!("expected a slice"),
        }
    }

    #[test]
    fn test_normalize_defaults() {
        let entries = normalize(&[10], &s![..]).unwrap();
        assert_eq!(entries, vec![AxisIndex::Slice(Slice::new(0, 10, 1))]);

        let reversed = normalize(&[10], &[AxisArg::full().step(-1)]).unwrap();
        let s = slice(reversed[0]);
        assert_eq!(s, Slice::new(9, -1, -1));
        assert_eq!(s.indices().collect::<Vec<_>>(), (0..10).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_normalize_negative_and_clamped_bounds() {
        let entries = normalize(&[10], &s![-3..]).unwrap();
        assert_eq!(slice(entries[0]), Slice::new(7, 10, 1));

        let entries = normalize(&[10], &s![2..100]).unwrap();
        assert_eq!(slice(entries[0]), Slice::new(2, 10, 1));

        let entries = normalize(&[10], &s![-100..3]).unwrap();
        assert_eq!(slice(entries[0]), Slice::new(0, 3, 1));
    }

    #[test]
    fn test_normalize_integer_index() {
        let entries = normalize(&[4, 5], &s![-1, 0]).unwrap();
        assert_eq!(entries, vec![AxisIndex::Index(3), AxisIndex::Index(0)]);

        let err = normalize(&[4], &s![4]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 4, size: 4, .. }));
        assert!(normalize(&[4], &s![-5]).is_err());
    }

    #[test]
    fn test_huge_indices_saturate() {
        assert_eq!(AxisArg::from(usize::MAX), AxisArg::Index(isize::MAX));
        assert_eq!(
            AxisArg::from(3..usize::MAX),
            AxisArg::Slice {
                start: Some(3),
                stop: Some(isize::MAX),
                step: None
            }
        );

        let err = normalize(&[4], &s![usize::MAX]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { .. }));
        let entries = normalize(&[4], &s![1..usize::MAX]).unwrap();
        assert_eq!(slice(entries[0]), Slice::new(1, 4, 1));
    }

    #[test]
    fn test_normalize_rank_mismatch() {
        let err = normalize(&[4, 5], &s![1]).unwrap_err();
        assert!(matches!(err, Error::Dimension { expected: 2, got: 1 }));
    }

    #[test]
    fn test_normalize_zero_step() {
        let err = normalize(&[4], &[AxisArg::full().step(0)]).unwrap_err();
        assert!(matches!(err, Error::ZeroStep { axis: 0 }));
    }

    #[test]
    fn test_slice_len() {
        assert_eq!(Slice::new(2, 9, 1).len(), 7);
        assert_eq!(Slice::new(0, 10, 3).len(), 4);
        assert_eq!(Slice::new(5, 5, 1).len(), 0);
        assert_eq!(Slice::new(7, 2, 1).len(), 0);
        assert_eq!(Slice::new(8, 0, -2).len(), 4);
        assert_eq!(Slice::new(2, 7, -1).len(), 0);
    }

    #[test]
    fn test_empty_slice_window() {
        let entries = normalize(&[10], &s![12..20]).unwrap();
        let window = entries[0].window();
        assert_eq!(window.len, 0);
        assert_eq!(result_shape(&entries), vec![0]);
    }

    #[test]
    fn test_result_shape_drops_indexed_axes() {
        let entries = normalize(&[4, 5, 6], &s![1, 1..3, ..]).unwrap();
        assert_eq!(result_shape(&entries), vec![2, 6]);
    }
}
