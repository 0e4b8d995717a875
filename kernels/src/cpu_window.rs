use crate::{row_major_strides, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// A strided selection along one axis: `len` elements starting at `start`, `step` apart.
///
/// `step` may be negative, in which case the window walks towards index zero.
/// An empty window (`len == 0`) is valid regardless of `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub start: usize,
    pub len: usize,
    pub step: isize,
}

impl Window {
    pub fn new(start: usize, len: usize, step: isize) -> Self {
        Self { start, len, step }
    }

    /// The whole axis, in order.
    pub fn full(size: usize) -> Self {
        Self::new(0, size, 1)
    }

    /// A single element. The axis is kept with length one.
    pub fn single(index: usize) -> Self {
        Self::new(index, 1, 1)
    }

    fn last(&self) -> isize {
        self.start as isize + (self.len as isize - 1) * self.step
    }
}

/// Checks `windows` against `shape` and returns the extent of every window.
fn validate(shape: &[usize], windows: &[Window]) -> Result<Vec<usize>> {
    if shape.len() != windows.len() {
        return Err(KernelError::RankMismatch {
            expected: shape.len(),
            got: windows.len(),
        });
    }

    for (axis, (w, &size)) in windows.iter().zip(shape.iter()).enumerate() {
        if w.step == 0 {
            return Err(KernelError::ZeroStep { axis });
        }
        if w.len == 0 {
            continue;
        }
        if w.start >= size {
            return Err(KernelError::OutOfBounds {
                axis,
                index: w.start as isize,
                size,
            });
        }
        let last = w.last();
        if last < 0 || last >= size as isize {
            return Err(KernelError::OutOfBounds {
                axis,
                index: last,
                size,
            });
        }
    }

    Ok(windows.iter().map(|w| w.len).collect())
}

fn check_buffer<T>(data: &[T], shape: &[usize]) -> Result<()> {
    let size: usize = shape.iter().product();
    if data.len() != size {
        return Err(KernelError::ShapeMismatch {
            expected: vec![size],
            got: vec![data.len()],
        });
    }
    Ok(())
}

/// Maps a linear index in the window-space onto an offset into the source buffer.
#[inline]
fn source_offset(
    mut linear: usize,
    extents: &[usize],
    windows: &[Window],
    strides: &[usize],
) -> usize {
    let mut offset = 0isize;
    for axis in (0..extents.len()).rev() {
        let coord = linear % extents[axis];
        linear /= extents[axis];
        let w = &windows[axis];
        let index = w.start as isize + coord as isize * w.step;
        offset += index * strides[axis] as isize;
    }
    offset as usize
}

/// CPU implementation of a strided gather.
///
/// Copies the elements selected by `windows` out of the row-major buffer `data` of shape
/// `shape` into a new contiguous buffer whose shape is the window lengths.
///
/// Output elements are independent, so we fill them in parallel with `rayon`.
pub fn cpu_gather<T>(data: &[T], shape: &[usize], windows: &[Window]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_buffer(data, shape)?;
    let extents = validate(shape, windows)?;
    let size: usize = extents.iter().product();
    if size == 0 {
        return Ok(Vec::new());
    }

    let strides = row_major_strides(shape);
    let mut out = vec![T::zero(); size];
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        *o = data[source_offset(i, &extents, windows, &strides)];
    });

    Ok(out)
}

/// CPU implementation of a strided scatter: the inverse of [`cpu_gather`].
///
/// `src` is laid out in window-space order and must hold exactly as many elements as the
/// windows select.
pub fn cpu_scatter<T>(data: &mut [T], shape: &[usize], windows: &[Window], src: &[T]) -> Result<()>
where
    T: KernelElem,
{
    check_buffer(data, shape)?;
    let extents = validate(shape, windows)?;
    let size: usize = extents.iter().product();
    if src.len() != size {
        return Err(KernelError::ShapeMismatch {
            expected: extents,
            got: vec![src.len()],
        });
    }

    let strides = row_major_strides(shape);
    for (i, &value) in src.iter().enumerate() {
        data[source_offset(i, &extents, windows, &strides)] = value;
    }
    Ok(())
}

/// Writes `value` into every element selected by `windows`.
pub fn cpu_fill<T>(data: &mut [T], shape: &[usize], windows: &[Window], value: T) -> Result<()>
where
    T: KernelElem,
{
    check_buffer(data, shape)?;
    let extents = validate(shape, windows)?;
    let size: usize = extents.iter().product();

    let strides = row_major_strides(shape);
    for i in 0..size {
        data[source_offset(i, &extents, windows, &strides)] = value;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_rows_and_columns() {
        // 3x4
        let data: Vec<i32> = (0..12).collect();
        let shape = [3, 4];

        // rows 1..3, columns 0, 2
        let windows = [Window::new(1, 2, 1), Window::new(0, 2, 2)];
        let out = cpu_gather(&data, &shape, &windows).unwrap();
        assert_eq!(out, vec![4, 6, 8, 10]);
    }

    #[test]
    fn test_gather_negative_step() {
        let data: Vec<i32> = (0..10).collect();
        let out = cpu_gather(&data, &[10], &[Window::new(8, 4, -2)]).unwrap();
        assert_eq!(out, vec![8, 6, 4, 2]);
    }

    #[test]
    fn test_gather_scalar_buffer() {
        let out = cpu_gather(&[7.0f32], &[], &[]).unwrap();
        assert_eq!(out, vec![7.0]);
    }

    #[test]
    fn test_gather_empty_window_ignores_start() {
        let data = vec![1.0f64; 4];
        let out = cpu_gather(&data, &[4], &[Window::new(100, 0, 1)]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_gather_out_of_bounds() {
        let data = vec![0i64; 5];
        let err = cpu_gather(&data, &[5], &[Window::new(3, 3, 1)]).unwrap_err();
        assert_eq!(
            err,
            KernelError::OutOfBounds {
                axis: 0,
                index: 5,
                size: 5
            }
        );

        let err = cpu_gather(&data, &[5], &[Window::new(1, 3, -1)]).unwrap_err();
        assert!(matches!(err, KernelError::OutOfBounds { index: -1, .. }));
    }

    #[test]
    fn test_scatter_then_gather() {
        let mut data = vec![0i32; 6];
        let shape = [2, 3];
        let windows = [Window::full(2), Window::new(2, 2, -2)];

        cpu_scatter(&mut data, &shape, &windows, &[1, 2, 3, 4]).unwrap();
        // column 2 gets [1, 3], column 0 gets [2, 4]
        assert_eq!(data, vec![2, 0, 1, 4, 0, 3]);
    }

    #[test]
    fn test_scatter_size_mismatch() {
        let mut data = vec![0i32; 4];
        let err = cpu_scatter(&mut data, &[4], &[Window::full(4)], &[1, 2]).unwrap_err();
        assert!(matches!(err, KernelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_fill_strided() {
        let mut data = vec![0u32; 8];
        cpu_fill(&mut data, &[8], &[Window::new(1, 4, 2)], 9).unwrap();
        assert_eq!(data, vec![0, 9, 0, 9, 0, 9, 0, 9]);
    }
}
