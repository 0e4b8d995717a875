//! Tensor operations.
//!
//! # Overview
//!
//! This module implements the local math each worker performs on its own partition:
//! - **Element-wise Arithmetic**: `+`, `-`, `*`, `/` between tensors of identical shape.
//! - **Mapping**: applying a scalar function to every element.
//! - **Windows**: reading, writing and filling the sub-array selected by a normalized index
//!   expression, the building blocks of distributed `get` and `set`.
//!
//! > [!NOTE]
//! > There is no broadcasting. Shapes must match exactly for element-wise operations; a
//! > mismatch is reported as `TensorError::ShapeMismatch`.
//!
//! # Parallelism
//!
//! Element-wise operations run on `rayon`. Every worker thread of a cluster shares the same
//! global `rayon` pool.
//!
//! # Examples
//!
//! ```rust
//! use distarray::index::{AxisIndex, Slice};
//! use distarray::tensor::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0], vec![3]).unwrap();
//! let b = Tensor::new(vec![3.0, 4.0, 5.0], vec![3]).unwrap();
//!
//! let c = (&a + &b).unwrap();
//! assert_eq!(c.data(), &[4.0, 6.0, 8.0]);
//!
//! let tail = c.slice(&[AxisIndex::Slice(Slice::new(1, 3, 1))]).unwrap();
//! assert_eq!(tail.data(), &[6.0, 8.0]);
//! ```

use super::{Result, Tensor, TensorElem, TensorError};
use crate::index::{result_shape, AxisIndex};
use distarray_kernels::{cpu_fill, cpu_gather, cpu_scatter, Window};

use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

/// Implements a binary arithmetic operation trait (e.g., `Add`, `Sub`) for `&Tensor`.
///
/// This macro handles the boilerplate of:
/// 1. Checking shape compatibility.
/// 2. Creating a new output tensor.
/// 3. Performing the element-wise operation in parallel using `rayon`.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T> $trait for &Tensor<T>
        where
            T: TensorElem,
        {
            type Output = Result<Tensor<T>>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape.clone(),
                        got: rhs.shape.clone(),
                    });
                }

                let mut out = Tensor::zeros(&self.shape);
                out.data
                    .par_iter_mut()
                    .zip(self.data.par_iter())
                    .zip(rhs.data.par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

fn windows(entries: &[AxisIndex]) -> Vec<Window> {
    entries.iter().map(AxisIndex::window).collect()
}

impl<T> Tensor<T>
where
    T: TensorElem,
{
    /// Applies `f` to every element, producing a new tensor of the same shape.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let data = self.data.par_iter().map(|&x| f(x)).collect();
        Self {
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            data,
        }
    }

    /// Applies `f` to every element in place.
    pub fn map_inplace<F>(&mut self, f: F)
    where
        F: Fn(T) -> T + Sync + Send,
    {
        self.data.par_iter_mut().for_each(|x| *x = f(*x));
    }

    /// Copies out the sub-array selected by `entries`.
    ///
    /// Axes indexed with an integer are removed from the result, so selecting with integers
    /// only yields a rank-0 tensor.
    ///
    /// # Errors
    ///
    /// Returns a kernel error if `entries` does not have one entry per axis or reaches outside
    /// the tensor.
    pub fn slice(&self, entries: &[AxisIndex]) -> Result<Self> {
        let data = cpu_gather(&self.data, &self.shape, &windows(entries))?;
        Tensor::new(data, result_shape(entries))
    }

    /// Writes `src` into the sub-array selected by `entries`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if `src` does not have the shape of the selection.
    pub fn assign(&mut self, entries: &[AxisIndex], src: &Tensor<T>) -> Result<()> {
        let expected = result_shape(entries);
        if src.shape != expected {
            return Err(TensorError::ShapeMismatch {
                expected,
                got: src.shape.clone(),
            });
        }
        cpu_scatter(&mut self.data, &self.shape, &windows(entries), &src.data)?;
        Ok(())
    }

    /// Writes `value` into every element selected by `entries`.
    pub fn fill(&mut self, entries: &[AxisIndex], value: T) -> Result<()> {
        cpu_fill(&mut self.data, &self.shape, &windows(entries), value)?;
        Ok(())
    }

    /// Writes `value` into every element.
    pub fn fill_all(&mut self, value: T) {
        self.data.par_iter_mut().for_each(|x| *x = value);
    }
}
