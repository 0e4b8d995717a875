//! Dense local arrays.
//!
//! # What is a Tensor here?
//!
//! A [`Tensor`] is the piece of data a single worker actually owns: a multi-dimensional array
//! stored as one flat buffer. Distributed arrays are assembled from many of these, one per
//! worker, and the coordinator uses them to stage pushes and receive pulls.
//!
//! A `Tensor` is defined by:
//! 1. **Data**: A flat vector of elements.
//! 2. **Shape**: The extent of each axis (e.g., `[2, 3]`). The rank is decided at runtime, since
//!    slicing with integer indices removes axes.
//! 3. **Strides**: How to step through the flat data to traverse each axis.
//!
//! ## Example
//!
//! ```rust
//! use distarray::tensor::Tensor;
//!
//! let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
//!
//! assert_eq!(tensor.shape(), &[2, 3]);
//! assert_eq!(tensor.strides(), &[3, 1]);
//! assert_eq!(tensor.get(&[1, 0]).unwrap(), 4.0);
//! ```
//!
//! > [!TIP]
//! > Layout is **row-major**: the last axis changes fastest in memory. A rank-0 tensor holds
//! > exactly one element and is how scalar selections are represented.

use distarray_kernels::{row_major_strides, KernelError};
use num_traits::{FromPrimitive, Num, NumAssign, ToPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use thiserror::Error;

pub mod ops;
pub mod reduce;

pub use reduce::ReduceOp;

/// Error type for Tensor operations.
#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
    /// The shape of the data does not match the expected shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// An index is out of bounds for the given shape.
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// The requested operation is not supported (e.g., for a specific rank or type).
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

pub type Result<T> = std::result::Result<T, TensorError>;

/// Trait bound for elements that can be stored in a Tensor.
///
/// # Requirements
/// - `Copy + Clone`: Elements live in a contiguous `Vec<T>` and are copied freely.
/// - `Num + ...`: Numeric operations for element-wise math and reductions.
/// - `Send + Sync`: Required for parallel execution via `rayon` and for crossing worker threads.
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// Runtime tag of an element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    I32,
    I64,
    U32,
    U64,
}

impl DType {
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    pub fn is_signed(self) -> bool {
        !matches!(self, DType::U32 | DType::U64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U32 => "u32",
            DType::U64 => "u64",
        };
        f.write_str(name)
    }
}

/// An element type that can be sent to workers.
pub trait Element: TensorElem + Serialize + DeserializeOwned + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element!(f32 => F32, f64 => F64, i32 => I32, i64 => I64, u32 => U32, u64 => U64);

/// The core Tensor struct: an N-dimensional, row-major array.
///
/// Unlike a fixed-rank array type, the rank is part of the value. Distributed selections change
/// rank depending on how many axes are indexed with an integer, so the local storage has to
/// follow.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    into = "TensorRepr<T>",
    try_from = "TensorRepr<T>",
    bound(
        serialize = "T: TensorElem + Serialize",
        deserialize = "T: TensorElem + Deserialize<'de>"
    )
)]
pub struct Tensor<T> {
    shape: Vec<usize>,
    strides: Vec<usize>,
    data: Vec<T>,
}

/// Wire form of a [`Tensor`]: strides are recomputed on arrival.
#[derive(Serialize, Deserialize)]
struct TensorRepr<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T> From<Tensor<T>> for TensorRepr<T> {
    fn from(tensor: Tensor<T>) -> Self {
        Self {
            shape: tensor.shape,
            data: tensor.data,
        }
    }
}

impl<T: TensorElem> TryFrom<TensorRepr<T>> for Tensor<T> {
    type Error = TensorError;

    fn try_from(repr: TensorRepr<T>) -> Result<Self> {
        Tensor::new(repr.data, repr.shape)
    }
}

impl<T: Debug> Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data", &self.data)
            .finish()
    }
}

impl<T> Tensor<T>
where
    T: TensorElem,
{
    /// Creates a new Tensor from a vector of data and a shape.
    ///
    /// # Arguments
    ///
    /// * `data` - A flat vector containing the tensor elements, row-major.
    /// * `shape` - The dimensions of the tensor. An empty shape makes a scalar.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the length of `data` does not match the product of `shape`.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }

        let strides = row_major_strides(&shape);
        Ok(Self {
            shape,
            strides,
            data,
        })
    }

    /// Creates a new Tensor filled with `value`.
    pub fn full(shape: &[usize], value: T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            strides: row_major_strides(shape),
            data: vec![value; size],
        }
    }

    /// Creates a new Tensor filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::zero())
    }

    /// Creates a new Tensor filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, T::one())
    }

    /// A rank-0 tensor holding `value`.
    pub fn scalar(value: T) -> Self {
        Self::full(&[], value)
    }

    /// Reshapes the tensor to a new shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the total number of elements in `new_shape`
    /// does not match the current size of the tensor.
    pub fn reshape(self, new_shape: Vec<usize>) -> Result<Self> {
        let new_size: usize = new_shape.iter().product();
        if self.data.len() != new_size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.data.len()],
                got: vec![new_size],
            });
        }
        Ok(Self {
            strides: row_major_strides(&new_shape),
            shape: new_shape,
            data: self.data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Reads one element.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if `index` does not address an element.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        let out_of_bounds = || TensorError::IndexOutOfBounds {
            index: index.to_vec(),
            shape: self.shape.clone(),
        };
        if index.len() != self.rank() {
            return Err(out_of_bounds());
        }
        let mut offset = 0;
        for ((&i, &dim), &stride) in index.iter().zip(&self.shape).zip(&self.strides) {
            if i >= dim {
                return Err(out_of_bounds());
            }
            offset += i * stride;
        }
        Ok(self.data[offset])
    }

    /// The single element of a one-element tensor (usually rank 0).
    pub fn item(&self) -> Result<T> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(TensorError::ShapeMismatch {
                expected: vec![],
                got: self.shape.clone(),
            }),
        }
    }
}
