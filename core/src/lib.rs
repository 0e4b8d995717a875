//! # distarray
//!
//! `distarray` partitions N-dimensional arrays across a set of workers and lets a single
//! coordinator treat them as one logical array.
//!
//! The coordinator never holds the data. It holds *metadata* (a [`Decomposition`] describing which
//! worker owns which block) and a [`RemoteHandle`](distributed::handle::RemoteHandle) naming each
//! worker's local part. Indexing, slicing and element-wise work are translated into per-worker
//! commands by pure index arithmetic.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Dense local arrays, the per-worker storage.
//! - [`index`]: Range splitting, slice normalization and the slice-projection engine.
//! - [`decomposition`]: Block placement of a global array over workers.
//! - [`distributed`]: Remote execution, distributed and cloned arrays, `map`/`reduce`/`remote`.
//! - [`config`] and [`logging`]: Runtime configuration and `tracing` setup.
//!
//! ## Example
//!
//! ```rust
//! use distarray::distributed::{CpuCluster, DistributedArray, Selection};
//! use distarray::{s, ClusterConfig};
//!
//! let cluster = CpuCluster::<f64>::new(ClusterConfig::new(3)).unwrap();
//! let workers = [0, 1, 2];
//!
//! let array = DistributedArray::ones(&cluster, &[10], &[0], &workers).unwrap();
//! match array.get(&s![2..9]).unwrap() {
//!     Selection::Distributed(view) => assert_eq!(view.shape(), &[7]),
//!     _ => unreachable!(),
//! }
//! ```

/// Identifier of a worker in a remote context.
pub type WorkerId = usize;

/// Builds an index expression, one argument per axis.
///
/// Accepts integers (negative counts from the end) and Rust ranges; use
/// [`AxisArg::range`](index::AxisArg::range) with [`step`](index::AxisArg::step) for strides.
///
/// ```rust
/// use distarray::s;
/// use distarray::index::AxisArg;
///
/// let expr = s![2..9, .., -1, AxisArg::range(8, 0).step(-2)];
/// assert_eq!(expr.len(), 4);
/// ```
#[macro_export]
macro_rules! s {
    ($($arg:expr),* $(,)?) => {
        vec![$($crate::index::AxisArg::from($arg)),*]
    };
}

pub mod config;
pub mod decomposition;
pub mod distributed;
pub mod error;
pub mod index;
pub mod logging;
pub mod tensor;

pub use config::{ClusterConfig, DispatchMode};
pub use decomposition::Decomposition;
pub use error::{Error, Result};
pub use tensor::{DType, Element, ReduceOp, Tensor, TensorElem, TensorError};
