//! Index arithmetic.
//!
//! Everything here is pure: no worker is contacted. The distributed array types combine these
//! pieces to turn a global index expression into one local expression per worker.
//!
//! - [`range`]: splitting an axis into contiguous blocks.
//! - [`slice`]: user-facing per-axis arguments and their normalized form.
//! - [`projection`]: intersecting a normalized expression with the blocks of one axis.

pub mod projection;
pub mod range;
pub mod slice;

pub use projection::{project_axis, BlockSelection};
pub use range::{split, IndexRange, Span};
pub use slice::{
    full_selection, normalize, result_shape, span_selection, AxisArg, AxisIndex, Slice,
};
