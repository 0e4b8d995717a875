//! Crate-level error type.

use crate::distributed::command::HandleId;
use crate::tensor::TensorError;
use crate::WorkerId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid worker count, axis, grid or cluster setting.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An index expression whose arity does not match the array rank.
    #[error("Dimension mismatch: array has rank {expected}, index expression has {got} entries")]
    Dimension { expected: usize, got: usize },

    /// Operands of `map` (or an element-wise operator) are decomposed differently.
    #[error("Decomposition mismatch: operand {operand} is not decomposed like operand 0")]
    DecompositionMismatch { operand: usize },

    /// A worker rejected a command, or could not be reached.
    #[error("Remote execution failed on worker {worker}: {reason}")]
    RemoteExecution { worker: WorkerId, reason: String },

    #[error("Index {index} is out of range for axis {axis} with size {size}")]
    IndexOutOfRange {
        axis: usize,
        index: isize,
        size: usize,
    },

    #[error("Slice step cannot be zero (axis {axis})")]
    ZeroStep { axis: usize },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation {op} requires parameter '{name}'")]
    MissingParameter { op: String, name: String },

    #[error("Unknown handle {0}")]
    UnknownHandle(HandleId),

    /// The remote protocol was not followed (unexpected reply, inconsistent worker results).
    #[error("Protocol violation: {0}")]
    Contract(String),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

pub type Result<T> = std::result::Result<T, Error>;
