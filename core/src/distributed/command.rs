//! The command protocol between coordinator and workers.
//!
//! Every interaction with a worker is one [`Command`] answered by one [`Reply`]. Commands carry
//! data and *names* (handles, registered operation names) only, never code, so they can be
//! serialized and sent to a worker in another process.

use crate::error::{Error, Result};
use crate::index::AxisIndex;
use crate::tensor::{Element, Tensor};
use crate::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a value in a worker's namespace.
///
/// Handles are issued by the remote context and are unique for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(u64);

impl HandleId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array{}", self.0)
    }
}

/// Initial content of a freshly allocated local array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Fill<T> {
    Zeros,
    Ones,
    Value(T),
}

/// Named numeric arguments passed along with a registered operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, f64>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// # Errors
    ///
    /// Returns `Error::MissingParameter` naming `op` if `name` is absent.
    pub fn require(&self, op: &str, name: &str) -> Result<f64> {
        self.get(name).ok_or_else(|| Error::MissingParameter {
            op: op.to_string(),
            name: name.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What to write into a window of a local array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Element", deserialize = "T: Element"))]
pub enum Assignment<T> {
    Scalar(T),
    Tensor(Tensor<T>),
    /// Another local array on the same worker, whose shape matches the window.
    Handle(HandleId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Element", deserialize = "T: Element"))]
pub enum Command<T> {
    /// Create a local array.
    Allocate {
        handle: HandleId,
        shape: Vec<usize>,
        fill: Fill<T>,
    },
    /// Store a local array sent by the coordinator (push).
    Store { handle: HandleId, tensor: Tensor<T> },
    /// Send a local array back (pull).
    Fetch { handle: HandleId },
    /// Send back a window of a local array.
    FetchWindow {
        handle: HandleId,
        window: Vec<AxisIndex>,
    },
    /// `dst = src[window]`, as a new local array.
    Slice {
        src: HandleId,
        dst: HandleId,
        window: Vec<AxisIndex>,
    },
    /// `dst[window] = value`.
    Assign {
        dst: HandleId,
        window: Vec<AxisIndex>,
        value: Assignment<T>,
    },
    /// Run a registered operation on local arrays. With an `output` handle a returned array is
    /// stored under it; without, it is sent back.
    Apply {
        op: String,
        operands: Vec<HandleId>,
        output: Option<HandleId>,
        params: Params,
    },
    /// Run a registered reducer over a local array.
    Reduce { handle: HandleId, reducer: String },
    /// Drop a local array. Releasing an unknown handle succeeds.
    Release { handle: HandleId },
}

impl<T> Command<T> {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Allocate { .. } => "allocate",
            Command::Store { .. } => "store",
            Command::Fetch { .. } => "fetch",
            Command::FetchWindow { .. } => "fetch_window",
            Command::Slice { .. } => "slice",
            Command::Assign { .. } => "assign",
            Command::Apply { .. } => "apply",
            Command::Reduce { .. } => "reduce",
            Command::Release { .. } => "release",
        }
    }
}

/// A command addressed to one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Request<T> {
    pub worker: WorkerId,
    pub command: Command<T>,
}

impl<T> Request<T> {
    pub fn new(worker: WorkerId, command: Command<T>) -> Self {
        Self { worker, command }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Element", deserialize = "T: Element"))]
pub enum Reply<T> {
    Done,
    /// A local array was stored; its shape.
    Stored { shape: Vec<usize> },
    Tensor(Tensor<T>),
    Scalar(T),
}

impl<T> Reply<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Done => "done",
            Reply::Stored { .. } => "stored",
            Reply::Tensor(_) => "tensor",
            Reply::Scalar(_) => "scalar",
        }
    }

    pub fn into_tensor(self) -> Result<Tensor<T>> {
        match self {
            Reply::Tensor(tensor) => Ok(tensor),
            other => Err(unexpected("tensor", &other)),
        }
    }

    pub fn into_scalar(self) -> Result<T> {
        match self {
            Reply::Scalar(value) => Ok(value),
            other => Err(unexpected("scalar", &other)),
        }
    }

    /// Shape of a stored output, `None` if the operation produced nothing.
    pub fn into_stored(self) -> Result<Option<Vec<usize>>> {
        match self {
            Reply::Stored { shape } => Ok(Some(shape)),
            Reply::Done => Ok(None),
            other => Err(unexpected("stored", &other)),
        }
    }

    /// A returned array, `None` if the operation produced nothing.
    pub fn into_output(self) -> Result<Option<Tensor<T>>> {
        match self {
            Reply::Tensor(tensor) => Ok(Some(tensor)),
            Reply::Done => Ok(None),
            other => Err(unexpected("tensor", &other)),
        }
    }
}

fn unexpected<T>(expected: &str, got: &Reply<T>) -> Error {
    Error::Contract(format!("expected a {expected} reply, got {}", got.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Slice;

    #[test]
    fn test_handle_display() {
        assert_eq!(HandleId::new(7).to_string(), "array7");
    }

    #[test]
    fn test_params() {
        let params = Params::new().with("factor", 2.5);
        assert_eq!(params.get("factor"), Some(2.5));
        assert!(params.require("scale", "offset").is_err());
    }

    #[test]
    fn test_command_is_serializable() {
        let command: Command<f32> = Command::Assign {
            dst: HandleId::new(3),
            window: vec![AxisIndex::Slice(Slice::new(4, 0, -2)), AxisIndex::Index(1)],
            value: Assignment::Tensor(Tensor::new(vec![1.0, 2.0], vec![2]).unwrap()),
        };
        let json = serde_json::to_string(&command).unwrap();
        let back: Command<f32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn test_reply_conversions() {
        let reply: Reply<i32> = Reply::Scalar(4);
        assert_eq!(reply.into_scalar().unwrap(), 4);

        let reply: Reply<i32> = Reply::Done;
        assert_eq!(reply.clone().into_stored().unwrap(), None);
        assert!(matches!(reply.into_tensor(), Err(Error::Contract(_))));
    }
}
