//! Arrays replicated on a set of workers.

use crate::decomposition::Decomposition;
use crate::distributed::algorithm::Operand;
use crate::distributed::backend::RemoteContext;
use crate::distributed::command::{Assignment, Command, Fill, Request};
use crate::distributed::handle::RemoteHandle;
use crate::error::{Error, Result};
use crate::index::{normalize, result_shape, AxisArg};
use crate::tensor::{self, DType, Element, Tensor, TensorError};
use crate::WorkerId;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An array of the same shape held whole by every worker of a set.
///
/// The copies are independent: each worker may accumulate different values into its own copy
/// (for example one partial sum per worker), and [`merge`](Self::merge) combines them on the
/// coordinator.
///
/// # Examples
///
/// ```rust
/// use distarray::distributed::{ClonedArray, CpuCluster};
/// use distarray::{ClusterConfig, Tensor};
///
/// let cluster = CpuCluster::<f64>::new(ClusterConfig::new(3)).unwrap();
/// let local = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]).unwrap();
/// let cloned = ClonedArray::from_tensor(&cluster, &local, &[0, 1, 2]).unwrap();
///
/// assert_eq!(cloned.sum().unwrap().data(), &[3.0, 6.0, 9.0, 12.0]);
/// ```
pub struct ClonedArray<C: RemoteContext> {
    shape: Vec<usize>,
    handle: RemoteHandle<C>,
}

/// Right-hand side of [`ClonedArray::set`].
pub enum ClonedValue<'a, T> {
    Scalar(T),
    Tensor(&'a Tensor<T>),
}

/// Sorted, duplicate-free, non-empty worker list.
fn worker_set(workers: &[WorkerId]) -> Result<Vec<WorkerId>> {
    let mut set = workers.to_vec();
    set.sort_unstable();
    set.dedup();
    if set.is_empty() {
        return Err(Error::Configuration(
            "a cloned array needs at least one worker".to_string(),
        ));
    }
    if set.len() != workers.len() {
        return Err(Error::Configuration(format!(
            "workers {workers:?} contain duplicates"
        )));
    }
    Ok(set)
}

impl<C: RemoteContext> ClonedArray<C> {
    fn allocate(
        context: &Arc<C>,
        shape: &[usize],
        fill: Fill<C::Elem>,
        workers: &[WorkerId],
    ) -> Result<Self> {
        let handle = RemoteHandle::new(context, worker_set(workers)?);
        context.broadcast(
            Command::Allocate {
                handle: handle.id(),
                shape: shape.to_vec(),
                fill,
            },
            handle.workers(),
        )?;
        Ok(Self {
            shape: shape.to_vec(),
            handle,
        })
    }

    /// Local arrays are always initialized; this is the same as [`zeros`](Self::zeros).
    pub fn empty(context: &Arc<C>, shape: &[usize], workers: &[WorkerId]) -> Result<Self> {
        Self::zeros(context, shape, workers)
    }

    pub fn zeros(context: &Arc<C>, shape: &[usize], workers: &[WorkerId]) -> Result<Self> {
        Self::allocate(context, shape, Fill::Zeros, workers)
    }

    pub fn ones(context: &Arc<C>, shape: &[usize], workers: &[WorkerId]) -> Result<Self> {
        Self::allocate(context, shape, Fill::Ones, workers)
    }

    pub fn full(
        context: &Arc<C>,
        shape: &[usize],
        value: C::Elem,
        workers: &[WorkerId],
    ) -> Result<Self> {
        Self::allocate(context, shape, Fill::Value(value), workers)
    }

    /// Replicates a local array on every worker in `workers`.
    pub fn from_tensor(
        context: &Arc<C>,
        tensor: &Tensor<C::Elem>,
        workers: &[WorkerId],
    ) -> Result<Self> {
        let handle = RemoteHandle::new(context, worker_set(workers)?);
        context.push(handle.id(), tensor, handle.workers())?;
        Ok(Self {
            shape: tensor.shape().to_vec(),
            handle,
        })
    }

    /// Wraps externally produced local arrays, one per worker. All must have the same shape.
    pub fn from_locals(context: &Arc<C>, locals: Vec<(WorkerId, Tensor<C::Elem>)>) -> Result<Self> {
        let workers: Vec<WorkerId> = locals.iter().map(|(w, _)| *w).collect();
        let worker_set = worker_set(&workers)?;
        let shape = locals[0].1.shape().to_vec();
        if let Some((_, odd)) = locals.iter().find(|(_, t)| t.shape() != shape.as_slice()) {
            return Err(TensorError::ShapeMismatch {
                expected: shape,
                got: odd.shape().to_vec(),
            }
            .into());
        }

        let handle = RemoteHandle::new(context, worker_set);
        let requests = locals
            .into_iter()
            .map(|(worker, tensor)| {
                Request::new(
                    worker,
                    Command::Store {
                        handle: handle.id(),
                        tensor,
                    },
                )
            })
            .collect();
        context.dispatch(requests)?;
        Ok(Self { shape, handle })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn dtype(&self) -> DType {
        <C::Elem as Element>::DTYPE
    }

    /// Workers holding a copy, ascending.
    pub fn workers(&self) -> &[WorkerId] {
        self.handle.workers()
    }

    pub fn handle(&self) -> &RemoteHandle<C> {
        &self.handle
    }

    pub fn context(&self) -> &Arc<C> {
        self.handle.context()
    }

    /// Pulls the copy held by `worker`.
    pub fn local(&self, worker: WorkerId) -> Result<Tensor<C::Elem>> {
        self.context().pull(self.handle.id(), worker)
    }

    /// Selects the same part of every copy, as a new cloned array on the same workers.
    pub fn get(&self, args: &[AxisArg]) -> Result<Self> {
        let entries = normalize(&self.shape, args)?;
        let context = self.context();
        let handle = RemoteHandle::new(context, self.workers().to_vec());
        context.broadcast(
            Command::Slice {
                src: self.handle.id(),
                dst: handle.id(),
                window: entries.clone(),
            },
            handle.workers(),
        )?;
        Ok(Self {
            shape: result_shape(&entries),
            handle,
        })
    }

    /// Writes the same value into the selected part of every copy.
    pub fn set(&mut self, args: &[AxisArg], value: ClonedValue<'_, C::Elem>) -> Result<()> {
        let entries = normalize(&self.shape, args)?;
        let value = match value {
            ClonedValue::Scalar(value) => Assignment::Scalar(value),
            ClonedValue::Tensor(tensor) => {
                let expected = result_shape(&entries);
                if tensor.shape() != expected.as_slice() {
                    return Err(TensorError::ShapeMismatch {
                        expected,
                        got: tensor.shape().to_vec(),
                    }
                    .into());
                }
                Assignment::Tensor(tensor.clone())
            }
        };
        self.context().broadcast(
            Command::Assign {
                dst: self.handle.id(),
                window: entries,
                value,
            },
            self.handle.workers(),
        )?;
        Ok(())
    }

    /// Replaces every copy with `tensor`, which must have this array's shape.
    pub fn set_all(&mut self, tensor: &Tensor<C::Elem>) -> Result<()> {
        if tensor.shape() != self.shape.as_slice() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: tensor.shape().to_vec(),
            }
            .into());
        }
        self.context()
            .push(self.handle.id(), tensor, self.handle.workers())
    }

    /// Pulls every copy and folds them with `op`, left to right in ascending worker order.
    ///
    /// `op` need not be associative or commutative; it sees exactly that order.
    pub fn merge<F>(&self, mut op: F) -> Result<Tensor<C::Elem>>
    where
        F: FnMut(&Tensor<C::Elem>, &Tensor<C::Elem>) -> tensor::Result<Tensor<C::Elem>>,
    {
        debug!(handle = %self.handle.id(), workers = self.workers().len(), "merge");
        let copies = self
            .context()
            .broadcast(Command::Fetch { handle: self.handle.id() }, self.workers())?
            .into_iter()
            .map(|reply| reply.into_tensor());

        let mut acc: Option<Tensor<C::Elem>> = None;
        for copy in copies {
            let copy = copy?;
            acc = Some(match acc {
                None => copy,
                Some(acc) => op(&acc, &copy)?,
            });
        }
        acc.ok_or_else(|| Error::Contract("merge over zero workers".to_string()))
    }

    /// Element-wise sum of all copies.
    pub fn sum(&self) -> Result<Tensor<C::Elem>> {
        self.merge(|a, b| a + b)
    }

    /// Releases every copy now, reporting failures.
    pub fn release(self) -> Result<()> {
        self.handle.release()
    }
}

impl<C: RemoteContext> Operand for ClonedArray<C> {
    type Context = C;

    fn handle(&self) -> &RemoteHandle<C> {
        &self.handle
    }

    fn decomposition(&self) -> Option<&Decomposition> {
        None
    }

    fn rebuild(
        &self,
        handle: RemoteHandle<C>,
        shapes: Vec<(WorkerId, Vec<usize>)>,
    ) -> Result<Self> {
        let mut shapes = shapes.into_iter().map(|(_, shape)| shape);
        let shape = shapes
            .next()
            .ok_or_else(|| Error::Contract("no worker produced an array".to_string()))?;
        if let Some(odd) = shapes.find(|s| *s != shape) {
            return Err(Error::Contract(format!(
                "workers produced copies of different shapes {shape:?} and {odd:?}"
            )));
        }
        Ok(Self { shape, handle })
    }
}

impl<C: RemoteContext> fmt::Debug for ClonedArray<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClonedArray")
            .field("shape", &self.shape)
            .field("dtype", &self.dtype())
            .field("handle", &self.handle)
            .finish()
    }
}
