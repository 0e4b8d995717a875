//! Arrays partitioned across workers.

use crate::decomposition::{Decomposition, ProjectedPart, Projection};
use crate::distributed::algorithm::{map, Operand};
use crate::distributed::backend::{single, RemoteContext};
use crate::distributed::command::{Assignment, Command, Fill, Params, Request};
use crate::distributed::handle::RemoteHandle;
use crate::error::{Error, Result};
use crate::index::{full_selection, normalize, span_selection, AxisArg, AxisIndex};
use crate::tensor::{DType, Element, Tensor, TensorError};
use crate::WorkerId;
use num_traits::ToPrimitive;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;
use tracing::debug;

/// An N-dimensional array whose blocks live on different workers.
///
/// The coordinator keeps only the [`Decomposition`] and a [`RemoteHandle`]; each worker holds
/// the block the decomposition assigns to it as a local [`Tensor`] named by the handle.
/// Dropping the array releases the blocks.
///
/// # Examples
///
/// ```rust
/// use distarray::distributed::{CpuCluster, DistributedArray, Selection};
/// use distarray::{s, ClusterConfig, Tensor};
///
/// let cluster = CpuCluster::<i32>::new(ClusterConfig::new(3)).unwrap();
/// let local = Tensor::new((0..10).collect(), vec![10]).unwrap();
/// let array = DistributedArray::from_tensor(&cluster, &local, &[0], &[0, 1, 2]).unwrap();
///
/// let Selection::Distributed(view) = array.get(&s![2..9]).unwrap() else { panic!() };
/// assert_eq!(view.gather().unwrap().data(), &[2, 3, 4, 5, 6, 7, 8]);
///
/// let Selection::Scalar(x) = array.get(&s![-1]).unwrap() else { panic!() };
/// assert_eq!(x, 9);
/// ```
pub struct DistributedArray<C: RemoteContext> {
    decomposition: Decomposition,
    handle: RemoteHandle<C>,
}

/// Result of indexing a [`DistributedArray`].
pub enum Selection<C: RemoteContext> {
    /// At least one distributed axis survived: the selection stays on the workers.
    Distributed(DistributedArray<C>),
    /// Every distributed axis was indexed away, or nothing was selected: the selection has been
    /// brought to the coordinator.
    Local(Tensor<C::Elem>),
    /// A single element.
    Scalar(C::Elem),
}

impl<C: RemoteContext> Selection<C> {
    pub fn into_distributed(self) -> Option<DistributedArray<C>> {
        match self {
            Selection::Distributed(array) => Some(array),
            _ => None,
        }
    }

    pub fn into_local(self) -> Option<Tensor<C::Elem>> {
        match self {
            Selection::Local(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn into_scalar(self) -> Option<C::Elem> {
        match self {
            Selection::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// The selection as a local array, pulling it if needed.
    pub fn to_tensor(&self) -> Result<Tensor<C::Elem>> {
        match self {
            Selection::Distributed(array) => array.gather(),
            Selection::Local(tensor) => Ok(tensor.clone()),
            Selection::Scalar(value) => Ok(Tensor::scalar(*value)),
        }
    }
}

impl<C: RemoteContext> fmt::Debug for Selection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Distributed(array) => f.debug_tuple("Distributed").field(array).finish(),
            Selection::Local(tensor) => f.debug_tuple("Local").field(tensor).finish(),
            Selection::Scalar(value) => f.debug_tuple("Scalar").field(value).finish(),
        }
    }
}

/// Right-hand side of [`DistributedArray::set`].
pub enum Value<'a, C: RemoteContext> {
    /// Written into every selected element.
    Scalar(C::Elem),
    /// A local array with the shape of the selection.
    Tensor(&'a Tensor<C::Elem>),
    /// A distributed array with the shape of the selection.
    Array(&'a DistributedArray<C>),
}

impl<C: RemoteContext> DistributedArray<C> {
    /// Allocates a local block on every worker of `decomposition`.
    pub fn with_decomposition(
        context: &Arc<C>,
        decomposition: Decomposition,
        fill: Fill<C::Elem>,
    ) -> Result<Self> {
        let handle = RemoteHandle::new(context, decomposition.worker_ids());
        let requests = decomposition
            .partitions()
            .into_iter()
            .map(|(worker, spans)| {
                Request::new(
                    worker,
                    Command::Allocate {
                        handle: handle.id(),
                        shape: spans.iter().map(|s| s.len()).collect(),
                        fill,
                    },
                )
            })
            .collect();
        context.dispatch(requests)?;
        Ok(Self {
            decomposition,
            handle,
        })
    }

    /// A new array split evenly along `distributed_axes` over `workers`.
    ///
    /// Local arrays are always initialized; this is the same as [`zeros`](Self::zeros).
    pub fn empty(
        context: &Arc<C>,
        shape: &[usize],
        distributed_axes: &[usize],
        workers: &[WorkerId],
    ) -> Result<Self> {
        Self::zeros(context, shape, distributed_axes, workers)
    }

    pub fn zeros(
        context: &Arc<C>,
        shape: &[usize],
        distributed_axes: &[usize],
        workers: &[WorkerId],
    ) -> Result<Self> {
        let decomposition = Decomposition::new(shape, distributed_axes, workers)?;
        Self::with_decomposition(context, decomposition, Fill::Zeros)
    }

    pub fn ones(
        context: &Arc<C>,
        shape: &[usize],
        distributed_axes: &[usize],
        workers: &[WorkerId],
    ) -> Result<Self> {
        let decomposition = Decomposition::new(shape, distributed_axes, workers)?;
        Self::with_decomposition(context, decomposition, Fill::Ones)
    }

    pub fn full(
        context: &Arc<C>,
        shape: &[usize],
        value: C::Elem,
        distributed_axes: &[usize],
        workers: &[WorkerId],
    ) -> Result<Self> {
        let decomposition = Decomposition::new(shape, distributed_axes, workers)?;
        Self::with_decomposition(context, decomposition, Fill::Value(value))
    }

    /// Scatters a local array over `workers`, split along `distributed_axes`.
    pub fn from_tensor(
        context: &Arc<C>,
        tensor: &Tensor<C::Elem>,
        distributed_axes: &[usize],
        workers: &[WorkerId],
    ) -> Result<Self> {
        let decomposition = Decomposition::new(tensor.shape(), distributed_axes, workers)?;
        let handle = RemoteHandle::new(context, decomposition.worker_ids());
        let requests = decomposition
            .partitions()
            .into_iter()
            .map(|(worker, spans)| {
                let block = tensor.slice(&span_selection(&spans))?;
                Ok(Request::new(
                    worker,
                    Command::Store {
                        handle: handle.id(),
                        tensor: block,
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        context.dispatch(requests)?;
        Ok(Self {
            decomposition,
            handle,
        })
    }

    /// Wraps externally produced local arrays, one per worker in placement order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the number of parts does not match the workers, and
    /// `TensorError::ShapeMismatch` if a part does not have its block's shape.
    pub fn from_parts(
        context: &Arc<C>,
        decomposition: Decomposition,
        parts: Vec<Tensor<C::Elem>>,
    ) -> Result<Self> {
        let partitions = decomposition.partitions();
        if parts.len() != partitions.len() {
            return Err(Error::Configuration(format!(
                "{} local arrays for {} workers",
                parts.len(),
                partitions.len()
            )));
        }

        let handle = RemoteHandle::new(context, decomposition.worker_ids());
        let requests = partitions
            .into_iter()
            .zip(parts)
            .map(|((worker, spans), tensor)| {
                let expected: Vec<usize> = spans.iter().map(|s| s.len()).collect();
                if tensor.shape() != expected.as_slice() {
                    return Err(TensorError::ShapeMismatch {
                        expected,
                        got: tensor.shape().to_vec(),
                    }
                    .into());
                }
                Ok(Request::new(
                    worker,
                    Command::Store {
                        handle: handle.id(),
                        tensor,
                    },
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        context.dispatch(requests)?;
        Ok(Self {
            decomposition,
            handle,
        })
    }

    pub fn shape(&self) -> &[usize] {
        self.decomposition.shape()
    }

    pub fn rank(&self) -> usize {
        self.decomposition.rank()
    }

    pub fn size(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn dtype(&self) -> DType {
        <C::Elem as Element>::DTYPE
    }

    pub fn distributed_axes(&self) -> Vec<usize> {
        self.decomposition.distributed_axes()
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.decomposition.worker_ids()
    }

    pub fn handle(&self) -> &RemoteHandle<C> {
        &self.handle
    }

    pub fn context(&self) -> &Arc<C> {
        self.handle.context()
    }

    /// Pulls the block held by `worker`.
    pub fn local(&self, worker: WorkerId) -> Result<Tensor<C::Elem>> {
        self.context().pull(self.handle.id(), worker)
    }

    /// Pulls every block and assembles the whole array on the coordinator.
    pub fn gather(&self) -> Result<Tensor<C::Elem>> {
        let partitions = self.decomposition.partitions();
        let requests = partitions
            .iter()
            .map(|(worker, _)| Request::new(*worker, Command::Fetch { handle: self.handle.id() }))
            .collect();
        let replies = self.context().dispatch(requests)?;

        let mut out = Tensor::zeros(self.shape());
        for ((_, spans), reply) in partitions.iter().zip(replies) {
            out.assign(&span_selection(spans), &reply.into_tensor()?)?;
        }
        Ok(out)
    }

    /// Selects part of the array.
    ///
    /// Workers whose block holds no selected element are not contacted. The result is:
    /// - a new `DistributedArray` over the participating workers if a distributed axis survives,
    /// - a pulled local array if every distributed axis was indexed with an integer, or if the
    ///   selection is empty,
    /// - a scalar if every axis was indexed with an integer.
    ///
    /// # Errors
    ///
    /// `Error::Dimension` if `args` does not have one entry per axis, plus the normalization
    /// errors of [`normalize`].
    pub fn get(&self, args: &[AxisArg]) -> Result<Selection<C>> {
        let entries = normalize(self.shape(), args)?;
        self.select(&entries)
    }

    /// Like [`get`](Self::get) with an already normalized expression.
    pub fn select(&self, entries: &[AxisIndex]) -> Result<Selection<C>> {
        let projection = self.decomposition.project(entries)?;
        if projection.size() == 0 {
            return Ok(Selection::Local(Tensor::zeros(projection.shape())));
        }

        let context = self.context();
        match projection.decomposition()? {
            Some(decomposition) => {
                let handle = RemoteHandle::new(context, decomposition.worker_ids());
                debug!(src = %self.handle.id(), dst = %handle.id(), "slice");
                let requests = projection
                    .parts()
                    .iter()
                    .map(|part| {
                        Request::new(
                            part.worker,
                            Command::Slice {
                                src: self.handle.id(),
                                dst: handle.id(),
                                window: part.local.clone(),
                            },
                        )
                    })
                    .collect();
                context.dispatch(requests)?;
                Ok(Selection::Distributed(Self {
                    decomposition,
                    handle,
                }))
            }
            None => {
                let part = match projection.parts() {
                    [part] => part,
                    parts => {
                        return Err(Error::Contract(format!(
                            "a selection without distributed axes spans {} workers",
                            parts.len()
                        )))
                    }
                };
                let request = Request::new(
                    part.worker,
                    Command::FetchWindow {
                        handle: self.handle.id(),
                        window: part.local.clone(),
                    },
                );
                let tensor = single(part.worker, context.dispatch(vec![request])?)?.into_tensor()?;
                if tensor.rank() == 0 {
                    Ok(Selection::Scalar(tensor.item()?))
                } else {
                    Ok(Selection::Local(tensor))
                }
            }
        }
    }

    /// Writes `value` into the selected part of the array.
    ///
    /// Only workers holding selected elements are contacted. A distributed value laid out
    /// exactly like the selection is copied worker-locally; any other value is cut up on the
    /// coordinator and pushed.
    ///
    /// # Errors
    ///
    /// `TensorError::ShapeMismatch` if a tensor or array value does not have the shape of the
    /// selection, plus the errors of [`get`](Self::get).
    pub fn set(&mut self, args: &[AxisArg], value: Value<'_, C>) -> Result<()> {
        let entries = normalize(self.shape(), args)?;
        let projection = self.decomposition.project(&entries)?;
        if projection.size() == 0 {
            return Ok(());
        }

        let requests = match value {
            Value::Scalar(value) => {
                self.assignments(&projection, |_| Ok(Assignment::Scalar(value)))?
            }
            Value::Tensor(tensor) => self.scatter(&projection, tensor)?,
            Value::Array(src) => {
                let local_copy = Arc::ptr_eq(src.context(), self.context())
                    && projection.decomposition()?.as_ref() == Some(src.decomposition());
                if local_copy {
                    let src = src.handle.id();
                    self.assignments(&projection, |_| Ok(Assignment::Handle(src)))?
                } else {
                    self.scatter(&projection, &src.gather()?)?
                }
            }
        };
        self.context().dispatch(requests)?;
        Ok(())
    }

    fn assignments<F>(&self, projection: &Projection, mut value: F) -> Result<Vec<Request<C::Elem>>>
    where
        F: FnMut(&ProjectedPart) -> Result<Assignment<C::Elem>>,
    {
        projection
            .parts()
            .iter()
            .map(|part| {
                Ok(Request::new(
                    part.worker,
                    Command::Assign {
                        dst: self.handle.id(),
                        window: part.local.clone(),
                        value: value(part)?,
                    },
                ))
            })
            .collect()
    }

    fn scatter(
        &self,
        projection: &Projection,
        tensor: &Tensor<C::Elem>,
    ) -> Result<Vec<Request<C::Elem>>> {
        if tensor.shape() != projection.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: projection.shape().to_vec(),
                got: tensor.shape().to_vec(),
            }
            .into());
        }
        self.assignments(projection, |part| {
            Ok(Assignment::Tensor(tensor.slice(&part.result_selection())?))
        })
    }

    /// A deep copy with the same decomposition, made worker-locally.
    pub fn copy(&self) -> Result<Self> {
        let context = self.context();
        let handle = RemoteHandle::new(context, self.worker_ids());
        let requests = self
            .decomposition
            .partitions()
            .into_iter()
            .map(|(worker, spans)| {
                let shape: Vec<usize> = spans.iter().map(|s| s.len()).collect();
                Request::new(
                    worker,
                    Command::Slice {
                        src: self.handle.id(),
                        dst: handle.id(),
                        window: full_selection(&shape),
                    },
                )
            })
            .collect();
        context.dispatch(requests)?;
        Ok(Self {
            decomposition: self.decomposition.clone(),
            handle,
        })
    }

    /// Releases the blocks now, reporting failures.
    pub fn release(self) -> Result<()> {
        self.handle.release()
    }
}

impl<C: RemoteContext> Operand for DistributedArray<C> {
    type Context = C;

    fn handle(&self) -> &RemoteHandle<C> {
        &self.handle
    }

    fn decomposition(&self) -> Option<&Decomposition> {
        Some(&self.decomposition)
    }

    fn rebuild(
        &self,
        handle: RemoteHandle<C>,
        shapes: Vec<(WorkerId, Vec<usize>)>,
    ) -> Result<Self> {
        for (worker, shape) in shapes {
            let expected = self.decomposition.local_shape(worker).ok_or_else(|| {
                Error::Contract(format!("worker {worker} holds no block of this array"))
            })?;
            if expected != shape {
                return Err(Error::Contract(format!(
                    "worker {worker} produced a block of shape {shape:?}, expected {expected:?}"
                )));
            }
        }
        Ok(Self {
            decomposition: self.decomposition.clone(),
            handle,
        })
    }
}

impl<C: RemoteContext> fmt::Debug for DistributedArray<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedArray")
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("decomposition", &self.decomposition)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Implements an element-wise operator for `&DistributedArray` as a `map` of the registered
/// operation of the same name. Both operands must share a decomposition.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<C: RemoteContext> $trait for &DistributedArray<C> {
            type Output = Result<DistributedArray<C>>;

            fn $method(self, rhs: Self) -> Self::Output {
                map(stringify!($method), &[self, rhs], &Params::new())?.ok_or_else(|| {
                    Error::Contract(format!("{} produced no array", stringify!($method)))
                })
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

/// Maps `op` with the scalar `value` passed as the parameter `name`.
fn scalar_map<C: RemoteContext>(
    array: &DistributedArray<C>,
    op: &str,
    name: &str,
    value: C::Elem,
) -> Result<DistributedArray<C>> {
    let value = value
        .to_f64()
        .ok_or_else(|| TensorError::Unsupported(format!("{value:?} has no f64 value")))?;
    map(op, &[array], &Params::new().with(name, value))?
        .ok_or_else(|| Error::Contract(format!("{op} produced no array")))
}

/// Array-scalar operators. `scalar * &array` and `scalar + &array` work as well.
macro_rules! impl_scalar_ops {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<C: RemoteContext<Elem = $ty>> Add<$ty> for &DistributedArray<C> {
                type Output = Result<DistributedArray<C>>;

                fn add(self, rhs: $ty) -> Self::Output {
                    scalar_map(self, "offset", "value", rhs)
                }
            }

            impl<C: RemoteContext<Elem = $ty>> Sub<$ty> for &DistributedArray<C> {
                type Output = Result<DistributedArray<C>>;

                fn sub(self, rhs: $ty) -> Self::Output {
                    scalar_map(self, "sub_scalar", "value", rhs)
                }
            }

            impl<C: RemoteContext<Elem = $ty>> Mul<$ty> for &DistributedArray<C> {
                type Output = Result<DistributedArray<C>>;

                fn mul(self, rhs: $ty) -> Self::Output {
                    scalar_map(self, "scale", "factor", rhs)
                }
            }

            impl<C: RemoteContext<Elem = $ty>> Div<$ty> for &DistributedArray<C> {
                type Output = Result<DistributedArray<C>>;

                fn div(self, rhs: $ty) -> Self::Output {
                    scalar_map(self, "div_scalar", "value", rhs)
                }
            }

            impl<C: RemoteContext<Elem = $ty>> Add<&DistributedArray<C>> for $ty {
                type Output = Result<DistributedArray<C>>;

                fn add(self, rhs: &DistributedArray<C>) -> Self::Output {
                    scalar_map(rhs, "offset", "value", self)
                }
            }

            impl<C: RemoteContext<Elem = $ty>> Mul<&DistributedArray<C>> for $ty {
                type Output = Result<DistributedArray<C>>;

                fn mul(self, rhs: &DistributedArray<C>) -> Self::Output {
                    scalar_map(rhs, "scale", "factor", self)
                }
            }
        )*
    };
}

impl_scalar_ops!(f32, f64, i32, i64, u32, u64);
