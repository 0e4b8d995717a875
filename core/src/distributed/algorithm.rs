//! Collective operations over distributed and cloned arrays.
//!
//! - [`map`]: run a registered operation on every worker's local partitions, optionally
//!   producing a new array with the same layout.
//! - [`reduce`]: collapse an array to one value, locally on each worker and then across workers
//!   on the coordinator.
//! - [`remote`]: run a registered operation and bring every worker's raw result back.
//!
//! Each call addresses the workers of its first operand through a [`TargetScope`], in ascending
//! worker order. The context's shared active set is left untouched, so calls from several
//! threads on one context do not interfere.

use crate::decomposition::Decomposition;
use crate::distributed::backend::RemoteContext;
use crate::distributed::command::{Command, Params};
use crate::distributed::handle::RemoteHandle;
use crate::distributed::targets::TargetScope;
use crate::error::{Error, Result};
use crate::tensor::{ReduceOp, Tensor};
use crate::WorkerId;
use std::sync::Arc;
use tracing::debug;

/// Something `map`, `reduce` and `remote` can operate on: a named local array on a set of
/// workers.
pub trait Operand: Sized {
    type Context: RemoteContext;

    fn handle(&self) -> &RemoteHandle<Self::Context>;

    /// Layout of a distributed operand; `None` for operands replicated on every worker.
    fn decomposition(&self) -> Option<&Decomposition>;

    /// Wraps the per-worker results of a `map` stored under `handle` into an operand of the
    /// same kind. `shapes` pairs each worker with its result shape.
    fn rebuild(
        &self,
        handle: RemoteHandle<Self::Context>,
        shapes: Vec<(WorkerId, Vec<usize>)>,
    ) -> Result<Self>;

    fn context(&self) -> &Arc<Self::Context> {
        self.handle().context()
    }

    fn workers(&self) -> &[WorkerId] {
        self.handle().workers()
    }
}

/// Element type of an operand's context.
pub type Elem<A> = <<A as Operand>::Context as RemoteContext>::Elem;

/// Checks that every operand with a decomposition shares the first one's, and returns the
/// first operand.
fn conforming<'a, A: Operand>(operands: &[&'a A]) -> Result<&'a A> {
    let (first, rest) = operands
        .split_first()
        .ok_or_else(|| Error::Contract("at least one operand is required".to_string()))?;

    let reference = first.decomposition();
    for (i, operand) in rest.iter().enumerate() {
        if let (Some(expected), Some(got)) = (reference, operand.decomposition()) {
            if expected != got {
                return Err(Error::DecompositionMismatch { operand: i + 1 });
            }
        }
    }
    Ok(first)
}

/// Runs the registered operation `op` on the local partitions of `operands` on every worker.
///
/// The operation receives each worker's local arrays in operand order. If it returns an array
/// on every worker, the results are wrapped into a new operand that shares the first operand's
/// layout; if it returns nothing on every worker (an in-place operation), `Ok(None)` is
/// returned.
///
/// # Errors
///
/// - `Error::DecompositionMismatch` if the operands are laid out differently. Raised before any
///   worker is contacted.
/// - `Error::RemoteExecution` if a worker fails.
/// - `Error::Contract` if some workers return an array and others do not.
///
/// # Examples
///
/// ```rust
/// use distarray::distributed::{algorithm, CpuCluster, DistributedArray, Params};
/// use distarray::ClusterConfig;
///
/// let cluster = CpuCluster::<f64>::new(ClusterConfig::new(2)).unwrap();
/// let a = DistributedArray::ones(&cluster, &[6], &[0], &[0, 1]).unwrap();
///
/// let params = Params::new().with("factor", 4.0);
/// let b = algorithm::map("scale", &[&a], &params).unwrap().unwrap();
/// assert_eq!(b.gather().unwrap().data(), &[4.0; 6]);
/// ```
pub fn map<A: Operand>(op: &str, operands: &[&A], params: &Params) -> Result<Option<A>> {
    let reference = conforming(operands)?;
    let context = reference.context();
    let scope = TargetScope::new(context.as_ref(), reference.workers());

    let output = RemoteHandle::new(context, reference.workers().to_vec());
    debug!(op, output = %output.id(), "map");
    let replies = scope.run(Command::Apply {
        op: op.to_string(),
        operands: operands.iter().map(|o| o.handle().id()).collect(),
        output: Some(output.id()),
        params: params.clone(),
    })?;

    let shapes = scope
        .targets()
        .iter()
        .zip(replies)
        .map(|(&worker, reply)| Ok(reply.into_stored()?.map(|shape| (worker, shape))))
        .collect::<Result<Vec<_>>>()?;
    if shapes.iter().all(Option::is_none) {
        return Ok(None);
    }
    let shapes = shapes.into_iter().collect::<Option<Vec<_>>>().ok_or_else(|| {
        Error::Contract(format!(
            "operation {op} returned an array on some workers but not on others"
        ))
    })?;

    reference.rebuild(output, shapes).map(Some)
}

/// Reduces `array` to one value with `op`.
///
/// Each worker first reduces its local partition with the reducer registered under
/// `array_reducer` (default: the reducer named like `op`); the per-worker values are then
/// folded with `op` in ascending worker order.
///
/// # Examples
///
/// ```rust
/// use distarray::distributed::{algorithm, CpuCluster, DistributedArray};
/// use distarray::{ClusterConfig, ReduceOp, Tensor};
///
/// let cluster = CpuCluster::<i64>::new(ClusterConfig::new(3)).unwrap();
/// let local = Tensor::new((1..=10).collect(), vec![10]).unwrap();
/// let array = DistributedArray::from_tensor(&cluster, &local, &[0], &[0, 1, 2]).unwrap();
///
/// assert_eq!(algorithm::reduce(&array, ReduceOp::Sum, None).unwrap(), 55);
/// assert_eq!(algorithm::reduce(&array, ReduceOp::Max, None).unwrap(), 10);
/// ```
pub fn reduce<A: Operand>(array: &A, op: ReduceOp, array_reducer: Option<&str>) -> Result<Elem<A>> {
    reduce_with(array, array_reducer.unwrap_or(op.name()), |a, b| op.combine(a, b))
}

/// Like [`reduce`] with an arbitrary combining function.
///
/// `fold` is applied left to right in ascending worker order; a non-associative function sees
/// exactly that order.
pub fn reduce_with<A, F>(array: &A, array_reducer: &str, fold: F) -> Result<Elem<A>>
where
    A: Operand,
    F: FnMut(Elem<A>, Elem<A>) -> Elem<A>,
{
    let scope = TargetScope::new(array.context().as_ref(), array.workers());
    debug!(reducer = array_reducer, handle = %array.handle().id(), "reduce");

    let values = scope
        .run(Command::Reduce {
            handle: array.handle().id(),
            reducer: array_reducer.to_string(),
        })?
        .into_iter()
        .map(|reply| reply.into_scalar())
        .collect::<Result<Vec<_>>>()?;

    values
        .into_iter()
        .reduce(fold)
        .ok_or_else(|| Error::Contract("reduction over zero workers".to_string()))
}

/// Runs the registered operation `op` on every worker and returns each worker's raw result, in
/// ascending worker order. No output array is created.
pub fn remote<A: Operand>(
    op: &str,
    operands: &[&A],
    params: &Params,
) -> Result<Vec<Option<Tensor<Elem<A>>>>> {
    let reference = conforming(operands)?;
    let scope = TargetScope::new(reference.context().as_ref(), reference.workers());
    debug!(op, "remote");

    scope
        .run(Command::Apply {
            op: op.to_string(),
            operands: operands.iter().map(|o| o.handle().id()).collect(),
            output: None,
            params: params.clone(),
        })?
        .into_iter()
        .map(|reply| reply.into_output())
        .collect()
}
