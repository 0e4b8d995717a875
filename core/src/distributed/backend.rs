use crate::distributed::command::{Command, HandleId, Reply, Request};
use crate::error::{Error, Result};
use crate::tensor::{Element, Tensor};
use crate::WorkerId;

/// Abstraction over a set of workers that execute commands.
///
/// This trait allows swapping between different transports:
/// - **In-process threads**: [`CpuCluster`](crate::distributed::CpuCluster).
/// - **Remote processes**: any implementation that can ship a serialized [`Command`] to a
///   worker and bring back its [`Reply`].
///
/// Implementations keep an *active worker set*, the default addressees of [`run`](Self::run).
/// The array types and the collective calls never change it: they name their workers
/// explicitly through a [`TargetScope`](crate::distributed::targets::TargetScope).
pub trait RemoteContext: Send + Sync {
    /// Element type of every array held by the workers.
    type Elem: Element;

    /// All workers, in ascending order.
    fn worker_ids(&self) -> Vec<WorkerId>;

    fn active_workers(&self) -> Vec<WorkerId>;

    fn set_active_workers(&self, workers: Vec<WorkerId>);

    /// Issues a fresh handle, never returned before by this context.
    fn new_handle(&self) -> HandleId;

    /// Delivers every request and returns the replies in request order.
    ///
    /// Blocks until all replies are in. Requests may run concurrently on different workers;
    /// requests to the same worker run in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::RemoteExecution` for the first failed request. No partial result is
    /// returned.
    fn dispatch(&self, requests: Vec<Request<Self::Elem>>) -> Result<Vec<Reply<Self::Elem>>>;

    /// Sends the same command to every worker in `targets`.
    fn broadcast(
        &self,
        command: Command<Self::Elem>,
        targets: &[WorkerId],
    ) -> Result<Vec<Reply<Self::Elem>>> {
        let requests = targets
            .iter()
            .map(|&worker| Request::new(worker, command.clone()))
            .collect();
        self.dispatch(requests)
    }

    /// Sends `command` to the active workers.
    fn run(&self, command: Command<Self::Elem>) -> Result<Vec<Reply<Self::Elem>>> {
        let targets = self.active_workers();
        self.broadcast(command, &targets)
    }

    /// Stores a copy of `tensor` under `handle` on every worker in `targets`.
    fn push(
        &self,
        handle: HandleId,
        tensor: &Tensor<Self::Elem>,
        targets: &[WorkerId],
    ) -> Result<()> {
        self.broadcast(
            Command::Store {
                handle,
                tensor: tensor.clone(),
            },
            targets,
        )?;
        Ok(())
    }

    /// Fetches the local array named `handle` from `worker`.
    fn pull(&self, handle: HandleId, worker: WorkerId) -> Result<Tensor<Self::Elem>> {
        single(worker, self.dispatch(vec![Request::new(worker, Command::Fetch { handle })])?)?
            .into_tensor()
    }

    /// Drops `handle` on every worker in `targets`.
    fn release(&self, handle: HandleId, targets: &[WorkerId]) -> Result<()> {
        self.broadcast(Command::Release { handle }, targets)?;
        Ok(())
    }
}

/// The only reply of a single-request dispatch.
pub(crate) fn single<T>(worker: WorkerId, mut replies: Vec<Reply<T>>) -> Result<Reply<T>> {
    match (replies.pop(), replies.is_empty()) {
        (Some(reply), true) => Ok(reply),
        _ => Err(Error::Contract(format!(
            "expected exactly one reply from worker {worker}"
        ))),
    }
}
