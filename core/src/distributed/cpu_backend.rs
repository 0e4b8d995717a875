use super::backend::RemoteContext;
use super::command::{HandleId, Reply, Request};
use super::registry::OpRegistry;
use super::worker::{Envelope, Worker};
use crate::config::{ClusterConfig, DispatchMode};
use crate::error::{Error, Result};
use crate::tensor::Element;
use crate::WorkerId;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

type Outcome<T> = std::result::Result<Reply<T>, String>;

struct WorkerSlot<T> {
    inbox: Sender<Envelope<T>>,
    thread: Option<JoinHandle<()>>,
}

/// An in-process cluster: one OS thread per worker.
///
/// Each worker owns a private namespace of local arrays and receives commands over a
/// `crossbeam` channel. Every request carries its own reply channel, so replies can be collected
/// in request order no matter which worker finishes first.
///
/// This is the reference transport. It behaves like a cluster of remote engines (workers share
/// nothing, all traffic is commands and replies) but needs no network.
///
/// Dropping the cluster closes every inbox and joins the worker threads.
pub struct CpuCluster<T: Element> {
    config: ClusterConfig,
    workers: Vec<WorkerSlot<T>>,
    active: Mutex<Vec<WorkerId>>,
    next_handle: AtomicU64,
}

impl<T: Element> CpuCluster<T> {
    /// Starts a cluster with the built-in operations.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the configuration is invalid or a worker thread cannot
    /// be spawned.
    pub fn new(config: ClusterConfig) -> Result<Arc<Self>> {
        Self::with_registry(config, OpRegistry::with_builtins())
    }

    /// Starts a cluster whose workers resolve operation names in `registry`.
    pub fn with_registry(config: ClusterConfig, registry: OpRegistry<T>) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = Arc::new(registry);

        let workers = (0..config.workers)
            .map(|id| {
                let (inbox, rx) = unbounded();
                let worker = Worker::new(id, Arc::clone(&registry));
                let thread = thread::Builder::new()
                    .name(format!("distarray-worker-{id}"))
                    .spawn(move || worker.serve(rx))
                    .map_err(|err| {
                        Error::Configuration(format!("failed to spawn worker {id}: {err}"))
                    })?;
                Ok(WorkerSlot {
                    inbox,
                    thread: Some(thread),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            workers = config.workers,
            dispatch = %config.dispatch,
            dtype = %T::DTYPE,
            "cluster started"
        );

        Ok(Arc::new(Self {
            active: Mutex::new((0..config.workers).collect()),
            config,
            workers,
            next_handle: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn send(&self, request: Request<T>) -> Result<(WorkerId, Receiver<Outcome<T>>)> {
        let worker = request.worker;
        let slot = self.workers.get(worker).ok_or_else(|| Error::RemoteExecution {
            worker,
            reason: "no such worker".to_string(),
        })?;
        let (reply, rx) = bounded(1);
        slot.inbox
            .send(Envelope {
                command: request.command,
                reply,
            })
            .map_err(|_| Error::RemoteExecution {
                worker,
                reason: "worker is not running".to_string(),
            })?;
        Ok((worker, rx))
    }

    fn receive(worker: WorkerId, rx: Receiver<Outcome<T>>) -> Result<Reply<T>> {
        match rx.recv() {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(reason)) => Err(Error::RemoteExecution { worker, reason }),
            Err(_) => Err(Error::RemoteExecution {
                worker,
                reason: "worker stopped before replying".to_string(),
            }),
        }
    }
}

impl<T: Element> RemoteContext for CpuCluster<T> {
    type Elem = T;

    fn worker_ids(&self) -> Vec<WorkerId> {
        (0..self.workers.len()).collect()
    }

    fn active_workers(&self) -> Vec<WorkerId> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_active_workers(&self, workers: Vec<WorkerId>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = workers;
    }

    fn new_handle(&self) -> HandleId {
        HandleId::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn dispatch(&self, requests: Vec<Request<T>>) -> Result<Vec<Reply<T>>> {
        if let Some(first) = requests.first() {
            debug!(
                command = first.command.kind(),
                targets = ?requests.iter().map(|r| r.worker).collect::<Vec<_>>(),
                "dispatch"
            );
        }

        match self.config.dispatch {
            DispatchMode::Concurrent => {
                let pending = requests
                    .into_iter()
                    .map(|request| self.send(request))
                    .collect::<Result<Vec<_>>>()?;
                pending
                    .into_iter()
                    .map(|(worker, rx)| Self::receive(worker, rx))
                    .collect()
            }
            DispatchMode::Sequential => requests
                .into_iter()
                .map(|request| {
                    let (worker, rx) = self.send(request)?;
                    Self::receive(worker, rx)
                })
                .collect(),
        }
    }
}

impl<T: Element> Drop for CpuCluster<T> {
    fn drop(&mut self) {
        // Dropping each slot's sender ends the worker's serve loop.
        let threads: Vec<JoinHandle<()>> = self
            .workers
            .drain(..)
            .filter_map(|mut slot| slot.thread.take())
            .collect();
        for thread in threads {
            let _ = thread.join();
        }
        info!("cluster stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::command::{Command, Fill, Params};
    use crate::tensor::Tensor;

    #[test]
    fn test_replies_in_request_order() {
        let cluster = CpuCluster::<i64>::new(ClusterConfig::new(4)).unwrap();
        let handle = cluster.new_handle();
        let requests = (0..4)
            .rev()
            .map(|w| {
                Request::new(
                    w,
                    Command::Store {
                        handle,
                        tensor: Tensor::full(&[1], w as i64),
                    },
                )
            })
            .collect();
        cluster.dispatch(requests).unwrap();

        for worker in 0..4 {
            let tensor = cluster.pull(handle, worker).unwrap();
            assert_eq!(tensor.data(), &[worker as i64]);
        }
    }

    #[test]
    fn test_sequential_mode() {
        let config = ClusterConfig::new(2).with_dispatch(DispatchMode::Sequential);
        let cluster = CpuCluster::<f32>::new(config).unwrap();
        let handle = cluster.new_handle();
        let replies = cluster
            .broadcast(
                Command::Allocate {
                    handle,
                    shape: vec![3],
                    fill: Fill::Ones,
                },
                &[1, 0],
            )
            .unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(cluster.pull(handle, 1).unwrap().data(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_worker_error_is_reported() {
        let cluster = CpuCluster::<f64>::new(ClusterConfig::new(2)).unwrap();
        let err = cluster
            .run(Command::Apply {
                op: "no_such_op".to_string(),
                operands: vec![],
                output: None,
                params: Params::new(),
            })
            .unwrap_err();
        match err {
            Error::RemoteExecution { worker, reason } => {
                assert_eq!(worker, 0);
                assert!(reason.contains("no_such_op"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_worker() {
        let cluster = CpuCluster::<f64>::new(ClusterConfig::new(2)).unwrap();
        let err = cluster.pull(cluster.new_handle(), 5).unwrap_err();
        assert!(matches!(err, Error::RemoteExecution { worker: 5, .. }));
    }

    #[test]
    fn test_handles_are_unique() {
        let cluster = CpuCluster::<f64>::new(ClusterConfig::new(1)).unwrap();
        let a = cluster.new_handle();
        let b = cluster.new_handle();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            CpuCluster::<f64>::new(ClusterConfig::new(0)),
            Err(Error::Configuration(_))
        ));
    }
}
