//! The worker side of the command protocol.
//!
//! A worker owns a namespace mapping handles to local arrays and executes one command at a
//! time against it. It knows nothing about decompositions: every index it sees is already in
//! its local frame.

use crate::distributed::command::{Assignment, Command, Fill, HandleId, Params, Reply};
use crate::distributed::registry::OpRegistry;
use crate::error::{Error, Result};
use crate::tensor::{Element, Tensor};
use crate::WorkerId;
use crossbeam::channel::{Receiver, Sender};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::trace;

/// A command together with the channel its outcome goes back on.
pub(crate) struct Envelope<T> {
    pub command: Command<T>,
    pub reply: Sender<std::result::Result<Reply<T>, String>>,
}

pub struct Worker<T> {
    id: WorkerId,
    namespace: HashMap<HandleId, Tensor<T>>,
    registry: Arc<OpRegistry<T>>,
}

impl<T: Element> Worker<T> {
    pub fn new(id: WorkerId, registry: Arc<OpRegistry<T>>) -> Self {
        Self {
            id,
            namespace: HashMap::new(),
            registry,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Number of live local arrays.
    pub fn len(&self) -> usize {
        self.namespace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty()
    }

    pub fn contains(&self, handle: HandleId) -> bool {
        self.namespace.contains_key(&handle)
    }

    /// Serves commands until the channel closes.
    pub(crate) fn serve(mut self, inbox: Receiver<Envelope<T>>) {
        for envelope in inbox.iter() {
            let kind = envelope.command.kind();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(envelope.command)))
                .unwrap_or_else(|payload| Err(panicked(payload)))
                .map_err(|err| err.to_string());
            trace!(worker = self.id, command = kind, ok = outcome.is_ok(), "executed");
            // The coordinator may have stopped waiting after another worker failed.
            let _ = envelope.reply.send(outcome);
        }
        trace!(worker = self.id, live = self.namespace.len(), "worker stopped");
    }

    fn lookup(&self, handle: HandleId) -> Result<&Tensor<T>> {
        self.namespace.get(&handle).ok_or(Error::UnknownHandle(handle))
    }

    fn lookup_mut(&mut self, handle: HandleId) -> Result<&mut Tensor<T>> {
        self.namespace
            .get_mut(&handle)
            .ok_or(Error::UnknownHandle(handle))
    }

    pub fn execute(&mut self, command: Command<T>) -> Result<Reply<T>> {
        match command {
            Command::Allocate {
                handle,
                shape,
                fill,
            } => {
                let tensor = match fill {
                    Fill::Zeros => Tensor::zeros(&shape),
                    Fill::Ones => Tensor::ones(&shape),
                    Fill::Value(value) => Tensor::full(&shape, value),
                };
                self.namespace.insert(handle, tensor);
                Ok(Reply::Stored { shape })
            }
            Command::Store { handle, tensor } => {
                let shape = tensor.shape().to_vec();
                self.namespace.insert(handle, tensor);
                Ok(Reply::Stored { shape })
            }
            Command::Fetch { handle } => Ok(Reply::Tensor(self.lookup(handle)?.clone())),
            Command::FetchWindow { handle, window } => {
                Ok(Reply::Tensor(self.lookup(handle)?.slice(&window)?))
            }
            Command::Slice { src, dst, window } => {
                let tensor = self.lookup(src)?.slice(&window)?;
                let shape = tensor.shape().to_vec();
                self.namespace.insert(dst, tensor);
                Ok(Reply::Stored { shape })
            }
            Command::Assign { dst, window, value } => {
                match value {
                    Assignment::Scalar(value) => self.lookup_mut(dst)?.fill(&window, value)?,
                    Assignment::Tensor(src) => self.lookup_mut(dst)?.assign(&window, &src)?,
                    Assignment::Handle(src) => {
                        let src = self.lookup(src)?.clone();
                        self.lookup_mut(dst)?.assign(&window, &src)?
                    }
                }
                Ok(Reply::Done)
            }
            Command::Apply {
                op,
                operands,
                output,
                params,
            } => self.apply(&op, &operands, output, &params),
            Command::Reduce { handle, reducer } => {
                let reducer = self.registry.reducer(&reducer)?;
                Ok(Reply::Scalar(reducer(self.lookup(handle)?)?))
            }
            Command::Release { handle } => {
                self.namespace.remove(&handle);
                Ok(Reply::Done)
            }
        }
    }

    /// Runs a registered operation.
    ///
    /// Operand arrays are moved out of the namespace for the call and put back afterwards, so
    /// in-place changes persist. A handle passed twice is seen twice; only changes made through
    /// its first occurrence are kept.
    fn apply(
        &mut self,
        op: &str,
        operands: &[HandleId],
        output: Option<HandleId>,
        params: &Params,
    ) -> Result<Reply<T>> {
        let registry = Arc::clone(&self.registry);
        let kernel = registry.op(op)?;
        for &handle in operands {
            self.lookup(handle)?;
        }

        let mut owners: Vec<Option<HandleId>> = Vec::with_capacity(operands.len());
        let mut tensors: Vec<Tensor<T>> = Vec::with_capacity(operands.len());
        for &handle in operands {
            if let Some(first) = owners.iter().position(|&o| o == Some(handle)) {
                tensors.push(tensors[first].clone());
                owners.push(None);
            } else if let Some(tensor) = self.namespace.remove(&handle) {
                tensors.push(tensor);
                owners.push(Some(handle));
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| kernel(&mut tensors, params)))
            .unwrap_or_else(|payload| Err(panicked(payload)));

        for (owner, tensor) in owners.into_iter().zip(tensors) {
            if let Some(handle) = owner {
                self.namespace.insert(handle, tensor);
            }
        }

        match (outcome?, output) {
            (Some(tensor), Some(handle)) => {
                let shape = tensor.shape().to_vec();
                self.namespace.insert(handle, tensor);
                Ok(Reply::Stored { shape })
            }
            (Some(tensor), None) => Ok(Reply::Tensor(tensor)),
            (None, _) => Ok(Reply::Done),
        }
    }
}

/// Turns a caught panic into an error. The worker and its namespace stay usable.
fn panicked(payload: Box<dyn Any + Send>) -> Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Error::Contract(format!("operation panicked: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{AxisIndex, Slice};

    fn worker() -> Worker<i32> {
        Worker::new(0, Arc::new(OpRegistry::with_builtins()))
    }

    fn h(raw: u64) -> HandleId {
        HandleId::new(raw)
    }

    #[test]
    fn test_allocate_fetch_release() {
        let mut w = worker();
        let reply = w
            .execute(Command::Allocate {
                handle: h(1),
                shape: vec![2, 2],
                fill: Fill::Value(7),
            })
            .unwrap();
        assert_eq!(reply, Reply::Stored { shape: vec![2, 2] });

        let tensor = w.execute(Command::Fetch { handle: h(1) }).unwrap().into_tensor().unwrap();
        assert_eq!(tensor.data(), &[7, 7, 7, 7]);

        w.execute(Command::Release { handle: h(1) }).unwrap();
        assert!(w.is_empty());
        // releasing twice is fine
        w.execute(Command::Release { handle: h(1) }).unwrap();
        assert!(matches!(
            w.execute(Command::Fetch { handle: h(1) }),
            Err(Error::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_slice_and_assign_from_handle() {
        let mut w = worker();
        w.execute(Command::Store {
            handle: h(1),
            tensor: Tensor::new((0..6).collect(), vec![6]).unwrap(),
        })
        .unwrap();
        let reply = w
            .execute(Command::Slice {
                src: h(1),
                dst: h(2),
                window: vec![AxisIndex::Slice(Slice::new(5, -1, -2))],
            })
            .unwrap();
        assert_eq!(reply, Reply::Stored { shape: vec![3] });

        // write the reversed odd positions onto the even ones
        w.execute(Command::Assign {
            dst: h(1),
            window: vec![AxisIndex::Slice(Slice::new(0, 6, 2))],
            value: Assignment::Handle(h(2)),
        })
        .unwrap();
        let tensor = w.execute(Command::Fetch { handle: h(1) }).unwrap().into_tensor().unwrap();
        assert_eq!(tensor.data(), &[5, 1, 3, 3, 1, 5]);
    }

    #[test]
    fn test_apply_with_and_without_output() {
        let mut w = worker();
        w.execute(Command::Store {
            handle: h(1),
            tensor: Tensor::new(vec![1, 2], vec![2]).unwrap(),
        })
        .unwrap();

        let stored = w
            .execute(Command::Apply {
                op: "add".to_string(),
                operands: vec![h(1), h(1)],
                output: Some(h(2)),
                params: Params::new(),
            })
            .unwrap();
        assert_eq!(stored, Reply::Stored { shape: vec![2] });
        assert!(w.contains(h(1)));
        assert!(w.contains(h(2)));

        let returned = w
            .execute(Command::Apply {
                op: "scale".to_string(),
                operands: vec![h(2)],
                output: None,
                params: Params::new().with("factor", 10.0),
            })
            .unwrap();
        assert_eq!(returned.into_tensor().unwrap().data(), &[20, 40]);

        let done = w
            .execute(Command::Apply {
                op: "add_assign".to_string(),
                operands: vec![h(1), h(2)],
                output: Some(h(3)),
                params: Params::new(),
            })
            .unwrap();
        assert_eq!(done, Reply::Done);
        assert!(!w.contains(h(3)));
        let tensor = w.execute(Command::Fetch { handle: h(1) }).unwrap().into_tensor().unwrap();
        assert_eq!(tensor.data(), &[3, 6]);
    }

    #[test]
    fn test_failed_apply_keeps_operands() {
        let mut w = worker();
        w.execute(Command::Store {
            handle: h(1),
            tensor: Tensor::ones(&[2]),
        })
        .unwrap();
        w.execute(Command::Store {
            handle: h(2),
            tensor: Tensor::ones(&[3]),
        })
        .unwrap();

        let err = w
            .execute(Command::Apply {
                op: "add".to_string(),
                operands: vec![h(1), h(2)],
                output: Some(h(3)),
                params: Params::new(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Tensor(_)));
        assert!(w.contains(h(1)) && w.contains(h(2)));

        let err = w
            .execute(Command::Apply {
                op: "add".to_string(),
                operands: vec![h(1), h(9)],
                output: None,
                params: Params::new(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(_)));
        assert!(w.contains(h(1)));
    }

    #[test]
    fn test_panicking_kernel_is_contained() {
        let mut w = worker();
        w.execute(Command::Store {
            handle: h(1),
            tensor: Tensor::new(vec![4, 8], vec![2]).unwrap(),
        })
        .unwrap();
        w.execute(Command::Store {
            handle: h(2),
            tensor: Tensor::new(vec![2, 0], vec![2]).unwrap(),
        })
        .unwrap();

        let err = w
            .execute(Command::Apply {
                op: "div".to_string(),
                operands: vec![h(1), h(2)],
                output: Some(h(3)),
                params: Params::new(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Contract(ref msg) if msg.contains("panicked")));
        assert!(w.contains(h(1)) && w.contains(h(2)));
        assert!(!w.contains(h(3)));

        let tensor = w.execute(Command::Fetch { handle: h(1) }).unwrap().into_tensor().unwrap();
        assert_eq!(tensor.data(), &[4, 8]);
    }

    #[test]
    fn test_reduce() {
        let mut w = worker();
        w.execute(Command::Store {
            handle: h(1),
            tensor: Tensor::new(vec![3, 9, -4], vec![3]).unwrap(),
        })
        .unwrap();
        let max = w
            .execute(Command::Reduce {
                handle: h(1),
                reducer: "max".to_string(),
            })
            .unwrap();
        assert_eq!(max, Reply::Scalar(9));
    }
}
