//! Explicit target sets for collective calls.

use crate::distributed::backend::RemoteContext;
use crate::distributed::command::{Command, Reply};
use crate::error::Result;
use crate::WorkerId;

/// A context together with the workers one call addresses, in ascending order.
/// The context's shared active set is left untouched.
///
/// ```rust
/// use distarray::distributed::{Command, CpuCluster, RemoteContext, TargetScope};
/// use distarray::ClusterConfig;
///
/// let cluster = CpuCluster::<f32>::new(ClusterConfig::new(4)).unwrap();
/// let scope = TargetScope::new(&*cluster, &[2, 1]);
/// assert_eq!(scope.targets(), &[1, 2]);
///
/// let handle = cluster.new_handle();
/// scope.run(Command::Release { handle }).unwrap();
/// assert_eq!(cluster.active_workers(), vec![0, 1, 2, 3]);
/// ```
pub struct TargetScope<'a, C: RemoteContext + ?Sized> {
    context: &'a C,
    targets: Vec<WorkerId>,
}

impl<'a, C: RemoteContext + ?Sized> TargetScope<'a, C> {
    pub fn new(context: &'a C, targets: &[WorkerId]) -> Self {
        let mut targets = targets.to_vec();
        targets.sort_unstable();
        Self { context, targets }
    }

    pub fn context(&self) -> &'a C {
        self.context
    }

    pub fn targets(&self) -> &[WorkerId] {
        &self.targets
    }

    /// Sends `command` to every target; replies come back in ascending worker order.
    pub fn run(&self, command: Command<C::Elem>) -> Result<Vec<Reply<C::Elem>>> {
        self.context.broadcast(command, &self.targets)
    }
}
