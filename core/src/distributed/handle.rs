//! Ownership of remote local arrays.

use crate::distributed::backend::RemoteContext;
use crate::distributed::command::HandleId;
use crate::error::Result;
use crate::WorkerId;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Owns the local arrays stored under one handle on a set of workers.
///
/// Dropping the handle releases them. The release on drop is best effort: failures are logged
/// and otherwise ignored. Call [`release`](Self::release) to observe errors.
pub struct RemoteHandle<C: RemoteContext> {
    id: HandleId,
    context: Arc<C>,
    workers: Vec<WorkerId>,
    live: bool,
}

impl<C: RemoteContext> RemoteHandle<C> {
    /// Reserves a fresh handle for `workers`. Nothing is allocated remotely yet.
    pub fn new(context: &Arc<C>, workers: Vec<WorkerId>) -> Self {
        Self {
            id: context.new_handle(),
            context: Arc::clone(context),
            workers,
            live: true,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Releases the remote arrays now.
    pub fn release(mut self) -> Result<()> {
        self.live = false;
        self.context.release(self.id, &self.workers)
    }
}

impl<C: RemoteContext> Drop for RemoteHandle<C> {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        if let Err(err) = self.context.release(self.id, &self.workers) {
            warn!(handle = %self.id, error = %err, "failed to release remote array");
        }
    }
}

impl<C: RemoteContext> fmt::Debug for RemoteHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("id", &self.id)
            .field("workers", &self.workers)
            .finish()
    }
}
