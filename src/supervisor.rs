//! Owns every live listener binding and tears them down in reverse start
//! order.

use crate::bootstrap::ListenerBinding;
use crate::error::NodeError;
use crate::ip::AddressFamily;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Running {
    binding: ListenerBinding,
    task: JoinHandle<Result<(), NodeError>>,
}

#[derive(Default)]
pub struct SyncerSupervisor {
    running: Mutex<Vec<Running>>,
    closed: Mutex<bool>,
}

impl SyncerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the binding's syncer loop. At most one binding per address
    /// family; a binding offered after shutdown is closed immediately.
    pub fn start(&self, binding: ListenerBinding) -> Result<(), NodeError> {
        let closed = self.closed.lock();
        if *closed {
            binding.syncer.close();
            return Err(NodeError::SyncerClosed);
        }
        let mut running = self.running.lock();
        if running.iter().any(|r| r.binding.family == binding.family) {
            binding.syncer.close();
            return Err(NodeError::DuplicateBinding(binding.family));
        }

        let task = tokio::spawn(Arc::clone(&binding.syncer).run());
        running.push(Running { binding, task });
        drop(closed);
        Ok(())
    }

    pub fn bindings(&self) -> Vec<ListenerBinding> {
        self.running.lock().iter().map(|r| r.binding.clone()).collect()
    }

    pub fn has_family(&self, family: AddressFamily) -> bool {
        self.running.lock().iter().any(|r| r.binding.family == family)
    }

    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every syncer, most recently started first, and wait for each
    /// run loop to finish. Returns the families in the order they were
    /// closed; only the first call does any work.
    pub async fn shutdown(&self) -> Vec<AddressFamily> {
        let running = {
            let mut closed = self.closed.lock();
            if *closed {
                return Vec::new();
            }
            *closed = true;
            std::mem::take(&mut *self.running.lock())
        };

        let mut order = Vec::with_capacity(running.len());
        for Running { binding, task } in running.into_iter().rev() {
            binding.syncer.close();
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(family = %binding.family, error = %e, "syncer exited with error"),
                Err(e) => warn!(family = %binding.family, error = %e, "syncer task failed"),
            }
            info!(family = %binding.family, address = %binding.local_addr, "listener closed");
            order.push(binding.family);
        }
        order
    }
}

impl Drop for SyncerSupervisor {
    fn drop(&mut self) {
        for r in self.running.get_mut().drain(..).rev() {
            r.binding.syncer.close();
        }
    }
}
