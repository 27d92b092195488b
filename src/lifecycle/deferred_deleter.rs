//! Asynchronous deletion worker.
//!
//! A dedicated OS thread drains a channel of release jobs. `drain` round
//! trips a marker through the same channel, so when the acknowledgement
//! arrives every job enqueued before it has been processed; nothing ever
//! spins.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, trace};

use crate::allocation::GraphicsAllocation;
use crate::error::MemResult;

use super::AllocationReleaser;

enum DeleterCommand {
    Release(Box<GraphicsAllocation>),
    Drain(mpsc::Sender<()>),
    Stop,
}

/// Background worker performing physical releases off the caller's thread.
pub struct DeferredDeleter {
    sender: Mutex<mpsc::Sender<DeleterCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl DeferredDeleter {
    /// Spawn the worker thread.
    pub fn new(releaser: Arc<AllocationReleaser>) -> Self {
        let (sender, receiver) = mpsc::channel::<DeleterCommand>();
        let worker = std::thread::Builder::new()
            .name("memforge-deleter".into())
            .spawn(move || Self::worker_loop(receiver, releaser))
            .ok();
        if worker.is_none() {
            error!("failed to spawn deferred deleter thread");
        }
        Self {
            sender: Mutex::new(sender),
            worker,
        }
    }

    fn worker_loop(receiver: mpsc::Receiver<DeleterCommand>, releaser: Arc<AllocationReleaser>) {
        debug!("deferred deleter worker started");
        while let Ok(command) = receiver.recv() {
            match command {
                DeleterCommand::Release(allocation) => {
                    trace!(
                        gpu_address = allocation.gpu_address(),
                        size = allocation.size(),
                        "deferred release"
                    );
                    releaser.release(*allocation);
                }
                DeleterCommand::Drain(ack) => {
                    let _ = ack.send(());
                }
                DeleterCommand::Stop => break,
            }
        }
        debug!("deferred deleter worker stopped");
    }

    /// Queue an allocation for release. Falls back to releasing inline when
    /// the worker is gone.
    pub fn deferred_delete(
        &self,
        allocation: GraphicsAllocation,
        releaser: &AllocationReleaser,
    ) -> MemResult<()> {
        let sender = self.sender.lock()?;
        if let Err(send_err) = sender.send(DeleterCommand::Release(Box::new(allocation))) {
            if let DeleterCommand::Release(allocation) = send_err.0 {
                releaser.release(*allocation);
            }
        }
        Ok(())
    }

    /// Block until every release queued before this call has completed.
    pub fn drain(&self) -> MemResult<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        {
            let sender = self.sender.lock()?;
            if sender.send(DeleterCommand::Drain(ack_tx)).is_err() {
                // Worker already gone, nothing in flight
                return Ok(());
            }
        }
        let _ = ack_rx.recv();
        Ok(())
    }
}

impl Drop for DeferredDeleter {
    fn drop(&mut self) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(DeleterCommand::Stop);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocationType, MemoryPool};
    use crate::backend::{
        NativeAllocationBackend, NativeAllocationRequest, OsAgnosticBackend,
    };
    use crate::capabilities::HardwareCapabilities;
    use crate::host_ptr::HostPtrManager;
    use crate::partition::GfxPartition;

    fn setup() -> (Arc<OsAgnosticBackend>, Arc<AllocationReleaser>, DeferredDeleter) {
        let backend = Arc::new(OsAgnosticBackend::new());
        let caps = HardwareCapabilities::full_range_48bit();
        let partitions = Arc::new(vec![GfxPartition::new(&caps, 0).unwrap()]);
        let releaser = Arc::new(AllocationReleaser::new(
            backend.clone() as Arc<dyn NativeAllocationBackend>,
            partitions,
            Arc::new(HostPtrManager::new(caps.max_os_context_count)),
        ));
        let deleter = DeferredDeleter::new(releaser.clone());
        (backend, releaser, deleter)
    }

    fn backed_allocation(backend: &OsAgnosticBackend) -> GraphicsAllocation {
        let native = backend
            .create_native(&NativeAllocationRequest {
                size: 0x1000,
                alignment: 0x1000,
                local_memory: false,
                shareable: false,
                cpu_accessible: true,
            })
            .unwrap();
        GraphicsAllocation::new(
            0,
            AllocationType::Timestamp,
            MemoryPool::System4KbPages,
            0x1000,
            4,
        )
        .with_native_handle(native.handle)
    }

    #[test]
    fn test_drain_waits_for_queued_releases() {
        let (backend, releaser, deleter) = setup();
        for _ in 0..16 {
            let allocation = backed_allocation(&backend);
            deleter.deferred_delete(allocation, &releaser).unwrap();
        }
        deleter.drain().unwrap();
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn test_drain_on_idle_worker_returns() {
        let (_backend, _releaser, deleter) = setup();
        deleter.drain().unwrap();
        deleter.drain().unwrap();
    }

    #[test]
    fn test_drop_stops_worker_after_pending_work() {
        let (backend, releaser, deleter) = setup();
        let allocation = backed_allocation(&backend);
        deleter.deferred_delete(allocation, &releaser).unwrap();
        deleter.drain().unwrap();
        drop(deleter);
        assert_eq!(backend.live_count(), 0);
    }
}
