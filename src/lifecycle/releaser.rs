//! Physical release of an allocation's resources.

use std::sync::Arc;

use tracing::{error, trace};

use crate::allocation::GraphicsAllocation;
use crate::backend::NativeAllocationBackend;
use crate::host_ptr::HostPtrManager;
use crate::partition::GfxPartition;

/// Tears an allocation down: fragment references, native backing, GPU
/// address range. Shared between the immediate free path and the
/// deferred-deletion worker.
pub struct AllocationReleaser {
    backend: Arc<dyn NativeAllocationBackend>,
    partitions: Arc<Vec<GfxPartition>>,
    host_ptr_manager: Arc<HostPtrManager>,
}

impl AllocationReleaser {
    pub fn new(
        backend: Arc<dyn NativeAllocationBackend>,
        partitions: Arc<Vec<GfxPartition>>,
        host_ptr_manager: Arc<HostPtrManager>,
    ) -> Self {
        Self {
            backend,
            partitions,
            host_ptr_manager,
        }
    }

    /// Release everything the allocation owns. Never fails; problems are
    /// logged and the remaining resources are still torn down.
    pub fn release(&self, mut allocation: GraphicsAllocation) {
        let root = allocation.root_device_index();

        if allocation.is_locked() {
            if let Some(handle) = allocation.native_handle() {
                self.backend.unmap_cpu(handle);
            }
            allocation.set_locked_cpu_address(None);
        }

        for fragment in allocation.take_fragments() {
            match self.host_ptr_manager.release_fragment(root, fragment.address) {
                Ok(Some(storage)) => {
                    if let Some(handle) = storage.handle {
                        self.backend.destroy_native(handle);
                    }
                }
                Ok(None) => {}
                Err(err) => error!(%err, address = fragment.address, "fragment release failed"),
            }
        }

        if let Some(handle) = allocation.native_handle() {
            self.backend.destroy_native(handle);
        }

        if let Some(range) = allocation.heap_range() {
            match self.partitions.get(root as usize) {
                Some(partition) => {
                    if let Err(err) = partition.heap_free(range.heap, range.address, range.size) {
                        error!(%err, "heap range release failed");
                    }
                }
                None => error!(root, "allocation references unknown root device"),
            }
        }

        trace!(
            root,
            size = allocation.size(),
            gpu_address = allocation.gpu_address(),
            "allocation released"
        );
    }
}
