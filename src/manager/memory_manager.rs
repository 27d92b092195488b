//! The allocation orchestrator.
//!
//! `MemoryManager` owns the per-device partitions, the host-pointer
//! fragment map, the engine registry and the release machinery, and walks
//! the placement decision tree for every request.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::allocation::{
    AllocationType, GraphicsAllocation, HeapRange, MemoryPool, TASK_COUNT_NOT_READY,
};
use crate::backend::{
    EngineType, NativeAllocationBackend, NativeAllocationRequest, OsContext,
};
use crate::capabilities::HardwareCapabilities;
use crate::error::{MemForgeError, MemResult};
use crate::helpers::{align_down, align_up, whole_page_span, PAGE_SIZE, PAGE_SIZE_64K};
use crate::host_ptr::{get_allocation_requirements, HostPtrManager};
use crate::lifecycle::{
    AllocationReleaser, AllocationUsage, DeferredDeleter, InternalAllocationStorage,
};
use crate::partition::{select_heap, AlignmentSelector, GfxPartition, HeapIndex};

use super::properties::AllocationProperties;

/// Upper bound on a CPU-side wait for engine fences.
const COMPLETION_WAIT_TIMEOUT: Duration = Duration::from_secs(1);
/// Poll interval while waiting on engine fences.
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of a device-pool attempt that did not hard-fail.
enum DevicePoolAttempt {
    Allocated(GraphicsAllocation),
    RetryInNonDevicePool,
}

/// Top-level allocator for one device stack.
pub struct MemoryManager {
    capabilities: HardwareCapabilities,
    backend: Arc<dyn NativeAllocationBackend>,
    partitions: Arc<Vec<GfxPartition>>,
    host_ptr_manager: Arc<HostPtrManager>,
    alignment_selector: AlignmentSelector,
    internal_storage: InternalAllocationStorage,
    releaser: Arc<AllocationReleaser>,
    deferred_deleter: DeferredDeleter,
    engines: Mutex<Vec<Arc<OsContext>>>,
}

impl MemoryManager {
    /// Build the manager: one partition per root device, the fragment map,
    /// and the deferred-deletion worker.
    pub fn new(
        backend: Arc<dyn NativeAllocationBackend>,
        capabilities: HardwareCapabilities,
    ) -> MemResult<Self> {
        let num_root_devices = capabilities.num_root_devices.max(1);
        let mut partitions = Vec::with_capacity(num_root_devices as usize);
        for root in 0..num_root_devices {
            partitions.push(GfxPartition::new(&capabilities, root)?);
        }
        let partitions = Arc::new(partitions);
        let host_ptr_manager = Arc::new(HostPtrManager::new(capabilities.max_os_context_count));
        let releaser = Arc::new(AllocationReleaser::new(
            Arc::clone(&backend),
            Arc::clone(&partitions),
            Arc::clone(&host_ptr_manager),
        ));
        let deferred_deleter = DeferredDeleter::new(Arc::clone(&releaser));

        info!(
            num_root_devices,
            local_memory = capabilities.supports_local_memory,
            max_contexts = capabilities.max_os_context_count,
            "memory manager initialized"
        );

        Ok(Self {
            capabilities,
            backend,
            partitions,
            host_ptr_manager,
            alignment_selector: AlignmentSelector::device_pool_default(),
            internal_storage: InternalAllocationStorage::new(),
            releaser,
            deferred_deleter,
            engines: Mutex::new(Vec::new()),
        })
    }

    pub fn capabilities(&self) -> &HardwareCapabilities {
        &self.capabilities
    }

    pub fn host_ptr_manager(&self) -> &HostPtrManager {
        &self.host_ptr_manager
    }

    pub fn internal_storage(&self) -> &InternalAllocationStorage {
        &self.internal_storage
    }

    /// Partition of `root_device_index`.
    pub fn gfx_partition(&self, root_device_index: u32) -> MemResult<&GfxPartition> {
        self.partitions
            .get(root_device_index as usize)
            .ok_or_else(|| {
                MemForgeError::invalid_request(format!(
                    "unknown root device {root_device_index}"
                ))
            })
    }

    // ========== Engine registry ==========

    /// Register an execution context, assigning the next context slot.
    pub fn register_os_context(
        &self,
        engine_type: EngineType,
        device_bitfield: u64,
    ) -> MemResult<Arc<OsContext>> {
        let mut engines = self.engines.lock()?;
        let context_id = engines.len() as u32;
        if context_id >= self.capabilities.max_os_context_count {
            return Err(MemForgeError::ContextOutOfRange {
                context_id,
                max_contexts: self.capabilities.max_os_context_count,
            });
        }
        let context = Arc::new(OsContext::new(context_id, engine_type, device_bitfield));
        engines.push(Arc::clone(&context));
        Ok(context)
    }

    fn engines_snapshot(&self) -> MemResult<Vec<Arc<OsContext>>> {
        Ok(self.engines.lock()?.clone())
    }

    /// Whether every context that used the allocation has retired it.
    pub fn is_allocation_completed(&self, allocation: &GraphicsAllocation) -> MemResult<bool> {
        let engines = self.engines_snapshot()?;
        Ok(Self::completed_on(allocation, &engines))
    }

    fn completed_on(allocation: &GraphicsAllocation, engines: &[Arc<OsContext>]) -> bool {
        allocation.used_contexts().all(|(context_id, task_count)| {
            engines
                .get(context_id as usize)
                .map(|engine| engine.is_complete(task_count))
                .unwrap_or(true)
        })
    }

    // ========== Allocation ==========

    /// Allocate fresh graphics memory for `properties`.
    pub fn allocate_graphics_memory_with_properties(
        &self,
        properties: &AllocationProperties,
    ) -> MemResult<GraphicsAllocation> {
        self.allocate(properties, None)
    }

    /// Allocate graphics memory wrapping the user range at `host_ptr`.
    pub fn allocate_graphics_memory_with_host_ptr(
        &self,
        properties: &AllocationProperties,
        host_ptr: u64,
    ) -> MemResult<GraphicsAllocation> {
        if host_ptr == 0 {
            return Err(MemForgeError::InvalidHostPointer("null host pointer".into()));
        }
        self.allocate(properties, Some(host_ptr))
    }

    fn allocate(
        &self,
        properties: &AllocationProperties,
        host_ptr: Option<u64>,
    ) -> MemResult<GraphicsAllocation> {
        if properties.size == 0 {
            return Err(MemForgeError::invalid_request("zero-size allocation"));
        }
        self.gfx_partition(properties.root_device_index)?;

        if host_ptr.is_none()
            && !properties.flags.shareable
            && properties.image_info.is_none()
            && properties.allocation_type.is_reusable()
        {
            let engines = self.engines_snapshot()?;
            if let Some(reused) = self.internal_storage.obtain_reusable_allocation(
                properties.size,
                properties.allocation_type,
                &engines,
            )? {
                debug!(
                    size = properties.size,
                    gpu_address = reused.gpu_address(),
                    "reusing parked allocation"
                );
                return Ok(reused);
            }
        }

        if properties.flags.shareable {
            return self.allocate_shareable(properties);
        }
        if properties.image_info.is_some() {
            return self.allocate_image(properties, host_ptr);
        }
        if self.requires_32bit(properties) {
            return self.allocate_32bit(properties);
        }
        if let Some(ptr) = host_ptr {
            return if self.capabilities.full_range_svm() {
                self.wrap_svm_host_ptr(properties, ptr)
            } else {
                self.allocate_with_host_ptr(properties, ptr)
            };
        }
        self.allocate_in_preferred_pool(properties)
    }

    fn requires_32bit(&self, properties: &AllocationProperties) -> bool {
        properties.allocation_type.is_internal_heap_type()
            || (properties.flags.allow_32bit && self.capabilities.force_32bit_addressing)
    }

    fn use_device_pool(&self, properties: &AllocationProperties) -> bool {
        self.capabilities.supports_local_memory
            && !properties.flags.use_system_memory
            && !properties.allocation_type.requires_cpu_access()
    }

    /// Try the device pool first; a soft refusal falls back to system
    /// memory, a hard failure aborts.
    fn allocate_in_preferred_pool(
        &self,
        properties: &AllocationProperties,
    ) -> MemResult<GraphicsAllocation> {
        if self.use_device_pool(properties) {
            match self.allocate_in_device_pool(properties)? {
                DevicePoolAttempt::Allocated(allocation) => return Ok(allocation),
                DevicePoolAttempt::RetryInNonDevicePool => {
                    debug!(
                        size = properties.size,
                        "device pool refused, retrying in system memory"
                    );
                }
            }
        }
        self.allocate_in_system_pool(properties)
    }

    fn allocate_in_device_pool(
        &self,
        properties: &AllocationProperties,
    ) -> MemResult<DevicePoolAttempt> {
        let partition = self.gfx_partition(properties.root_device_index)?;
        let (alignment, heap) = match self.alignment_selector.select(properties.size) {
            Some(candidate) => (candidate.alignment, candidate.heap),
            None => (PAGE_SIZE_64K, HeapIndex::Standard64Kb),
        };
        let alignment = properties.alignment.unwrap_or(alignment).max(alignment);
        let aligned_size = align_up(properties.size, alignment);

        let gpu_address = match partition.heap_allocate(heap, aligned_size) {
            Ok(address) => address,
            Err(MemForgeError::OutOfAddressSpace { .. }) => {
                return Ok(DevicePoolAttempt::RetryInNonDevicePool)
            }
            Err(err) => return Err(err),
        };

        let native = match self.backend.create_native(&NativeAllocationRequest {
            size: aligned_size,
            alignment,
            local_memory: true,
            shareable: false,
            cpu_accessible: properties.flags.lockable,
        }) {
            Ok(native) => native,
            Err(err) => {
                partition.heap_free(heap, gpu_address, aligned_size)?;
                return if matches!(err, MemForgeError::NativeAllocationFailed(_)) {
                    Ok(DevicePoolAttempt::RetryInNonDevicePool)
                } else {
                    Err(err)
                };
            }
        };

        let allocation = GraphicsAllocation::new(
            properties.root_device_index,
            properties.allocation_type,
            MemoryPool::LocalMemory,
            aligned_size,
            self.capabilities.max_os_context_count,
        )
        .with_gpu_address(gpu_address)
        .with_native_handle(native.handle)
        .with_heap_range(HeapRange {
            heap,
            address: gpu_address,
            size: aligned_size,
        });
        debug!(
            gpu_address,
            size = aligned_size,
            alignment,
            heap = heap.name(),
            "allocated in device pool"
        );
        Ok(DevicePoolAttempt::Allocated(allocation))
    }

    fn allocate_in_system_pool(
        &self,
        properties: &AllocationProperties,
    ) -> MemResult<GraphicsAllocation> {
        let partition = self.gfx_partition(properties.root_device_index)?;
        let use_64k = self.capabilities.supports_64k_pages
            && (properties.flags.prefer_64k_pages
                || properties.allocation_type.prefers_64k_pages());
        let (page_size, heap, pool) = if use_64k {
            (
                PAGE_SIZE_64K,
                HeapIndex::Standard64Kb,
                MemoryPool::System64KbPages,
            )
        } else {
            (PAGE_SIZE, HeapIndex::Standard, MemoryPool::System4KbPages)
        };
        let alignment = properties.alignment.unwrap_or(page_size).max(page_size);
        let aligned_size = align_up(properties.size, page_size);

        let native = self.backend.create_native(&NativeAllocationRequest {
            size: aligned_size,
            alignment,
            local_memory: false,
            shareable: false,
            cpu_accessible: true,
        })?;

        // With full-range SVM the CPU address is GPU-visible as-is; a
        // limited range needs a window from the standard heaps
        let mut allocation = GraphicsAllocation::new(
            properties.root_device_index,
            properties.allocation_type,
            pool,
            aligned_size,
            self.capabilities.max_os_context_count,
        )
        .with_native_handle(native.handle);

        if let Some(cpu) = native.cpu_address {
            allocation = allocation.with_cpu_address(cpu);
        }

        match native.cpu_address {
            Some(cpu) if self.capabilities.full_range_svm() => {
                allocation = allocation.with_gpu_address(cpu);
            }
            _ => {
                let gpu_address = match partition.heap_allocate(heap, aligned_size) {
                    Ok(address) => address,
                    Err(err) => {
                        self.backend.destroy_native(native.handle);
                        return Err(err);
                    }
                };
                allocation = allocation.with_gpu_address(gpu_address).with_heap_range(
                    HeapRange {
                        heap,
                        address: gpu_address,
                        size: aligned_size,
                    },
                );
            }
        }

        debug!(
            size = aligned_size,
            pool = ?allocation.pool(),
            "allocated in system pool"
        );
        Ok(allocation)
    }

    fn allocate_shareable(
        &self,
        properties: &AllocationProperties,
    ) -> MemResult<GraphicsAllocation> {
        let partition = self.gfx_partition(properties.root_device_index)?;
        let aligned_size = align_up(properties.size, PAGE_SIZE_64K);
        let native = self.backend.create_native(&NativeAllocationRequest {
            size: aligned_size,
            alignment: PAGE_SIZE_64K,
            local_memory: false,
            shareable: true,
            cpu_accessible: false,
        })?;
        let gpu_address = match partition.heap_allocate(HeapIndex::Standard64Kb, aligned_size) {
            Ok(address) => address,
            Err(err) => {
                self.backend.destroy_native(native.handle);
                return Err(err);
            }
        };
        debug!(gpu_address, size = aligned_size, "allocated shareable memory");
        Ok(GraphicsAllocation::new(
            properties.root_device_index,
            properties.allocation_type,
            MemoryPool::SystemCpuInaccessible,
            aligned_size,
            self.capabilities.max_os_context_count,
        )
        .with_gpu_address(gpu_address)
        .with_native_handle(native.handle)
        .with_heap_range(HeapRange {
            heap: HeapIndex::Standard64Kb,
            address: gpu_address,
            size: aligned_size,
        }))
    }

    fn allocate_image(
        &self,
        properties: &AllocationProperties,
        host_ptr: Option<u64>,
    ) -> MemResult<GraphicsAllocation> {
        let info = properties.image_info.as_ref().ok_or_else(|| {
            MemForgeError::internal("image allocation without image info")
        })?;
        let mut image_properties = properties.clone();
        image_properties.size = align_up(info.surface_size(), PAGE_SIZE_64K);
        image_properties.flags.prefer_64k_pages = true;

        let mut allocation = self.allocate_in_preferred_pool(&image_properties)?;
        if let Some(ptr) = host_ptr {
            // Initial texel data is staged from the user pointer
            allocation = allocation.with_cpu_address(ptr);
        }
        Ok(allocation)
    }

    fn allocate_32bit(&self, properties: &AllocationProperties) -> MemResult<GraphicsAllocation> {
        let partition = self.gfx_partition(properties.root_device_index)?;
        let heap = select_heap(
            properties.allocation_type,
            false,
            false,
            true,
            self.capabilities.full_range_svm(),
            properties.flags.use_front_window,
        );
        let aligned_size = align_up(properties.size, PAGE_SIZE);

        let gpu_address = partition.heap_allocate(heap, aligned_size)?;
        let native = match self.backend.create_native(&NativeAllocationRequest {
            size: aligned_size,
            alignment: PAGE_SIZE,
            local_memory: false,
            shareable: false,
            cpu_accessible: true,
        }) {
            Ok(native) => native,
            Err(err) => {
                partition.heap_free(heap, gpu_address, aligned_size)?;
                return Err(err);
            }
        };

        // Offsets are patched relative to the owning window's base, which
        // front windows share with their parent heap
        let gpu_base = partition.heap_base(heap.window_base_heap());

        let mut allocation = GraphicsAllocation::new(
            properties.root_device_index,
            properties.allocation_type,
            MemoryPool::System4KbPagesWith32BitGpuAddressing,
            aligned_size,
            self.capabilities.max_os_context_count,
        )
        .with_gpu_address(gpu_address)
        .with_gpu_base_address(gpu_base)
        .with_heap_range(HeapRange {
            heap,
            address: gpu_address,
            size: aligned_size,
        });
        if let Some(cpu) = native.cpu_address {
            allocation = allocation.with_cpu_address(cpu);
        }
        allocation = allocation.with_native_handle(native.handle);
        debug!(
            gpu_address,
            gpu_base,
            heap = heap.name(),
            "allocated in 32-bit window"
        );
        Ok(allocation)
    }

    fn wrap_svm_host_ptr(
        &self,
        properties: &AllocationProperties,
        host_ptr: u64,
    ) -> MemResult<GraphicsAllocation> {
        let span = whole_page_span(host_ptr, properties.size);
        let handle = self
            .backend
            .import_host_range(align_down(host_ptr, PAGE_SIZE), span)?;
        debug!(host_ptr, span, "wrapped host pointer at its CPU address");
        Ok(GraphicsAllocation::new(
            properties.root_device_index,
            properties.allocation_type,
            MemoryPool::System4KbPages,
            properties.size,
            self.capabilities.max_os_context_count,
        )
        .with_gpu_address(host_ptr)
        .with_cpu_address(host_ptr)
        .with_native_handle(handle))
    }

    fn allocate_with_host_ptr(
        &self,
        properties: &AllocationProperties,
        host_ptr: u64,
    ) -> MemResult<GraphicsAllocation> {
        let root = properties.root_device_index;
        let partition = self.gfx_partition(root)?;
        let requirements = get_allocation_requirements(root, host_ptr, properties.size);

        let refs = match self
            .host_ptr_manager
            .prepare_host_storage(self.backend.as_ref(), &requirements)
        {
            Ok(refs) => refs,
            Err(MemForgeError::InvalidHostPointer(reason)) => {
                // Conflicting fragments may belong to freed allocations that
                // are still in flight; wait their fences out, retire them,
                // then retry once
                warn!(host_ptr, %reason, "host range conflicts, waiting out parked allocations");
                self.wait_for_stored_completion()?;
                self.clean_temporary_allocations()?;
                self.host_ptr_manager
                    .prepare_host_storage(self.backend.as_ref(), &requirements)?
            }
            Err(err) => return Err(err),
        };

        let span = whole_page_span(host_ptr, properties.size);
        let heap_address = match partition.heap_allocate(HeapIndex::Standard, span) {
            Ok(address) => address,
            Err(err) => {
                for fragment in &refs {
                    if let Some(storage) =
                        self.host_ptr_manager.release_fragment(root, fragment.address)?
                    {
                        if let Some(handle) = storage.handle {
                            self.backend.destroy_native(handle);
                        }
                    }
                }
                return Err(err);
            }
        };
        let gpu_address = heap_address + (host_ptr - align_down(host_ptr, PAGE_SIZE));

        debug!(
            host_ptr,
            gpu_address,
            fragments = refs.len(),
            "allocated from host pointer fragments"
        );
        Ok(GraphicsAllocation::new(
            root,
            properties.allocation_type,
            MemoryPool::System4KbPages,
            properties.size,
            self.capabilities.max_os_context_count,
        )
        .with_gpu_address(gpu_address)
        .with_cpu_address(host_ptr)
        .with_fragments(refs)
        .with_heap_range(HeapRange {
            heap: HeapIndex::Standard,
            address: heap_address,
            size: span,
        }))
    }

    // ========== Release ==========

    /// Free an allocation. Busy allocations are parked until their fences
    /// retire; deferrable types go through the deletion worker.
    pub fn free_graphics_memory(&self, allocation: GraphicsAllocation) -> MemResult<()> {
        // Opportunistically retire whatever already completed
        self.clean_temporary_allocations()?;

        if allocation.allocation_type().is_reusable() {
            // Parked for the next allocation of the same type; still-busy
            // entries are filtered out at reuse time
            return self
                .internal_storage
                .store_allocation(allocation, AllocationUsage::Reusable);
        }

        let engines = self.engines_snapshot()?;
        if !Self::completed_on(&allocation, &engines) {
            return self
                .internal_storage
                .store_allocation(allocation, AllocationUsage::Temporary);
        }
        if allocation.allocation_type().is_deferrable() {
            return self
                .deferred_deleter
                .deferred_delete(allocation, &self.releaser);
        }
        self.releaser.release(allocation);
        Ok(())
    }

    /// Physically release every parked allocation whose fences retired.
    pub fn clean_temporary_allocations(&self) -> MemResult<usize> {
        let engines = self.engines_snapshot()?;
        let completed = self
            .internal_storage
            .detach_completed(AllocationUsage::Temporary, &engines)?;
        let count = completed.len();
        for allocation in completed {
            self.releaser.release(allocation);
        }
        Ok(count)
    }

    /// Block until every parked allocation's fences retire, bounded by
    /// [`COMPLETION_WAIT_TIMEOUT`]. Timing out is not an error; the caller
    /// decides what to do with whatever is still outstanding.
    fn wait_for_stored_completion(&self) -> MemResult<()> {
        let deadline = Instant::now() + COMPLETION_WAIT_TIMEOUT;
        loop {
            let engines = self.engines_snapshot()?;
            let mut pending = self
                .internal_storage
                .pending_watermarks(AllocationUsage::Temporary)?;
            pending.extend(
                self.internal_storage
                    .pending_watermarks(AllocationUsage::Reusable)?,
            );
            let outstanding = pending.iter().any(|&(context_id, task_count)| {
                engines
                    .get(context_id as usize)
                    .map(|engine| !engine.is_complete(task_count))
                    .unwrap_or(false)
            });
            if !outstanding {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("timed out waiting for parked allocation fences");
                return Ok(());
            }
            thread::sleep(COMPLETION_POLL_INTERVAL);
        }
    }

    /// Block until every queued deferred deletion has completed.
    pub fn drain_deferred_deletions(&self) -> MemResult<()> {
        self.deferred_deleter.drain()
    }

    // ========== Residency ==========

    /// Mark the allocation resident on `context_id` so the submission path
    /// can dispatch against it.
    pub fn make_resident(
        &self,
        allocation: &GraphicsAllocation,
        context_id: u32,
    ) -> MemResult<()> {
        if context_id >= self.capabilities.max_os_context_count {
            return Err(MemForgeError::ContextOutOfRange {
                context_id,
                max_contexts: self.capabilities.max_os_context_count,
            });
        }
        allocation.set_resident(context_id, true);
        Ok(())
    }

    /// Evict the allocation from `context_id`, recording its last fence on
    /// every backing fragment so later host-range requests can see how far
    /// the hardware got.
    pub fn evict(&self, allocation: &GraphicsAllocation, context_id: u32) -> MemResult<()> {
        allocation.set_resident(context_id, false);
        let fence = allocation.task_count(context_id);
        if fence != TASK_COUNT_NOT_READY {
            for fragment in allocation.fragments() {
                self.host_ptr_manager.update_fragment_completion(
                    allocation.root_device_index(),
                    fragment.address,
                    fence,
                    context_id,
                )?;
            }
        }
        Ok(())
    }

    /// Whether the allocation is currently resident on `context_id`. The
    /// submission path checks this before dispatch.
    pub fn is_resident(&self, allocation: &GraphicsAllocation, context_id: u32) -> bool {
        allocation.is_resident(context_id)
    }

    // ========== CPU access ==========

    /// Map the allocation for CPU access.
    pub fn lock_resource(&self, allocation: &mut GraphicsAllocation) -> MemResult<u64> {
        if let Some(address) = allocation.locked_cpu_address() {
            return Ok(address);
        }
        let handle = allocation.native_handle().ok_or_else(|| {
            MemForgeError::invalid_request("allocation has no native backing to lock")
        })?;
        let address = self.backend.map_cpu(handle)?;
        allocation.set_locked_cpu_address(Some(address));
        Ok(address)
    }

    /// Undo [`MemoryManager::lock_resource`].
    pub fn unlock_resource(&self, allocation: &mut GraphicsAllocation) -> MemResult<()> {
        if allocation.locked_cpu_address().is_none() {
            return Ok(());
        }
        if let Some(handle) = allocation.native_handle() {
            self.backend.unmap_cpu(handle);
        }
        allocation.set_locked_cpu_address(None);
        Ok(())
    }

    // ========== Address reservation ==========

    /// Reserve a GPU address range with no backing, for external consumers.
    pub fn reserve_gpu_address(&self, root_device_index: u32, size: u64) -> MemResult<HeapRange> {
        let partition = self.gfx_partition(root_device_index)?;
        let aligned = align_up(size, PAGE_SIZE_64K);
        let address = partition.reserve_gpu_address_range(aligned)?;
        Ok(HeapRange {
            heap: HeapIndex::Standard,
            address,
            size: aligned,
        })
    }

    /// Release a range from [`MemoryManager::reserve_gpu_address`].
    pub fn free_gpu_address(&self, root_device_index: u32, range: HeapRange) -> MemResult<()> {
        let partition = self.gfx_partition(root_device_index)?;
        partition.free_gpu_address_range(range.address, range.size)
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        // Parked allocations must not outlive the manager; wait their fences
        // out, then force-release whatever is left so no native handle leaks
        if let Err(err) = self.wait_for_stored_completion() {
            warn!(%err, "fence wait failed at shutdown");
        }
        for usage in [AllocationUsage::Temporary, AllocationUsage::Reusable] {
            match self.internal_storage.drain_all(usage) {
                Ok(allocations) => {
                    for allocation in allocations {
                        self.releaser.release(allocation);
                    }
                }
                Err(err) => warn!(%err, "failed to drain parked allocations at shutdown"),
            }
        }
        let _ = self.deferred_deleter.drain();
    }
}
