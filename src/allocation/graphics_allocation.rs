//! The allocation object handed to clients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backend::NativeHandle;
use crate::host_ptr::FragmentRef;
use crate::partition::HeapIndex;

use super::ResidencyData;

/// Sentinel task count for a context slot that never touched the allocation.
pub const TASK_COUNT_NOT_READY: u64 = u64::MAX;

/// What the allocation is used for. Drives pool, heap and alignment choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationType {
    /// Untyped allocation
    Unknown,
    /// Device buffer
    Buffer,
    /// Buffer that must stay host-visible
    BufferHostMemory,
    /// Command stream storage
    CommandBuffer,
    /// Constant program surface
    ConstantSurface,
    /// Wrapped user host memory
    ExternalHostPtr,
    /// Image or texture storage
    Image,
    /// Driver-internal heap block
    InternalHeap,
    /// Kernel instruction storage
    KernelIsa,
    /// Indirect state stream
    LinearStream,
    /// Persistently mapped allocation
    MapAllocation,
    /// Shared-virtual-memory block placed at its CPU address
    SvmCpu,
    /// Shared-virtual-memory block in device memory
    SvmGpu,
    /// Completion tag storage
    TagBuffer,
    /// Timestamp record storage
    Timestamp,
}

impl AllocationType {
    /// Types that live in the driver-internal 32-bit heap so offsets from
    /// the heap base fit instruction fields.
    pub fn is_internal_heap_type(self) -> bool {
        matches!(self, AllocationType::KernelIsa | AllocationType::InternalHeap)
    }

    /// Types the CPU must always be able to read or write.
    pub fn requires_cpu_access(self) -> bool {
        matches!(
            self,
            AllocationType::BufferHostMemory
                | AllocationType::CommandBuffer
                | AllocationType::ConstantSurface
                | AllocationType::ExternalHostPtr
                | AllocationType::InternalHeap
                | AllocationType::KernelIsa
                | AllocationType::LinearStream
                | AllocationType::MapAllocation
                | AllocationType::SvmCpu
                | AllocationType::TagBuffer
                | AllocationType::Timestamp
        )
    }

    /// Types that benefit from 64 KiB pages.
    pub fn prefers_64k_pages(self) -> bool {
        matches!(
            self,
            AllocationType::Buffer | AllocationType::Image | AllocationType::SvmGpu
        )
    }

    /// Types whose release may be handed to the deferred-deletion worker:
    /// the hardware may still write completion records into them briefly
    /// after the owning object is destroyed.
    pub fn is_deferrable(self) -> bool {
        matches!(self, AllocationType::Timestamp | AllocationType::TagBuffer)
    }

    /// Types that are parked for reuse on free instead of being destroyed.
    /// Stream storage churns every submission; keeping the backing avoids
    /// re-allocating it each time.
    pub fn is_reusable(self) -> bool {
        matches!(
            self,
            AllocationType::LinearStream | AllocationType::InternalHeap
        )
    }
}

/// Physical placement of the backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPool {
    /// No backing at all
    MemoryNull,
    /// System memory, 4 KiB pages
    System4KbPages,
    /// System memory, 64 KiB pages
    System64KbPages,
    /// System memory addressed through a 32-bit GPU window
    System4KbPagesWith32BitGpuAddressing,
    /// 64 KiB paged system memory behind a 32-bit window
    System64KbPagesWith32BitGpuAddressing,
    /// System memory the CPU cannot map
    SystemCpuInaccessible,
    /// Device-local memory
    LocalMemory,
}

impl MemoryPool {
    /// Whether the pool is backed by system memory.
    pub fn is_system_memory(self) -> bool {
        matches!(
            self,
            MemoryPool::System4KbPages
                | MemoryPool::System64KbPages
                | MemoryPool::System4KbPagesWith32BitGpuAddressing
                | MemoryPool::System64KbPagesWith32BitGpuAddressing
                | MemoryPool::SystemCpuInaccessible
        )
    }

    /// Whether the pool is device-local memory.
    pub fn is_local_memory(self) -> bool {
        self == MemoryPool::LocalMemory
    }
}

/// GPU virtual address range reserved from a partition heap.
#[derive(Debug, Clone, Copy)]
pub struct HeapRange {
    /// Heap the range came from
    pub heap: HeapIndex,
    /// Start of the reserved range
    pub address: u64,
    /// Reserved size, including alignment padding
    pub size: u64,
}

/// A block of graphics memory with its GPU address, optional CPU address,
/// native backing and per-context usage watermarks.
#[derive(Debug)]
pub struct GraphicsAllocation {
    root_device_index: u32,
    allocation_type: AllocationType,
    pool: MemoryPool,
    size: u64,
    gpu_address: u64,
    /// Base the GPU offsets 32-bit window allocations against
    gpu_base_address: u64,
    cpu_address: Option<u64>,
    native_handle: Option<NativeHandle>,
    heap_range: Option<HeapRange>,
    fragments: Vec<FragmentRef>,
    locked_cpu_address: Option<u64>,
    /// Last task count submitted per context slot
    task_counts: Vec<AtomicU64>,
    /// Per-context resident flags and completion watermarks
    residency: Mutex<ResidencyData>,
}

impl GraphicsAllocation {
    /// Create an allocation shell. Addresses and backing are attached with
    /// the `with_*` builders.
    pub fn new(
        root_device_index: u32,
        allocation_type: AllocationType,
        pool: MemoryPool,
        size: u64,
        max_os_context_count: u32,
    ) -> Self {
        let task_counts = (0..max_os_context_count)
            .map(|_| AtomicU64::new(TASK_COUNT_NOT_READY))
            .collect();
        Self {
            root_device_index,
            allocation_type,
            pool,
            size,
            gpu_address: 0,
            gpu_base_address: 0,
            cpu_address: None,
            native_handle: None,
            heap_range: None,
            fragments: Vec::new(),
            locked_cpu_address: None,
            task_counts,
            residency: Mutex::new(ResidencyData::new(max_os_context_count)),
        }
    }

    /// Attach the GPU virtual address.
    pub fn with_gpu_address(mut self, gpu_address: u64) -> Self {
        self.gpu_address = gpu_address;
        self
    }

    /// Attach the 32-bit window base used for offset patching.
    pub fn with_gpu_base_address(mut self, base: u64) -> Self {
        self.gpu_base_address = base;
        self
    }

    /// Attach the CPU address.
    pub fn with_cpu_address(mut self, cpu_address: u64) -> Self {
        self.cpu_address = Some(cpu_address);
        self
    }

    /// Attach the native backing handle.
    pub fn with_native_handle(mut self, handle: NativeHandle) -> Self {
        self.native_handle = Some(handle);
        self
    }

    /// Attach the heap range the GPU address was carved from.
    pub fn with_heap_range(mut self, range: HeapRange) -> Self {
        self.heap_range = Some(range);
        self
    }

    /// Attach host-pointer fragment references.
    pub fn with_fragments(mut self, fragments: Vec<FragmentRef>) -> Self {
        self.fragments = fragments;
        self
    }

    pub fn root_device_index(&self) -> u32 {
        self.root_device_index
    }

    pub fn allocation_type(&self) -> AllocationType {
        self.allocation_type
    }

    pub fn pool(&self) -> MemoryPool {
        self.pool
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn gpu_base_address(&self) -> u64 {
        self.gpu_base_address
    }

    pub fn cpu_address(&self) -> Option<u64> {
        self.cpu_address
    }

    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.native_handle
    }

    pub fn heap_range(&self) -> Option<HeapRange> {
        self.heap_range
    }

    /// Host-pointer fragments backing this allocation, empty otherwise.
    pub fn fragments(&self) -> &[FragmentRef] {
        &self.fragments
    }

    pub(crate) fn take_fragments(&mut self) -> Vec<FragmentRef> {
        std::mem::take(&mut self.fragments)
    }

    /// Whether the allocation is currently CPU-locked.
    pub fn is_locked(&self) -> bool {
        self.locked_cpu_address.is_some()
    }

    /// CPU address of the current lock, if any.
    pub fn locked_cpu_address(&self) -> Option<u64> {
        self.locked_cpu_address
    }

    pub(crate) fn set_locked_cpu_address(&mut self, address: Option<u64>) {
        self.locked_cpu_address = address;
    }

    /// Record the task count of the latest submission on `context_id`.
    pub fn update_task_count(&self, task_count: u64, context_id: u32) {
        if let Some(slot) = self.task_counts.get(context_id as usize) {
            slot.store(task_count, Ordering::Release);
        }
    }

    /// Last submitted task count on `context_id`, or the not-ready
    /// sentinel when the context never used this allocation.
    pub fn task_count(&self, context_id: u32) -> u64 {
        self.task_counts
            .get(context_id as usize)
            .map(|slot| slot.load(Ordering::Acquire))
            .unwrap_or(TASK_COUNT_NOT_READY)
    }

    /// Whether `context_id` has ever used this allocation.
    pub fn is_used_by_context(&self, context_id: u32) -> bool {
        self.task_count(context_id) != TASK_COUNT_NOT_READY
    }

    /// Whether any context has ever used this allocation.
    pub fn is_used_by_any_context(&self) -> bool {
        self.task_counts
            .iter()
            .any(|slot| slot.load(Ordering::Acquire) != TASK_COUNT_NOT_READY)
    }

    /// Mark the allocation resident or evicted on `context_id`. A poisoned
    /// record is left untouched.
    pub fn set_resident(&self, context_id: u32, resident: bool) {
        if let Ok(mut residency) = self.residency.lock() {
            residency.set_resident(context_id, resident);
        }
    }

    /// Whether the allocation is currently resident on `context_id`.
    pub fn is_resident(&self, context_id: u32) -> bool {
        self.residency
            .lock()
            .map(|residency| residency.is_resident(context_id))
            .unwrap_or(false)
    }

    /// Whether the allocation is resident on any context.
    pub fn is_resident_anywhere(&self) -> bool {
        self.residency
            .lock()
            .map(|residency| residency.is_resident_anywhere())
            .unwrap_or(false)
    }

    /// Context slots that used this allocation, with their watermarks.
    pub fn used_contexts(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.task_counts.iter().enumerate().filter_map(|(id, slot)| {
            let count = slot.load(Ordering::Acquire);
            (count != TASK_COUNT_NOT_READY).then_some((id as u32, count))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation() -> GraphicsAllocation {
        GraphicsAllocation::new(
            0,
            AllocationType::Buffer,
            MemoryPool::System4KbPages,
            0x1000,
            4,
        )
    }

    #[test]
    fn test_fresh_allocation_is_unused() {
        let alloc = allocation();
        assert!(!alloc.is_used_by_any_context());
        assert_eq!(alloc.task_count(0), TASK_COUNT_NOT_READY);
        assert_eq!(alloc.used_contexts().count(), 0);
    }

    #[test]
    fn test_task_count_tracking() {
        let alloc = allocation();
        alloc.update_task_count(10, 0);
        alloc.update_task_count(20, 2);

        assert!(alloc.is_used_by_context(0));
        assert!(!alloc.is_used_by_context(1));
        assert!(alloc.is_used_by_context(2));
        assert_eq!(alloc.task_count(2), 20);

        let used: Vec<_> = alloc.used_contexts().collect();
        assert_eq!(used, vec![(0, 10), (2, 20)]);
    }

    #[test]
    fn test_out_of_range_context_reads_not_ready() {
        let alloc = allocation();
        alloc.update_task_count(5, 99);
        assert_eq!(alloc.task_count(99), TASK_COUNT_NOT_READY);
        assert!(!alloc.is_used_by_any_context());
    }

    #[test]
    fn test_type_predicates() {
        assert!(AllocationType::KernelIsa.is_internal_heap_type());
        assert!(AllocationType::InternalHeap.is_internal_heap_type());
        assert!(!AllocationType::Buffer.is_internal_heap_type());

        assert!(AllocationType::Timestamp.is_deferrable());
        assert!(AllocationType::TagBuffer.is_deferrable());
        assert!(!AllocationType::Image.is_deferrable());

        assert!(AllocationType::Buffer.prefers_64k_pages());
        assert!(!AllocationType::CommandBuffer.prefers_64k_pages());
        assert!(AllocationType::CommandBuffer.requires_cpu_access());

        assert!(AllocationType::LinearStream.is_reusable());
        assert!(AllocationType::InternalHeap.is_reusable());
        assert!(!AllocationType::Buffer.is_reusable());
    }

    #[test]
    fn test_residency_flags_per_context() {
        let alloc = allocation();
        assert!(!alloc.is_resident_anywhere());

        alloc.set_resident(2, true);
        assert!(alloc.is_resident(2));
        assert!(!alloc.is_resident(0));
        assert!(alloc.is_resident_anywhere());

        alloc.set_resident(2, false);
        assert!(!alloc.is_resident_anywhere());
        // Out-of-range slots read as not resident
        alloc.set_resident(99, true);
        assert!(!alloc.is_resident(99));
    }

    #[test]
    fn test_pool_predicates() {
        assert!(MemoryPool::System64KbPages.is_system_memory());
        assert!(MemoryPool::SystemCpuInaccessible.is_system_memory());
        assert!(!MemoryPool::LocalMemory.is_system_memory());
        assert!(MemoryPool::LocalMemory.is_local_memory());
        assert!(!MemoryPool::MemoryNull.is_system_memory());
    }

    #[test]
    fn test_builder_fields() {
        let alloc = allocation()
            .with_gpu_address(0x8000_0000)
            .with_gpu_base_address(0x8000_0000)
            .with_cpu_address(0x1234_0000);
        assert_eq!(alloc.gpu_address(), 0x8000_0000);
        assert_eq!(alloc.gpu_base_address(), 0x8000_0000);
        assert_eq!(alloc.cpu_address(), Some(0x1234_0000));
        assert!(alloc.native_handle().is_none());
        assert!(!alloc.is_locked());
    }
}
