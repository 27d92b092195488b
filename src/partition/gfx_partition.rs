//! Carving the GPU virtual address space into heaps.

use std::sync::Mutex;

use tracing::{debug, info};

use crate::allocation::AllocationType;
use crate::capabilities::HardwareCapabilities;
use crate::error::{MemForgeError, MemResult};
use crate::helpers::{
    align_down, align_up, GIGABYTE, MAX_SVM_ADDRESS, MEGABYTE, PAGE_SIZE_2MB, PAGE_SIZE_64K,
};

use super::heap_allocator::HeapAllocator;

/// Size of each 32-bit addressing window.
pub const HEAP32_SIZE: u64 = 4 * GIGABYTE;
/// Guard margin and base alignment of most heaps.
pub const HEAP_GRANULARITY: u64 = PAGE_SIZE_64K;
/// Granularity of the huge-page heap.
pub const HEAP_GRANULARITY_2MB: u64 = PAGE_SIZE_2MB;
/// Space reserved at the front of the internal heaps for window allocations.
pub const INTERNAL_FRONT_WINDOW_POOL_SIZE: u64 = MEGABYTE;
/// Space reserved at the front of the external heaps for window allocations.
pub const EXTERNAL_FRONT_WINDOW_POOL_SIZE: u64 = 16 * MEGABYTE;

/// The heaps the address space is carved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapIndex {
    /// Shared-virtual-memory range mirroring CPU addresses
    Svm,
    /// 32-bit window for internal data in device memory
    InternalDeviceMemory,
    /// 32-bit window for internal data in system memory
    Internal,
    /// 32-bit window for client data in device memory
    ExternalDeviceMemory,
    /// 32-bit window for client data in system memory
    External,
    /// General heap, native pages
    Standard,
    /// General heap, 64 KiB pages
    Standard64Kb,
    /// General heap, 2 MiB pages
    Standard2Mb,
    /// Front window of [`HeapIndex::InternalDeviceMemory`]
    InternalDeviceFrontWindow,
    /// Front window of [`HeapIndex::Internal`]
    InternalFrontWindow,
    /// Front window of [`HeapIndex::ExternalDeviceMemory`]
    ExternalDeviceFrontWindow,
    /// Front window of [`HeapIndex::External`]
    ExternalFrontWindow,
}

impl HeapIndex {
    /// All heaps, in partition layout order.
    pub const ALL: [HeapIndex; 12] = [
        HeapIndex::Svm,
        HeapIndex::InternalDeviceMemory,
        HeapIndex::Internal,
        HeapIndex::ExternalDeviceMemory,
        HeapIndex::External,
        HeapIndex::Standard,
        HeapIndex::Standard64Kb,
        HeapIndex::Standard2Mb,
        HeapIndex::InternalDeviceFrontWindow,
        HeapIndex::InternalFrontWindow,
        HeapIndex::ExternalDeviceFrontWindow,
        HeapIndex::ExternalFrontWindow,
    ];

    /// Stable name for logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            HeapIndex::Svm => "svm",
            HeapIndex::InternalDeviceMemory => "internal-device",
            HeapIndex::Internal => "internal",
            HeapIndex::ExternalDeviceMemory => "external-device",
            HeapIndex::External => "external",
            HeapIndex::Standard => "standard",
            HeapIndex::Standard64Kb => "standard-64k",
            HeapIndex::Standard2Mb => "standard-2mb",
            HeapIndex::InternalDeviceFrontWindow => "internal-device-front-window",
            HeapIndex::InternalFrontWindow => "internal-front-window",
            HeapIndex::ExternalDeviceFrontWindow => "external-device-front-window",
            HeapIndex::ExternalFrontWindow => "external-front-window",
        }
    }

    /// Whether this is a front-window sub-heap.
    pub fn is_front_window(self) -> bool {
        matches!(
            self,
            HeapIndex::InternalDeviceFrontWindow
                | HeapIndex::InternalFrontWindow
                | HeapIndex::ExternalDeviceFrontWindow
                | HeapIndex::ExternalFrontWindow
        )
    }

    /// The heap whose base 32-bit window offsets are patched against.
    /// Front windows share their parent heap's base.
    pub fn window_base_heap(self) -> HeapIndex {
        match self {
            HeapIndex::InternalDeviceFrontWindow => HeapIndex::InternalDeviceMemory,
            HeapIndex::InternalFrontWindow => HeapIndex::Internal,
            HeapIndex::ExternalDeviceFrontWindow => HeapIndex::ExternalDeviceMemory,
            HeapIndex::ExternalFrontWindow => HeapIndex::External,
            other => other,
        }
    }

    fn idx(self) -> usize {
        match self {
            HeapIndex::Svm => 0,
            HeapIndex::InternalDeviceMemory => 1,
            HeapIndex::Internal => 2,
            HeapIndex::ExternalDeviceMemory => 3,
            HeapIndex::External => 4,
            HeapIndex::Standard => 5,
            HeapIndex::Standard64Kb => 6,
            HeapIndex::Standard2Mb => 7,
            HeapIndex::InternalDeviceFrontWindow => 8,
            HeapIndex::InternalFrontWindow => 9,
            HeapIndex::ExternalDeviceFrontWindow => 10,
            HeapIndex::ExternalFrontWindow => 11,
        }
    }
}

#[derive(Debug, Default)]
struct Heap {
    base: u64,
    size: u64,
    allocator: Option<Mutex<HeapAllocator>>,
}

/// Pure heap selection for an allocation about to receive a GPU address.
///
/// No partition state is consulted, so the same inputs always produce the
/// same heap.
pub fn select_heap(
    allocation_type: AllocationType,
    uses_local_memory: bool,
    has_cpu_ptr: bool,
    is_32bit: bool,
    full_range_svm: bool,
    use_front_window: bool,
) -> HeapIndex {
    if is_32bit {
        let internal = allocation_type.is_internal_heap_type();
        return match (internal, uses_local_memory, use_front_window) {
            (true, true, true) => HeapIndex::InternalDeviceFrontWindow,
            (true, true, false) => HeapIndex::InternalDeviceMemory,
            (true, false, true) => HeapIndex::InternalFrontWindow,
            (true, false, false) => HeapIndex::Internal,
            (false, true, true) => HeapIndex::ExternalDeviceFrontWindow,
            (false, true, false) => HeapIndex::ExternalDeviceMemory,
            (false, false, true) => HeapIndex::ExternalFrontWindow,
            (false, false, false) => HeapIndex::External,
        };
    }
    if has_cpu_ptr && full_range_svm {
        return HeapIndex::Svm;
    }
    if allocation_type.prefers_64k_pages() {
        return HeapIndex::Standard64Kb;
    }
    HeapIndex::Standard
}

/// One root device's view of the GPU virtual address space.
pub struct GfxPartition {
    root_device_index: u32,
    heaps: [Heap; 12],
}

impl GfxPartition {
    /// Carve the address space described by `caps` for `root_device_index`.
    pub fn new(caps: &HardwareCapabilities, root_device_index: u32) -> MemResult<Self> {
        if !caps.can_hold_heap_layout() {
            return Err(MemForgeError::AddressSpaceTooSmall(caps.gpu_address_space));
        }

        let full_range = caps.full_range_svm();
        let gfx_base = if full_range { MAX_SVM_ADDRESS + 1 } else { 0 };
        let gfx_top = caps.address_space_size();

        let mut heaps: [Heap; 12] = Default::default();

        if full_range {
            // SVM mirrors CPU addresses, no allocator of its own
            heaps[HeapIndex::Svm.idx()] = Heap {
                base: 0,
                size: gfx_base,
                allocator: None,
            };
        }

        let mut cursor = gfx_base;
        for heap32 in [
            HeapIndex::InternalDeviceMemory,
            HeapIndex::Internal,
            HeapIndex::ExternalDeviceMemory,
            HeapIndex::External,
        ] {
            let internal = matches!(
                heap32,
                HeapIndex::InternalDeviceMemory | HeapIndex::Internal
            );
            let front_size = if internal {
                INTERNAL_FRONT_WINDOW_POOL_SIZE
            } else {
                EXTERNAL_FRONT_WINDOW_POOL_SIZE
            };
            heaps[heap32.idx()] = Heap {
                base: cursor,
                size: HEAP32_SIZE,
                allocator: Some(Mutex::new(HeapAllocator::with_front_reserved(
                    cursor,
                    HEAP32_SIZE,
                    HEAP_GRANULARITY,
                    front_size,
                ))),
            };
            let front = match heap32 {
                HeapIndex::InternalDeviceMemory => HeapIndex::InternalDeviceFrontWindow,
                HeapIndex::Internal => HeapIndex::InternalFrontWindow,
                HeapIndex::ExternalDeviceMemory => HeapIndex::ExternalDeviceFrontWindow,
                _ => HeapIndex::ExternalFrontWindow,
            };
            heaps[front.idx()] = Heap {
                base: cursor,
                size: front_size,
                allocator: Some(Mutex::new(HeapAllocator::new_front_window(
                    cursor, front_size,
                ))),
            };
            cursor += HEAP32_SIZE;
        }

        // Split what remains equally between the three standard heaps,
        // aligned to the coarsest heap granularity
        cursor = align_up(cursor, HEAP_GRANULARITY_2MB);
        let standard_size = align_down((gfx_top - cursor) / 3, HEAP_GRANULARITY_2MB);
        if standard_size == 0 {
            return Err(MemForgeError::AddressSpaceTooSmall(caps.gpu_address_space));
        }

        heaps[HeapIndex::Standard.idx()] = Heap {
            base: cursor,
            size: standard_size,
            allocator: Some(Mutex::new(HeapAllocator::new(
                cursor,
                standard_size,
                HEAP_GRANULARITY,
            ))),
        };
        cursor += standard_size;

        // The 64 KiB heap is sub-divided between root devices so their
        // coarse page mappings never share a range
        let num_root_devices = caps.num_root_devices.max(1) as u64;
        let per_device = align_down(standard_size / num_root_devices, HEAP_GRANULARITY);
        if per_device == 0 {
            return Err(MemForgeError::AddressSpaceTooSmall(caps.gpu_address_space));
        }
        let base_64k = cursor + u64::from(root_device_index) * per_device;
        heaps[HeapIndex::Standard64Kb.idx()] = Heap {
            base: base_64k,
            size: per_device,
            allocator: Some(Mutex::new(HeapAllocator::new(
                base_64k,
                per_device,
                HEAP_GRANULARITY,
            ))),
        };
        cursor += standard_size;

        heaps[HeapIndex::Standard2Mb.idx()] = Heap {
            base: cursor,
            size: standard_size,
            allocator: Some(Mutex::new(HeapAllocator::new(
                cursor,
                standard_size,
                HEAP_GRANULARITY_2MB,
            ))),
        };

        info!(
            root_device_index,
            gfx_base,
            gfx_top,
            standard_size,
            full_range,
            "GPU address space partitioned"
        );

        Ok(Self {
            root_device_index,
            heaps,
        })
    }

    pub fn root_device_index(&self) -> u32 {
        self.root_device_index
    }

    /// Base address of `heap`.
    pub fn heap_base(&self, heap: HeapIndex) -> u64 {
        self.heaps[heap.idx()].base
    }

    /// Size of `heap` in bytes, 0 when the heap does not exist on this
    /// device.
    pub fn heap_size(&self, heap: HeapIndex) -> u64 {
        self.heaps[heap.idx()].size
    }

    /// Highest address belonging to `heap` (inclusive).
    pub fn heap_limit(&self, heap: HeapIndex) -> u64 {
        let h = &self.heaps[heap.idx()];
        h.base + h.size - 1
    }

    /// Whether `heap` was initialized with usable space.
    pub fn is_heap_initialized(&self, heap: HeapIndex) -> bool {
        self.heaps[heap.idx()].size != 0
    }

    /// Lowest address `heap` will ever hand out.
    pub fn heap_minimal_address(&self, heap: HeapIndex) -> MemResult<u64> {
        let allocator = self.allocator(heap)?;
        let guard = allocator.lock()?;
        Ok(guard.minimal_address())
    }

    /// Allocate a GPU address range from `heap`.
    pub fn heap_allocate(&self, heap: HeapIndex, size: u64) -> MemResult<u64> {
        let allocator = self.allocator(heap)?;
        let mut guard = allocator.lock()?;
        let address = guard.allocate(size).ok_or(MemForgeError::OutOfAddressSpace {
            heap: heap.name(),
            size,
        })?;
        debug!(heap = heap.name(), address, size, "GPU address range allocated");
        Ok(address)
    }

    /// Return a range obtained from [`GfxPartition::heap_allocate`].
    pub fn heap_free(&self, heap: HeapIndex, address: u64, size: u64) -> MemResult<()> {
        let h = &self.heaps[heap.idx()];
        if address < h.base || address + size > h.base + h.size {
            return Err(MemForgeError::InvalidHeapFree {
                heap: heap.name(),
                address,
                size,
            });
        }
        let allocator = self.allocator(heap)?;
        let mut guard = allocator.lock()?;
        guard.free(address, size);
        debug!(heap = heap.name(), address, size, "GPU address range freed");
        Ok(())
    }

    /// Reserve an arbitrary GPU address range for an external consumer.
    pub fn reserve_gpu_address_range(&self, size: u64) -> MemResult<u64> {
        self.heap_allocate(HeapIndex::Standard, align_up(size, HEAP_GRANULARITY))
    }

    /// Release a range from [`GfxPartition::reserve_gpu_address_range`].
    pub fn free_gpu_address_range(&self, address: u64, size: u64) -> MemResult<()> {
        self.heap_free(
            HeapIndex::Standard,
            address,
            align_up(size, HEAP_GRANULARITY),
        )
    }

    fn allocator(&self, heap: HeapIndex) -> MemResult<&Mutex<HeapAllocator>> {
        self.heaps[heap.idx()]
            .allocator
            .as_ref()
            .ok_or_else(|| MemForgeError::internal(format!("heap {} has no allocator", heap.name())))
    }
}
