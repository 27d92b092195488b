//! Hardware capability registry.
//!
//! The capability set is built once at driver bring-up and passed by
//! reference to every subsystem that needs it. Nothing in the crate mutates
//! it afterwards; in particular the context-slot count is fixed for the
//! lifetime of the process.

use serde::{Deserialize, Serialize};

use crate::helpers::{GIGABYTE, MAX_SVM_ADDRESS};

/// Static description of the device the allocator is driving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareCapabilities {
    /// Highest addressable GPU virtual address (inclusive)
    pub gpu_address_space: u64,
    /// Device has its own local memory pool
    pub supports_local_memory: bool,
    /// Device page tables support 64 KiB pages
    pub supports_64k_pages: bool,
    /// Number of execution-context slots available process-wide
    pub max_os_context_count: u32,
    /// Number of root devices sharing the standard 64 KiB heap
    pub num_root_devices: u32,
    /// All GPU pointers must fit in 32 bits
    pub force_32bit_addressing: bool,
}

impl HardwareCapabilities {
    /// Discrete GPU with a full 48-bit address space and local memory.
    pub fn full_range_48bit() -> Self {
        Self {
            gpu_address_space: (1u64 << 48) - 1,
            supports_local_memory: true,
            supports_64k_pages: true,
            max_os_context_count: 8,
            num_root_devices: 1,
            force_32bit_addressing: false,
        }
    }

    /// Device with a reduced address space of `bits` bits and no SVM window.
    pub fn limited_range(bits: u32) -> Self {
        Self {
            gpu_address_space: (1u64 << bits) - 1,
            supports_local_memory: true,
            supports_64k_pages: true,
            max_os_context_count: 8,
            num_root_devices: 1,
            force_32bit_addressing: false,
        }
    }

    /// Integrated GPU sharing system memory, full address range.
    pub fn integrated() -> Self {
        Self {
            gpu_address_space: (1u64 << 48) - 1,
            supports_local_memory: false,
            supports_64k_pages: true,
            max_os_context_count: 8,
            num_root_devices: 1,
            force_32bit_addressing: false,
        }
    }

    /// Whether the device address space covers the whole shared virtual
    /// memory range, so host pointers are GPU-visible as-is.
    pub fn full_range_svm(&self) -> bool {
        self.gpu_address_space >= MAX_SVM_ADDRESS
    }

    /// Total addressable bytes.
    pub fn address_space_size(&self) -> u64 {
        self.gpu_address_space.wrapping_add(1)
    }

    /// Rough sanity floor for partitioning: four 4 GiB windows plus room
    /// for the standard heaps.
    pub fn can_hold_heap_layout(&self) -> bool {
        let gfx_base = if self.full_range_svm() {
            MAX_SVM_ADDRESS + 1
        } else {
            0
        };
        self.address_space_size()
            .saturating_sub(gfx_base)
            .saturating_sub(4 * 4 * GIGABYTE)
            > 0
    }
}

impl Default for HardwareCapabilities {
    fn default() -> Self {
        Self::full_range_48bit()
    }
}
