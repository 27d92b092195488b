//! MemForge - GPU Memory Allocation Core
//!
//! Memory allocation and lifetime tracking for a GPU compute runtime:
//! virtual address space partitioning, host pointer fragment tracking,
//! and fence-based allocation lifecycle management.

#![allow(clippy::too_many_arguments)] // Allocation paths thread many parameters
#![allow(clippy::collapsible_else_if)] // Sometimes clearer for control flow
#![allow(clippy::collapsible_if)] // Sometimes clearer for control flow
#![allow(clippy::bool_comparison)] // Sometimes clearer for intent

pub mod allocation;
pub mod backend;
pub mod capabilities;
pub mod error;
pub mod helpers;
pub mod host_ptr;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod partition;

pub use allocation::{AllocationType, GraphicsAllocation, MemoryPool, TASK_COUNT_NOT_READY};
pub use backend::{EngineType, NativeAllocationBackend, OsAgnosticBackend, OsContext};
pub use capabilities::HardwareCapabilities;
pub use error::{ErrorCategory, MemForgeError, MemResult};
pub use logging::{init_logging_default, init_logging_from_env};
pub use manager::{AllocationFlags, AllocationProperties, ImageInfo, MemoryManager};
pub use partition::{GfxPartition, HeapIndex};

#[cfg(test)]
mod library_tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        let caps = HardwareCapabilities::full_range_48bit();
        assert!(caps.full_range_svm());
    }
}
