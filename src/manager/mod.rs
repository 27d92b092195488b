//! Allocation orchestration.

mod memory_manager;
mod properties;

pub use memory_manager::MemoryManager;
pub use properties::{AllocationFlags, AllocationProperties, ImageInfo};
