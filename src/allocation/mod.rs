//! Graphics allocation objects and usage tracking.

mod graphics_allocation;
mod residency;

pub use graphics_allocation::{
    AllocationType, GraphicsAllocation, HeapRange, MemoryPool, TASK_COUNT_NOT_READY,
};
pub use residency::ResidencyData;
