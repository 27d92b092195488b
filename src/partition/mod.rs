//! GPU virtual address space partitioning.

mod alignment;
mod gfx_partition;
mod heap_allocator;

pub use alignment::{AlignmentSelector, CandidateAlignment};
pub use gfx_partition::{
    select_heap, GfxPartition, HeapIndex, EXTERNAL_FRONT_WINDOW_POOL_SIZE, HEAP32_SIZE,
    HEAP_GRANULARITY, HEAP_GRANULARITY_2MB, INTERNAL_FRONT_WINDOW_POOL_SIZE,
};
pub use heap_allocator::{HeapAllocator, BIG_CHUNK_THRESHOLD};
