//! Execution-context handles.
//!
//! An [`OsContext`] stands for one hardware submission context. The
//! submission side signals fence completion through it; the allocator only
//! ever reads the watermark to decide whether an allocation is still in
//! flight.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Engine class a context submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    /// Compute engine
    Compute,
    /// Render engine
    Render,
    /// Copy/blit engine
    Copy,
}

/// One registered execution context.
#[derive(Debug)]
pub struct OsContext {
    context_id: u32,
    engine_type: EngineType,
    device_bitfield: u64,
    completed_fence: AtomicU64,
}

impl OsContext {
    /// Create a context. Contexts are registered with the memory manager,
    /// which hands out the id.
    pub fn new(context_id: u32, engine_type: EngineType, device_bitfield: u64) -> Self {
        debug!(context_id, ?engine_type, device_bitfield, "creating OS context");
        Self {
            context_id,
            engine_type,
            device_bitfield,
            completed_fence: AtomicU64::new(0),
        }
    }

    /// Slot index of this context.
    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    /// Engine class this context submits to.
    pub fn engine_type(&self) -> EngineType {
        self.engine_type
    }

    /// Sub-devices this context can address.
    pub fn device_bitfield(&self) -> u64 {
        self.device_bitfield
    }

    /// Record that the hardware completed work up to `fence`.
    ///
    /// Called by the submission side; monotonicity is its responsibility.
    pub fn signal_completion(&self, fence: u64) {
        self.completed_fence.store(fence, Ordering::Release);
    }

    /// Latest fence value the hardware reported as completed.
    pub fn latest_completed(&self) -> u64 {
        self.completed_fence.load(Ordering::Acquire)
    }

    /// Whether work submitted with `task_count` has retired.
    pub fn is_complete(&self, task_count: u64) -> bool {
        self.latest_completed() >= task_count
    }
}
