//! Fence-bound parking lots for freed allocations.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::allocation::{AllocationType, GraphicsAllocation};
use crate::backend::OsContext;
use crate::error::MemResult;

/// Which list a parked allocation goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationUsage {
    /// Held only until every using context retires, then physically freed
    Temporary,
    /// Held for reuse by later allocations of the same type
    Reusable,
}

/// Freed-but-busy allocations, parked until their fences retire.
pub struct InternalAllocationStorage {
    temporary: Mutex<VecDeque<GraphicsAllocation>>,
    reusable: Mutex<VecDeque<GraphicsAllocation>>,
}

/// An allocation is releasable once every context that used it has
/// completed at least its recorded task count. Contexts that disappeared
/// from the registry cannot be using it anymore.
fn is_completed(allocation: &GraphicsAllocation, engines: &[Arc<OsContext>]) -> bool {
    allocation.used_contexts().all(|(context_id, task_count)| {
        engines
            .get(context_id as usize)
            .map(|engine| engine.is_complete(task_count))
            .unwrap_or(true)
    })
}

impl InternalAllocationStorage {
    pub fn new() -> Self {
        Self {
            temporary: Mutex::new(VecDeque::new()),
            reusable: Mutex::new(VecDeque::new()),
        }
    }

    fn list(&self, usage: AllocationUsage) -> &Mutex<VecDeque<GraphicsAllocation>> {
        match usage {
            AllocationUsage::Temporary => &self.temporary,
            AllocationUsage::Reusable => &self.reusable,
        }
    }

    /// Park a freed allocation whose fences have not all retired.
    pub fn store_allocation(
        &self,
        allocation: GraphicsAllocation,
        usage: AllocationUsage,
    ) -> MemResult<()> {
        trace!(
            size = allocation.size(),
            gpu_address = allocation.gpu_address(),
            ?usage,
            "parking freed allocation"
        );
        self.list(usage).lock()?.push_back(allocation);
        Ok(())
    }

    /// Context watermarks still recorded on allocations parked on `usage`.
    ///
    /// Callers wait these out against the engine registry before forcing
    /// a cleanup.
    pub fn pending_watermarks(&self, usage: AllocationUsage) -> MemResult<Vec<(u32, u64)>> {
        let list = self.list(usage).lock()?;
        Ok(list
            .iter()
            .flat_map(|allocation| allocation.used_contexts())
            .collect())
    }

    /// Take every allocation parked on `usage`, regardless of fence state.
    /// Shutdown only.
    pub fn drain_all(&self, usage: AllocationUsage) -> MemResult<Vec<GraphicsAllocation>> {
        let mut list = self.list(usage).lock()?;
        Ok(list.drain(..).collect())
    }

    /// Number of allocations parked on `usage`.
    pub fn stored_count(&self, usage: AllocationUsage) -> MemResult<usize> {
        Ok(self.list(usage).lock()?.len())
    }

    /// Pull every parked allocation whose using contexts have all retired.
    /// The caller owns the physical release.
    pub fn detach_completed(
        &self,
        usage: AllocationUsage,
        engines: &[Arc<OsContext>],
    ) -> MemResult<Vec<GraphicsAllocation>> {
        let mut list = self.list(usage).lock()?;
        let mut completed = Vec::new();
        let mut remaining = VecDeque::with_capacity(list.len());
        for allocation in list.drain(..) {
            if is_completed(&allocation, engines) {
                completed.push(allocation);
            } else {
                remaining.push_back(allocation);
            }
        }
        *list = remaining;
        if !completed.is_empty() {
            debug!(count = completed.len(), ?usage, "parked allocations retired");
        }
        Ok(completed)
    }

    /// Take a retired reusable allocation fitting the request, if any.
    pub fn obtain_reusable_allocation(
        &self,
        size: u64,
        allocation_type: AllocationType,
        engines: &[Arc<OsContext>],
    ) -> MemResult<Option<GraphicsAllocation>> {
        let mut list = self.reusable.lock()?;
        let position = list.iter().position(|allocation| {
            allocation.allocation_type() == allocation_type
                && allocation.size() >= size
                && is_completed(allocation, engines)
        });
        Ok(position.and_then(|idx| list.remove(idx)))
    }
}

impl Default for InternalAllocationStorage {
    fn default() -> Self {
        Self::new()
    }
}
