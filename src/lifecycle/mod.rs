//! Allocation release machinery.
//!
//! Freed allocations travel one of three roads: immediate physical release,
//! fence-bound parking in [`InternalAllocationStorage`] until every context
//! that used them retires, or the [`DeferredDeleter`] worker for types the
//! hardware may still touch briefly after their owner is gone.

mod deferred_deleter;
mod internal_storage;
mod releaser;

pub use deferred_deleter::DeferredDeleter;
pub use internal_storage::{AllocationUsage, InternalAllocationStorage};
pub use releaser::AllocationReleaser;
