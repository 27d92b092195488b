//! Native allocation backend abstraction.
//!
//! Everything below the heap and lifetime machinery goes through the
//! [`NativeAllocationBackend`] trait: obtaining backing pages, importing
//! user host ranges, and CPU mapping. The OS driver protocol itself lives
//! behind implementations of this trait; the crate ships
//! [`OsAgnosticBackend`], a pure software implementation used for bring-up
//! and tests.

mod os_agnostic;
mod os_context;

pub use os_agnostic::{FailMode, OsAgnosticBackend};
pub use os_context::{EngineType, OsContext};

use crate::error::MemResult;

/// Opaque handle to a native memory object owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

/// Parameters for a native backing allocation.
#[derive(Debug, Clone, Copy)]
pub struct NativeAllocationRequest {
    /// Requested size in bytes
    pub size: u64,
    /// Required start alignment in bytes
    pub alignment: u64,
    /// Place the backing in device-local memory
    pub local_memory: bool,
    /// Backing must be exportable to other processes
    pub shareable: bool,
    /// Backing must be CPU mappable
    pub cpu_accessible: bool,
}

/// Result of a native backing allocation.
#[derive(Debug, Clone, Copy)]
pub struct NativeAllocation {
    /// Handle identifying the backing object
    pub handle: NativeHandle,
    /// CPU address of the backing, when it is host-visible
    pub cpu_address: Option<u64>,
    /// Actual size of the backing, at least the requested size
    pub size: u64,
}

/// Low-level memory provider the allocator drives.
///
/// Implementations wrap the OS driver protocol. All methods may be called
/// from multiple threads, including the deferred-deletion worker.
pub trait NativeAllocationBackend: Send + Sync {
    /// Allocate native backing pages.
    fn create_native(&self, request: &NativeAllocationRequest) -> MemResult<NativeAllocation>;

    /// Pin an existing user host range and return a handle for it.
    fn import_host_range(&self, address: u64, size: u64) -> MemResult<NativeHandle>;

    /// Release native backing. Must tolerate being called from any thread.
    fn destroy_native(&self, handle: NativeHandle);

    /// Map the backing for CPU access, returning the CPU address.
    fn map_cpu(&self, handle: NativeHandle) -> MemResult<u64>;

    /// Undo a previous [`NativeAllocationBackend::map_cpu`].
    fn unmap_cpu(&self, handle: NativeHandle);
}
