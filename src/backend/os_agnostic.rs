//! Software-only backend.
//!
//! Hands out simulated backing objects with monotonic handle ids and fake
//! CPU addresses. Carries create/destroy counters so tests can assert that
//! every backing object is released exactly once, and a failure-injection
//! switch to exercise the pool-fallback paths.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace, warn};

use crate::error::{MemForgeError, MemResult};
use crate::helpers::align_up;

use super::{NativeAllocation, NativeAllocationBackend, NativeAllocationRequest, NativeHandle};

/// Failure injection switch for tests and bring-up drills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// All requests succeed
    None,
    /// Requests for device-local memory fail
    DeviceOnly,
    /// Every create request fails
    All,
}

impl FailMode {
    fn as_u64(self) -> u64 {
        match self {
            FailMode::None => 0,
            FailMode::DeviceOnly => 1,
            FailMode::All => 2,
        }
    }

    fn from_u64(v: u64) -> Self {
        match v {
            1 => FailMode::DeviceOnly,
            2 => FailMode::All,
            _ => FailMode::None,
        }
    }
}

/// Pure software implementation of [`NativeAllocationBackend`].
pub struct OsAgnosticBackend {
    next_handle: AtomicU64,
    next_cpu_address: AtomicU64,
    created: AtomicUsize,
    destroyed: AtomicUsize,
    fail_mode: AtomicU64,
}

/// Simulated CPU addresses start well clear of the null page.
const CPU_ADDRESS_BASE: u64 = 0x4000_0000;

impl OsAgnosticBackend {
    /// Create a backend with no failure injection.
    pub fn new() -> Self {
        debug!("creating OS-agnostic allocation backend");
        Self {
            next_handle: AtomicU64::new(1),
            next_cpu_address: AtomicU64::new(CPU_ADDRESS_BASE),
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            fail_mode: AtomicU64::new(FailMode::None.as_u64()),
        }
    }

    /// Switch failure injection on or off.
    pub fn set_fail_mode(&self, mode: FailMode) {
        self.fail_mode.store(mode.as_u64(), Ordering::SeqCst);
    }

    /// Number of native objects created so far.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of native objects destroyed so far.
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Live native objects, for leak assertions.
    pub fn live_count(&self) -> usize {
        self.created_count() - self.destroyed_count()
    }

    fn take_handle(&self) -> NativeHandle {
        NativeHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for OsAgnosticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeAllocationBackend for OsAgnosticBackend {
    fn create_native(&self, request: &NativeAllocationRequest) -> MemResult<NativeAllocation> {
        let mode = FailMode::from_u64(self.fail_mode.load(Ordering::SeqCst));
        let inject = match mode {
            FailMode::None => false,
            FailMode::DeviceOnly => request.local_memory,
            FailMode::All => true,
        };
        if inject {
            warn!(
                size = request.size,
                local = request.local_memory,
                "injected native allocation failure"
            );
            return Err(MemForgeError::NativeAllocationFailed(
                "injected failure".into(),
            ));
        }
        if request.size == 0 {
            return Err(MemForgeError::InvalidRequest(
                "zero-size native allocation".into(),
            ));
        }

        let alignment = request.alignment.max(1);
        let size = align_up(request.size, alignment);
        let handle = self.take_handle();
        let cpu_address = if request.local_memory && !request.cpu_accessible {
            None
        } else {
            // Reserve a fake, suitably aligned host range
            let addr = self
                .next_cpu_address
                .fetch_add(size + alignment, Ordering::SeqCst);
            Some(align_up(addr, alignment))
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        trace!(
            handle = handle.0,
            size,
            local = request.local_memory,
            "created native backing"
        );
        Ok(NativeAllocation {
            handle,
            cpu_address,
            size,
        })
    }

    fn import_host_range(&self, address: u64, size: u64) -> MemResult<NativeHandle> {
        if address == 0 || size == 0 {
            return Err(MemForgeError::InvalidHostPointer(format!(
                "cannot import range {address:#x}+{size:#x}"
            )));
        }
        let handle = self.take_handle();
        self.created.fetch_add(1, Ordering::SeqCst);
        trace!(handle = handle.0, address, size, "imported host range");
        Ok(handle)
    }

    fn destroy_native(&self, handle: NativeHandle) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        trace!(handle = handle.0, "destroyed native backing");
    }

    fn map_cpu(&self, handle: NativeHandle) -> MemResult<u64> {
        // Simulated objects have no real pages; hand out a stable fake address
        let addr = self
            .next_cpu_address
            .fetch_add(crate::helpers::PAGE_SIZE, Ordering::SeqCst);
        trace!(handle = handle.0, addr, "mapped native backing for CPU");
        Ok(addr)
    }

    fn unmap_cpu(&self, handle: NativeHandle) {
        trace!(handle = handle.0, "unmapped native backing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(size: u64, local: bool) -> NativeAllocationRequest {
        NativeAllocationRequest {
            size,
            alignment: crate::helpers::PAGE_SIZE,
            local_memory: local,
            shareable: false,
            cpu_accessible: !local,
        }
    }

    #[test]
    fn test_create_destroy_counters() {
        let backend = OsAgnosticBackend::new();
        let a = backend.create_native(&request(0x1000, false)).unwrap();
        let b = backend.create_native(&request(0x2000, false)).unwrap();
        assert_ne!(a.handle, b.handle);
        assert_eq!(backend.live_count(), 2);

        backend.destroy_native(a.handle);
        backend.destroy_native(b.handle);
        assert_eq!(backend.live_count(), 0);
    }

    #[test]
    fn test_system_allocations_are_cpu_visible() {
        let backend = OsAgnosticBackend::new();
        let alloc = backend.create_native(&request(0x1000, false)).unwrap();
        assert!(alloc.cpu_address.is_some());
        assert_eq!(alloc.size, 0x1000);
    }

    #[test]
    fn test_device_only_failure_injection() {
        let backend = OsAgnosticBackend::new();
        backend.set_fail_mode(FailMode::DeviceOnly);

        let local = backend.create_native(&request(0x1000, true));
        assert!(matches!(
            local,
            Err(MemForgeError::NativeAllocationFailed(_))
        ));

        let system = backend.create_native(&request(0x1000, false));
        assert!(system.is_ok());
    }

    #[test]
    fn test_zero_size_rejected() {
        let backend = OsAgnosticBackend::new();
        assert!(backend.create_native(&request(0, false)).is_err());
    }

    #[test]
    fn test_import_host_range() {
        let backend = OsAgnosticBackend::new();
        let handle = backend.import_host_range(0x1000, 0x1000).unwrap();
        backend.destroy_native(handle);
        assert_eq!(backend.live_count(), 0);
        assert!(backend.import_host_range(0, 0x1000).is_err());
    }
}
