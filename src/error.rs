//! Unified error handling for memforge
//!
//! This module provides a comprehensive error type hierarchy for the memory
//! allocation core. All errors are categorized by their source and severity
//! to enable appropriate handling strategies.

use thiserror::Error;

/// Result type alias used throughout memforge
pub type MemResult<T> = std::result::Result<T, MemForgeError>;

/// Unified error type for all memforge operations
#[derive(Error, Debug)]
pub enum MemForgeError {
    // ========== Address Space Errors ==========
    /// A heap ran out of GPU virtual address space
    #[error("out of GPU address space in heap {heap}: requested {size:#x} bytes")]
    OutOfAddressSpace {
        /// Name of the heap that was exhausted
        heap: &'static str,
        /// Requested allocation size in bytes
        size: u64,
    },

    /// The GPU address space is too small to hold the heap layout
    #[error("address space {0:#x} is too small for the heap layout")]
    AddressSpaceTooSmall(u64),

    /// A GPU address range was freed that does not belong to its heap
    #[error("invalid free of GPU range {address:#x}+{size:#x} in heap {heap}")]
    InvalidHeapFree {
        /// Name of the heap the free was issued against
        heap: &'static str,
        /// Start address of the freed range
        address: u64,
        /// Size of the freed range
        size: u64,
    },

    // ========== Backend Errors ==========
    /// The native allocation backend failed to provide backing memory
    #[error("native allocation failed: {0}")]
    NativeAllocationFailed(String),

    /// The native backend failed to map an allocation for CPU access
    #[error("CPU mapping failed: {0}")]
    CpuMappingFailed(String),

    // ========== Host Pointer Errors ==========
    /// A user host pointer overlaps existing fragments in an unresolvable way
    #[error("invalid host pointer: {0}")]
    InvalidHostPointer(String),

    // ========== Usage Errors ==========
    /// An execution context id outside the registered range was used
    #[error("context id {context_id} out of range (max {max_contexts})")]
    ContextOutOfRange {
        /// The offending context id
        context_id: u32,
        /// Number of context slots available
        max_contexts: u32,
    },

    /// An allocation request was malformed
    #[error("invalid allocation request: {0}")]
    InvalidRequest(String),

    // ========== Internal Errors ==========
    /// A mutex was poisoned by a panicking thread
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// Invariant violation inside the allocator
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error category for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User errors - invalid input, can be fixed by the caller
    User,
    /// Recoverable errors - retry in another pool or after a wait may succeed
    Recoverable,
    /// Backend errors - native allocation layer failures
    Backend,
    /// Internal errors - bugs in the allocator itself
    Internal,
}

impl MemForgeError {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            MemForgeError::OutOfAddressSpace { .. } => ErrorCategory::Recoverable,
            MemForgeError::AddressSpaceTooSmall(_) => ErrorCategory::User,
            MemForgeError::InvalidHeapFree { .. } => ErrorCategory::Internal,
            MemForgeError::NativeAllocationFailed(_) => ErrorCategory::Backend,
            MemForgeError::CpuMappingFailed(_) => ErrorCategory::Backend,
            MemForgeError::InvalidHostPointer(_) => ErrorCategory::User,
            MemForgeError::ContextOutOfRange { .. } => ErrorCategory::User,
            MemForgeError::InvalidRequest(_) => ErrorCategory::User,
            MemForgeError::LockPoisoned(_) => ErrorCategory::Internal,
            MemForgeError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error may succeed on retry in another pool
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Recoverable | ErrorCategory::Backend
        )
    }

    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        MemForgeError::Internal(msg.into())
    }

    /// Create an invalid-request error with a message
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        MemForgeError::InvalidRequest(msg.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for MemForgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        MemForgeError::LockPoisoned(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let err = MemForgeError::OutOfAddressSpace {
            heap: "standard",
            size: 0x1000,
        };
        assert_eq!(err.category(), ErrorCategory::Recoverable);
        assert!(err.is_recoverable());

        let err = MemForgeError::InvalidHostPointer("partial overlap".into());
        assert_eq!(err.category(), ErrorCategory::User);
        assert!(!err.is_recoverable());

        let err = MemForgeError::NativeAllocationFailed("no pages".into());
        assert_eq!(err.category(), ErrorCategory::Backend);
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = MemForgeError::OutOfAddressSpace {
            heap: "internal",
            size: 0x4000,
        };
        let msg = err.to_string();
        assert!(msg.contains("internal"));
        assert!(msg.contains("0x4000"));
    }

    #[test]
    fn test_poison_conversion() {
        use std::sync::{Arc, Mutex};

        let lock = Arc::new(Mutex::new(0u32));
        let lock2 = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = lock2.lock().unwrap();
            panic!("poison it");
        })
        .join();

        let res: MemResult<u32> = lock.lock().map(|g| *g).map_err(MemForgeError::from);
        assert!(matches!(res, Err(MemForgeError::LockPoisoned(_))));
    }
}
