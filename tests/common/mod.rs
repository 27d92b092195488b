//! Shared fixtures for integration tests.
//!
//! Every suite builds its managers on top of [`OsAgnosticBackend`], the
//! pure software backend, so the full allocation machinery runs without
//! real driver handles and leaked backing objects show up in the
//! backend's live count.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use memforge::backend::OsAgnosticBackend;
use memforge::{init_logging_default, HardwareCapabilities, MemoryManager};

/// Manager over a discrete full-range device. GPU addresses mirror CPU
/// addresses for host pointer wraps.
pub fn full_range_manager() -> Result<(Arc<OsAgnosticBackend>, MemoryManager)> {
    init_logging_default();
    let backend = Arc::new(OsAgnosticBackend::new());
    let manager = MemoryManager::new(backend.clone(), HardwareCapabilities::full_range_48bit())?;
    Ok((backend, manager))
}

/// Manager over a device whose address space is too small for full-range
/// SVM. Host pointers go through the fragment map.
pub fn limited_range_manager() -> Result<(Arc<OsAgnosticBackend>, MemoryManager)> {
    init_logging_default();
    let backend = Arc::new(OsAgnosticBackend::new());
    let manager = MemoryManager::new(backend.clone(), HardwareCapabilities::limited_range(40))?;
    Ok((backend, manager))
}

/// Manager over an integrated device without local memory.
pub fn integrated_manager() -> Result<(Arc<OsAgnosticBackend>, MemoryManager)> {
    init_logging_default();
    let backend = Arc::new(OsAgnosticBackend::new());
    let manager = MemoryManager::new(backend.clone(), HardwareCapabilities::integrated())?;
    Ok((backend, manager))
}
