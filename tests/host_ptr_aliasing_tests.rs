//! Host pointer fragment aliasing on a limited-range device.
//!
//! On devices without full-range SVM every registered host range is split
//! into page fragments and shared through the fragment map. These tests
//! exercise the aliasing rules end to end through the memory manager.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use memforge::error::MemForgeError;
use memforge::helpers::PAGE_SIZE;
use memforge::host_ptr::OverlapStatus;
use memforge::{AllocationProperties, AllocationType, EngineType};

#[test]
fn test_overlapping_ranges_share_boundary_fragment() -> Result<()> {
    let (backend, manager) = common::limited_range_manager()?;

    // Unaligned one-page range: leading + trailing partial pages
    let props_a = AllocationProperties::new(0, 0x1000, AllocationType::BufferHostMemory);
    let a = manager.allocate_graphics_memory_with_host_ptr(&props_a, 0x100004)?;
    assert_eq!(a.fragments().len(), 2);
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 2);
    assert_eq!(backend.live_count(), 2);
    assert_eq!(a.gpu_address() & (PAGE_SIZE - 1), 0x4);
    assert_eq!(a.cpu_address(), Some(0x100004));

    // Starts inside the first range's trailing page: that fragment is
    // reused, two fresh ones are imported
    let props_b = AllocationProperties::new(0, 0x3000, AllocationType::BufferHostMemory);
    let b = manager.allocate_graphics_memory_with_host_ptr(&props_b, 0x101008)?;
    assert_eq!(b.fragments().len(), 3);
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 4);
    assert_eq!(backend.live_count(), 4);

    let shared = manager
        .host_ptr_manager()
        .get_fragment(0, 0x101008)?
        .ok_or_else(|| anyhow::anyhow!("boundary fragment missing"))?;
    assert_eq!(shared.address, 0x101000);
    assert_eq!(shared.refcount, 2);

    manager.free_graphics_memory(a)?;
    manager.free_graphics_memory(b)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 0);
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
fn test_partially_overlapping_larger_range_fails_without_side_effects() -> Result<()> {
    let (backend, manager) = common::limited_range_manager()?;

    let props_a = AllocationProperties::new(0, 0x1000, AllocationType::BufferHostMemory);
    let a = manager.allocate_graphics_memory_with_host_ptr(&props_a, 0x100004)?;
    let props_b = AllocationProperties::new(0, 0x3000, AllocationType::BufferHostMemory);
    let b = manager.allocate_graphics_memory_with_host_ptr(&props_b, 0x101008)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 4);
    let live_before = backend.live_count();

    // Five whole pages starting at the first fragment: partially covers
    // stored fragments and extends past them, which cannot be backed
    let props_c = AllocationProperties::new(0, 5 * PAGE_SIZE, AllocationType::BufferHostMemory);
    let err = manager
        .allocate_graphics_memory_with_host_ptr(&props_c, 0x100000)
        .unwrap_err();
    assert!(matches!(err, MemForgeError::InvalidHostPointer(_)));

    // The failed request left no partial state behind
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 4);
    assert_eq!(backend.live_count(), live_before);

    manager.free_graphics_memory(a)?;
    manager.free_graphics_memory(b)?;
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
fn test_conflicting_range_waits_out_parked_allocation() -> Result<()> {
    let (backend, manager) = common::limited_range_manager()?;
    let ctx = manager.register_os_context(EngineType::Compute, 0b1)?;

    // A freed-but-busy range keeps its fragments in the map until task 5
    // retires on the context
    let props = AllocationProperties::new(0, 0x1000, AllocationType::BufferHostMemory);
    let busy = manager.allocate_graphics_memory_with_host_ptr(&props, 0x100004)?;
    busy.update_task_count(5, ctx.context_id());
    manager.free_graphics_memory(busy)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 2);

    let signaller = {
        let ctx = Arc::clone(&ctx);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            ctx.signal_completion(5);
        })
    };

    // Partially covers the parked fragments and extends past them; the
    // manager must wait the fence out, retire the parked range, and retry
    let props_wide =
        AllocationProperties::new(0, 5 * PAGE_SIZE, AllocationType::BufferHostMemory);
    let wide = manager.allocate_graphics_memory_with_host_ptr(&props_wide, 0x100000)?;
    signaller
        .join()
        .map_err(|_| anyhow::anyhow!("signaller panicked"))?;

    assert_eq!(wide.fragments().len(), 1);
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 1);

    manager.free_graphics_memory(wide)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 0);
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
fn test_exact_match_reuses_backing_and_frees_once() -> Result<()> {
    let (backend, manager) = common::limited_range_manager()?;

    let props = AllocationProperties::new(0, 2 * PAGE_SIZE, AllocationType::BufferHostMemory);
    let a = manager.allocate_graphics_memory_with_host_ptr(&props, 0x200000)?;
    let b = manager.allocate_graphics_memory_with_host_ptr(&props, 0x200000)?;
    let c = manager.allocate_graphics_memory_with_host_ptr(&props, 0x200000)?;

    // One stored fragment, one import, three references
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 1);
    assert_eq!(backend.live_count(), 1);
    let stored = manager
        .host_ptr_manager()
        .get_fragment(0, 0x200000)?
        .ok_or_else(|| anyhow::anyhow!("fragment missing"))?;
    assert_eq!(stored.refcount, 3);

    manager.free_graphics_memory(a)?;
    manager.free_graphics_memory(b)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 1);
    assert_eq!(backend.live_count(), 1);

    manager.free_graphics_memory(c)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 0);
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
fn test_range_inside_stored_fragment_is_reused() -> Result<()> {
    let (backend, manager) = common::limited_range_manager()?;

    let props_big = AllocationProperties::new(0, 8 * PAGE_SIZE, AllocationType::BufferHostMemory);
    let big = manager.allocate_graphics_memory_with_host_ptr(&props_big, 0x300000)?;
    assert_eq!(backend.live_count(), 1);

    let (frag, status) =
        manager
            .host_ptr_manager()
            .check_for_overlaps(0, 0x302000, 2 * PAGE_SIZE)?;
    assert_eq!(status, OverlapStatus::WithinStored);
    assert_eq!(frag.map(|f| f.address), Some(0x300000));

    // Inner range rides on the stored fragment without importing
    let props_inner =
        AllocationProperties::new(0, 2 * PAGE_SIZE, AllocationType::BufferHostMemory);
    let inner = manager.allocate_graphics_memory_with_host_ptr(&props_inner, 0x302000)?;
    assert_eq!(backend.live_count(), 1);
    assert_eq!(inner.fragments().len(), 1);
    assert_eq!(inner.fragments()[0].address, 0x300000);

    manager.free_graphics_memory(big)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 1);
    manager.free_graphics_memory(inner)?;
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 0);
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
fn test_full_range_device_bypasses_fragment_map() -> Result<()> {
    let (backend, manager) = common::full_range_manager()?;

    let props = AllocationProperties::new(0, 0x1000, AllocationType::BufferHostMemory);
    let wrapped = manager.allocate_graphics_memory_with_host_ptr(&props, 0x7fff_1045)?;

    // Zero-copy wrap: GPU address is the host address, no fragments
    assert_eq!(wrapped.gpu_address(), 0x7fff_1045);
    assert_eq!(wrapped.cpu_address(), Some(0x7fff_1045));
    assert!(wrapped.fragments().is_empty());
    assert_eq!(manager.host_ptr_manager().fragment_count()?, 0);
    assert_eq!(backend.live_count(), 1);

    manager.free_graphics_memory(wrapped)?;
    assert_eq!(backend.live_count(), 0);
    Ok(())
}
