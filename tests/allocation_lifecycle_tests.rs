//! Allocation lifetime: fence-bound release, deferred deletion, and CPU
//! locking, driven through the public manager API.

mod common;

use anyhow::Result;
use serial_test::serial;

use memforge::lifecycle::AllocationUsage;
use memforge::{AllocationProperties, AllocationType, EngineType};

#[test]
fn test_busy_allocation_waits_for_every_context() -> Result<()> {
    let (backend, manager) = common::full_range_manager()?;
    let compute = manager.register_os_context(EngineType::Compute, 0b1)?;
    let copy = manager.register_os_context(EngineType::Copy, 0b1)?;

    let props = AllocationProperties::new(0, 0x1000, AllocationType::CommandBuffer);
    let allocation = manager.allocate_graphics_memory_with_properties(&props)?;
    allocation.update_task_count(10, compute.context_id());
    allocation.update_task_count(20, copy.context_id());
    let live_before = backend.live_count();

    // Both contexts still own work against the allocation: freeing parks it
    manager.free_graphics_memory(allocation)?;
    assert_eq!(
        manager
            .internal_storage()
            .stored_count(AllocationUsage::Temporary)?,
        1
    );
    assert_eq!(backend.live_count(), live_before);

    // One context retiring is not enough
    compute.signal_completion(10);
    assert_eq!(manager.clean_temporary_allocations()?, 0);
    assert_eq!(backend.live_count(), live_before);

    // Once the last context passes its watermark the backing goes away
    copy.signal_completion(20);
    assert_eq!(manager.clean_temporary_allocations()?, 1);
    assert_eq!(backend.live_count(), live_before - 1);
    assert_eq!(
        manager
            .internal_storage()
            .stored_count(AllocationUsage::Temporary)?,
        0
    );
    Ok(())
}

#[test]
fn test_idle_allocation_is_released_immediately() -> Result<()> {
    let (backend, manager) = common::full_range_manager()?;
    manager.register_os_context(EngineType::Compute, 0b1)?;

    let props = AllocationProperties::new(0, 0x1000, AllocationType::CommandBuffer);
    let allocation = manager.allocate_graphics_memory_with_properties(&props)?;
    assert_eq!(backend.live_count(), 1);

    manager.free_graphics_memory(allocation)?;
    assert_eq!(backend.live_count(), 0);
    assert_eq!(
        manager
            .internal_storage()
            .stored_count(AllocationUsage::Temporary)?,
        0
    );
    Ok(())
}

#[test]
#[serial]
fn test_deferred_deletions_finish_before_drain_returns() -> Result<()> {
    let (backend, manager) = common::full_range_manager()?;

    // Timestamp buffers go through the deletion worker
    let mut allocations = Vec::new();
    for _ in 0..16 {
        let props = AllocationProperties::new(0, 0x1000, AllocationType::Timestamp);
        allocations.push(manager.allocate_graphics_memory_with_properties(&props)?);
    }
    assert_eq!(backend.live_count(), 16);

    for allocation in allocations {
        manager.free_graphics_memory(allocation)?;
    }
    manager.drain_deferred_deletions()?;
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_drain_on_idle_worker_returns() -> Result<()> {
    let (_backend, manager) = common::full_range_manager()?;
    manager.drain_deferred_deletions()?;
    manager.drain_deferred_deletions()?;
    Ok(())
}

#[test]
fn test_lock_and_unlock_resource() -> Result<()> {
    let (_backend, manager) = common::full_range_manager()?;

    let props = AllocationProperties::new(0, 0x1000, AllocationType::Buffer);
    let mut allocation = manager.allocate_graphics_memory_with_properties(&props)?;
    assert!(!allocation.is_locked());

    let cpu = manager.lock_resource(&mut allocation)?;
    assert_ne!(cpu, 0);
    assert!(allocation.is_locked());
    assert_eq!(allocation.locked_cpu_address(), Some(cpu));

    // Locking again returns the same mapping
    assert_eq!(manager.lock_resource(&mut allocation)?, cpu);

    manager.unlock_resource(&mut allocation)?;
    assert!(!allocation.is_locked());

    manager.free_graphics_memory(allocation)?;
    Ok(())
}

#[test]
fn test_freeing_a_locked_allocation_unmaps_it() -> Result<()> {
    let (backend, manager) = common::full_range_manager()?;

    let props = AllocationProperties::new(0, 0x1000, AllocationType::Buffer);
    let mut allocation = manager.allocate_graphics_memory_with_properties(&props)?;
    manager.lock_resource(&mut allocation)?;

    manager.free_graphics_memory(allocation)?;
    assert_eq!(backend.live_count(), 0);
    Ok(())
}

#[test]
fn test_reserved_gpu_address_round_trip() -> Result<()> {
    let (_backend, manager) = common::full_range_manager()?;

    let range = manager.reserve_gpu_address(0, 0x10000)?;
    assert_ne!(range.address, 0);
    manager.free_gpu_address(0, range)?;

    // The same window is handed out again after the release
    let again = manager.reserve_gpu_address(0, 0x10000)?;
    assert_eq!(again.address, range.address);
    manager.free_gpu_address(0, again)?;
    Ok(())
}

#[test]
fn test_context_registration_is_bounded() -> Result<()> {
    let (_backend, manager) = common::full_range_manager()?;
    let max = manager.capabilities().max_os_context_count;

    for _ in 0..max {
        manager.register_os_context(EngineType::Compute, 0b1)?;
    }
    assert!(manager
        .register_os_context(EngineType::Compute, 0b1)
        .is_err());
    Ok(())
}

#[test]
fn test_completion_query_tracks_watermarks() -> Result<()> {
    let (_backend, manager) = common::full_range_manager()?;
    let engine = manager.register_os_context(EngineType::Compute, 0b1)?;

    let props = AllocationProperties::new(0, 0x1000, AllocationType::Buffer);
    let allocation = manager.allocate_graphics_memory_with_properties(&props)?;

    // Never used: trivially complete
    assert!(manager.is_allocation_completed(&allocation)?);

    allocation.update_task_count(373, engine.context_id());
    assert!(!manager.is_allocation_completed(&allocation)?);

    engine.signal_completion(372);
    assert!(!manager.is_allocation_completed(&allocation)?);
    engine.signal_completion(373);
    assert!(manager.is_allocation_completed(&allocation)?);

    manager.free_graphics_memory(allocation)?;
    Ok(())
}
