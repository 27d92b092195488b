//! The process-wide fragment map.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};
use std::sync::Mutex;

use tracing::{debug, trace, warn};

use crate::allocation::ResidencyData;
use crate::backend::{NativeAllocationBackend, NativeHandle};
use crate::error::{MemForgeError, MemResult};

use super::{AllocationRequirements, FragmentRef, OverlapStatus, RequirementsStatus};

/// Map key: fragments are grouped by root device first, then ordered by
/// address, so range scans stay within one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostPtrKey {
    /// Root device owning the backing
    pub root_device_index: u32,
    /// Page-aligned fragment start
    pub address: u64,
}

/// One stored fragment and its backing.
#[derive(Debug, Clone)]
pub struct FragmentStorage {
    /// Page-aligned start address
    pub address: u64,
    /// Size in whole pages
    pub size: u64,
    /// How many allocations reference this fragment
    pub refcount: u32,
    /// Backing was created by the driver rather than imported
    pub driver_allocation: bool,
    /// Native backing handle, if the backend pinned one
    pub handle: Option<NativeHandle>,
    /// Completion watermarks observed for this fragment
    pub residency: ResidencyData,
}

/// Reference-counted store of host-pointer fragments.
pub struct HostPtrManager {
    max_os_context_count: u32,
    fragments: Mutex<BTreeMap<HostPtrKey, FragmentStorage>>,
}

impl HostPtrManager {
    /// Create an empty fragment map sized for `max_os_context_count`
    /// residency slots per fragment.
    pub fn new(max_os_context_count: u32) -> Self {
        Self {
            max_os_context_count,
            fragments: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of fragments currently stored, across all devices.
    pub fn fragment_count(&self) -> MemResult<usize> {
        Ok(self.fragments.lock()?.len())
    }

    /// Store a fragment, or bump the refcount of an identical one.
    pub fn store_fragment(
        &self,
        root_device_index: u32,
        address: u64,
        size: u64,
        driver_allocation: bool,
        handle: Option<NativeHandle>,
    ) -> MemResult<()> {
        let mut map = self.fragments.lock()?;
        Self::store_fragment_locked(
            &mut map,
            self.max_os_context_count,
            root_device_index,
            address,
            size,
            driver_allocation,
            handle,
        );
        Ok(())
    }

    fn store_fragment_locked(
        map: &mut BTreeMap<HostPtrKey, FragmentStorage>,
        max_os_context_count: u32,
        root_device_index: u32,
        address: u64,
        size: u64,
        driver_allocation: bool,
        handle: Option<NativeHandle>,
    ) {
        let key = HostPtrKey {
            root_device_index,
            address,
        };
        match map.get_mut(&key) {
            Some(stored) => {
                stored.refcount += 1;
                trace!(
                    address,
                    refcount = stored.refcount,
                    "host fragment refcount bumped"
                );
            }
            None => {
                map.insert(
                    key,
                    FragmentStorage {
                        address,
                        size,
                        refcount: 1,
                        driver_allocation,
                        handle,
                        residency: ResidencyData::new(max_os_context_count),
                    },
                );
                trace!(address, size, "host fragment stored");
            }
        }
    }

    /// Find the stored fragment containing `address`, on the same device.
    pub fn get_fragment(
        &self,
        root_device_index: u32,
        address: u64,
    ) -> MemResult<Option<FragmentStorage>> {
        let map = self.fragments.lock()?;
        Ok(Self::containing_fragment(&map, root_device_index, address).cloned())
    }

    fn containing_fragment<'a>(
        map: &'a BTreeMap<HostPtrKey, FragmentStorage>,
        root_device_index: u32,
        address: u64,
    ) -> Option<&'a FragmentStorage> {
        let low = HostPtrKey {
            root_device_index,
            address: 0,
        };
        let high = HostPtrKey {
            root_device_index,
            address,
        };
        map.range(low..=high)
            .next_back()
            .filter(|(key, frag)| key.address + frag.size > address)
            .map(|(_, frag)| frag)
    }

    /// Classify `[address, address + size)` against the stored fragments.
    pub fn check_for_overlaps(
        &self,
        root_device_index: u32,
        address: u64,
        size: u64,
    ) -> MemResult<(Option<FragmentStorage>, OverlapStatus)> {
        let map = self.fragments.lock()?;
        let (frag, status) = Self::classify(&map, root_device_index, address, size);
        Ok((frag.cloned(), status))
    }

    fn classify<'a>(
        map: &'a BTreeMap<HostPtrKey, FragmentStorage>,
        root_device_index: u32,
        address: u64,
        size: u64,
    ) -> (Option<&'a FragmentStorage>, OverlapStatus) {
        if let Some(frag) = Self::containing_fragment(map, root_device_index, address) {
            let status = if frag.address == address && frag.size == size {
                OverlapStatus::ExactMatch
            } else if address + size <= frag.address + frag.size {
                OverlapStatus::WithinStored
            } else {
                OverlapStatus::ExceedsStored
            };
            return (Some(frag), status);
        }

        // Nothing contains the start; the range may still swallow a
        // fragment starting inside it
        let low = HostPtrKey {
            root_device_index,
            address,
        };
        let high = HostPtrKey {
            root_device_index,
            address: address + size,
        };
        if map.range((Excluded(low), Excluded(high))).next().is_some() {
            return (None, OverlapStatus::ExceedsStored);
        }
        (None, OverlapStatus::NotOverlapping)
    }

    /// Vet a requirement set without changing the map.
    pub fn classify_requirements(
        &self,
        requirements: &AllocationRequirements,
    ) -> MemResult<RequirementsStatus> {
        let map = self.fragments.lock()?;
        for fragment in &requirements.fragments {
            let (_, status) = Self::classify(
                &map,
                requirements.root_device_index,
                fragment.address,
                fragment.size,
            );
            if status == OverlapStatus::ExceedsStored {
                return Ok(RequirementsStatus::Fatal);
            }
        }
        Ok(RequirementsStatus::Success)
    }

    /// Back every required fragment: reuse stored fragments where the range
    /// is covered, import backing for new ones.
    ///
    /// On an irreconcilable overlap nothing is changed and
    /// [`MemForgeError::InvalidHostPointer`] is returned.
    pub fn prepare_host_storage(
        &self,
        backend: &dyn NativeAllocationBackend,
        requirements: &AllocationRequirements,
    ) -> MemResult<Vec<FragmentRef>> {
        let root = requirements.root_device_index;
        let mut map = self.fragments.lock()?;

        // Vet everything first so failure leaves no partial state
        for fragment in &requirements.fragments {
            let (_, status) = Self::classify(&map, root, fragment.address, fragment.size);
            if status == OverlapStatus::ExceedsStored {
                warn!(
                    address = fragment.address,
                    size = fragment.size,
                    "host range conflicts with stored fragments"
                );
                return Err(MemForgeError::InvalidHostPointer(format!(
                    "range {:#x}+{:#x} partially overlaps pinned memory",
                    fragment.address, fragment.size
                )));
            }
        }

        let mut refs = Vec::with_capacity(requirements.fragments.len());
        for fragment in &requirements.fragments {
            let (stored_range, status) = {
                let (frag, status) = Self::classify(&map, root, fragment.address, fragment.size);
                (frag.map(|f| (f.address, f.size)), status)
            };
            match (stored_range, status) {
                (Some((stored_address, stored_size)), OverlapStatus::ExactMatch)
                | (Some((stored_address, stored_size)), OverlapStatus::WithinStored) => {
                    Self::store_fragment_locked(
                        &mut map,
                        self.max_os_context_count,
                        root,
                        stored_address,
                        stored_size,
                        false,
                        None,
                    );
                    refs.push(FragmentRef {
                        address: stored_address,
                        size: stored_size,
                    });
                }
                (None, OverlapStatus::NotOverlapping) => {
                    let handle = match backend.import_host_range(fragment.address, fragment.size) {
                        Ok(handle) => handle,
                        Err(err) => {
                            // Unwind fragments taken so far; releasing the
                            // last reference hands back the handle
                            for taken in &refs {
                                if let Some(freed) =
                                    Self::release_locked(&mut map, root, taken.address)
                                {
                                    if let Some(h) = freed.handle {
                                        backend.destroy_native(h);
                                    }
                                }
                            }
                            return Err(err);
                        }
                    };
                    Self::store_fragment_locked(
                        &mut map,
                        self.max_os_context_count,
                        root,
                        fragment.address,
                        fragment.size,
                        false,
                        Some(handle),
                    );
                    refs.push(FragmentRef {
                        address: fragment.address,
                        size: fragment.size,
                    });
                }
                _ => {
                    return Err(MemForgeError::internal(
                        "fragment classification changed under lock",
                    ));
                }
            }
        }

        debug!(
            host_address = requirements.host_address,
            size = requirements.size,
            fragments = refs.len(),
            "host storage prepared"
        );
        Ok(refs)
    }

    /// Drop one reference to the fragment at `address`.
    ///
    /// Returns the storage when the last reference went away; the caller
    /// owns destroying the native backing.
    pub fn release_fragment(
        &self,
        root_device_index: u32,
        address: u64,
    ) -> MemResult<Option<FragmentStorage>> {
        let mut map = self.fragments.lock()?;
        Ok(Self::release_locked(&mut map, root_device_index, address))
    }

    fn release_locked(
        map: &mut BTreeMap<HostPtrKey, FragmentStorage>,
        root_device_index: u32,
        address: u64,
    ) -> Option<FragmentStorage> {
        let key = HostPtrKey {
            root_device_index,
            address,
        };
        match map.get_mut(&key) {
            Some(stored) if stored.refcount > 1 => {
                stored.refcount -= 1;
                trace!(address, refcount = stored.refcount, "host fragment released");
                None
            }
            Some(_) => {
                trace!(address, "host fragment removed");
                map.remove(&key)
            }
            None => {
                warn!(address, "release of unknown host fragment");
                None
            }
        }
    }

    /// Record a completed fence for the fragment containing `address`.
    pub fn update_fragment_completion(
        &self,
        root_device_index: u32,
        address: u64,
        fence: u64,
        context_id: u32,
    ) -> MemResult<()> {
        let mut map = self.fragments.lock()?;
        let low = HostPtrKey {
            root_device_index,
            address: 0,
        };
        let high = HostPtrKey {
            root_device_index,
            address,
        };
        if let Some((_, frag)) = map
            .range_mut((Included(low), Included(high)))
            .next_back()
            .filter(|(key, frag)| key.address + frag.size > address)
        {
            frag.residency.update_completion_data(fence, context_id);
        }
        Ok(())
    }
}
