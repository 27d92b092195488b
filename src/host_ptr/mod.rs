//! Host-pointer aliasing.
//!
//! User host pointers are split on native page boundaries into at most
//! three fragments and stored in a process-wide fragment map, so repeated
//! or overlapping registrations of the same memory share backing objects
//! through reference counts.

mod manager;
mod requirements;

pub use manager::{FragmentStorage, HostPtrKey, HostPtrManager};
pub use requirements::{
    get_allocation_requirements, AllocationFragment, AllocationRequirements, FragmentPosition,
    MAX_FRAGMENTS_COUNT,
};

/// How a queried host range relates to the stored fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapStatus {
    /// No stored fragment touches the range
    NotOverlapping,
    /// The range lies fully inside a stored fragment
    WithinStored,
    /// The range matches a stored fragment start and size exactly
    ExactMatch,
    /// The range partially overlaps stored fragments and extends beyond
    /// them; it can neither reuse nor coexist with the stored backing
    ExceedsStored,
}

/// Outcome of vetting a fragment requirement set against the stored map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementsStatus {
    /// Every required fragment is either absent or reusable
    Success,
    /// At least one required fragment conflicts irreconcilably
    Fatal,
}

/// Reference from an allocation to a stored fragment.
///
/// Carries the stored fragment's own start and size, which may be larger
/// than the piece of it the allocation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef {
    /// Start address of the stored fragment
    pub address: u64,
    /// Size of the stored fragment
    pub size: u64,
}
