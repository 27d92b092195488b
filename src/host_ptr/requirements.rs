//! Splitting a host range into page-aligned fragments.

use crate::helpers::{align_down, align_up, PAGE_SIZE};

/// Maximum fragments a single host range splits into.
pub const MAX_FRAGMENTS_COUNT: usize = 3;

/// Where a fragment sits inside its host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPosition {
    /// Partial first page
    Leading,
    /// Whole pages in the middle
    Middle,
    /// Partial last page
    Trailing,
}

/// One page-aligned piece of a host range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationFragment {
    /// Page-aligned start address
    pub address: u64,
    /// Size in whole pages
    pub size: u64,
    /// Role of the fragment within the range
    pub position: FragmentPosition,
}

/// The fragments a host range must be backed by.
#[derive(Debug, Clone)]
pub struct AllocationRequirements {
    /// Root device the backing belongs to
    pub root_device_index: u32,
    /// Start of the user range
    pub host_address: u64,
    /// Size of the user range
    pub size: u64,
    /// Page-aligned fragments covering the range, at most
    /// [`MAX_FRAGMENTS_COUNT`]
    pub fragments: Vec<AllocationFragment>,
}

impl AllocationRequirements {
    /// Whole-page span the fragments cover together.
    pub fn total_spanned_size(&self) -> u64 {
        self.fragments.iter().map(|f| f.size).sum()
    }
}

/// Split `[host_address, host_address + size)` on page boundaries.
///
/// An unaligned start contributes a one-page leading fragment, an unaligned
/// end a one-page trailing fragment, and whatever whole pages lie between
/// them form a single middle fragment.
pub fn get_allocation_requirements(
    root_device_index: u32,
    host_address: u64,
    size: u64,
) -> AllocationRequirements {
    let start = align_down(host_address, PAGE_SIZE);
    let end = align_up(host_address + size, PAGE_SIZE);

    let mut fragments = Vec::with_capacity(MAX_FRAGMENTS_COUNT);
    let mut cursor = start;

    if host_address != start {
        fragments.push(AllocationFragment {
            address: start,
            size: PAGE_SIZE,
            position: FragmentPosition::Leading,
        });
        cursor = start + PAGE_SIZE;
    }

    if cursor < end {
        let trailing_partial = host_address + size != end;
        let middle_end = if trailing_partial { end - PAGE_SIZE } else { end };

        if middle_end > cursor {
            fragments.push(AllocationFragment {
                address: cursor,
                size: middle_end - cursor,
                position: FragmentPosition::Middle,
            });
        }
        if trailing_partial {
            fragments.push(AllocationFragment {
                address: end - PAGE_SIZE,
                size: PAGE_SIZE,
                position: FragmentPosition::Trailing,
            });
        }
    }

    AllocationRequirements {
        root_device_index,
        host_address,
        size,
        fragments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_page_range_is_one_leading_fragment() {
        let reqs = get_allocation_requirements(0, 0x1045, 0x10);
        assert_eq!(reqs.fragments.len(), 1);
        assert_eq!(reqs.fragments[0].address, 0x1000);
        assert_eq!(reqs.fragments[0].size, PAGE_SIZE);
        assert_eq!(reqs.fragments[0].position, FragmentPosition::Leading);
    }

    #[test]
    fn test_aligned_whole_pages_are_one_middle_fragment() {
        let reqs = get_allocation_requirements(0, 0x2000, 10 * PAGE_SIZE);
        assert_eq!(reqs.fragments.len(), 1);
        assert_eq!(reqs.fragments[0].address, 0x2000);
        assert_eq!(reqs.fragments[0].size, 10 * PAGE_SIZE);
        assert_eq!(reqs.fragments[0].position, FragmentPosition::Middle);
    }

    #[test]
    fn test_unaligned_start_spanning_two_pages() {
        // One page of payload starting mid-page covers two pages, with no
        // whole page between them
        let reqs = get_allocation_requirements(0, 0x1045, PAGE_SIZE);
        assert_eq!(reqs.fragments.len(), 2);
        assert_eq!(reqs.fragments[0].address, 0x1000);
        assert_eq!(reqs.fragments[0].position, FragmentPosition::Leading);
        assert_eq!(reqs.fragments[1].address, 0x2000);
        assert_eq!(reqs.fragments[1].size, PAGE_SIZE);
        assert_eq!(reqs.fragments[1].position, FragmentPosition::Trailing);
    }

    #[test]
    fn test_unaligned_range_splits_into_three() {
        let reqs = get_allocation_requirements(0, 0x1045, 10 * PAGE_SIZE - 1);
        assert_eq!(reqs.fragments.len(), 3);

        assert_eq!(reqs.fragments[0].address, 0x1000);
        assert_eq!(reqs.fragments[0].size, PAGE_SIZE);
        assert_eq!(reqs.fragments[0].position, FragmentPosition::Leading);

        assert_eq!(reqs.fragments[1].address, 0x2000);
        assert_eq!(reqs.fragments[1].size, 9 * PAGE_SIZE);
        assert_eq!(reqs.fragments[1].position, FragmentPosition::Middle);

        assert_eq!(reqs.fragments[2].address, 0xb000);
        assert_eq!(reqs.fragments[2].size, PAGE_SIZE);
        assert_eq!(reqs.fragments[2].position, FragmentPosition::Trailing);

        assert_eq!(reqs.total_spanned_size(), 11 * PAGE_SIZE);
    }

    #[test]
    fn test_aligned_start_unaligned_end() {
        let reqs = get_allocation_requirements(0, 0x1000, PAGE_SIZE + 0x10);
        assert_eq!(reqs.fragments.len(), 2);
        assert_eq!(reqs.fragments[0].address, 0x1000);
        assert_eq!(reqs.fragments[0].size, PAGE_SIZE);
        assert_eq!(reqs.fragments[0].position, FragmentPosition::Middle);
        assert_eq!(reqs.fragments[1].address, 0x2000);
        assert_eq!(reqs.fragments[1].position, FragmentPosition::Trailing);
    }

    #[test]
    fn test_never_more_than_three_fragments() {
        for (ptr, size) in [
            (0x1001u64, 0x1u64),
            (0x1001, 100 * PAGE_SIZE),
            (0x1000, 100 * PAGE_SIZE + 1),
            (0x1fff, 2 * PAGE_SIZE),
        ] {
            let reqs = get_allocation_requirements(0, ptr, size);
            assert!(reqs.fragments.len() <= MAX_FRAGMENTS_COUNT);
            assert!(!reqs.fragments.is_empty());
        }
    }
}
