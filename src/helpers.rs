//! Memory constants and alignment math shared across the crate.

/// One kilobyte
pub const KILOBYTE: u64 = 1024;
/// One megabyte
pub const MEGABYTE: u64 = 1024 * KILOBYTE;
/// One gigabyte
pub const GIGABYTE: u64 = 1024 * MEGABYTE;

/// Native CPU page size assumed by the fragment machinery
pub const PAGE_SIZE: u64 = 4 * KILOBYTE;
/// Coarse GPU page size
pub const PAGE_SIZE_64K: u64 = 64 * KILOBYTE;
/// Huge GPU page size
pub const PAGE_SIZE_2MB: u64 = 2 * MEGABYTE;

/// Highest address covered by shared virtual memory ranges (47-bit)
pub const MAX_SVM_ADDRESS: u64 = (1u64 << 47) - 1;

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Round `value` down to the previous multiple of `alignment`.
///
/// `alignment` must be a power of two.
#[inline]
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    value & !(alignment - 1)
}

/// Check whether `value` is a multiple of `alignment` (power of two).
#[inline]
pub const fn is_aligned(value: u64, alignment: u64) -> bool {
    value & (alignment - 1) == 0
}

/// Size of the whole-page span covering `[address, address + size)`.
#[inline]
pub const fn whole_page_span(address: u64, size: u64) -> u64 {
    align_up(address + size, PAGE_SIZE) - align_down(address, PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, PAGE_SIZE), 0);
        assert_eq!(align_up(1, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up(PAGE_SIZE, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up(PAGE_SIZE + 1, PAGE_SIZE), 2 * PAGE_SIZE);
        assert_eq!(align_up(3 * MEGABYTE, PAGE_SIZE_2MB), 4 * MEGABYTE);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0, PAGE_SIZE), 0);
        assert_eq!(align_down(PAGE_SIZE - 1, PAGE_SIZE), 0);
        assert_eq!(align_down(PAGE_SIZE + 1, PAGE_SIZE), PAGE_SIZE);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0, PAGE_SIZE_64K));
        assert!(is_aligned(PAGE_SIZE_64K, PAGE_SIZE_64K));
        assert!(!is_aligned(PAGE_SIZE, PAGE_SIZE_64K));
    }

    #[test]
    fn test_whole_page_span() {
        // Sub-page range inside one page
        assert_eq!(whole_page_span(0x1045, 0x10), PAGE_SIZE);
        // Unaligned start and end spilling into 11 pages
        assert_eq!(whole_page_span(0x1045, 10 * PAGE_SIZE - 1), 11 * PAGE_SIZE);
        // Aligned range stays exact
        assert_eq!(whole_page_span(0x2000, 4 * PAGE_SIZE), 4 * PAGE_SIZE);
    }
}
