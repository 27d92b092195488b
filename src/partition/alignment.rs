//! GPU page-size and heap selection for device-pool allocations.

use crate::helpers::{align_up, PAGE_SIZE_2MB, PAGE_SIZE_64K};

use super::HeapIndex;

/// One alignment the device pool may use, in selection order.
#[derive(Debug, Clone, Copy)]
pub struct CandidateAlignment {
    /// Page alignment in bytes
    pub alignment: u64,
    /// Also consider this candidate for sizes below the alignment
    pub apply_for_smaller_size: bool,
    /// Upper bound on wasted address space, percent of the alignment;
    /// `None` accepts any waste
    pub max_wastage_percent: Option<u32>,
    /// Heap the aligned allocation goes to
    pub heap: HeapIndex,
}

/// Picks the largest usable page alignment for an allocation size.
///
/// Candidates are tried in declining alignment order. Wasted address space
/// is charged in whole granules of the candidate alignment, since the heap
/// cannot hand the remainder of a granule to anyone else; a bounded
/// candidate therefore only accepts sizes that are exact multiples.
#[derive(Debug, Clone)]
pub struct AlignmentSelector {
    candidates: Vec<CandidateAlignment>,
}

impl AlignmentSelector {
    /// Selector with an explicit candidate table, ordered by preference.
    pub fn new(candidates: Vec<CandidateAlignment>) -> Self {
        Self { candidates }
    }

    /// Default device-pool table: 2 MiB pages for sizes that fill whole
    /// 2 MiB granules, 64 KiB pages otherwise.
    pub fn device_pool_default() -> Self {
        Self::new(vec![
            CandidateAlignment {
                alignment: PAGE_SIZE_2MB,
                apply_for_smaller_size: false,
                max_wastage_percent: Some(10),
                heap: HeapIndex::Standard2Mb,
            },
            CandidateAlignment {
                alignment: PAGE_SIZE_64K,
                apply_for_smaller_size: true,
                max_wastage_percent: None,
                heap: HeapIndex::Standard64Kb,
            },
        ])
    }

    /// Pick the alignment and heap for `size`, or `None` when no candidate
    /// accepts it.
    pub fn select(&self, size: u64) -> Option<CandidateAlignment> {
        for candidate in &self.candidates {
            if size < candidate.alignment && !candidate.apply_for_smaller_size {
                continue;
            }
            if let Some(percent) = candidate.max_wastage_percent {
                let wasted = align_up(size, candidate.alignment) - size;
                let charged = if wasted == 0 { 0 } else { candidate.alignment };
                if charged * 100 > candidate.alignment * u64::from(percent) {
                    continue;
                }
            }
            return Some(*candidate);
        }
        None
    }
}

impl Default for AlignmentSelector {
    fn default() -> Self {
        Self::device_pool_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::MEGABYTE;

    #[test]
    fn test_exact_multiple_gets_huge_pages() {
        let selector = AlignmentSelector::device_pool_default();
        let chosen = selector.select(4 * MEGABYTE).unwrap();
        assert_eq!(chosen.alignment, PAGE_SIZE_2MB);
        assert_eq!(chosen.heap, HeapIndex::Standard2Mb);
    }

    #[test]
    fn test_one_byte_short_falls_back_to_64k() {
        let selector = AlignmentSelector::device_pool_default();
        let chosen = selector.select(4 * MEGABYTE - 1).unwrap();
        assert_eq!(chosen.alignment, PAGE_SIZE_64K);
        assert_eq!(chosen.heap, HeapIndex::Standard64Kb);
    }

    #[test]
    fn test_small_size_skips_huge_pages() {
        let selector = AlignmentSelector::device_pool_default();
        let chosen = selector.select(MEGABYTE).unwrap();
        assert_eq!(chosen.alignment, PAGE_SIZE_64K);
    }

    #[test]
    fn test_selection_is_pure() {
        let selector = AlignmentSelector::device_pool_default();
        let a = selector.select(2 * MEGABYTE).unwrap();
        let b = selector.select(2 * MEGABYTE).unwrap();
        assert_eq!(a.alignment, b.alignment);
        assert_eq!(a.heap, b.heap);
    }

    #[test]
    fn test_empty_table_selects_nothing() {
        let selector = AlignmentSelector::new(Vec::new());
        assert!(selector.select(MEGABYTE).is_none());
    }
}
