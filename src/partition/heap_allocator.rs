//! Range allocator for one GPU virtual address heap.
//!
//! Works on addresses only; no backing memory is touched. Big chunks grow
//! bottom-up from the heap base, small chunks top-down from the heap limit,
//! so long-lived large allocations and short-lived small ones fragment
//! opposite ends. Freed ranges go to a best-fit free list and are coalesced.

use tracing::{trace, warn};

use crate::helpers::{align_up, MEGABYTE, PAGE_SIZE};

/// Chunks strictly larger than this allocate bottom-up.
pub const BIG_CHUNK_THRESHOLD: u64 = 4 * MEGABYTE;

/// A reusable freed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    address: u64,
    size: u64,
}

/// Two-ended address range allocator.
#[derive(Debug)]
pub struct HeapAllocator {
    base: u64,
    size: u64,
    /// First address handed out bottom-up; fixed at construction
    minimal_address: u64,
    big_threshold: u64,
    cursor_low: u64,
    cursor_high: u64,
    free_ranges: Vec<FreeRange>,
    allocated_bytes: u64,
}

impl HeapAllocator {
    /// Allocator over `[base, base + size)` keeping `granularity` guard
    /// margins at both ends.
    pub fn new(base: u64, size: u64, granularity: u64) -> Self {
        Self::with_front_reserved(base, size, granularity, granularity)
    }

    /// Allocator whose bottom-up cursor starts `reserved` bytes past the
    /// base, leaving that front range to a sibling sub-heap.
    pub fn with_front_reserved(base: u64, size: u64, granularity: u64, reserved: u64) -> Self {
        let minimal_address = base + reserved;
        Self {
            base,
            size,
            minimal_address,
            big_threshold: BIG_CHUNK_THRESHOLD,
            cursor_low: minimal_address,
            cursor_high: base + size - granularity,
            free_ranges: Vec::new(),
            allocated_bytes: 0,
        }
    }

    /// Allocator that hands out every chunk bottom-up from `base`, with no
    /// guard margins. Used for front-window sub-heaps, where the lowest
    /// addresses are the valuable ones.
    pub fn new_front_window(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            minimal_address: base,
            big_threshold: 0,
            cursor_low: base,
            cursor_high: base + size,
            free_ranges: Vec::new(),
            allocated_bytes: 0,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Lowest address this allocator will ever return.
    pub fn minimal_address(&self) -> u64 {
        self.minimal_address
    }

    /// Bytes currently handed out.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Bytes still available, counting freed ranges.
    pub fn available_bytes(&self) -> u64 {
        let untouched = self.cursor_high.saturating_sub(self.cursor_low);
        let freed: u64 = self.free_ranges.iter().map(|r| r.size).sum();
        untouched + freed
    }

    /// Allocate `size` bytes, rounded up to whole native pages.
    ///
    /// Returns `None` when the heap is exhausted.
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        let aligned = align_up(size, PAGE_SIZE);
        let big = aligned > self.big_threshold;

        let address = self
            .take_from_free_list(aligned, big)
            .or_else(|| self.carve(aligned, big))?;

        self.allocated_bytes += aligned;
        trace!(address, size = aligned, big, "heap range allocated");
        Some(address)
    }

    /// Return `[address, address + size)` for reuse.
    pub fn free(&mut self, address: u64, size: u64) {
        let aligned = align_up(size, PAGE_SIZE);
        if address < self.base || address + aligned > self.base + self.size {
            warn!(address, size = aligned, "freed range outside heap, dropping");
            return;
        }
        self.allocated_bytes = self.allocated_bytes.saturating_sub(aligned);
        self.free_ranges.push(FreeRange {
            address,
            size: aligned,
        });
        self.coalesce();
        trace!(address, size = aligned, "heap range freed");
    }

    fn carve(&mut self, size: u64, big: bool) -> Option<u64> {
        if self.cursor_low + size > self.cursor_high {
            return None;
        }
        if big {
            let address = self.cursor_low;
            self.cursor_low += size;
            Some(address)
        } else {
            self.cursor_high -= size;
            Some(self.cursor_high)
        }
    }

    /// Best-fit scan over freed ranges. Big chunks prefer the lowest
    /// candidate, small chunks the highest, matching the carve direction.
    fn take_from_free_list(&mut self, size: u64, big: bool) -> Option<u64> {
        let mut best: Option<usize> = None;
        for (idx, range) in self.free_ranges.iter().enumerate() {
            if range.size < size {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(cur) => {
                    let cur_range = self.free_ranges[cur];
                    let better_fit = range.size < cur_range.size;
                    let same_fit = range.size == cur_range.size;
                    let better_end = if big {
                        range.address < cur_range.address
                    } else {
                        range.address > cur_range.address
                    };
                    if better_fit || (same_fit && better_end) {
                        Some(idx)
                    } else {
                        Some(cur)
                    }
                }
            };
        }

        let idx = best?;
        let range = self.free_ranges[idx];
        if range.size == size {
            self.free_ranges.swap_remove(idx);
            Some(range.address)
        } else if big {
            // Take the low end, keep the remainder
            self.free_ranges[idx] = FreeRange {
                address: range.address + size,
                size: range.size - size,
            };
            Some(range.address)
        } else {
            // Take the high end
            self.free_ranges[idx] = FreeRange {
                address: range.address,
                size: range.size - size,
            };
            Some(range.address + range.size - size)
        }
    }

    /// Merge adjacent freed ranges, then fold ranges touching the untouched
    /// window back into it.
    fn coalesce(&mut self) {
        self.free_ranges.sort_by_key(|r| r.address);
        let mut merged: Vec<FreeRange> = Vec::with_capacity(self.free_ranges.len());
        for range in self.free_ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if last.address + last.size == range.address => {
                    last.size += range.size;
                }
                _ => merged.push(range),
            }
        }
        self.free_ranges = merged;

        loop {
            let mut folded = false;
            self.free_ranges.retain(|r| {
                if r.address + r.size == self.cursor_low {
                    self.cursor_low = r.address.max(self.minimal_address);
                    folded = true;
                    false
                } else if r.address == self.cursor_high {
                    self.cursor_high += r.size;
                    folded = true;
                    false
                } else {
                    true
                }
            });
            if !folded {
                break;
            }
        }
    }
}
