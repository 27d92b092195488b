//! Per-context residency records.

/// Completion watermarks observed for one memory object, one slot per
/// execution context.
///
/// The array is sized from the context-slot count fixed at bring-up and
/// never grows. Updates overwrite unconditionally: callers own fence
/// ordering, so the last reported value wins even when it is lower than a
/// previous one.
#[derive(Debug, Clone)]
pub struct ResidencyData {
    entries: Vec<CompletionEntry>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CompletionEntry {
    fence: u64,
    resident: bool,
}

impl ResidencyData {
    /// Create a record with `max_os_context_count` slots.
    pub fn new(max_os_context_count: u32) -> Self {
        Self {
            entries: vec![CompletionEntry::default(); max_os_context_count as usize],
        }
    }

    /// Number of context slots.
    pub fn context_slots(&self) -> usize {
        self.entries.len()
    }

    /// Record the last-known completed fence for `context_id`.
    ///
    /// Out-of-range ids are ignored; the slot count is fixed at bring-up.
    pub fn update_completion_data(&mut self, fence: u64, context_id: u32) {
        if let Some(entry) = self.entries.get_mut(context_id as usize) {
            entry.fence = fence;
        }
    }

    /// Last-known completed fence for `context_id`, 0 when never updated.
    pub fn fence_value_for_context(&self, context_id: u32) -> u64 {
        self.entries
            .get(context_id as usize)
            .map(|e| e.fence)
            .unwrap_or(0)
    }

    /// Mark the object resident or evicted on `context_id`.
    pub fn set_resident(&mut self, context_id: u32, resident: bool) {
        if let Some(entry) = self.entries.get_mut(context_id as usize) {
            entry.resident = resident;
        }
    }

    /// Whether the object is currently resident on `context_id`.
    pub fn is_resident(&self, context_id: u32) -> bool {
        self.entries
            .get(context_id as usize)
            .map(|e| e.resident)
            .unwrap_or(false)
    }

    /// Whether the object is resident on any context.
    pub fn is_resident_anywhere(&self) -> bool {
        self.entries.iter().any(|e| e.resident)
    }
}
