//! Allocation request descriptions.

use crate::allocation::AllocationType;
use crate::helpers::align_up;

/// Behavioral switches on an allocation request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationFlags {
    /// Backing may be exported to other processes
    pub shareable: bool,
    /// Never place the allocation in device-local memory
    pub use_system_memory: bool,
    /// Allocation participates in 32-bit window addressing
    pub allow_32bit: bool,
    /// 32-bit window allocations go to the front window
    pub use_front_window: bool,
    /// Prefer 64 KiB pages over native pages
    pub prefer_64k_pages: bool,
    /// The CPU will map the allocation
    pub lockable: bool,
}

/// Geometry of an image allocation.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    /// Width in texels
    pub width: u64,
    /// Height in texels
    pub height: u64,
    /// Depth in texels
    pub depth: u64,
    /// Bytes per texel
    pub bytes_per_pixel: u64,
}

/// Row pitch alignment required by the sampler hardware.
const ROW_PITCH_ALIGNMENT: u64 = 64;

impl ImageInfo {
    /// Bytes between the starts of consecutive rows.
    pub fn row_pitch(&self) -> u64 {
        align_up(self.width * self.bytes_per_pixel, ROW_PITCH_ALIGNMENT)
    }

    /// Bytes between the starts of consecutive slices.
    pub fn slice_pitch(&self) -> u64 {
        self.row_pitch() * self.height.max(1)
    }

    /// Total surface size in bytes.
    pub fn surface_size(&self) -> u64 {
        self.slice_pitch() * self.depth.max(1)
    }
}

/// Everything the memory manager needs to place one allocation.
#[derive(Debug, Clone)]
pub struct AllocationProperties {
    /// Root device the allocation belongs to
    pub root_device_index: u32,
    /// Requested size in bytes
    pub size: u64,
    /// Intended use of the allocation
    pub allocation_type: AllocationType,
    /// Explicit start alignment, otherwise derived from the pool
    pub alignment: Option<u64>,
    /// Behavioral switches
    pub flags: AllocationFlags,
    /// Image geometry; present iff this is an image allocation
    pub image_info: Option<ImageInfo>,
}

impl AllocationProperties {
    /// A plain request with default flags.
    pub fn new(root_device_index: u32, size: u64, allocation_type: AllocationType) -> Self {
        Self {
            root_device_index,
            size,
            allocation_type,
            alignment: None,
            flags: AllocationFlags::default(),
            image_info: None,
        }
    }

    /// Replace the flag set.
    pub fn with_flags(mut self, flags: AllocationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Request an explicit start alignment.
    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Turn the request into an image request. The size is derived from
    /// the geometry.
    pub fn with_image_info(mut self, info: ImageInfo) -> Self {
        self.size = info.surface_size();
        self.image_info = Some(info);
        self
    }

    /// Mark the request shareable.
    pub fn shareable(mut self) -> Self {
        self.flags.shareable = true;
        self
    }

    /// Require system-memory placement.
    pub fn system_memory_only(mut self) -> Self {
        self.flags.use_system_memory = true;
        self
    }

    /// Allow 32-bit window placement, optionally at the front window.
    pub fn in_32bit_pool(mut self, use_front_window: bool) -> Self {
        self.flags.allow_32bit = true;
        self.flags.use_front_window = use_front_window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_pitches() {
        let info = ImageInfo {
            width: 100,
            height: 10,
            depth: 1,
            bytes_per_pixel: 4,
        };
        // 400 bytes rounded up to the sampler alignment
        assert_eq!(info.row_pitch(), 448);
        assert_eq!(info.slice_pitch(), 4480);
        assert_eq!(info.surface_size(), 4480);
    }

    #[test]
    fn test_image_info_sets_size() {
        let props = AllocationProperties::new(0, 0, AllocationType::Image).with_image_info(
            ImageInfo {
                width: 64,
                height: 64,
                depth: 2,
                bytes_per_pixel: 4,
            },
        );
        assert_eq!(props.size, 64 * 4 * 64 * 2);
        assert!(props.image_info.is_some());
    }

    #[test]
    fn test_builder_flags() {
        let props = AllocationProperties::new(0, 0x1000, AllocationType::Buffer)
            .shareable()
            .in_32bit_pool(true);
        assert!(props.flags.shareable);
        assert!(props.flags.allow_32bit);
        assert!(props.flags.use_front_window);
        assert!(!props.flags.use_system_memory);
    }
}
