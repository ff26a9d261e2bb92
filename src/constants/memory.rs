//! Physical memory manager tunables.

pub const FRAME_SIZE: usize = 4096;
pub const BITS_PER_BYTE: usize = 8;

/// Bitmap byte with every frame marked unavailable.
pub const FULL_BITMAP_BYTE: u8 = 0xFF;

/// Frame 0 is left to firmware and real-mode code, so the search for free
/// runs begins one frame above it.
pub const FIRST_ALLOCATABLE_FRAME: usize = 1;

/// Capacity of the allocator's private copy of the boot memory map.
pub const MAX_MEMORY_REGIONS: usize = 256;

const _: () = {
    assert!(FRAME_SIZE.is_power_of_two());
    assert!(FIRST_ALLOCATABLE_FRAME >= 1);
    assert!(MAX_MEMORY_REGIONS > 0);
};
