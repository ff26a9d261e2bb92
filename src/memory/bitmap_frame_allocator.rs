//! Bitmap Frame Allocator
//!
//! - Places its bitmap in the first usable region that can hold it
//! - Starts with every frame unavailable, then frees the usable regions
//! - Serves first-fit allocations of contiguous frame runs

use core::ops::Range;

use crate::constants::memory::{FIRST_ALLOCATABLE_FRAME, FRAME_SIZE};
use log::{debug, info, trace, warn};
use x86_64::{
    structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB},
    PhysAddr, VirtAddr,
};

use super::{
    bitmap::Bitmap,
    error::{FrameError, PmmError},
    memory_map::MemoryMap,
};

/// Where the bitmap goes in physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapPlacement {
    /// Index of the hosting region in the memory map
    pub region_index: usize,
    pub start: PhysAddr,
    /// Size in bytes, a multiple of the frame size
    pub size: usize,
}

impl BitmapPlacement {
    /// First-fit search over the usable regions, in map order, for one whose
    /// frame-aligned span can hold the bitmap.
    ///
    /// # Errors
    /// [`PmmError::NoUsableRegion`] for a map without usable memory and
    /// [`PmmError::BitmapTooLarge`] if no usable region is big enough.
    pub fn find(memory_map: &MemoryMap) -> Result<Self, PmmError> {
        let size = memory_map.bitmap_size()?;

        memory_map
            .regions()
            .iter()
            .enumerate()
            .filter(|(_, region)| region.is_usable())
            .find_map(|(region_index, region)| {
                let start = region.base.checked_next_multiple_of(FRAME_SIZE as u64)?;
                let end = start.checked_add(size as u64)?;
                if end > region.end() {
                    return None;
                }
                Some(Self {
                    region_index,
                    start: PhysAddr::try_new(start).ok()?,
                    size,
                })
            })
            .ok_or(PmmError::BitmapTooLarge { required: size })
    }

    pub fn end(&self) -> PhysAddr {
        self.start + self.size as u64
    }

    /// Cuts the bitmap out of the front of its hosting region.
    fn claim(&self, memory_map: &mut MemoryMap) {
        let region = &mut memory_map.regions_mut()[self.region_index];
        let region_end = region.end();
        region.base = self.end().as_u64();
        region.length = region_end - region.base;
    }
}

/// Bitmap-backed allocator of contiguous physical frame runs
///
/// * `memory_map`: private copy of the boot map, with the bitmap carved out
/// * `bitmap`: one bit per frame, set = unavailable
/// * `bitmap_start`: physical address of the bitmap's own storage
/// * `total_frames`: frames between address 0 and the top of usable memory
/// * `free_frames`: frames currently free
pub struct BitmapFrameAllocator<'a> {
    memory_map: MemoryMap,
    bitmap: Bitmap<'a>,
    bitmap_start: PhysAddr,
    total_frames: usize,
    free_frames: usize,
}

impl BitmapFrameAllocator<'static> {
    /// Builds the allocator with its bitmap reached through the higher-half
    /// direct map.
    ///
    /// # Safety
    /// All physical memory must be mapped at `hhdm_offset`, and every region
    /// the map calls usable must be unused by anything else.
    pub unsafe fn init(memory_map: MemoryMap, hhdm_offset: VirtAddr) -> Result<Self, PmmError> {
        Self::new(memory_map, |placement| {
            let virt = hhdm_offset + placement.start.as_u64();
            // SAFETY: the placement lies inside a usable region, which the
            // caller guarantees is mapped at `hhdm_offset` and otherwise unused.
            unsafe { core::slice::from_raw_parts_mut(virt.as_mut_ptr::<u8>(), placement.size) }
        })
    }
}

impl<'a> BitmapFrameAllocator<'a> {
    /// Places the bitmap, asks `storage_for` for the bytes backing it, and
    /// initializes every bit from the memory map.
    ///
    /// # Errors
    /// Fails if the map has no usable region, if no usable region can host the
    /// bitmap, or if `storage_for` returns a slice of the wrong size.
    pub fn new<F>(mut memory_map: MemoryMap, storage_for: F) -> Result<Self, PmmError>
    where
        F: FnOnce(&BitmapPlacement) -> &'a mut [u8],
    {
        let placement = BitmapPlacement::find(&memory_map)?;
        info!("Required bitmap size: {:#x} bytes", placement.size);

        let storage = storage_for(&placement);
        if storage.len() != placement.size {
            return Err(PmmError::StorageSizeMismatch {
                expected: placement.size,
                actual: storage.len(),
            });
        }

        let total_frames = (memory_map.highest_address()? as usize).div_ceil(FRAME_SIZE);

        let mut bitmap = Bitmap::new(storage);
        bitmap.fill();
        placement.claim(&mut memory_map);
        info!(
            "Found space for bitmap at {:#x}..{:#x}",
            placement.start,
            placement.end()
        );

        let mut allocator = Self {
            memory_map,
            bitmap,
            bitmap_start: placement.start,
            total_frames,
            free_frames: 0,
        };
        allocator.free_usable_regions();

        // Overlapping map entries could have freed part of the bitmap itself.
        let bitmap_frames = allocator.bitmap_frames();
        allocator.free_frames -= allocator.bitmap.set_range(bitmap_frames);

        info!(
            "{} of {} frames free after init",
            allocator.free_frames, allocator.total_frames
        );
        Ok(allocator)
    }

    /// Clears the bit of every whole frame inside a usable region.
    fn free_usable_regions(&mut self) {
        for region in self.memory_map.usable_regions() {
            let frames = region.frames();
            let end = frames.end.min(self.total_frames);
            if end < frames.end {
                warn!(
                    "Region {:#x}..{:#x} extends past the bitmap, ignoring the tail",
                    region.base,
                    region.end()
                );
            }
            let start = frames.start.min(end);
            debug!("Freeing region {:#x}..{:#x}", region.base, region.end());
            self.free_frames += self.bitmap.clear_range(start..end);
        }
    }

    /// Allocates `count` contiguous frames, lowest address first.
    ///
    /// # Errors
    /// [`FrameError::ZeroFrames`] for an empty request and
    /// [`FrameError::OutOfFrames`] if no free run is long enough.
    pub fn allocate(&mut self, count: usize) -> Result<PhysAddr, FrameError> {
        if count == 0 {
            return Err(FrameError::ZeroFrames);
        }

        let start = self
            .find_contiguous_run(count)
            .ok_or(FrameError::OutOfFrames { requested: count })?;
        self.free_frames -= self.bitmap.set_range(start..start + count);

        let addr = frame_address(start);
        trace!("Allocated {} frames at {:#x}", count, addr);
        Ok(addr)
    }

    /// Returns `count` frames starting at `addr` to the free pool.
    ///
    /// Nothing is changed unless every frame in the range is currently
    /// allocated.
    ///
    /// # Errors
    /// [`FrameError::ZeroFrames`], [`FrameError::Misaligned`],
    /// [`FrameError::OutOfRange`], or [`FrameError::NotAllocated`] naming the
    /// first frame in the range that is free, never allocatable, or holds the
    /// bitmap.
    pub fn free(&mut self, addr: PhysAddr, count: usize) -> Result<(), FrameError> {
        let frames = match self.check_free(addr, count) {
            Ok(frames) => frames,
            Err(err) => {
                warn!("Rejected free of {} frames at {:#x}: {}", count, addr, err);
                return Err(err);
            }
        };

        self.free_frames += self.bitmap.clear_range(frames);
        trace!("Freed {} frames at {:#x}", count, addr);
        Ok(())
    }

    fn check_free(&self, addr: PhysAddr, count: usize) -> Result<Range<usize>, FrameError> {
        if count == 0 {
            return Err(FrameError::ZeroFrames);
        }
        if !addr.is_aligned(FRAME_SIZE as u64) {
            return Err(FrameError::Misaligned(addr));
        }

        let start = addr.as_u64() as usize / FRAME_SIZE;
        let end = start
            .checked_add(count)
            .filter(|&end| end <= self.total_frames)
            .ok_or(FrameError::OutOfRange { addr, count })?;

        if start < FIRST_ALLOCATABLE_FRAME {
            return Err(FrameError::NotAllocated {
                frame: frame_address(start),
            });
        }

        let bitmap_frames = self.bitmap_frames();
        if start < bitmap_frames.end && bitmap_frames.start < end {
            return Err(FrameError::NotAllocated {
                frame: frame_address(start.max(bitmap_frames.start)),
            });
        }

        if let Some(index) = self.bitmap.first_clear_in(start..end) {
            return Err(FrameError::NotAllocated {
                frame: frame_address(index),
            });
        }

        Ok(start..end)
    }

    /// First-fit scan for `count` consecutive clear bits, starting at
    /// [`FIRST_ALLOCATABLE_FRAME`].
    fn find_contiguous_run(&self, count: usize) -> Option<usize> {
        if count > self.free_frames {
            return None;
        }

        let mut run_start = FIRST_ALLOCATABLE_FRAME;
        let mut run_length = 0;
        for index in FIRST_ALLOCATABLE_FRAME..self.total_frames {
            if self.bitmap.test(index) {
                run_start = index + 1;
                run_length = 0;
                continue;
            }

            run_length += 1;
            if run_length == count {
                return Some(run_start);
            }
        }

        None
    }

    /// Check if frame is used. Frames past the top of memory always are.
    pub fn is_frame_used(&self, frame: PhysFrame) -> bool {
        let index = frame.start_address().as_u64() as usize / FRAME_SIZE;
        index >= self.total_frames || self.bitmap.test(index)
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn available_frames(&self) -> usize {
        self.free_frames
    }

    pub fn used_frames(&self) -> usize {
        self.total_frames - self.free_frames
    }

    /// Physical range holding the bitmap itself.
    pub fn bitmap_range(&self) -> Range<PhysAddr> {
        self.bitmap_start..self.bitmap_start + self.bitmap.size_in_bytes() as u64
    }

    /// The memory map as the allocator sees it, bitmap region already claimed.
    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory_map
    }

    fn bitmap_frames(&self) -> Range<usize> {
        let start = self.bitmap_start.as_u64() as usize / FRAME_SIZE;
        start..start + self.bitmap.size_in_bytes() / FRAME_SIZE
    }
}

fn frame_address(index: usize) -> PhysAddr {
    PhysAddr::new((index * FRAME_SIZE) as u64)
}

unsafe impl FrameAllocator<Size4KiB> for BitmapFrameAllocator<'_> {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let addr = self.allocate(1).ok()?;
        PhysFrame::from_start_address(addr).ok()
    }
}

impl FrameDeallocator<Size4KiB> for BitmapFrameAllocator<'_> {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        // The trait has no error path; release builds only get the warning
        // logged by `free`.
        let result = self.free(frame.start_address(), 1);
        debug_assert!(result.is_ok(), "bad frame release: {:?}", result);
    }
}
