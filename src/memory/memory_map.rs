//! Boot memory map scanning
//!
//! - Keeps a private, fixed-capacity copy of the bootloader's memory map
//! - Finds the highest usable region and sizes the frame bitmap from it

use crate::constants::memory::{BITS_PER_BYTE, FRAME_SIZE, MAX_MEMORY_REGIONS};
use arrayvec::ArrayVec;
use limine::memory_map::{Entry, EntryType};
use limine::response::MemoryMapResponse;

use super::error::PmmError;

/// How a region may be used, as reported by the bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Usable,
    Reserved,
    AcpiReclaimable,
    AcpiNvs,
    BadMemory,
    BootloaderReclaimable,
    KernelAndModules,
    Framebuffer,
}

impl From<EntryType> for RegionKind {
    fn from(entry_type: EntryType) -> Self {
        if entry_type == EntryType::USABLE {
            RegionKind::Usable
        } else if entry_type == EntryType::ACPI_RECLAIMABLE {
            RegionKind::AcpiReclaimable
        } else if entry_type == EntryType::ACPI_NVS {
            RegionKind::AcpiNvs
        } else if entry_type == EntryType::BAD_MEMORY {
            RegionKind::BadMemory
        } else if entry_type == EntryType::BOOTLOADER_RECLAIMABLE {
            RegionKind::BootloaderReclaimable
        } else if entry_type == EntryType::KERNEL_AND_MODULES {
            RegionKind::KernelAndModules
        } else if entry_type == EntryType::FRAMEBUFFER {
            RegionKind::Framebuffer
        } else {
            RegionKind::Reserved
        }
    }
}

/// A physical address range `[base, base + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    pub const fn new(base: u64, length: u64, kind: RegionKind) -> Self {
        Self { base, length, kind }
    }

    pub const fn usable(base: u64, length: u64) -> Self {
        Self::new(base, length, RegionKind::Usable)
    }

    pub const fn reserved(base: u64, length: u64) -> Self {
        Self::new(base, length, RegionKind::Reserved)
    }

    pub fn is_usable(&self) -> bool {
        self.kind == RegionKind::Usable
    }

    /// One past the last byte of the region.
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    /// Indices of the frames lying entirely inside the region.
    pub fn frames(&self) -> core::ops::Range<usize> {
        let first = (self.base as usize).div_ceil(FRAME_SIZE);
        let last = self.end() as usize / FRAME_SIZE;
        first..last.max(first)
    }
}

impl From<&Entry> for MemoryRegion {
    fn from(entry: &Entry) -> Self {
        Self::new(entry.base, entry.length, entry.entry_type.into())
    }
}

/// The allocator's copy of the boot memory map, in bootloader order
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    regions: ArrayVec<MemoryRegion, MAX_MEMORY_REGIONS>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the regions yielded by `regions`.
    ///
    /// # Errors
    /// [`PmmError::TooManyRegions`] if the map does not fit the fixed capacity.
    pub fn from_regions(regions: impl IntoIterator<Item = MemoryRegion>) -> Result<Self, PmmError> {
        let mut map = Self::new();
        for region in regions {
            map.push(region)?;
        }
        Ok(map)
    }

    /// Copies the memory map handed over by Limine.
    pub fn from_limine(response: &MemoryMapResponse) -> Result<Self, PmmError> {
        Self::from_regions(response.entries().iter().map(|entry| MemoryRegion::from(&**entry)))
    }

    pub fn push(&mut self, region: MemoryRegion) -> Result<(), PmmError> {
        self.regions.try_push(region).map_err(|_| PmmError::TooManyRegions {
            capacity: MAX_MEMORY_REGIONS,
        })
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub(super) fn regions_mut(&mut self) -> &mut [MemoryRegion] {
        &mut self.regions
    }

    pub fn usable_regions(&self) -> impl Iterator<Item = &MemoryRegion> + '_ {
        self.regions.iter().filter(|r| r.is_usable())
    }

    /// The usable region with the greatest base address. Among equal bases the
    /// first one in map order wins.
    ///
    /// # Errors
    /// [`PmmError::NoUsableRegion`] if nothing in the map is usable.
    pub fn find_highest_usable(&self) -> Result<&MemoryRegion, PmmError> {
        self.usable_regions()
            .fold(None, |highest: Option<&MemoryRegion>, region| match highest {
                Some(h) if region.base <= h.base => Some(h),
                _ => Some(region),
            })
            .ok_or(PmmError::NoUsableRegion)
    }

    /// One past the last byte of the highest usable region.
    pub fn highest_address(&self) -> Result<u64, PmmError> {
        self.find_highest_usable().map(MemoryRegion::end)
    }

    /// Bytes needed for one bit per frame up to [`Self::highest_address`],
    /// rounded up to whole frames.
    pub fn bitmap_size(&self) -> Result<usize, PmmError> {
        let frames = (self.highest_address()? as usize).div_ceil(FRAME_SIZE);
        let bytes = frames.div_ceil(BITS_PER_BYTE);
        Ok(bytes.next_multiple_of(FRAME_SIZE))
    }

    /// Bytes of memory the map reports as usable.
    pub fn usable_bytes(&self) -> u64 {
        self.usable_regions().map(|r| r.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn highest_usable_region_is_picked_by_base() {
        let map = MemoryMap::from_regions([
            MemoryRegion::usable(0x1000, 0x9_f000),
            MemoryRegion::usable(0x10_0000, 64 * MIB),
            MemoryRegion::reserved(0xfee0_0000, 0x1000),
            MemoryRegion::usable(0x20_0000, 0x1000),
        ])
        .unwrap();

        let highest = map.find_highest_usable().unwrap();
        assert_eq!(highest.base, 0x20_0000);
        assert_eq!(map.highest_address().unwrap(), 0x20_1000);
    }

    #[test]
    fn equal_bases_keep_the_first_region() {
        let map = MemoryMap::from_regions([
            MemoryRegion::usable(0x10_0000, 0x1000),
            MemoryRegion::usable(0x10_0000, 0x2000),
        ])
        .unwrap();

        assert_eq!(map.find_highest_usable().unwrap().length, 0x1000);
    }

    #[test]
    fn map_without_usable_memory_is_rejected() {
        let map = MemoryMap::from_regions([
            MemoryRegion::reserved(0, 0x10_0000),
            MemoryRegion::new(0x10_0000, 0x1000, RegionKind::AcpiNvs),
        ])
        .unwrap();

        assert_eq!(map.find_highest_usable(), Err(PmmError::NoUsableRegion));
        assert_eq!(map.bitmap_size(), Err(PmmError::NoUsableRegion));
        assert_eq!(MemoryMap::new().highest_address(), Err(PmmError::NoUsableRegion));
    }

    #[test]
    fn bitmap_size_rounds_to_whole_frames() {
        // 4 MiB region ending at 5 MiB: 1280 frames, 160 bytes, one frame.
        let map = MemoryMap::from_regions([MemoryRegion::usable(0x10_0000, 4 * MIB)]).unwrap();
        assert_eq!(map.bitmap_size().unwrap(), FRAME_SIZE);

        // 4 GiB of frames need 128 KiB of bitmap.
        let map = MemoryMap::from_regions([MemoryRegion::usable(0, 4096 * MIB)]).unwrap();
        assert_eq!(map.bitmap_size().unwrap(), 32 * FRAME_SIZE);
    }

    #[test]
    fn bitmap_size_covers_tiny_maps() {
        let map = MemoryMap::from_regions([MemoryRegion::usable(0x1000, 0x1000)]).unwrap();
        assert_eq!(map.bitmap_size().unwrap(), FRAME_SIZE);
    }

    #[test]
    fn oversized_maps_are_rejected() {
        let regions = (0..=MAX_MEMORY_REGIONS as u64).map(|i| MemoryRegion::usable(i * 0x1000, 0x1000));
        assert_eq!(
            MemoryMap::from_regions(regions).unwrap_err(),
            PmmError::TooManyRegions {
                capacity: MAX_MEMORY_REGIONS
            }
        );
    }

    #[test]
    fn frames_only_counts_whole_frames() {
        assert_eq!(MemoryRegion::usable(0x1000, 0x3000).frames(), 1..4);
        assert_eq!(MemoryRegion::usable(0x1800, 0x2000).frames(), 2..3);
        assert!(MemoryRegion::usable(0x1800, 0x100).frames().is_empty());
    }

    #[test]
    fn limine_entry_types_are_classified() {
        assert_eq!(RegionKind::from(EntryType::USABLE), RegionKind::Usable);
        assert_eq!(RegionKind::from(EntryType::RESERVED), RegionKind::Reserved);
        assert_eq!(
            RegionKind::from(EntryType::BOOTLOADER_RECLAIMABLE),
            RegionKind::BootloaderReclaimable
        );
        assert_eq!(
            RegionKind::from(EntryType::KERNEL_AND_MODULES),
            RegionKind::KernelAndModules
        );
        assert_eq!(RegionKind::from(EntryType::FRAMEBUFFER), RegionKind::Framebuffer);
    }
}
