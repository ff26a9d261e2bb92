//! Physical memory management
//!
//! [`init`] reads the Limine memory map once and installs the global
//! [`BitmapFrameAllocator`]; afterwards frames come from
//! [`frame_allocator::alloc_frames`] and go back through
//! [`frame_allocator::free_frames`].

pub mod bitmap;
pub mod bitmap_frame_allocator;
pub mod error;
pub mod frame_allocator;
pub mod memory_map;

use bitmap_frame_allocator::BitmapFrameAllocator;
use error::PmmError;
use limine::request::{HhdmRequest, MemoryMapRequest};
use log::error;
use memory_map::MemoryMap;
use x86_64::VirtAddr;

#[used]
#[link_section = ".requests"]
pub static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests"]
pub static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

/// Offset at which Limine maps all of physical memory.
pub fn hhdm_offset() -> Result<VirtAddr, PmmError> {
    let response = HHDM_REQUEST.get_response().ok_or(PmmError::MissingHhdm)?;
    Ok(VirtAddr::new(response.offset()))
}

/// Sets up the global frame allocator from the boot memory map.
///
/// Must run once on the bootstrap processor before anything asks for frames.
/// There is no way to continue without physical memory, so any failure halts
/// the kernel.
pub fn init() {
    if let Err(err) = try_init() {
        error!("pmm: {}", err);
        panic!("pmm: {}", err);
    }
}

/// Fallible form of [`init`].
pub fn try_init() -> Result<(), PmmError> {
    frame_allocator::install_with(|| {
        let response = MEMORY_MAP_REQUEST
            .get_response()
            .ok_or(PmmError::MissingMemoryMap)?;
        let memory_map = MemoryMap::from_limine(response)?;
        let offset = hhdm_offset()?;

        // SAFETY: Limine maps all physical memory at the HHDM offset and hands
        // usable regions to the kernel untouched.
        unsafe { BitmapFrameAllocator::init(memory_map, offset) }
    })
}
