use crate::memory::bitmap_frame_allocator::BitmapFrameAllocator;
use crate::memory::error::{FrameError, PmmError};
use spin::Mutex;

use x86_64::{
    structures::paging::{PhysFrame, Size4KiB},
    PhysAddr,
};

/// The kernel's one frame allocator. A single lock covers initialization,
/// allocation and release.
pub static FRAME_ALLOCATOR: Mutex<Option<BitmapFrameAllocator<'static>>> = Mutex::new(None);

/// Builds the global allocator with `build` while holding the lock.
///
/// # Errors
/// [`PmmError::AlreadyInitialized`] if an allocator is installed already
/// (`build` is not run), otherwise whatever `build` reports.
pub fn install_with<F>(build: F) -> Result<(), PmmError>
where
    F: FnOnce() -> Result<BitmapFrameAllocator<'static>, PmmError>,
{
    let mut guard = FRAME_ALLOCATOR.lock();
    if guard.is_some() {
        return Err(PmmError::AlreadyInitialized);
    }
    *guard = Some(build()?);
    Ok(())
}

pub fn is_initialized() -> bool {
    FRAME_ALLOCATOR.lock().is_some()
}

/// Allocates `count` contiguous frames from the global allocator.
pub fn alloc_frames(count: usize) -> Result<PhysAddr, FrameError> {
    with_frame_allocator(|allocator| allocator.allocate(count))?
}

/// Releases `count` frames starting at `addr` to the global allocator.
pub fn free_frames(addr: PhysAddr, count: usize) -> Result<(), FrameError> {
    with_frame_allocator(|allocator| allocator.free(addr, count))?
}

/// Single-frame convenience for page-table code.
pub fn alloc_frame() -> Option<PhysFrame> {
    let addr = alloc_frames(1).ok()?;
    PhysFrame::from_start_address(addr).ok()
}

pub fn dealloc_frame(frame: PhysFrame<Size4KiB>) -> Result<(), FrameError> {
    free_frames(frame.start_address(), 1)
}

/// Runs `f` against the global allocator under its lock.
///
/// # Errors
/// [`FrameError::Uninitialized`] before [`install_with`] has succeeded.
pub fn with_frame_allocator<F, R>(f: F) -> Result<R, FrameError>
where
    F: FnOnce(&mut BitmapFrameAllocator<'static>) -> R,
{
    let mut guard = FRAME_ALLOCATOR.lock();
    guard.as_mut().map(f).ok_or(FrameError::Uninitialized)
}
