//! Errors reported by the physical memory manager.

use x86_64::PhysAddr;

/// Failures while building the allocator from the boot memory map.
///
/// Every variant is fatal at boot: the kernel has no frame source without a
/// working allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    #[error("bootloader did not answer the memory map request")]
    MissingMemoryMap,
    #[error("bootloader did not answer the HHDM request")]
    MissingHhdm,
    #[error("memory map has no usable region")]
    NoUsableRegion,
    #[error("memory map has more than {capacity} entries")]
    TooManyRegions { capacity: usize },
    #[error("no usable region can hold a {required:#x} byte bitmap")]
    BitmapTooLarge { required: usize },
    #[error("bitmap storage is {actual:#x} bytes, expected {expected:#x}")]
    StorageSizeMismatch { expected: usize, actual: usize },
    #[error("frame allocator is already initialized")]
    AlreadyInitialized,
}

/// Failures of the allocate/free API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame allocator used before initialization")]
    Uninitialized,
    #[error("frame count must be at least one")]
    ZeroFrames,
    #[error("no run of {requested} free frames")]
    OutOfFrames { requested: usize },
    #[error("address {0:#x} is not frame aligned")]
    Misaligned(PhysAddr),
    #[error("{count} frames at {addr:#x} extend past the end of physical memory")]
    OutOfRange { addr: PhysAddr, count: usize },
    #[error("frame {frame:#x} is not allocated")]
    NotAllocated { frame: PhysAddr },
}
