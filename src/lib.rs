//! Physical frame allocator for a Limine-booted x86_64 kernel.
//!
//! The allocator scans the boot memory map once, carves a bitmap out of the
//! first usable region large enough to hold it, and then serves first-fit
//! allocations of contiguous 4 KiB frames. See [`memory`] for the public
//! entry points.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod constants;
pub mod devices;
pub mod logging;
pub mod memory;

pub use devices::serial;

pub mod prelude {
    pub use crate::serial_print;
    pub use crate::serial_println;
}

