//! Device access used by the memory manager's diagnostics.

pub mod serial;
