//! Serial-backed `log` sink
//!
//! Boot code calls [`init`] once, before the memory manager, so that the
//! allocator's placement and accounting messages reach COM1.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Global logger instance
pub static LOGGER: Logger = Logger::new();

/// Logger that serializes whole records onto the serial port
pub struct Logger {
    inner: Mutex<()>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub const fn new() -> Logger {
        Logger {
            inner: Mutex::new(()),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats records as "[LEVEL] target: message"
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _guard = self.inner.lock();
            crate::serial_println!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Level used when none is requested: `Debug` for debug builds, `Info`
/// otherwise.
pub const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs [`LOGGER`] with [`default_level`].
///
/// # Errors
/// Fails if another logger was installed first.
pub fn init() -> Result<(), SetLoggerError> {
    init_with_level(default_level())
}

/// Installs [`LOGGER`] and caps output at `level`.
///
/// # Errors
/// Fails if another logger was installed first.
pub fn init_with_level(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn default_level_tracks_build_profile() {
        #[cfg(debug_assertions)]
        assert_eq!(default_level(), LevelFilter::Debug);
        #[cfg(not(debug_assertions))]
        assert_eq!(default_level(), LevelFilter::Info);
    }

    #[test]
    fn records_above_max_level_are_disabled() {
        // Only the level filter is consulted; nothing is written to the port.
        log::set_max_level(LevelFilter::Info);
        let logger = Logger::new();
        let trace = Metadata::builder().level(Level::Trace).build();
        let info = Metadata::builder().level(Level::Info).build();
        let error = Metadata::builder().level(Level::Error).build();

        assert!(!logger.enabled(&trace));
        assert!(logger.enabled(&info));
        assert!(logger.enabled(&error));
    }
}
