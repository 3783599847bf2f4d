use crate::printk;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: ConsoleLogger = ConsoleLogger::new();

/// [`Log`] backend printing `[LEVEL] target: message` lines to the console.
pub struct ConsoleLogger {
    max_level: AtomicUsize,
}

impl ConsoleLogger {
    const fn new() -> Self {
        Self {
            max_level: AtomicUsize::new(LevelFilter::Info as usize),
        }
    }

    /// Install the console logger. Call this once during early init.
    ///
    /// # Errors
    /// If another logger was installed already.
    pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
        LOGGER.set_max_level(max_level);
        log::set_logger(&LOGGER)?;
        log::set_max_level(max_level);
        Ok(())
    }

    /// The installed instance.
    #[must_use]
    pub fn get() -> &'static Self {
        &LOGGER
    }

    pub fn set_max_level(&self, max_level: LevelFilter) {
        self.max_level.store(max_level as usize, Ordering::Relaxed);
        log::set_max_level(max_level);
    }

    #[must_use]
    pub fn max_level(&self) -> LevelFilter {
        let raw = self.max_level.load(Ordering::Relaxed);
        LevelFilter::iter().nth(raw).unwrap_or(LevelFilter::Trace)
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        printk!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_round_trips_through_the_atomic() {
        let logger = ConsoleLogger::new();
        assert_eq!(logger.max_level(), LevelFilter::Info);
        logger.max_level.store(LevelFilter::Off as usize, Ordering::Relaxed);
        assert_eq!(logger.max_level(), LevelFilter::Off);
        logger.max_level.store(LevelFilter::Trace as usize, Ordering::Relaxed);
        assert_eq!(logger.max_level(), LevelFilter::Trace);
    }
}
