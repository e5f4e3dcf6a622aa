//! Console logger for udthread
//!
//! A `log` backend that writes one line per record to stderr. Library code
//! only talks to the `log` facade; drivers call [`init`] once to see output.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Line buffer for one log record
pub struct Console {
    #[cfg(test)]
    buffer: heapless::String<1024>,
    line: String,
}

impl Console {
    /// Create a new console instance
    pub const fn new() -> Self {
        Console {
            #[cfg(test)]
            buffer: heapless::String::new(),
            line: String::new(),
        }
    }

    /// Append a string to the pending line
    pub fn write_str(&mut self, s: &str) {
        #[cfg(test)]
        {
            let _ = self.buffer.push_str(s);
        }
        self.line.push_str(s);
    }

    /// Emit the pending line to stderr
    pub fn flush(&mut self) {
        #[cfg(not(test))]
        {
            use std::io::Write as _;
            let stderr = std::io::stderr();
            let mut out = stderr.lock();
            let _ = out.write_all(self.line.as_bytes());
            let _ = out.write_all(b"\n");
        }
        self.line.clear();
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// The installed logger
static LOGGER: Once<ConsoleLogger> = Once::new();

/// `log::Log` implementation backed by [`CONSOLE`]
pub struct ConsoleLogger {
    level: LevelFilter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut console = CONSOLE.lock();
        let _ = write!(
            console,
            "[{:<5}] {}: {}",
            level_tag(record.level()),
            record.target(),
            record.args()
        );
        console.flush();
    }

    fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Install the console logger
///
/// Only the first call installs; later calls just adjust the max level.
pub fn init(level: LevelFilter) {
    let logger = LOGGER.call_once(|| ConsoleLogger { level: LevelFilter::Trace });
    let _ = log::set_logger(logger);
    log::set_max_level(level);
}
