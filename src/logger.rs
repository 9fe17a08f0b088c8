//! # Console Logger
//!
//! Backend for the `log` facade used throughout the crate. Writes
//! timestamped lines to stdout and can tee them to a file so a demo run
//! leaves a transcript behind. Install once at program start:
//!
//! ```ignore
//! logger::init(LevelFilter::Info).ok();
//! ```

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;

pub struct ConsoleLogger {
    level: LevelFilter,
    file: Mutex<Option<File>>,
}

impl ConsoleLogger {
    fn new(level: LevelFilter, file: Option<File>) -> Self {
        Self { level, file: Mutex::new(file) }
    }

    /// Unix epoch seconds with a millisecond fraction.
    fn timestamp() -> String {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => format!("{}.{:03}", now.as_secs(), now.subsec_millis()),
            Err(_) => "0.000".to_string(),
        }
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{} {:<5} {}] {}",
            Self::timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        println!("{line}");
        if let Some(file) = self.file.lock().as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
        let _ = io::stdout().flush();
    }
}

/// Install a console-only logger.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    install(ConsoleLogger::new(level, None))
}

/// Install a logger that also tees to `path`. If the file cannot be
/// created the logger falls back to console-only rather than failing
/// the program.
pub fn init_with_file(level: LevelFilter, path: impl AsRef<Path>) -> Result<(), SetLoggerError> {
    let file = match File::create(path.as_ref()) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("could not open log file {}: {err}", path.as_ref().display());
            None
        }
    };
    install(ConsoleLogger::new(level, file))
}

fn install(logger: ConsoleLogger) -> Result<(), SetLoggerError> {
    let level = logger.level;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}
