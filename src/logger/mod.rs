//! Structured logging for the trading engine
//!
//! Every message carries a subsystem tag and a severity. Filtering is a
//! per-tag threshold: the global minimum applies everywhere, and
//! `--debug-<tag>` / `--verbose-<tag>` raise a single subsystem without
//! drowning the console in the rest. Output goes to a colored console and
//! an append-only log file.
//!
//! ## Usage
//!
//! ```rust
//! use futuresbot::logger::{self, LogTag};
//!
//! logger::error(LogTag::Exchange, "Connection failed");
//! logger::warning(LogTag::Risk, "Margin usage approaching limit");
//! logger::info(LogTag::Trader, "Position opened");
//! logger::debug(LogTag::Ai, "Request payload: ..."); // Only with --debug-ai
//! ```
//!
//! Call `logger::init()` once at startup before any logging occurs.

mod config;
mod file;
mod format;
mod tags;

pub use config::{
    get_logger_config, init_from_args, set_logger_config, update_logger_config, LoggerConfig,
};
pub use tags::LogTag;

/// Message severity, in display-priority order. Warning and Info are plain
/// threshold levels; Debug and Verbose only surface for tags the operator
/// switched on (or globally with --verbose).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Verbose => "VERBOSE",
        }
    }

    /// Console styling for a finished line; errors and warnings pop,
    /// diagnostics recede
    pub(crate) fn paint(&self, line: &str) -> String {
        use colored::Colorize;
        match self {
            LogLevel::Error => line.red().to_string(),
            LogLevel::Warning => line.yellow().to_string(),
            LogLevel::Info => line.to_string(),
            LogLevel::Debug => line.cyan().to_string(),
            LogLevel::Verbose => line.dimmed().to_string(),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Initialize the logger system
///
/// Parses command-line arguments for threshold flags and opens the log file.
pub fn init() {
    config::init_from_args();
    file::init_file_logging();
}

fn emit(tag: LogTag, level: LogLevel, message: &str) {
    if config::get_logger_config().allows(&tag, level) {
        format::write(tag, level, message);
    }
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    emit(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
pub fn warning(tag: LogTag, message: &str) {
    emit(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    emit(tag, LogLevel::Info, message);
}

/// Log at DEBUG level, only shown for tags raised via --debug-<tag>
/// (or globally via --verbose)
pub fn debug(tag: LogTag, message: &str) {
    emit(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level, only shown with --verbose or --verbose-<tag>
pub fn verbose(tag: LogTag, message: &str) {
    emit(tag, LogLevel::Verbose, message);
}

/// Force flush all pending log writes (call during shutdown)
pub fn flush() {
    file::flush_file_logging();
}
