/// Runtime logger configuration
///
/// The model is one global threshold plus per-tag overrides: `--debug-<tag>`
/// raises a single subsystem to Debug, `--verbose-<tag>` to Verbose,
/// `--verbose` raises the global minimum, `--quiet` drops it to warnings.
/// Errors bypass all thresholds.
use super::tags::LogTag;
use super::LogLevel;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
pub struct LoggerConfig {
    /// Threshold applied to tags without an override
    pub min_level: LogLevel,

    /// Per-tag threshold overrides keyed by `LogTag::to_debug_key()`
    pub tag_levels: HashMap<String, LogLevel>,

    /// Console output enabled
    pub console_enabled: bool,

    /// File output enabled
    pub file_enabled: bool,

    /// Color output enabled
    pub colors_enabled: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            tag_levels: HashMap::new(),
            console_enabled: true,
            file_enabled: true,
            colors_enabled: true,
        }
    }
}

impl LoggerConfig {
    /// Decide whether a message passes the filters: errors always do,
    /// everything else compares against the tag's threshold (its override
    /// when present, the global minimum otherwise).
    pub fn allows(&self, tag: &LogTag, level: LogLevel) -> bool {
        if level == LogLevel::Error {
            return true;
        }
        let threshold = self
            .tag_levels
            .get(&tag.to_debug_key())
            .copied()
            .unwrap_or(self.min_level);
        level <= threshold
    }
}

/// Global logger configuration singleton
static LOGGER_CONFIG: Lazy<Arc<RwLock<LoggerConfig>>> =
    Lazy::new(|| Arc::new(RwLock::new(LoggerConfig::default())));

/// Get a copy of the current logger configuration
pub fn get_logger_config() -> LoggerConfig {
    LOGGER_CONFIG
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Set the logger configuration (replaces entire config)
pub fn set_logger_config(config: LoggerConfig) {
    *LOGGER_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// Update logger configuration with a closure
pub fn update_logger_config<F>(f: F)
where
    F: FnOnce(&mut LoggerConfig),
{
    let mut config = LOGGER_CONFIG.write().unwrap_or_else(|e| e.into_inner());
    f(&mut config);
}

/// Initialize logger configuration from command-line arguments
/// Called automatically during logger::init()
pub fn init_from_args() {
    use crate::arguments::{get_cmd_args, has_arg};

    let mut config = LoggerConfig::default();

    const TAG_KEYS: [&str; 9] = [
        "trader", "decision", "exchange", "market", "ai", "risk", "journal", "config", "system",
    ];

    for arg in &get_cmd_args() {
        if let Some(tag) = arg.strip_prefix("--debug-") {
            if TAG_KEYS.contains(&tag) {
                config.tag_levels.insert(tag.to_string(), LogLevel::Debug);
            }
        } else if let Some(tag) = arg.strip_prefix("--verbose-") {
            if TAG_KEYS.contains(&tag) {
                config.tag_levels.insert(tag.to_string(), LogLevel::Verbose);
            }
        }
    }

    if has_arg("--verbose") || has_arg("-v") {
        config.min_level = LogLevel::Verbose;
    }

    // --quiet keeps only errors and warnings
    if has_arg("--quiet") || has_arg("-q") {
        config.min_level = LogLevel::Warning;
    }

    set_logger_config(config);
}
