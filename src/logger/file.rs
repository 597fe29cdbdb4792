/// Append-only log file sink
///
/// One file per process start under logs/, named by date. Writes are
/// line-buffered behind a mutex; flush() is exposed for shutdown paths.
use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;

static LOG_FILE: Lazy<Mutex<Option<BufWriter<File>>>> = Lazy::new(|| Mutex::new(None));

const LOG_DIR: &str = "logs";

/// Open the log file for this run. Failure disables file logging silently;
/// console output is unaffected.
pub fn init_file_logging() {
    let path = log_file_path();
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    if let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) {
        if let Ok(mut guard) = LOG_FILE.lock() {
            *guard = Some(BufWriter::new(file));
        }
    }
}

fn log_file_path() -> PathBuf {
    PathBuf::from(LOG_DIR).join(format!("futuresbot-{}.log", Local::now().format("%Y%m%d")))
}

/// Append a line to the log file (no-op if file logging is unavailable)
pub fn write_line(line: &str) {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(writer) = guard.as_mut() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

/// Flush pending writes (call during shutdown)
pub fn flush_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(writer) = guard.as_mut() {
            let _ = writer.flush();
        }
    }
}
