/// Log line rendering and sink dispatch
use super::config::get_logger_config;
use super::tags::LogTag;
use super::LogLevel;
use chrono::Local;

/// Render one line and hand it to the enabled sinks. The file always gets
/// the plain form; the console gets the level's styling when colors are on.
pub fn write(tag: LogTag, level: LogLevel, message: &str) {
    let config = get_logger_config();
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let plain = format!("{} [{:8}] [{}] {}", timestamp, tag.as_str(), level, message);

    if config.console_enabled {
        let line = if config.colors_enabled {
            level.paint(&plain)
        } else {
            plain.clone()
        };
        if level == LogLevel::Error {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }

    if config.file_enabled {
        super::file::write_line(&plain);
    }
}
