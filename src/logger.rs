use std::fs;

use chrono::Local;
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "stitcher.log";

/// Sets up the global logger: colored console output on stderr plus a plain
/// file log under `logs/stitcher.log`. Call once, before any other work.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Noisy
/// serialization internals are capped at `warn`.
pub fn init() {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("Failed to create log directory '{}': {}", LOG_DIR, e);
    }
    let log_file_path = format!("{}/{}", LOG_DIR, LOG_FILE);

    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    let console = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let file = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(fern::log_file(&log_file_path).unwrap_or_else(|e| {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            fern::log_file("/dev/stderr").expect("Failed to open stderr as fallback")
        }));

    let applied = Dispatch::new()
        .level(level)
        .level_for("serde", LevelFilter::Warn)
        .level_for("quick_xml", LevelFilter::Warn)
        .chain(console)
        .chain(file)
        .apply();

    if let Err(e) = applied {
        eprintln!("Failed to apply logger configuration: {}", e);
    }
    log::debug!("Logger initialized; file log at '{}'", log_file_path);
}
