use chrono::Local;
use once_cell::sync::Lazy;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Environment variable holding the initial log file path
pub const LOG_FILE_ENV: &str = "CLOSER_LOG_FILE";

/// Global log file path protected by Mutex
///
/// Seeded from `CLOSER_LOG_FILE` on first use.
/// When None, logs go to stdout.
pub static LOG_FILE: Lazy<Mutex<Option<String>>> = Lazy::new(|| {
    let path = std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty());
    Mutex::new(path)
});

/// Logs a message with timestamp to the configured output
///
/// # Arguments
/// * `message` - The message to log
///
/// # Returns
/// * `io::Result<()>` - Ok on success, Err if writing fails
pub fn log(message: &str) -> io::Result<()> {
    log_with_source(message, None)
}

/// Logs a message with timestamp and optional source tag
///
/// The tag identifies the callback or listener that produced the record,
/// e.g. `[callback #2 db]` or `[signals]`.
///
/// # Arguments
/// * `message` - The message to log
/// * `source` - Optional source tag
pub fn log_with_source(message: &str, source: Option<&str>) -> io::Result<()> {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let log_message = match source {
        Some(src) => format!("{} [{}] {}\n", timestamp, src, message),
        None => format!("{} {}\n", timestamp, message),
    };

    let guard = LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner);
    match &*guard {
        Some(log_file) => {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            file.write_all(log_message.as_bytes())?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            out.write_all(log_message.as_bytes())?;
        }
    }

    Ok(())
}

/// Sets the path for the log file
///
/// Subsequent calls to `log` append to this file.
pub fn set_log_file<P: AsRef<Path>>(path: P) {
    let path_str = path.as_ref().to_string_lossy().into_owned();
    *LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner) = Some(path_str);
}

/// Routes log records back to stdout
pub fn clear_log_file() {
    *LOG_FILE.lock().unwrap_or_else(PoisonError::into_inner) = None;
}
