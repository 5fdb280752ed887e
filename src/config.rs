use libc::c_int;
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::fs;
use std::io::{Error, ErrorKind};
use std::str::FromStr;

use crate::logging::LOG_FILE_ENV;

/// Environment variable with a comma separated list of signal names
pub const SIGNALS_ENV: &str = "CLOSER_SIGNALS";

/// Closer construction parameters
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Signal names the bridge subscribes to, e.g. `"SIGINT"` or `"term"`.
    /// An empty list disables the bridge. (JSON field: signals)
    #[serde(default = "default_signal_names")]
    pub signals: Vec<String>,
    /// Where log records go, stdout when absent (JSON field: log_file)
    #[serde(default)]
    pub log_file: Option<String>,
}

fn default_signal_names() -> Vec<String> {
    vec!["SIGINT".to_string(), "SIGTERM".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            signals: default_signal_names(),
            log_file: None,
        }
    }
}

impl Config {
    /// Builds a config from `CLOSER_SIGNALS` and `CLOSER_LOG_FILE`
    ///
    /// Unset variables fall back to the defaults. `CLOSER_SIGNALS` set to an
    /// empty string means no signal bridge.
    pub fn from_env() -> Self {
        let signals = match std::env::var(SIGNALS_ENV) {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => default_signal_names(),
        };
        let log_file = std::env::var(LOG_FILE_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty());

        Config { signals, log_file }
    }

    /// Resolves every configured signal name to its number
    ///
    /// # Errors
    /// The first name that is unknown or cannot be caught
    pub fn signal_numbers(&self) -> Result<Vec<c_int>, Error> {
        self.signals.iter().map(|name| parse_signal(name)).collect()
    }
}

/// Parses a signal name into its number
///
/// Accepts `SIGTERM`, `TERM` and `term` alike.
///
/// # Errors
/// - Unknown signal name
/// - Signals that cannot be handled (SIGKILL, SIGSTOP)
pub fn parse_signal(name: &str) -> Result<c_int, Error> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };

    let signal = Signal::from_str(&full).map_err(|_| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("unknown signal name '{}'", name),
        )
    })?;
    let number = signal as c_int;

    if signal_hook::consts::FORBIDDEN.contains(&number) {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("signal {} cannot be handled", full),
        ));
    }

    Ok(number)
}

/// Parses a JSON config file
///
/// # File Format
/// ```text
/// {"signals": ["SIGINT", "SIGTERM"], "log_file": "/var/log/app-shutdown.log"}
/// ```
/// Both fields are optional.
///
/// # Errors
/// - File not found or unreadable
/// - Invalid JSON
/// - Unknown signal names
pub fn parse_config(filename: &str) -> Result<Config, Error> {
    let contents = fs::read_to_string(filename)?;
    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid JSON in {}: {}", filename, e),
        )
    })?;

    // Validate signal names up front so a typo fails at startup
    config.signal_numbers()?;

    Ok(config)
}
