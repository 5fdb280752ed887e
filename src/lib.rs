//! Graceful Shutdown Coordinator
//!
//! Lets unrelated subsystems (database handles, connection pools, listeners)
//! register cleanup callbacks and guarantees every callback runs exactly
//! once, either on an explicit `trigger()` or when the process receives a
//! termination signal.
//!
//! A process-wide instance listening for SIGINT and SIGTERM backs the free
//! functions in this module. Independent instances come from `Closer::new`.
//!
//! ```no_run
//! closer::init();
//! closer::register_named("db", || -> std::io::Result<()> {
//!     // flush and close
//!     Ok(())
//! });
//! closer::wait();
//! ```

pub mod cli;
pub mod closer;
pub mod config;
mod executor;
pub mod logging;
pub mod signals;

pub use closer::Closer;
pub use config::{parse_config, parse_signal, Config};
pub use logging::{log, log_with_source, set_log_file};

use libc::c_int;
use once_cell::sync::Lazy;
use signal_hook::consts::{SIGINT, SIGTERM};

/// Name of the program, used by the demo binary
pub const PROGRAM_NAME: &str = "closer-demo";

/// Current version of the crate (from Cargo.toml)
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Signals the process-wide closer listens for
pub const DEFAULT_SIGNALS: [c_int; 2] = [SIGINT, SIGTERM];

/// Error returned by a cleanup callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A cleanup action: runs once, may fail
pub type Callback = Box<dyn FnOnce() -> Result<(), CallbackError> + Send + 'static>;

/// Boxes a closure into a `Callback`
///
/// Any error type convertible into `CallbackError` is accepted.
pub fn callback<F, E>(f: F) -> Callback
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<CallbackError>,
{
    Box::new(move || f().map_err(Into::into))
}

static GLOBAL_CLOSER: Lazy<Closer> = Lazy::new(|| Closer::new(&DEFAULT_SIGNALS));

/// The process-wide closer
///
/// Built on first use, which also starts its signal listener.
pub fn global() -> &'static Closer {
    &GLOBAL_CLOSER
}

/// Builds the process-wide closer now
///
/// Call early in `main` so SIGINT/SIGTERM are handled from the start rather
/// than from the first registration.
pub fn init() {
    Lazy::force(&GLOBAL_CLOSER);
}

/// Adds a cleanup callback to the process-wide closer
pub fn register<F, E>(f: F)
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<CallbackError>,
{
    global().register(f);
}

/// Adds a named cleanup callback to the process-wide closer
pub fn register_named<F, E>(name: impl Into<String>, f: F)
where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<CallbackError>,
{
    global().register_named(name, f);
}

/// Adds several cleanup callbacks to the process-wide closer
pub fn register_all<I>(callbacks: I)
where
    I: IntoIterator<Item = Callback>,
{
    global().register_all(callbacks);
}

/// Blocks until the process-wide shutdown has completed
pub fn wait() {
    global().wait();
}

/// Runs the process-wide shutdown sequence (idempotent)
pub fn trigger() {
    global().trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    // The global closer can only shut down once per process, so the whole
    // lifecycle lives in a single test
    #[test]
    #[serial]
    fn test_global_closer_lifecycle() {
        init();
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        register(move || -> Result<(), CallbackError> {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let r = Arc::clone(&ran);
        register_named("named", move || -> std::io::Result<()> {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let r = Arc::clone(&ran);
        register_all(vec![callback(move || -> Result<(), CallbackError> {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })]);
        assert_eq!(global().pending(), 3);

        let waiter = thread::spawn(wait);
        trigger();
        waiter.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
        assert!(global().is_closed());

        let r = Arc::clone(&ran);
        register(move || -> Result<(), CallbackError> {
            r.fetch_add(100, Ordering::SeqCst);
            Ok(())
        });
        trigger();
        wait();
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_callback_converts_errors() {
        let f = callback(|| Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "closed twice")));
        let err = f().unwrap_err();
        assert_eq!(err.to_string(), "closed twice");
    }
}
