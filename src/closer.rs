use crate::config::Config;
use crate::executor::{self, Entry};
use crate::logging::log;
use crate::signals;
use crate::{callback, Callback, CallbackError};

use libc::c_int;
use scopeguard::defer;
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, Once, PoisonError};

/// Fire-once completion signal
///
/// Starts unfired, becomes fired exactly once and stays that way.
/// Any number of threads may wait on it before or after it fires.
struct Latch {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    fn new() -> Self {
        Latch {
            fired: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn fire(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        *fired = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            fired = self
                .cond
                .wait(fired)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn is_fired(&self) -> bool {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    callbacks: Mutex<Vec<Entry>>,
    once: Once,
    done: Latch,
}

/// Graceful shutdown coordinator
///
/// Collects cleanup callbacks from unrelated parts of a program and runs all
/// of them, concurrently and exactly once, when shutdown is triggered either
/// explicitly or by one of the signals given at construction.
///
/// Cloning is cheap; clones share the same registry and state.
///
/// # Limitations
/// A callback that never returns blocks `trigger()` and every `wait()`
/// forever. There is no per-callback timeout.
#[derive(Clone)]
pub struct Closer {
    inner: Arc<Inner>,
}

impl Closer {
    fn unbridged() -> Self {
        Closer {
            inner: Arc::new(Inner {
                callbacks: Mutex::new(Vec::new()),
                once: Once::new(),
                done: Latch::new(),
            }),
        }
    }

    /// Creates a closer that triggers on any of `sigs`
    ///
    /// An empty slice means shutdown must be triggered explicitly. If the
    /// signal subscription fails, the failure is logged and the returned
    /// closer has no signal bridge.
    pub fn new(sigs: &[c_int]) -> Self {
        match Self::try_new(sigs) {
            Ok(closer) => closer,
            Err(e) => {
                let _ = log(&format!(
                    "Failed to subscribe to signals {:?}: {}, shutdown must be triggered explicitly",
                    sigs, e
                ));
                Self::unbridged()
            }
        }
    }

    /// Like `new`, but reports a failed signal subscription
    ///
    /// # Errors
    /// - Forbidden or invalid signal numbers
    /// - Listener thread could not be spawned
    pub fn try_new(sigs: &[c_int]) -> io::Result<Self> {
        let closer = Self::unbridged();
        if !sigs.is_empty() {
            signals::spawn_listener(closer.clone(), sigs)?;
        }
        Ok(closer)
    }

    /// Builds a closer subscribed to the configured signals
    ///
    /// `config.log_file` is left to the caller; the log sink is process-wide
    /// and is set with `logging::set_log_file`.
    ///
    /// # Errors
    /// - Unknown signal names
    /// - Signal subscription failure
    pub fn from_config(config: &Config) -> io::Result<Self> {
        let numbers = config.signal_numbers()?;
        Self::try_new(&numbers)
    }

    fn push(&self, entries: impl IntoIterator<Item = Entry>) {
        let mut callbacks = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        callbacks.extend(entries);
    }

    /// Adds a cleanup callback
    ///
    /// Callbacks added after shutdown has run are never executed.
    pub fn register<F, E>(&self, f: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<CallbackError>,
    {
        self.push([Entry {
            name: None,
            callback: callback(f),
        }]);
    }

    /// Adds a cleanup callback with a name used in log records
    pub fn register_named<F, E>(&self, name: impl Into<String>, f: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<CallbackError>,
    {
        self.push([Entry {
            name: Some(name.into()),
            callback: callback(f),
        }]);
    }

    /// Adds several boxed callbacks in one go
    pub fn register_all<I>(&self, callbacks: I)
    where
        I: IntoIterator<Item = Callback>,
    {
        self.push(
            callbacks
                .into_iter()
                .map(|callback| Entry { name: None, callback }),
        );
    }

    /// Number of callbacks waiting to run
    pub fn pending(&self) -> usize {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs every registered callback, once
    ///
    /// Safe to call from any number of threads any number of times. The
    /// first call drains the registry, runs all callbacks concurrently and
    /// returns when they have all finished; concurrent calls block until
    /// then; later calls return immediately. Callback errors are logged,
    /// never returned.
    pub fn trigger(&self) {
        let inner = &self.inner;
        inner.once.call_once(|| {
            defer! {
                inner.done.fire();
            }

            let drained = {
                let mut callbacks = inner
                    .callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *callbacks)
            };

            let outcome = executor::run_all(drained);
            if outcome.total() > 0 {
                let _ = log(&format!(
                    "Cleanup finished: {} of {} ok, {} failed, {} panicked",
                    outcome.succeeded,
                    outcome.total(),
                    outcome.failed,
                    outcome.panicked
                ));
            }
        });
    }

    /// Blocks until shutdown has completed
    ///
    /// Returns immediately if it already has.
    pub fn wait(&self) {
        self.inner.done.wait();
    }

    /// Whether shutdown has completed
    pub fn is_closed(&self) -> bool {
        self.inner.done.is_fired()
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}
