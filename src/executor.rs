//! Concurrent fan-out of drained cleanup callbacks
//!
//! Every callback gets its own thread and reports its outcome on a bounded
//! channel sized to the number of callbacks. The collector blocks until each
//! unit has reported, so a hung callback stalls the whole run.

use crate::logging::log_with_source;
use crate::{Callback, CallbackError};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// A registered callback waiting in the registry
pub(crate) struct Entry {
    pub(crate) name: Option<String>,
    pub(crate) callback: Callback,
}

impl Entry {
    /// Log tag for the callback at 1-based position `idx` of a drain
    fn label(&self, idx: usize) -> String {
        match &self.name {
            Some(name) => format!("callback #{} {}", idx, name),
            None => format!("callback #{}", idx),
        }
    }
}

/// How a single callback finished
enum Report {
    Done,
    Failed(CallbackError),
    Panicked(String),
}

/// Tally of one shutdown run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) panicked: usize,
}

impl Outcome {
    pub(crate) fn total(&self) -> usize {
        self.succeeded + self.failed + self.panicked
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn invoke(callback: Callback) -> Report {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Report::Done,
        Ok(Err(e)) => Report::Failed(e),
        Err(payload) => Report::Panicked(panic_message(payload.as_ref())),
    }
}

type Slot = Arc<Mutex<Option<Callback>>>;

fn take(slot: &Slot) -> Option<Callback> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn run_unit(slot: &Slot, label: String, tx: &SyncSender<(String, Report)>) {
    if let Some(callback) = take(slot) {
        let report = invoke(callback);
        // Capacity equals the number of units, so this never blocks
        let _ = tx.send((label, report));
    }
}

/// Runs every entry concurrently and waits for all of them
///
/// Errors and panics are logged one record per callback and otherwise
/// discarded. If a thread cannot be spawned the callback runs on the
/// calling thread instead.
pub(crate) fn run_all(entries: Vec<Entry>) -> Outcome {
    let total = entries.len();
    if total == 0 {
        return Outcome::default();
    }

    let _ = log_with_source(&format!("Running {} cleanup callbacks", total), None);

    let (tx, rx) = mpsc::sync_channel::<(String, Report)>(total);
    for (i, entry) in entries.into_iter().enumerate() {
        let idx = i + 1;
        let label = entry.label(idx);
        let slot: Slot = Arc::new(Mutex::new(Some(entry.callback)));

        let spawned = {
            let slot = Arc::clone(&slot);
            let label = label.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name(format!("closer-cb-{}", idx))
                .spawn(move || run_unit(&slot, label, &tx))
        };

        if let Err(e) = spawned {
            let _ = log_with_source(
                &format!("Failed to spawn thread ({}), running inline", e),
                Some(&label),
            );
            run_unit(&slot, label, &tx);
        }
    }
    drop(tx);

    collect(&rx, total)
}

/// Receives one report per launched unit and logs every failure
///
/// Units that went away without reporting are counted and logged as
/// panicked.
fn collect(rx: &Receiver<(String, Report)>, total: usize) -> Outcome {
    let mut outcome = Outcome::default();
    for received in 0..total {
        let (label, report) = match rx.recv() {
            Ok(msg) => msg,
            Err(_) => {
                let missing = total - received;
                outcome.panicked += missing;
                let _ = log_with_source(
                    &format!("{} cleanup callbacks exited without reporting", missing),
                    None,
                );
                break;
            }
        };
        match report {
            Report::Done => outcome.succeeded += 1,
            Report::Failed(e) => {
                outcome.failed += 1;
                let _ = log_with_source(
                    &format!("Cleanup callback returned error: {}", e),
                    Some(&label),
                );
            }
            Report::Panicked(msg) => {
                outcome.panicked += 1;
                let _ = log_with_source(
                    &format!("Cleanup callback panicked: {}", msg),
                    Some(&label),
                );
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{clear_log_file, set_log_file};
    use serial_test::serial;
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn entry<F>(name: Option<&str>, f: F) -> Entry
    where
        F: FnOnce() -> Result<(), CallbackError> + Send + 'static,
    {
        Entry {
            name: name.map(str::to_string),
            callback: Box::new(f),
        }
    }

    #[test]
    fn test_run_all_empty() {
        assert_eq!(run_all(Vec::new()), Outcome::default());
    }

    #[test]
    fn test_run_all_counts_outcomes() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r1 = Arc::clone(&ran);
        let r2 = Arc::clone(&ran);

        let outcome = run_all(vec![
            entry(Some("ok"), move || {
                r1.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            entry(None, move || {
                r2.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::Other, "db close failed").into())
            }),
            entry(Some("boom"), || panic!("pool exploded")),
        ]);

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcome,
            Outcome {
                succeeded: 1,
                failed: 1,
                panicked: 1
            }
        );
        assert_eq!(outcome.total(), 3);
    }

    #[test]
    fn test_run_all_waits_for_slowest() {
        let done = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&done);

        run_all(vec![entry(None, move || {
            thread::sleep(Duration::from_millis(100));
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })]);

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial]
    fn test_run_all_logs_one_record_per_failure() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("closer.log");
        set_log_file(&log_path);

        let outcome = run_all(vec![
            entry(Some("ledger-db"), || Err("ledger flush refused".into())),
            entry(Some("ledger-pool"), || panic!("ledger pool corrupted")),
            entry(Some("ledger-cache"), || Ok(())),
        ]);
        clear_log_file();

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.panicked, 1);
        assert_eq!(outcome.succeeded, 1);

        // Other tests may log concurrently, so only look at our own tags
        let contents = fs::read_to_string(&log_path).unwrap();
        let lines_with = |needle: &str| contents.lines().filter(|l| l.contains(needle)).count();

        assert_eq!(
            lines_with("[callback #1 ledger-db] Cleanup callback returned error: ledger flush refused"),
            1
        );
        assert_eq!(
            lines_with("[callback #2 ledger-pool] Cleanup callback panicked: ledger pool corrupted"),
            1
        );
        assert_eq!(lines_with("ledger-cache]"), 0);
    }

    #[test]
    #[serial]
    fn test_collect_counts_missing_reports() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("closer.log");
        set_log_file(&log_path);

        let (tx, rx) = mpsc::sync_channel::<(String, Report)>(3);
        tx.send(("callback #1".to_string(), Report::Done)).unwrap();
        drop(tx);
        let outcome = collect(&rx, 3);
        clear_log_file();

        assert_eq!(
            outcome,
            Outcome {
                succeeded: 1,
                failed: 0,
                panicked: 2
            }
        );
        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("2 cleanup callbacks exited without reporting"));
    }

    #[test]
    fn test_entry_label() {
        let named = entry(Some("db"), || Ok(()));
        let anon = entry(None, || Ok(()));
        assert_eq!(named.label(3), "callback #3 db");
        assert_eq!(anon.label(1), "callback #1");
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
