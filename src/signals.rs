//! Bridge from OS termination signals to `Closer::trigger`
//!
//! One listener thread per closer. The first matching signal closes the
//! subscription, re-arms the default action for the whole set and triggers
//! shutdown. A second signal therefore terminates the process even while a
//! callback hangs. Which of the signals arrived only shows up in the log.

use crate::closer::Closer;
use crate::logging::log_with_source;

use libc::c_int;
use nix::sys::signal::Signal;
use signal_hook::consts::FORBIDDEN;
use signal_hook::flag;
use signal_hook::iterator::Signals;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Printable name of a signal number
pub fn signal_name(sig: c_int) -> String {
    match Signal::try_from(sig) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("signal {}", sig),
    }
}

/// Subscribes to `sigs` and spawns the listener thread
///
/// The subscription is in place when this returns, so a signal delivered
/// right afterwards is not lost even if the thread has not started yet.
///
/// # Errors
/// - Signals that cannot be handled (SIGKILL, SIGSTOP)
/// - Registration or thread spawn failure
pub(crate) fn spawn_listener(closer: Closer, sigs: &[c_int]) -> io::Result<()> {
    if let Some(sig) = sigs.iter().find(|s| FORBIDDEN.contains(*s)) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} cannot be handled", signal_name(*sig)),
        ));
    }

    // Default action is restored for every signal of the set once armed
    let armed = Arc::new(AtomicBool::new(false));
    for sig in sigs {
        flag::register_conditional_default(*sig, Arc::clone(&armed))?;
    }

    let mut signals = Signals::new(sigs)?;
    let handle = signals.handle();
    let names: Vec<String> = sigs.iter().map(|s| signal_name(*s)).collect();

    thread::Builder::new()
        .name("closer-signals".to_string())
        .spawn(move || {
            let received = signals.forever().next();

            // Unsubscribe before running callbacks; further deliveries
            // take the default action
            armed.store(true, Ordering::SeqCst);
            handle.close();
            drop(signals);

            if let Some(sig) = received {
                let _ = log_with_source(
                    &format!("Received {}, starting graceful shutdown", signal_name(sig)),
                    Some("signals"),
                );
                closer.trigger();
            }
        })?;

    let _ = log_with_source(
        &format!("Listening for {}", names.join(", ")),
        Some("signals"),
    );

    Ok(())
}
