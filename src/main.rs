use closer::{cli, log, parse_config, set_log_file, Closer, Config, PROGRAM_NAME, PROGRAM_VERSION};
use std::io;
use std::process;
use std::thread;
use std::time::Duration;

fn main() {
    let args = cli::parse_args();

    let config = match &args.config_file {
        Some(path) => match parse_config(path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("Error loading config file {}: {}", path, e);
                process::exit(1);
            }
        },
        None => None,
    };

    // Command line wins over the config file; set before any record is written
    let log_file = args
        .log_file
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.log_file.clone()));
    if let Some(log_file) = log_file {
        set_log_file(log_file);
    }

    // A config file brings its own signal set, otherwise the process-wide
    // closer with SIGINT/SIGTERM is used
    let (closer, signals) = match &config {
        Some(config) => match Closer::from_config(config) {
            Ok(closer) => (closer, config.signals.clone()),
            Err(e) => {
                eprintln!("Error setting up shutdown handling: {}", e);
                process::exit(1);
            }
        },
        None => {
            closer::init();
            (closer::global().clone(), Config::default().signals)
        }
    };

    closer.register_named("flush-buffers", || -> io::Result<()> {
        thread::sleep(Duration::from_millis(200));
        let _ = log("Buffers flushed");
        Ok(())
    });
    closer.register_named("close-pool", || -> io::Result<()> {
        let _ = log("Connection pool closed");
        Ok(())
    });
    if args.fail {
        closer.register_named("failing", || -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "demo failure"))
        });
    }

    let _ = log(&format!(
        "{} {} waiting for {:?} (PID {})",
        PROGRAM_NAME,
        PROGRAM_VERSION,
        signals,
        process::id()
    ));
    if signals.is_empty() {
        let _ = log("No signals configured, shutting down right away");
        closer.trigger();
    }

    closer.wait();
    let _ = log("Shutdown complete");
}
