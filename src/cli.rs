use std::env;
use std::process;

/// Options accepted by the demo binary
#[derive(Debug, Default, PartialEq)]
pub struct Args {
    /// Path to log file (None for stdout)
    pub log_file: Option<String>,
    /// Path to JSON config file (None to read the environment)
    pub config_file: Option<String>,
    /// Register a callback that fails, to show error logging
    pub fail: bool,
}

/// Prints usage instructions for the program.
pub fn print_usage() {
    println!(
        "Usage: {} [-h] [-v] [-l logfile] [-c config_file] [--fail]",
        crate::PROGRAM_NAME
    );
}

/// Parses command line arguments of the current process
///
/// Exits the process on `-h`, `-v` and on invalid arguments.
pub fn parse_args() -> Args {
    match parse_from(env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => process::exit(0),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            print_usage();
            process::exit(1);
        }
    }
}

/// Parses an argument list (without the program name)
///
/// # Returns
/// * `Ok(Some(args))` - Parsed options
/// * `Ok(None)` - Help or version was printed, caller should exit
/// * `Err(message)` - Invalid arguments
pub fn parse_from<I>(argv: I) -> Result<Option<Args>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = Args::default();
    let mut argv = argv.into_iter();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-h" => {
                print_usage();
                return Ok(None);
            }
            "-v" => {
                println!("{} version {}", crate::PROGRAM_NAME, crate::PROGRAM_VERSION);
                return Ok(None);
            }
            "-l" => {
                args.log_file = Some(argv.next().ok_or("Missing log file argument")?);
            }
            "-c" => {
                args.config_file = Some(argv.next().ok_or("Missing config file argument")?);
            }
            "--fail" => args.fail = true,
            _ => return Err(format!("Unexpected argument: {}", arg)),
        }
    }

    Ok(Some(args))
}
