//! tripstack CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`. Failures are written
//! as a JSON error line and exit non-zero.

use tripstack::cli;

fn main() {
    if let Err(e) = cli::run() {
        if cli::write_error(e.code_str(), e.message()).is_err() {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }
}
