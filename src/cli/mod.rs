//! CLI module for tripstack
//!
//! Provides command-line interface for:
//! - validate: Check a configuration file
//! - names: Print derived resource names
//! - serve: Run the backend over stdin/stdout JSON lines

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{handle_request, names, run, run_command, serve, validate, AuthRequest};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
