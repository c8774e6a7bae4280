//! CLI argument definitions using clap
//!
//! Commands:
//! - tripstack validate --config <path>
//! - tripstack names --config <path>
//! - tripstack serve --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tripstack - trip API backend with a change stream consumer
#[derive(Parser, Debug)]
#[command(name = "tripstack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(long, default_value = "./tripstack.json")]
        config: PathBuf,
    },

    /// Print the derived resource names
    Names {
        /// Path to configuration file
        #[arg(long, default_value = "./tripstack.json")]
        config: PathBuf,
    },

    /// Build the backend and serve JSON requests from stdin
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./tripstack.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
