//! Amaxa CLI Library
//!
//! Command-line interface for moving connected Salesforce data between orgs.
//!
//! # Overview
//!
//! - **Extraction**: pull a referentially consistent slice of an org into CSV
//!   files (`amaxa extract`)
//! - **Loading**: insert those files into another org, remapping every
//!   reference to the new records (`amaxa load`)
//! - **Resume**: continue a failed load from its saved state
//!   (`amaxa load --use-state`)

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod credentials;
pub mod definition;
pub mod error;
pub mod state;

// Re-export commonly used types
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Amaxa - multi-object data extraction and loading for Salesforce
#[derive(Parser, Debug)]
#[command(name = "amaxa")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract records into CSV files
    Extract {
        /// Operation definition (YAML or JSON)
        definition: PathBuf,

        /// Credentials file (YAML or JSON)
        #[arg(short, long)]
        credentials: PathBuf,
    },

    /// Load records from CSV files
    Load {
        /// Operation definition (YAML or JSON)
        definition: PathBuf,

        /// Credentials file (YAML or JSON)
        #[arg(short, long)]
        credentials: PathBuf,

        /// Resume from a state file written by a failed load
        #[arg(long, value_name = "STATE")]
        use_state: Option<PathBuf>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_load_with_state() {
        let cli = Cli::try_parse_from([
            "amaxa",
            "load",
            "definition.yaml",
            "-c",
            "credentials.yaml",
            "--use-state",
            "definition.state.yaml",
            "--verbose",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Load {
                definition,
                credentials,
                use_state,
            } => {
                assert_eq!(definition, PathBuf::from("definition.yaml"));
                assert_eq!(credentials, PathBuf::from("credentials.yaml"));
                assert_eq!(use_state, Some(PathBuf::from("definition.state.yaml")));
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_extract_requires_credentials() {
        assert!(Cli::try_parse_from(["amaxa", "extract", "definition.yaml"]).is_err());
    }
}
