//! Amaxa CLI - Main entry point

use amaxa_cli::config::Config;
use amaxa_cli::{Cli, Commands};
use amaxa_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    dotenvy::dotenv().ok();

    // Initialize logging based on verbose flag and environment
    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Console)
        .log_file_prefix("amaxa")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // Logging is best effort; the guard keeps the file writer alive
    let _guard = init_logging(&log_config).ok().flatten();

    let config = Config::from_env();

    if let Err(e) = execute_command(&cli, &config).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli, config: &Config) -> amaxa_cli::Result<()> {
    match &cli.command {
        Commands::Extract {
            definition,
            credentials,
        } => amaxa_cli::commands::extract::run(definition, credentials, config).await,

        Commands::Load {
            definition,
            credentials,
            use_state,
        } => {
            amaxa_cli::commands::load::run(definition, credentials, use_state.as_deref(), config)
                .await
        },
    }
}
