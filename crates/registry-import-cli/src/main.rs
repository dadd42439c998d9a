//! regimport - Main entry point

use clap::Parser;
use registry_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use registry_import_cli::api::ApiClient;
use registry_import_cli::{Cli, Commands};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Verbose logs at debug level, otherwise only warnings interrupt the output
    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("regimport")
        .build();
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok().flatten();

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> registry_import_cli::Result<()> {
    let client = ApiClient::new(cli.server_url.clone(), cli.token.clone())?;

    match &cli.command {
        Commands::Upload { job, file } => {
            registry_import_cli::commands::upload::run(&client, job, file).await
        }
        Commands::Watch {
            ids,
            scope,
            until_done,
        } => registry_import_cli::commands::watch::run(client, ids, *scope, *until_done).await,
    }
}
