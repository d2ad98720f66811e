//! Rollup - Main entry point

use clap::Parser;
use rollup_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use rollup_pipeline::{reset, Cli, Commands, PipelineConfig, PipelineOrchestrator, ResetScope};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose mode logs debug to the console, otherwise info
    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("rollup")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().with_env().unwrap_or(log_config);
    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    let code = match execute(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        },
    };

    // flush file logs before exiting
    drop(guard);
    process::exit(code);
}

/// Run the requested command and return the exit status
async fn execute(cli: &Cli) -> anyhow::Result<i32> {
    let config = PipelineConfig::load()?;

    match &cli.command {
        Some(Commands::Reset {
            markers,
            artifacts,
            archive,
        }) => {
            let scope = ResetScope {
                markers: *markers,
                artifacts: *artifacts,
                archive: *archive,
            };
            let summary = reset(&config, scope)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Ok(0)
        },
        None => {
            let report = PipelineOrchestrator::new(config).run(cli.workers).await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(if report.succeeded() { 0 } else { 1 })
        },
    }
}
