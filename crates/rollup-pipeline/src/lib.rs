//! Rollup Pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental batch pipeline turning streaming-service activity into
//! rolled-up CSV summaries.
//!
//! # Overview
//!
//! Every run executes four stages in order:
//!
//! - **Event count**: event types seen in staged log files over the last hour
//! - **Revenue**: totals per day, month and year from the `Revenue` table
//! - **Genre views**: views per genre over the last 24 hours
//! - **Unfinished views**: sessions started but never stopped, per genre
//!
//! A stage extracts only data not consumed before, transforms it in a pool of
//! workers, folds the partial results into the persisted rollup and then
//! advances its marker.
//!
//! # Example
//!
//! ```no_run
//! use rollup_pipeline::{PipelineConfig, PipelineOrchestrator};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::load()?;
//! let report = PipelineOrchestrator::new(config).run(Some(4)).await;
//! assert!(report.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod reset;
pub mod stages;
pub mod storage;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use orchestrator::{PipelineOrchestrator, RunReport, StageReport, StageStatus};
pub use reset::{reset, ResetScope, ResetSummary};
pub use stages::StageKind;

use clap::{Parser, Subcommand};

/// Incremental rollups over streaming-service activity
#[derive(Parser, Debug)]
#[command(name = "rollup")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Maintenance subcommand; omit to run the pipeline
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Worker count per stage; values at or below zero run one worker
    #[arg(allow_negative_numbers = true)]
    pub workers: Option<i64>,

    /// Print the report as JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove markers, artifacts and archived files (all of them if no flag is given)
    Reset {
        /// Remove marker files
        #[arg(long)]
        markers: bool,

        /// Remove artifacts and the metrics log
        #[arg(long)]
        artifacts: bool,

        /// Remove archived staging files
        #[arg(long)]
        archive: bool,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_negative_workers() {
        let cli = Cli::try_parse_from(["rollup", "-2", "--json"]).unwrap();
        assert_eq!(cli.workers, Some(-2));
        assert!(cli.json);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_reset_flags() {
        let cli = Cli::try_parse_from(["rollup", "reset", "--markers"]).unwrap();
        match cli.command {
            Some(Commands::Reset { markers, artifacts, archive }) => {
                assert!(markers && !artifacts && !archive);
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
