//! CLI for the rdm range downloader.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rdm_core::config;
use std::path::PathBuf;
use std::process::ExitCode;

use commands::{run_checksum, run_download, DownloadArgs};

/// Top-level CLI for the rdm range downloader.
#[derive(Debug, Parser)]
#[command(name = "rdm")]
#[command(about = "rdm: resumable multi-connection HTTP downloader", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a URL over parallel range requests, resuming if interrupted.
    Download {
        /// Direct HTTP/HTTPS URL to download.
        url: String,

        /// Number of parallel connections.
        #[arg(default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        concurrency: u64,

        /// Aggregate bandwidth cap in bytes per second (default: unlimited).
        #[arg(value_name = "MAX_BYTES_PER_SECOND")]
        max_bytes_per_sec: Option<u64>,

        /// Directory to save into (default: current directory).
        #[arg(long, short = 'o', value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl CliCommand {
    pub fn run_from_args() -> Result<ExitCode> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Download {
                url,
                concurrency,
                max_bytes_per_sec,
                output_dir,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let output_dir = match output_dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                let args = DownloadArgs {
                    url,
                    concurrency: usize::try_from(concurrency)?,
                    max_bytes_per_sec,
                    output_dir,
                };
                run_download(&cfg, &args)
            }
            CliCommand::Checksum { path } => {
                run_checksum(&path)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

#[cfg(test)]
mod tests;
