//! `rdm download` – fetch one URL and report success or failure.

use anyhow::Result;
use rdm_core::config::RdmConfig;
use rdm_core::progress::ProgressStats;
use rdm_core::{download, DownloadAborted, DownloadOptions, StopToken};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;

/// Parsed arguments of `rdm download`.
#[derive(Debug, Clone)]
pub struct DownloadArgs {
    pub url: String,
    pub concurrency: usize,
    /// CLI cap; overrides the config default when set.
    pub max_bytes_per_sec: Option<u64>,
    pub output_dir: PathBuf,
}

/// "Downloading[ using N connections][ limited to K KBps]..."
pub fn start_message(concurrency: usize, max_bytes_per_sec: Option<u64>) -> String {
    let mut msg = String::from("Downloading");
    if concurrency > 1 {
        msg.push_str(&format!(" using {} connections", concurrency));
    }
    if let Some(limit) = max_bytes_per_sec {
        msg.push_str(&format!(" limited to {} KBps", limit / 1000));
    }
    msg.push_str("...");
    msg
}

pub fn run_download(cfg: &RdmConfig, args: &DownloadArgs) -> Result<ExitCode> {
    let mut opts = DownloadOptions::from_config(cfg, args.url.clone(), args.output_dir.clone());
    opts.concurrency = args.concurrency;
    if args.max_bytes_per_sec.is_some() {
        opts.max_bytes_per_sec = args.max_bytes_per_sec;
    }

    eprintln!("{}", start_message(opts.concurrency, opts.max_bytes_per_sec));

    let (progress_tx, progress_rx) = mpsc::channel::<ProgressStats>();
    let printer = thread::spawn(move || {
        let mut last_percent = None;
        for stats in progress_rx {
            let percent = stats.percent();
            if last_percent != Some(percent) {
                println!("Downloaded {}%", percent);
                last_percent = Some(percent);
            }
        }
    });

    let result = download(&opts, &StopToken::new(), Some(progress_tx));
    let _ = printer.join();

    let ok = match result {
        Ok(outcome) if outcome.completed => {
            tracing::info!(path = %outcome.output_path.display(), "saved");
            true
        }
        Ok(outcome) => {
            eprintln!(
                "{} of {} bytes downloaded; run again to resume.",
                outcome.bytes_downloaded, outcome.file_size
            );
            false
        }
        Err(err) if err.is::<DownloadAborted>() => {
            eprintln!("Download stopped; run again to resume.");
            false
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "download failed");
            eprintln!("rdm error: {:#}", err);
            false
        }
    };

    if ok {
        eprintln!("Download succeeded.");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Download failed.");
        Ok(ExitCode::FAILURE)
    }
}
