pub mod config;
pub mod logging;

pub mod checksum;
pub mod chunk;
pub mod control;
pub mod fetch_head;
pub mod fetcher;
pub mod file_writer;
pub mod orchestrator;
pub mod progress;
pub mod range_set;
pub mod retry;
pub mod storage;
pub mod throttle;
pub mod url_model;

pub use control::{DownloadAborted, StopToken};
pub use orchestrator::{download, DownloadOptions, DownloadOutcome};
