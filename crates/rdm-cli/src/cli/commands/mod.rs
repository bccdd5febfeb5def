//! CLI command handlers.

mod checksum;
mod download;

pub use checksum::run_checksum;
pub use download::{run_download, start_message, DownloadArgs};
