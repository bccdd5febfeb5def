//! Output file I/O.
//!
//! Creates and preallocates the output file (fallocate on Unix when
//! available, else set_len), reopens it without truncation for resume, and
//! does positioned writes (pwrite) followed by data syncs.

mod builder;
mod writer;

pub use builder::OutputFileBuilder;
pub use writer::OutputFile;
