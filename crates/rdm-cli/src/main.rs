use rdm_core::logging;

mod cli;

use crate::cli::CliCommand;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Log to the state file; fall back to stderr so a read-only home still works.
    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    match CliCommand::run_from_args() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("rdm error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
