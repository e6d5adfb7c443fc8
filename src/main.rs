//! Prepost - pre/post backup hook orchestration

use std::process::ExitCode;

fn main() -> ExitCode {
    match prepost_hooks::cli::run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
