//! dcmview - DICOM metadata and thumbnail renderer

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = dcmview::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
