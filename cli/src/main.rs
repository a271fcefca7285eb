// SPDX-License-Identifier: MPL-2.0

use std::process::ExitCode;

use clap::Parser as _;
use tosimg_cli::{host::System, Cli};

fn main() -> ExitCode {
    tosimg_cli::log::init();

    match tosimg_cli::run(Cli::parse(), &mut System, &mut std::io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
