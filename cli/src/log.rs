// SPDX-License-Identifier: MPL-2.0

use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Installs the global subscriber. Logs go to stderr so stdout stays clean for tables and
/// reports.
pub fn init() {
    tracing_subscriber::fmt()
        // Set the environment variable `RUST_LOG` to one of `trace`, `debug`, `info`, `warn`, or
        // `error`. Without it, each step of a mount is logged at `info`.
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_level(true)
        // The target is mostly just noise.
        .with_target(false)
        .without_time()
        .init();
}
