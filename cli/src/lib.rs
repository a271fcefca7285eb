// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `tosimg` command.

pub mod host;
mod inspect;
pub mod log;
pub mod mount;
pub mod session;
pub mod tools;

use std::{io::Write, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tosimg::{FlushMode, FlushReport};
use tosimg_bootsector::DEFAULT_HOST_BPS;

use host::Host;
use mount::UmountOutcome;
use session::Paths;

#[derive(Debug, Parser)]
#[command(name = "tosimg", version, about = "Mount Atari TOS disk images as FAT16 volumes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
    /// Where session files and overlay images are kept.
    #[arg(long, global = true, env = "TOSIMG_STATE_DIR", default_value = ".")]
    pub state_dir: PathBuf,
    /// Where xmount keeps its cache and presented image, one directory per mount.
    #[arg(long, global = true, env = "TOSIMG_CACHE_ROOT", default_value = "/tmp/xmount")]
    pub cache_root: PathBuf,
    /// The logical sector size of the translated FAT16 boot sectors.
    #[arg(long, global = true, default_value_t = DEFAULT_HOST_BPS)]
    pub block_size: u16,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Present DEVICE as /dev/mapper/NAME.
    Mount { device: PathBuf, name: String },
    /// Tear down a mount and write its changes back into DEVICE.
    Umount {
        device: PathBuf,
        name: String,
        #[arg(long, value_enum, default_value_t = FlushModeArg::Apply)]
        flush_mode: FlushModeArg,
    },
    /// Replay an xmount cache into DEVICE.
    Flush {
        device: PathBuf,
        cache: PathBuf,
        #[arg(long, value_enum, default_value_t = FlushModeArg::Apply)]
        flush_mode: FlushModeArg,
    },
    /// Show the partitions of DEVICE and how their boot sectors would be translated.
    Inspect { device: PathBuf },
    /// Print the device-mapper table that splices OVERLAY into the TOS image.
    Table {
        overlay: PathBuf,
        /// The loop device backing the original image.
        tos: String,
        /// The loop device backing the overlay.
        dos: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FlushModeArg {
    Apply,
    DryRun,
    Verify,
}

impl From<FlushModeArg> for FlushMode {
    fn from(arg: FlushModeArg) -> Self {
        match arg {
            FlushModeArg::Apply => Self::Apply,
            FlushModeArg::DryRun => Self::DryRun,
            FlushModeArg::Verify => Self::Verify,
        }
    }
}

pub fn run(cli: Cli, host: &mut impl Host, out: &mut impl Write) -> anyhow::Result<()> {
    let paths = |device: &PathBuf, name: &str| {
        Paths::new(device, name, &cli.state_dir, &cli.cache_root)
    };

    match &cli.command {
        Command::Mount { device, name } => {
            let session = mount::mount(host, &paths(device, name), device, cli.block_size)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&session)?)?;
        }
        Command::Umount {
            device,
            name,
            flush_mode,
        } => {
            let paths = paths(device, name);
            match mount::umount(host, &paths, device, (*flush_mode).into())? {
                UmountOutcome::NotPresent => {
                    writeln!(out, "Device {} not present. Nothing to do.", paths.mapped.display())?;
                }
                UmountOutcome::Flushed(report) => summarize(&report, out)?,
            }
        }
        Command::Flush {
            device,
            cache,
            flush_mode,
        } => {
            let report = mount::flush(device, cache, (*flush_mode).into())?;
            summarize(&report, out)?;
        }
        Command::Inspect { device } => inspect::inspect(host, device, cli.block_size, out)?,
        Command::Table { overlay, tos, dos } => inspect::table(overlay, tos, dos, out)?,
    }

    Ok(())
}

fn summarize(report: &FlushReport, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(
        out,
        "{} cached blocks, {} written",
        report.assigned, report.written,
    )?;
    if !report.mismatched.is_empty() {
        anyhow::bail!(
            "{} blocks differ from the device: {:?}",
            report.mismatched.len(),
            report.mismatched,
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::host::{testing::Scripted, Output};

    #[test]
    fn command_line_is_well_formed() {
        use clap::CommandFactory as _;

        Cli::command().debug_assert();
    }

    #[test]
    fn flush_mode_defaults_to_apply() {
        let cli = Cli::try_parse_from(["tosimg", "umount", "/dev/sdb", "atari"]).unwrap();
        match cli.command {
            Command::Umount { flush_mode, .. } => assert_eq!(flush_mode, FlushModeArg::Apply),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.block_size, 4096);

        let cli = Cli::try_parse_from([
            "tosimg", "flush", "/dev/sdb", "cache", "--flush-mode", "dry-run",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Flush {
                flush_mode: FlushModeArg::DryRun,
                ..
            }
        ));
    }

    #[test]
    fn umount_of_absent_device_says_so() {
        let cli = Cli::try_parse_from([
            "tosimg",
            "--state-dir",
            "/nonexistent",
            "umount",
            "/dev/sdb",
            "atari",
        ])
        .unwrap();
        let mut host = Scripted::new(|_| Output::ok(""));
        let mut out = Vec::new();

        run(cli, &mut host, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Device /dev/mapper/atari not present. Nothing to do.\n",
        );
        assert!(host.calls.is_empty());
    }

    #[test]
    fn mismatches_fail_the_command() {
        let report = FlushReport {
            assigned: 3,
            written: 0,
            mismatched: vec![7],
        };
        let mut out = Vec::new();

        assert!(summarize(&report, &mut out).is_err());
        assert_eq!(String::from_utf8(out).unwrap(), "3 cached blocks, 0 written\n");
    }
}
