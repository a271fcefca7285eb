// SPDX-License-Identifier: MPL-2.0

//! The external programs a mount is assembled from.

use std::path::Path;

use tosimg::{partition::PartedReport, Error};

use crate::host::{Host, Invocation, Output};

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Runs `invocation`, failing unless it exits successfully.
fn checked(host: &mut impl Host, step: &str, invocation: Invocation) -> Result<Output, Error> {
    tracing::info!("{}: `{}`", step, invocation);

    let output = host.run(&invocation)?;
    if output.success {
        Ok(output)
    } else {
        Err(Error::ExternalTool {
            step: step.to_owned(),
            status: output.status,
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

/// Asks parted for the partition table of `device`.
///
/// The exit status is not checked; whatever parted wrote to stderr is part of the report.
pub fn parted_print(host: &mut impl Host, device: &Path) -> Result<PartedReport, Error> {
    let invocation = Invocation::new("parted")
        .env("LC_ALL", "C")
        .arg("-s")
        .arg(path_arg(device))
        .args(["unit", "b", "print"]);
    tracing::info!("probe: `{}`", invocation);

    let output = host.run(&invocation)?;

    Ok(PartedReport {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Runs parted's script mode against `image`.
pub fn parted_script(host: &mut impl Host, image: &Path, commands: &[String]) -> Result<(), Error> {
    checked(
        host,
        "partition overlay",
        Invocation::new("parted")
            .env("LC_ALL", "C")
            .args(["-s", "-a", "none", "-m"])
            .arg(path_arg(image))
            .args(commands.iter().cloned()),
    )?;

    Ok(())
}

/// Presents `device` through xmount, with writes going to `cache`.
pub fn xmount(
    host: &mut impl Host,
    device: &Path,
    cache: &Path,
    data_dir: &Path,
    byte_swapped: bool,
) -> Result<(), Error> {
    let mut invocation = Invocation::new("xmount")
        .args(["--in", "raw"])
        .arg(path_arg(device))
        .args(["--out", "raw", "--cache"])
        .arg(path_arg(cache));
    if byte_swapped {
        invocation = invocation.args(["--morph", "swab"]);
    }
    checked(host, "start xmount", invocation.arg(path_arg(data_dir)))?;

    Ok(())
}

/// Attaches `file` to the next free loop device and returns its path.
pub fn attach_loop(host: &mut impl Host, file: &Path, scan_partitions: bool) -> Result<String, Error> {
    let mut invocation = Invocation::new("losetup").args(["--find", "--show"]);
    if scan_partitions {
        invocation = invocation.arg("-P");
    }
    let output = checked(host, "attach loop device", invocation.arg(path_arg(file)))?;

    let device = output.stdout.trim().to_owned();
    if device.is_empty() {
        return Err(Error::Parse(format!(
            "losetup printed no device for {}",
            file.display(),
        )));
    }
    tracing::info!("{} is attached to {}", file.display(), device);

    Ok(device)
}

pub fn detach_loop(host: &mut impl Host, device: &str) -> Result<(), Error> {
    checked(host, "detach loop device", Invocation::new("losetup").args(["-d", device]))?;
    sync(host)
}

pub fn create_mapped(host: &mut impl Host, name: &str, table: &str) -> Result<(), Error> {
    checked(
        host,
        "create mapped device",
        Invocation::new("dmsetup").args(["create", name]).stdin(table),
    )?;

    Ok(())
}

pub fn remove_mapped(host: &mut impl Host, device: &Path) -> Result<(), Error> {
    checked(
        host,
        "remove mapped device",
        Invocation::new("dmsetup").arg("remove").arg(path_arg(device)),
    )?;

    Ok(())
}

pub fn unmount(host: &mut impl Host, dir: &Path) -> Result<(), Error> {
    checked(host, "unmount xmount", Invocation::new("umount").arg(path_arg(dir)))?;

    Ok(())
}

pub fn sync(host: &mut impl Host) -> Result<(), Error> {
    checked(host, "sync", Invocation::new("sync"))?;

    Ok(())
}
