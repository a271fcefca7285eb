// SPDX-License-Identifier: MPL-2.0

//! Assembling and tearing down the stack of devices behind a mount.
//!
//! Nothing is rolled back. If a step fails, the layers built before it stay in place and the
//! error names the step, so the operator can finish the job by hand.

use std::{
    fs::{self, File, OpenOptions},
    path::Path,
};

use anyhow::Context as _;
use tosimg::{
    cache, diff, overlay, CacheContainer, CompositeRangeMap, Device, Error, FlushMode,
    FlushReport, MediaProbe,
};

use crate::{
    host::Host,
    session::{Layer, MountSession, Paths},
    tools,
};

/// Presents `device` as `paths.mapped`, with its TOS boot sectors replaced by FAT16 ones whose
/// logical sector size is `block_size`.
pub fn mount(
    host: &mut impl Host,
    paths: &Paths,
    device: &Path,
    block_size: u16,
) -> anyhow::Result<MountSession> {
    if host.is_block_device(&paths.mapped) {
        return Err(Error::Precondition(format!(
            "Can't mount. Block device {} already exists.",
            paths.mapped.display(),
        ))
        .into());
    }

    fs::create_dir_all(&paths.data_dir)
        .with_context(|| format!("Failed to create {}", paths.data_dir.display()))?;

    let probe = MediaProbe::classify(&tools::parted_print(host, device)?)
        .with_context(|| format!("Failed to probe {}", device.display()))?;
    tools::xmount(host, device, &paths.cache_file, &paths.data_dir, probe.is_byte_swapped())?;

    let mut layout = Device::load(&tools::parted_print(host, &paths.image)?)
        .with_context(|| format!("Failed to read the partition table of {}", paths.image.display()))?;
    let mut image = File::open(&paths.image)
        .with_context(|| format!("Failed to open {}", paths.image.display()))?;
    layout
        .read_boot_sectors(&mut image)
        .context("Failed to read boot sectors")?;
    drop(image);

    let mut sparse = overlay::allocate(&paths.overlay, layout.size)
        .with_context(|| format!("Failed to create overlay {}", paths.overlay.display()))?;
    tools::parted_script(host, &paths.overlay, &layout.mkpart_script())?;
    let translated = overlay::write_boot_sectors(&layout, &mut sparse, block_size)
        .context("Failed to write translated boot sectors")?;
    if translated == 0 {
        tracing::warn!("no TOS FAT16 partitions found; the mapped device mirrors the original");
    }

    let tos_loop_device = tools::attach_loop(host, &paths.image, false)?;
    let dos_loop_device = tools::attach_loop(host, &paths.overlay, false)?;

    let changed = diff::find_nonzero_sectors(&mut sparse).context("Failed to scan the overlay")?;
    let table = CompositeRangeMap::build(
        &changed,
        layout.total_sectors(),
        dos_loop_device.as_str(),
        tos_loop_device.as_str(),
    )?
    .to_string();
    tools::create_mapped(host, &paths.name, &table)?;

    let final_device = tools::attach_loop(host, &paths.mapped, true)?;

    let session = MountSession {
        tos_loop_device,
        dos_loop_device,
        final_device,
        byte_swapped: Some(probe.is_byte_swapped()),
    };
    session.save(&paths.session)?;

    Ok(session)
}

#[derive(Debug, PartialEq, Eq)]
pub enum UmountOutcome {
    /// The mapped device was not there to begin with.
    NotPresent,
    Flushed(FlushReport),
}

/// Removes everything [`mount`] built, then replays the writes made through the mount into
/// `device`.
pub fn umount(
    host: &mut impl Host,
    paths: &Paths,
    device: &Path,
    mode: FlushMode,
) -> anyhow::Result<UmountOutcome> {
    if !host.is_block_device(&paths.mapped) {
        return Ok(UmountOutcome::NotPresent);
    }

    let session = MountSession::load(&paths.session)?;
    if session.is_native() {
        tracing::warn!(
            "{} was mounted without byte swapping, but its cache is swapped on flush",
            device.display(),
        );
    }
    for layer in session.teardown(&paths.mapped) {
        match layer {
            Layer::Loop(dev) => tools::detach_loop(host, &dev)?,
            Layer::Mapped(path) => tools::remove_mapped(host, &path)?,
        }
    }
    tools::unmount(host, &paths.data_dir)?;

    let report = flush(device, &paths.cache_file, mode)?;

    if mode == FlushMode::Apply {
        fs::remove_dir_all(&paths.cache_base)
            .with_context(|| format!("Failed to remove {}", paths.cache_base.display()))?;
    } else {
        tracing::info!("keeping {} for a later flush", paths.cache_base.display());
    }
    fs::remove_file(&paths.overlay)
        .with_context(|| format!("Failed to remove {}", paths.overlay.display()))?;
    fs::remove_file(&paths.session)
        .with_context(|| format!("Failed to remove {}", paths.session.display()))?;

    Ok(UmountOutcome::Flushed(report))
}

/// Replays the xmount cache at `cache_file` into `device`.
pub fn flush(device: &Path, cache_file: &Path, mode: FlushMode) -> anyhow::Result<FlushReport> {
    let mut source = File::open(cache_file)
        .with_context(|| format!("Failed to open cache {}", cache_file.display()))?;
    let container = CacheContainer::read_from(&mut source)
        .with_context(|| format!("Failed to read cache {}", cache_file.display()))?;

    let mut target = OpenOptions::new()
        .read(true)
        .write(mode == FlushMode::Apply)
        .open(device)
        .with_context(|| format!("Failed to open {}", device.display()))?;

    let report = cache::flush(&container, &mut source, &mut target, mode)
        .with_context(|| format!("Failed to flush cache into {}", device.display()))?;
    if mode == FlushMode::Apply {
        target.sync_all()?;
    }
    tracing::info!(
        "{} of {} cached blocks written to {}",
        report.written,
        report.assigned,
        device.display(),
    );

    Ok(report)
}
