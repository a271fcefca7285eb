// SPDX-License-Identifier: MPL-2.0

//! Read-only views of a device and of the table a mount would use.

use std::{
    fs::File,
    io::{Read, Seek, Write},
    path::Path,
};

use anyhow::Context as _;
use tosimg::{diff, CompositeRangeMap, Device, MediaProbe, SECTOR_SIZE};
use tosimg_bootsector::BootSector;

use crate::{host::Host, tools};

/// How much of each boot sector to dump. The BIOS parameter block ends well before this.
const DUMP_LEN: usize = 64;

/// Describes the partitions of `device` and what mounting it would do to their boot sectors.
pub fn inspect(
    host: &mut impl Host,
    device: &Path,
    block_size: u16,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let report = tools::parted_print(host, device)?;
    let mut layout = match MediaProbe::classify(&report)? {
        MediaProbe::Native(it) => it,
        MediaProbe::ByteSwapped { diagnostics } => {
            writeln!(out, "{}: partition table is unreadable; media looks byte-swapped", device.display())?;
            for line in diagnostics {
                writeln!(out, "  parted: {}", line)?;
            }

            return Ok(());
        }
    };

    let mut file = File::open(device).with_context(|| format!("Failed to open {}", device.display()))?;
    layout
        .read_boot_sectors(&mut file)
        .context("Failed to read boot sectors")?;

    describe(&layout, &mut file, block_size, out)
}

fn describe(
    layout: &Device,
    src: &mut (impl Read + Seek),
    block_size: u16,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    writeln!(out, "{} bytes, {} sectors", layout.size, layout.total_sectors())?;

    for p in &layout.partitions {
        writeln!(out, "partition {} ({}): bytes {}..={}", p.index, p.kind, p.start, p.end)?;

        let Some(bs) = &p.boot_sector else {
            continue;
        };
        writeln!(
            out,
            "  variant {:?}, oem {:?}, {} bytes/sector",
            bs.variant, bs.oem, bs.bytes_per_sector,
        )?;

        let mut raw = [0; DUMP_LEN];
        src.seek(std::io::SeekFrom::Start(p.start))?;
        src.read_exact(&mut raw)?;
        tosimg_util::dump_hex_rows(out, p.start, &raw)?;

        if !p.is_legacy_fat16() {
            writeln!(out, "  left as is")?;
            continue;
        }
        match bs.translate_for_block_size(block_size) {
            Ok(translated) => describe_translation(bs, &translated, out)?,
            Err(e) => writeln!(out, "  cannot translate: {}", e)?,
        }
    }

    Ok(())
}

fn describe_translation(from: &BootSector, to: &BootSector, out: &mut impl Write) -> anyhow::Result<()> {
    let extents = to.extents();
    writeln!(
        out,
        "  becomes {} bytes/sector, {} sectors/cluster, {} reserved, {} per FAT, {} total",
        to.bytes_per_sector,
        to.sectors_per_cluster,
        to.reserved_sectors,
        to.sectors_per_fat,
        to.large_sector_count,
    )?;
    writeln!(
        out,
        "  {} byte clusters, {} byte FATs, {} bytes in all{}",
        extents.cluster,
        extents.fat,
        extents.total,
        if extents == from.extents() { "" } else { " (MISMATCH)" },
    )?;

    Ok(())
}

/// Renders the device-mapper table for an existing overlay.
pub fn table(overlay: &Path, tos: &str, dos: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let mut file = File::open(overlay).with_context(|| format!("Failed to open {}", overlay.display()))?;
    let total = file.metadata()?.len() / SECTOR_SIZE;

    let changed = diff::find_nonzero_sectors(&mut file)
        .with_context(|| format!("Failed to scan {}", overlay.display()))?;
    let map = CompositeRangeMap::build(&changed, total, dos, tos)?;
    writeln!(out, "{}", map)?;

    Ok(())
}
