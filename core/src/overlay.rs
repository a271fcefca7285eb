// SPDX-License-Identifier: MPL-2.0

//! The overlay image: a sparse file, as large as the device, that holds the translated boot
//! sectors and the partition table the host should see.

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::Path,
};

use crate::{Device, Error};

/// Creates (or truncates) `path` as a sparse file of `size` bytes.
pub fn allocate(path: &Path, size: u64) -> Result<File, Error> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(size)?;
    tracing::info!("allocated {} byte overlay at {}", size, path.display());

    Ok(file)
}

/// Writes the host-compatible boot sector of every TOS FAT16 partition of `device` into
/// `overlay`, at the partition's start. Returns how many were written.
pub fn write_boot_sectors(
    device: &Device,
    overlay: &mut (impl Write + Seek),
    target_bps: u16,
) -> Result<usize, Error> {
    let mut count = 0;
    for p in device.legacy_fat16_partitions() {
        let Some(bs) = &p.boot_sector else {
            continue;
        };

        let translated = bs.translate_for_block_size(target_bps)?;
        tracing::debug!("partition {} translated: {:?}", p.index, translated);

        overlay.seek(SeekFrom::Start(p.start))?;
        overlay.write_all(&translated.encode()?)?;
        count += 1;
    }
    overlay.flush()?;

    tracing::info!("wrote {} translated boot sectors", count);

    Ok(count)
}
