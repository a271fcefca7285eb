// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot sectors of Atari TOS FAT16 partitions and their translation into boot sectors that a
//! DOS/Linux FAT16 driver accepts.
//!
//! TOS formats large partitions with huge logical sectors (up to 16 KiB) so that the sector count
//! fits the 16-bit `sector_count` field. Host drivers reject such sector sizes, so the translated
//! boot sector re-expresses the same byte extents in smaller sectors and moves the count into
//! `large_sector_count`.

mod label;

use derivative::Derivative;
use serde::{Deserialize, Serialize};

pub use label::Label;

/// The size, in bytes, of a boot sector.
pub const SIZE: usize = 512;

/// The signature of a boot sector that a host will mount.
pub const SIGNATURE: u16 = 0xaa55;

/// The sector size that translated boot sectors use unless told otherwise.
pub const DEFAULT_HOST_BPS: u16 = 4096;

/// The two encodings of the FAT16 variant tag found on TOS media.
pub const FAT16_VARIANTS: [[u8; 8]; 2] = [*b"\xff\xff?<\x00HNA", *b"FAT16   "];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("boot sector is {len} bytes; expected 512")]
    BadLength { len: usize },
    #[error("malformed boot sector: {0}")]
    Record(#[from] tosimg_record::Error),
    #[error("cannot rescale {source_bps}-byte sectors to {target_bps}-byte sectors")]
    UnsupportedGeometry { source_bps: u16, target_bps: u16 },
    #[error("`{field}` does not fit in {bits} bits after rescaling (value {value})")]
    FieldOverflow {
        field: &'static str,
        bits: u32,
        value: u64,
    },
}

/// A FAT16 boot sector with its BIOS parameter block.
///
/// Fields appear in on-disk order; multi-byte integers are little-endian.
#[derive(Clone, Derivative, PartialEq, Eq, Deserialize, Serialize)]
#[derivative(Debug)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub oem: Label<8>,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub sector_count: u16,
    pub media: u8,
    pub sectors_per_fat: u16,
    pub sectors_per_track: u16,
    pub head_count: u16,
    pub hidden_sectors: u32,
    pub large_sector_count: u32,
    /// Drive number, reserved byte and extended boot signature.
    #[derivative(Debug = "ignore")]
    pub ext: [u8; 3],
    pub volume_id: u32,
    pub volume_label: Label<11>,
    pub variant: Label<8>,
    #[derivative(Debug = "ignore")]
    #[serde(with = "serde_arrays")]
    pub boot_code: [u8; 448],
    pub signature: u16,
}

impl BootSector {
    /// Decodes a boot sector from exactly [`SIZE`] bytes.
    ///
    /// The signature is not checked; TOS boot sectors rarely carry `0xaa55`.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SIZE {
            return Err(Error::BadLength { len: bytes.len() });
        }

        let bs: Self = tosimg_record::from_bytes(bytes)?;
        tracing::trace!("decoded boot sector: {:?}", bs);

        Ok(bs)
    }

    pub fn encode(&self) -> Result<[u8; SIZE], Error> {
        let bytes = tosimg_record::to_bytes(self)?;
        let len = bytes.len();

        bytes.try_into().map_err(|_| Error::BadLength { len })
    }

    /// Whether the variant tag marks this as a TOS FAT16 partition.
    pub fn is_recognized_variant(&self) -> bool {
        FAT16_VARIANTS.contains(self.variant.as_bytes())
    }

    /// Derives the boot sector a host driver should see, using `target_bps`-byte sectors.
    ///
    /// Every sector-denominated geometry field is multiplied by `bytes_per_sector / target_bps`
    /// so byte extents stay the same. `sector_count` is zeroed and the total moves to
    /// `large_sector_count`. A field that no longer fits its width is an error.
    pub fn translate_for_block_size(&self, target_bps: u16) -> Result<Self, Error> {
        let source_bps = self.bytes_per_sector;
        if target_bps == 0 || source_bps == 0 || source_bps % target_bps != 0 {
            return Err(Error::UnsupportedGeometry {
                source_bps,
                target_bps,
            });
        }

        let factor = u64::from(source_bps / target_bps);
        tracing::debug!(
            "rescaling {}-byte sectors to {}-byte sectors (factor {})",
            source_bps,
            target_bps,
            factor,
        );

        if self.sector_count == 0 {
            tracing::warn!("legacy boot sector has a zero sector count; translated volume will be empty");
        }

        Ok(Self {
            bytes_per_sector: target_bps,
            sectors_per_cluster: scale("sectors_per_cluster", self.sectors_per_cluster, factor)?,
            reserved_sectors: scale("reserved_sectors", self.reserved_sectors, factor)?,
            sector_count: 0,
            sectors_per_fat: scale("sectors_per_fat", self.sectors_per_fat, factor)?,
            large_sector_count: scale("large_sector_count", u32::from(self.sector_count), factor)?,
            signature: SIGNATURE,
            ..self.clone()
        })
    }

    /// The byte extents of the regions this boot sector describes.
    pub fn extents(&self) -> Extents {
        let bps = u64::from(self.bytes_per_sector);
        let sectors = if self.sector_count != 0 {
            u64::from(self.sector_count)
        } else {
            u64::from(self.large_sector_count)
        };

        Extents {
            reserved: u64::from(self.reserved_sectors) * bps,
            fat: u64::from(self.sectors_per_fat) * bps,
            cluster: u64::from(self.sectors_per_cluster) * bps,
            total: sectors * bps,
        }
    }
}

/// Byte sizes derived from a boot sector's geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extents {
    pub reserved: u64,
    /// The size of one FAT.
    pub fat: u64,
    pub cluster: u64,
    pub total: u64,
}

fn scale<T>(field: &'static str, value: T, factor: u64) -> Result<T, Error>
where
    T: Into<u64> + TryFrom<u64>,
{
    let bits = (std::mem::size_of::<T>() * 8) as u32;
    // Fields are at most 32 bits wide and the factor fits in 16 bits, so this cannot overflow.
    let value = value.into() * factor;

    T::try_from(value).map_err(|_| Error::FieldOverflow { field, bits, value })
}
