// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Presents an Atari TOS disk image as a FAT16 volume without copying it.
//!
//! The translated FAT16 boot sectors live in a small sparse *overlay* file. A device-mapper table
//! stitches that overlay together with the untouched original image, sector by sector, and the
//! host mounts the result. Writes made by the host land in an xmount cache file, which is
//! replayed into the original medium on teardown.

pub mod cache;
pub mod diff;
pub mod map;
pub mod overlay;
pub mod partition;

use std::io;

pub use cache::{CacheContainer, FlushMode, FlushReport};
pub use map::CompositeRangeMap;
pub use partition::{Device, MediaProbe, Partition, PartitionKind};
pub use tosimg_bootsector::BootSector;

/// The sector size of the device-mapper address space.
pub const SECTOR_SIZE: u64 = 512;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("cannot rescale {source_bps}-byte sectors to {target_bps}-byte sectors")]
    UnsupportedGeometry { source_bps: u16, target_bps: u16 },
    #[error("`{step}` failed ({status}): {stderr}")]
    ExternalTool {
        step: String,
        status: String,
        stderr: String,
    },
    #[error("{0}")]
    Precondition(String),
    #[error("device is busy or unreadable: {}", diagnostics.join("; "))]
    DeviceUnreadable { diagnostics: Vec<String> },
    #[error("sector {sector} lies beyond the end of a {total}-sector device")]
    SectorOutOfRange { sector: u64, total: u64 },
    #[error("failed to flush cache block {block}")]
    Flush { block: u64, source: io::Error },
}

impl From<tosimg_bootsector::Error> for Error {
    fn from(e: tosimg_bootsector::Error) -> Self {
        match e {
            tosimg_bootsector::Error::UnsupportedGeometry {
                source_bps,
                target_bps,
            } => Self::UnsupportedGeometry {
                source_bps,
                target_bps,
            },
            e => Self::Format(e.to_string()),
        }
    }
}

impl From<tosimg_record::Error> for Error {
    fn from(e: tosimg_record::Error) -> Self {
        Self::Format(e.to_string())
    }
}
