// SPDX-License-Identifier: MPL-2.0

//! xmount cache files, and replaying them into the device they shadow.
//!
//! A cache file is a 512-byte header followed by a block index. Each index record says whether
//! its block was ever written and, if so, where the block's data lives in the cache file. The
//! record's position in the index is its block number on the device.

use std::io::{self, Read, Seek, SeekFrom, Write};

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use tosimg_record::Record;

use crate::Error;

/// `0xffff746e756f6d78` in little-endian order.
pub const SIGNATURE: [u8; 8] = *b"xmount\xff\xff";

#[derive(Clone, Derivative, PartialEq, Eq, Deserialize, Serialize)]
#[derivative(Debug)]
pub struct CacheHeader {
    pub signature: [u8; 8],
    pub version: u32,
    pub block_size: u64,
    pub block_count: u64,
    pub block_index_offset: u64,
    pub vdi_header_cached: u32,
    pub vdi_header_offset: u64,
    pub vmdk_file_cached: u32,
    pub vmdk_file_size: u64,
    pub vmdk_file_offset: u64,
    pub vhd_header_cached: u32,
    pub vhd_header_offset: u64,
    #[derivative(Debug = "ignore")]
    #[serde(with = "serde_arrays")]
    pub padding: [u8; 432],
}

impl Record for CacheHeader {
    const SIZE: usize = 512;
}

impl CacheHeader {
    /// Decodes a header from the first 512 bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let bytes = bytes.get(..Self::SIZE).ok_or_else(|| {
            Error::Format(format!(
                "cache header needs {} bytes, got {}",
                Self::SIZE,
                bytes.len(),
            ))
        })?;

        Ok(tosimg_record::from_bytes(bytes)?)
    }

    pub fn has_known_signature(&self) -> bool {
        self.signature == SIGNATURE
    }
}

#[derive(Deserialize, Serialize)]
struct RawIndexEntry {
    assigned: u32,
    data_offset: u64,
}

impl Record for RawIndexEntry {
    const SIZE: usize = 12;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheBlockIndexEntry {
    /// The block number on the shadowed device.
    pub logical_index: u64,
    /// `1` if the block was written through the cache.
    pub assigned: u32,
    /// Where the block's data starts in the cache file.
    pub data_offset: u64,
}

impl CacheBlockIndexEntry {
    pub fn is_assigned(&self) -> bool {
        self.assigned == 1
    }
}

/// Decodes `block_count` index records from the start of `bytes`.
pub fn parse_block_index(bytes: &[u8], block_count: u64) -> Result<Vec<CacheBlockIndexEntry>, Error> {
    let needed = usize::try_from(block_count)
        .ok()
        .and_then(|it| it.checked_mul(RawIndexEntry::SIZE))
        .ok_or_else(|| Error::Format(format!("block count {} is too large", block_count)))?;
    let bytes = bytes.get(..needed).ok_or_else(|| {
        Error::Format(format!(
            "block index of {} entries needs {} bytes, got {}",
            block_count,
            needed,
            bytes.len(),
        ))
    })?;

    bytes
        .chunks_exact(RawIndexEntry::SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let raw: RawIndexEntry = tosimg_record::from_bytes(chunk)?;

            Ok(CacheBlockIndexEntry {
                logical_index: i as u64,
                assigned: raw.assigned,
                data_offset: raw.data_offset,
            })
        })
        .collect()
}

/// A parsed cache file: its header and block index.
#[derive(Clone, Debug)]
pub struct CacheContainer {
    pub header: CacheHeader,
    pub index: Vec<CacheBlockIndexEntry>,
}

impl CacheContainer {
    /// Reads the header and the block index that immediately follows it.
    pub fn read_from(reader: &mut impl Read) -> Result<Self, Error> {
        let mut header = [0; CacheHeader::SIZE];
        reader
            .read_exact(&mut header)
            .map_err(|e| Error::Format(format!("truncated cache header: {}", e)))?;
        let header = CacheHeader::parse(&header)?;
        tracing::debug!("cache header: {:?}", header);

        if !header.has_known_signature() {
            tracing::warn!("unexpected cache signature {:02x?}", header.signature);
        }
        if header.block_index_offset != CacheHeader::SIZE as u64 {
            tracing::warn!(
                "header places the block index at {}; reading it right after the header",
                header.block_index_offset,
            );
        }

        let len = header
            .block_count
            .checked_mul(RawIndexEntry::SIZE as u64)
            .ok_or_else(|| Error::Format(format!("block count {} is too large", header.block_count)))?;
        let mut bytes = Vec::new();
        reader.by_ref().take(len).read_to_end(&mut bytes)?;
        let index = parse_block_index(&bytes, header.block_count)?;

        Ok(Self { header, index })
    }

    pub fn assigned(&self) -> impl Iterator<Item = &CacheBlockIndexEntry> {
        self.index.iter().filter(|it| it.is_assigned())
    }
}

/// What [`flush`] does with each assigned block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlushMode {
    /// Write the block into the target.
    #[default]
    Apply,
    /// Read the block from the cache but leave the target alone.
    DryRun,
    /// Compare the block against the target without writing.
    Verify,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Assigned blocks that were read from the cache.
    pub assigned: u64,
    /// Blocks written to the target.
    pub written: u64,
    /// In [`FlushMode::Verify`], blocks whose target contents differ from the cache.
    pub mismatched: Vec<u64>,
}

/// Replays every assigned block of `container` from `source` into `target`.
///
/// xmount keeps its cache in the byte order of the swapped view it presented, so each block is
/// swapped back before it reaches `target`. The first failure aborts the flush; blocks already
/// written stay written.
pub fn flush<R, T>(
    container: &CacheContainer,
    source: &mut R,
    target: &mut T,
    mode: FlushMode,
) -> Result<FlushReport, Error>
where
    R: Read + Seek,
    T: Read + Write + Seek,
{
    let mut report = FlushReport::default();

    let block_size = container.header.block_size;
    if container.assigned().next().is_none() {
        tracing::info!("cache holds no written blocks");
        return Ok(report);
    }
    if block_size == 0 {
        return Err(Error::Format("cache block size is zero".into()));
    }
    let buf_len = usize::try_from(block_size)
        .map_err(|_| Error::Format(format!("cache block size {} is too large", block_size)))?;

    let mut block = vec![0; buf_len];
    let mut current = vec![0; buf_len];
    for entry in container.assigned() {
        let index = entry.logical_index;
        let offset = index
            .checked_mul(block_size)
            .ok_or_else(|| Error::Format(format!("block {} lies beyond any device", index)))?;
        let io_err = |source: io::Error| Error::Flush {
            block: index,
            source,
        };

        source.seek(SeekFrom::Start(entry.data_offset)).map_err(io_err)?;
        source.read_exact(&mut block).map_err(io_err)?;
        tosimg_util::swab(&mut block);
        report.assigned += 1;

        match mode {
            FlushMode::Apply => {
                target.seek(SeekFrom::Start(offset)).map_err(io_err)?;
                target.write_all(&block).map_err(io_err)?;
                report.written += 1;
                tracing::debug!("wrote block {} at byte {}", index, offset);
            }
            FlushMode::DryRun => {
                tracing::info!("would write block {} at byte {}", index, offset);
            }
            FlushMode::Verify => {
                target.seek(SeekFrom::Start(offset)).map_err(io_err)?;
                target.read_exact(&mut current).map_err(io_err)?;
                if current != block {
                    tracing::info!("block {} at byte {} differs", index, offset);
                    report.mismatched.push(index);
                }
            }
        }
    }

    if mode == FlushMode::Apply {
        target.flush()?;
    }
    tracing::info!(
        "{} assigned blocks, {} written, {} mismatched",
        report.assigned,
        report.written,
        report.mismatched.len(),
    );

    Ok(report)
}
