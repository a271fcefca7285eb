// SPDX-License-Identifier: MPL-2.0

//! Finding the sectors of an overlay file that are not all zero.

use std::{
    collections::BTreeSet,
    fs::File,
    io::{self, Cursor, Read, Seek, SeekFrom},
    num::NonZeroU64,
    ops::Range,
};

use crate::{Error, SECTOR_SIZE};

/// How much of an extent is read at a time.
const CHUNK_SIZE: u64 = 1 << 20;

/// A byte source that knows where its holes are.
pub trait Sparse: Read + Seek {
    /// Byte ranges that may contain data, in ascending order. Everything outside them reads as
    /// zero.
    fn data_extents(&mut self) -> io::Result<Vec<Range<u64>>>;
}

impl<T: AsRef<[u8]>> Sparse for Cursor<T> {
    fn data_extents(&mut self) -> io::Result<Vec<Range<u64>>> {
        Ok(vec![0..self.get_ref().as_ref().len() as u64])
    }
}

impl Sparse for File {
    #[cfg(target_os = "linux")]
    fn data_extents(&mut self) -> io::Result<Vec<Range<u64>>> {
        use std::os::unix::io::AsRawFd as _;

        let len = self.metadata()?.len();
        let fd = self.as_raw_fd();

        let mut extents = Vec::new();
        let mut pos = 0;
        while pos < len {
            let data = match lseek(fd, pos, libc::SEEK_DATA) {
                Ok(it) => it,
                // No more data past `pos`.
                Err(e) if e.raw_os_error() == Some(libc::ENXIO) => break,
                // The file system cannot report holes.
                Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                    extents.push(pos..len);
                    break;
                }
                Err(e) => return Err(e),
            };
            let hole = lseek(fd, data, libc::SEEK_HOLE)?.min(len);
            extents.push(data..hole);
            pos = hole;
        }

        tracing::trace!("data extents: {:?}", extents);

        Ok(extents)
    }

    #[cfg(not(target_os = "linux"))]
    fn data_extents(&mut self) -> io::Result<Vec<Range<u64>>> {
        Ok(vec![0..self.metadata()?.len()])
    }
}

#[cfg(target_os = "linux")]
fn lseek(fd: std::os::unix::io::RawFd, offset: u64, whence: libc::c_int) -> io::Result<u64> {
    let offset = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;

    // SAFETY: `fd` belongs to a `File` that is borrowed for the duration of this call.
    let ret = unsafe { libc::lseek(fd, offset, whence) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as u64)
    }
}

const DEFAULT_SECTOR_SIZE: NonZeroU64 = match NonZeroU64::new(SECTOR_SIZE) {
    Some(it) => it,
    None => panic!("sector size must not be zero"),
};

/// Finds the 512-byte sectors of `src` that hold at least one nonzero byte.
pub fn find_nonzero_sectors(src: &mut impl Sparse) -> Result<BTreeSet<u64>, Error> {
    find_nonzero_sectors_with_size(src, DEFAULT_SECTOR_SIZE)
}

/// Finds the `sector_size`-byte sectors of `src` that hold at least one nonzero byte.
///
/// Only the data extents of `src` are read.
pub fn find_nonzero_sectors_with_size(
    src: &mut impl Sparse,
    sector_size: NonZeroU64,
) -> Result<BTreeSet<u64>, Error> {
    let sector_size = sector_size.get();
    // Whole sectors per read, so sector boundaries never straddle two chunks.
    let chunk_size = (CHUNK_SIZE / sector_size).max(1) * sector_size;

    let mut sectors = BTreeSet::new();
    let mut buf = Vec::new();
    for extent in src.data_extents()? {
        let mut pos = extent.start - extent.start % sector_size;
        src.seek(SeekFrom::Start(pos))?;

        while pos < extent.end {
            let len = chunk_size.min(extent.end - pos);
            buf.resize(len as usize, 0);
            src.read_exact(&mut buf)?;

            for (i, sector) in buf.chunks(sector_size as usize).enumerate() {
                if sector.iter().any(|it| *it != 0) {
                    sectors.insert(pos / sector_size + i as u64);
                }
            }
            pos += len;
        }
    }

    tracing::debug!("{} nonzero sectors", sectors.len());

    Ok(sectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{io::Write as _, path::PathBuf};

    use rand::Rng as _;

    fn scratch_file(name: &str) -> (PathBuf, File) {
        let path = std::env::temp_dir().join(format!("tosimg-{}-{}", std::process::id(), name));
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        (path, file)
    }

    #[test]
    fn all_zero_blob_has_no_sectors() {
        let mut blob = Cursor::new(vec![0u8; 64 * 1024]);
        assert!(find_nonzero_sectors(&mut blob).unwrap().is_empty());
    }

    #[test]
    fn empty_blob_has_no_sectors() {
        let mut blob = Cursor::new(Vec::<u8>::new());
        assert!(find_nonzero_sectors(&mut blob).unwrap().is_empty());
    }

    #[test]
    fn single_nonzero_byte_names_its_sector() {
        let mut rng = rand::thread_rng();
        let len = 3 * CHUNK_SIZE as usize + 700;
        for _ in 0..16 {
            let k = rng.gen_range(0..len);
            let mut data = vec![0u8; len];
            data[k] = rng.gen_range(1..=255);

            let sectors = find_nonzero_sectors(&mut Cursor::new(data)).unwrap();
            assert_eq!(sectors.into_iter().collect::<Vec<_>>(), [k as u64 / 512], "k = {}", k);
        }
    }

    #[test]
    fn sectors_come_back_sorted_and_deduplicated() {
        let mut data = vec![0u8; 8192];
        for k in [5000, 0, 511, 512, 5001, 8191] {
            data[k] = 1;
        }

        let sectors = find_nonzero_sectors(&mut Cursor::new(data)).unwrap();
        assert_eq!(sectors.into_iter().collect::<Vec<_>>(), [0, 1, 9, 15]);
    }

    #[test]
    fn partial_trailing_sector_counts() {
        let mut data = vec![0u8; 1000];
        data[999] = 0xff;

        let sectors = find_nonzero_sectors(&mut Cursor::new(data)).unwrap();
        assert_eq!(sectors.into_iter().collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn honours_custom_sector_size() {
        let mut data = vec![0u8; 16384];
        data[4096] = 1;

        let sectors =
            find_nonzero_sectors_with_size(&mut Cursor::new(data), NonZeroU64::new(4096).unwrap())
                .unwrap();
        assert_eq!(sectors.into_iter().collect::<Vec<_>>(), [1]);
    }

    #[test]
    fn sparse_file_only_reports_written_sectors() {
        let (path, mut file) = scratch_file("sparse");
        file.set_len(10 * 1024 * 1024).unwrap();
        file.seek(SeekFrom::Start(1048576)).unwrap();
        file.write_all(&[0xeb; 512]).unwrap();
        file.flush().unwrap();

        let extents = file.data_extents().unwrap();
        let covered: u64 = extents.iter().map(|it| it.end - it.start).sum();
        assert!(covered >= 512);
        assert!(extents.iter().any(|it| it.contains(&1048576)));

        let sectors = find_nonzero_sectors(&mut file).unwrap();
        assert_eq!(sectors.into_iter().collect::<Vec<_>>(), [2048]);

        std::fs::remove_file(path).unwrap();
    }
}
