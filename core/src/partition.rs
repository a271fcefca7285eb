// SPDX-License-Identifier: MPL-2.0

//! Partition layouts, as reported by `parted -s <device> unit b print`.
//!
//! The human-readable report is parsed because parted's machine-readable mode (`-m`) leaves out
//! the partition type, which decides whether a partition carries a boot sector.

use std::{
    fmt,
    io::{Read, Seek, SeekFrom},
};

use tosimg_bootsector::BootSector;

use crate::{Error, SECTOR_SIZE};

/// What `parted` printed for one device.
#[derive(Clone, Debug, Default)]
pub struct PartedReport {
    pub stdout: String,
    pub stderr: String,
}

impl PartedReport {
    /// The lines parted wrote to stderr, if any.
    pub fn diagnostics(&self) -> Vec<String> {
        self.stderr
            .lines()
            .filter(|it| !it.trim().is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    Primary,
    Logical,
    Extended,
    /// Any other tag, kept verbatim.
    Other(String),
}

impl PartitionKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "primary" => Self::Primary,
            "logical" => Self::Logical,
            "extended" => Self::Extended,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Primary => "primary",
            Self::Logical => "logical",
            Self::Extended => "extended",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct Partition {
    pub index: u32,
    /// The first byte of this partition.
    pub start: u64,
    /// The last byte of this partition, inclusive.
    pub end: u64,
    pub size: u64,
    pub kind: PartitionKind,
    pub boot_sector: Option<BootSector>,
}

impl Partition {
    fn parse_row(line: &str) -> Result<Self, Error> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Trailing columns (file system, flags) are optional and ignored.
        if fields.len() < 5 {
            return Err(Error::Parse(format!("partition row has too few columns: {:?}", line)));
        }

        let index = fields[0]
            .parse()
            .map_err(|_| Error::Parse(format!("bad partition number in {:?}", line)))?;
        let start = parse_bytes(fields[1])?;
        let end = parse_bytes(fields[2])?;
        let size = parse_bytes(fields[3])?;

        if size == 0 || end.checked_sub(start) != Some(size - 1) {
            return Err(Error::Parse(format!(
                "partition {} spans {}..={} but claims {} bytes",
                index, start, end, size,
            )));
        }

        Ok(Self {
            index,
            start,
            end,
            size,
            kind: PartitionKind::from_tag(fields[4]),
            boot_sector: None,
        })
    }

    /// Whether this kind of partition begins with a boot sector.
    pub fn has_boot_sector(&self) -> bool {
        matches!(self.kind, PartitionKind::Primary | PartitionKind::Logical)
    }

    pub fn is_legacy_fat16(&self) -> bool {
        self.boot_sector
            .as_ref()
            .map_or(false, BootSector::is_recognized_variant)
    }
}

#[derive(Clone, Debug)]
pub struct Device {
    /// The size of the device in bytes.
    pub size: u64,
    pub partitions: Vec<Partition>,
}

impl Device {
    /// Builds a device from a parted report.
    ///
    /// Anything parted wrote to stderr makes the device unreadable.
    pub fn load(report: &PartedReport) -> Result<Self, Error> {
        let diagnostics = report.diagnostics();
        if !diagnostics.is_empty() {
            return Err(Error::DeviceUnreadable { diagnostics });
        }

        Self::parse(&report.stdout)
    }

    pub fn parse(text: &str) -> Result<Self, Error> {
        let lines: Vec<&str> = text.lines().collect();

        let header = lines
            .iter()
            .position(|it| it.starts_with("Number"))
            .ok_or_else(|| Error::Parse("no partition table header in parted report".into()))?;

        let size = lines[..header]
            .iter()
            .filter_map(|it| it.split_once(": "))
            .filter(|(key, _)| key.starts_with("Disk"))
            .map(|(_, value)| value.trim())
            .find(|value| value.ends_with('B'))
            .ok_or_else(|| Error::Parse("no disk size in parted report".into()))
            .and_then(parse_bytes)?;

        let partitions = lines[header + 1..]
            .iter()
            .filter(|it| !it.trim().is_empty())
            .map(|it| Partition::parse_row(it))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("device of {} bytes with {} partitions", size, partitions.len());

        Ok(Self { size, partitions })
    }

    /// Reads the boot sector of every primary and logical partition from `reader`.
    pub fn read_boot_sectors(&mut self, reader: &mut (impl Read + Seek)) -> Result<(), Error> {
        for p in self.partitions.iter_mut().filter(|it| it.has_boot_sector()) {
            let mut bytes = [0; tosimg_bootsector::SIZE];
            reader.seek(SeekFrom::Start(p.start))?;
            reader.read_exact(&mut bytes)?;

            let bs = BootSector::decode(&bytes)?;
            tracing::debug!("partition {}: {:?}", p.index, bs);
            p.boot_sector = Some(bs);
        }

        Ok(())
    }

    pub fn legacy_fat16_partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(|it| it.is_legacy_fat16())
    }

    /// The size of the device in 512-byte sectors, rounded down.
    pub fn total_sectors(&self) -> u64 {
        self.size / SECTOR_SIZE
    }

    /// The parted commands that recreate this layout, with every data partition typed FAT16.
    pub fn mkpart_script(&self) -> Vec<String> {
        let mut commands = vec!["mktable msdos".to_owned(), "unit b".to_owned()];
        for p in &self.partitions {
            commands.push(match p.kind {
                PartitionKind::Extended => format!("mkpart extended {} {}", p.start, p.end),
                ref kind => format!("mkpart {} fat16 {} {}", kind, p.start, p.end),
            });
        }

        commands
    }
}

/// The outcome of asking parted about a raw image.
///
/// parted cannot make sense of TOS media as written by an Atari, since the partition table is
/// stored byte-swapped. An image it complains about is therefore treated as byte-swapped and
/// gets presented through a swapping layer first.
#[derive(Debug)]
pub enum MediaProbe {
    Native(Device),
    ByteSwapped { diagnostics: Vec<String> },
}

impl MediaProbe {
    pub fn classify(report: &PartedReport) -> Result<Self, Error> {
        match Device::load(report) {
            Ok(device) => Ok(Self::Native(device)),
            Err(Error::DeviceUnreadable { diagnostics }) => {
                tracing::warn!("parted could not read the partition table; assuming byte-swapped media");
                for line in &diagnostics {
                    tracing::debug!("parted: {}", line);
                }

                Ok(Self::ByteSwapped { diagnostics })
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_byte_swapped(&self) -> bool {
        matches!(self, Self::ByteSwapped { .. })
    }
}

fn parse_bytes(field: &str) -> Result<u64, Error> {
    field
        .strip_suffix('B')
        .unwrap_or(field)
        .parse()
        .map_err(|_| Error::Parse(format!("expected a byte count, found {:?}", field)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::io::Cursor;

    pub(crate) const SD_CARD_REPORT: &str = "\
Model: Generic STORAGE DEVICE (scsi)
Disk /dev/sdb: 10485760B
Sector size (logical/physical): 512B/512B
Partition Table: msdos
Disk Flags:

Number  Start     End        Size      Type     File system  Flags
 1      1048576B  10485759B  9437184B  primary

";

    const MIXED_REPORT: &str = "\
Model:  (file)
Disk /tmp/card.img: 16777216B
Sector size (logical/physical): 512B/512B
Partition Table: msdos
Disk Flags:

Number  Start     End        Size       Type      File system  Flags
 1      512B      4194815B   4194304B   primary   fat16        boot
 2      4194816B  16777215B  12582400B  extended               lba
 5      4195328B  8389631B   4194304B   logical
";

    #[test]
    fn parses_single_partition() {
        let device = Device::parse(SD_CARD_REPORT).unwrap();
        assert_eq!(device.size, 10 * 1024 * 1024);
        assert_eq!(device.total_sectors(), 20480);
        assert_eq!(device.partitions.len(), 1);

        let p = &device.partitions[0];
        assert_eq!(p.index, 1);
        assert_eq!(p.start, 1048576);
        assert_eq!(p.end, 10485759);
        assert_eq!(p.size, 9437184);
        assert_eq!(p.kind, PartitionKind::Primary);
        assert!(p.boot_sector.is_none());
    }

    #[test]
    fn tolerates_trailing_columns() {
        let device = Device::parse(MIXED_REPORT).unwrap();
        let kinds: Vec<&str> = device.partitions.iter().map(|it| it.kind.as_str()).collect();
        assert_eq!(kinds, ["primary", "extended", "logical"]);
        assert_eq!(device.partitions[2].index, 5);
    }

    #[test]
    fn missing_header_is_a_parse_error() {
        let err = Device::parse("Disk /dev/sdb: 10485760B\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "{err:?}");
    }

    #[test]
    fn missing_size_is_a_parse_error() {
        let err = Device::parse("Number  Start  End  Size  Type\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "{err:?}");
    }

    #[test]
    fn inconsistent_row_is_a_parse_error() {
        let report = SD_CARD_REPORT.replace("9437184B", "9437000B");
        assert!(matches!(Device::parse(&report), Err(Error::Parse(_))));
    }

    #[test]
    fn stderr_means_unreadable() {
        let report = PartedReport {
            stdout: String::new(),
            stderr: "Error: /dev/sdb: unrecognised disk label\n".into(),
        };
        match Device::load(&report) {
            Err(Error::DeviceUnreadable { diagnostics }) => {
                assert_eq!(diagnostics, ["Error: /dev/sdb: unrecognised disk label"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn probe_classifies_complaints_as_byte_swapped() {
        let swapped = PartedReport {
            stdout: String::new(),
            stderr: "Error: /dev/sdb: unrecognised disk label\n".into(),
        };
        assert!(MediaProbe::classify(&swapped).unwrap().is_byte_swapped());

        let native = PartedReport {
            stdout: SD_CARD_REPORT.into(),
            stderr: String::new(),
        };
        assert!(!MediaProbe::classify(&native).unwrap().is_byte_swapped());

        // A clean but unparsable report is still an error, not a classification.
        let garbage = PartedReport {
            stdout: "nothing useful".into(),
            stderr: String::new(),
        };
        assert!(matches!(MediaProbe::classify(&garbage), Err(Error::Parse(_))));
    }

    #[test]
    fn reads_boot_sectors_of_data_partitions_only() {
        let mut device = Device::parse(MIXED_REPORT).unwrap();
        let mut image = vec![0u8; 4195840];
        let variant_at = 0x36;
        for start in [512usize, 4195328] {
            image[start + variant_at..start + variant_at + 8].copy_from_slice(b"FAT16   ");
        }

        device.read_boot_sectors(&mut Cursor::new(image)).unwrap();

        assert!(device.partitions[0].is_legacy_fat16());
        assert!(device.partitions[1].boot_sector.is_none());
        assert!(!device.partitions[1].is_legacy_fat16());
        assert!(device.partitions[2].is_legacy_fat16());
        assert_eq!(device.legacy_fat16_partitions().count(), 2);
    }

    #[test]
    fn short_image_fails_to_yield_boot_sector() {
        let mut device = Device::parse(SD_CARD_REPORT).unwrap();
        let err = device
            .read_boot_sectors(&mut Cursor::new(vec![0u8; 1048576 + 100]))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)), "{err:?}");
    }

    #[test]
    fn mkpart_script_recreates_layout() {
        let device = Device::parse(MIXED_REPORT).unwrap();
        assert_eq!(
            device.mkpart_script(),
            [
                "mktable msdos",
                "unit b",
                "mkpart primary fat16 512 4194815",
                "mkpart extended 4194816 16777215",
                "mkpart logical fat16 4195328 8389631",
            ],
        );
    }
}
