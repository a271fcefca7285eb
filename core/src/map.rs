// SPDX-License-Identifier: MPL-2.0

//! Device-mapper tables that splice the overlay into the original image.

use std::{collections::BTreeSet, fmt, iter};

use crate::Error;

/// A run of sectors served linearly from one backing device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Range<S> {
    pub start: u64,
    pub len: u64,
    pub source: S,
    /// Where the run begins on `source`.
    pub offset: u64,
}

impl<S: fmt::Display> fmt::Display for Range<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} linear {} {}", self.start, self.len, self.source, self.offset)
    }
}

/// An ordered set of [`Range`]s that covers `[0, total_sectors)` exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeRangeMap<S> {
    ranges: Vec<Range<S>>,
    total_sectors: u64,
}

impl<S: Clone> CompositeRangeMap<S> {
    /// Routes every sector in `diff` to `overlay` and everything else to `base`.
    ///
    /// Each diff sector gets its own single-sector range, even when neighbouring sectors are also
    /// in `diff`. The gaps between them are served from `base` at the same offsets.
    pub fn build(
        diff: &BTreeSet<u64>,
        total_sectors: u64,
        overlay: S,
        base: S,
    ) -> Result<Self, Error> {
        if let Some(&sector) = diff.range(total_sectors..).next() {
            return Err(Error::SectorOutOfRange {
                sector,
                total: total_sectors,
            });
        }

        let mut ranges = Vec::with_capacity(2 * diff.len() + 1);

        let first = diff.iter().next().copied().unwrap_or(total_sectors);
        if first > 0 {
            ranges.push(Range {
                start: 0,
                len: first,
                source: base.clone(),
                offset: 0,
            });
        }

        let ends = diff.iter().copied().skip(1).chain(iter::once(total_sectors));
        for (start, end) in diff.iter().copied().zip(ends) {
            ranges.push(Range {
                start,
                len: 1,
                source: overlay.clone(),
                offset: start,
            });
            if end - start > 1 {
                ranges.push(Range {
                    start: start + 1,
                    len: end - start - 1,
                    source: base.clone(),
                    offset: start + 1,
                });
            }
        }

        tracing::debug!("{} ranges over {} sectors", ranges.len(), total_sectors);

        Ok(Self {
            ranges,
            total_sectors,
        })
    }
}

impl<S> CompositeRangeMap<S> {
    pub fn ranges(&self) -> &[Range<S>] {
        &self.ranges
    }

    pub fn total_sectors(&self) -> u64 {
        self.total_sectors
    }
}

/// Renders the map as a `dmsetup` table, one `linear` target per line.
impl<S: fmt::Display> fmt::Display for CompositeRangeMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", range)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::Rng as _;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Dev {
        Overlay,
        Base,
    }

    fn range(start: u64, len: u64, source: Dev, offset: u64) -> Range<Dev> {
        Range {
            start,
            len,
            source,
            offset,
        }
    }

    fn check_cover(map: &CompositeRangeMap<Dev>, diff: &BTreeSet<u64>) {
        let mut next = 0;
        for r in map.ranges() {
            assert_eq!(r.start, next, "gap or overlap at {}", next);
            assert!(r.len > 0);
            assert_eq!(r.offset, r.start);
            next = r.start + r.len;
        }
        assert_eq!(next, map.total_sectors());

        for &sector in diff {
            let r = map
                .ranges()
                .iter()
                .find(|it| it.start <= sector && sector < it.start + it.len)
                .unwrap();
            assert_eq!(*r, range(sector, 1, Dev::Overlay, sector));
        }
    }

    #[test]
    fn ten_mib_card_with_one_translated_boot_sector() {
        let diff = BTreeSet::from([2048]);
        let map = CompositeRangeMap::build(&diff, 20480, Dev::Overlay, Dev::Base).unwrap();

        assert_eq!(
            map.ranges(),
            [
                range(0, 2048, Dev::Base, 0),
                range(2048, 1, Dev::Overlay, 2048),
                range(2049, 18431, Dev::Base, 2049),
            ],
        );
    }

    #[test]
    fn adjacent_diff_sectors_get_separate_ranges() {
        let diff = BTreeSet::from([0, 1, 2, 10]);
        let map = CompositeRangeMap::build(&diff, 12, Dev::Overlay, Dev::Base).unwrap();

        assert_eq!(
            map.ranges(),
            [
                range(0, 1, Dev::Overlay, 0),
                range(1, 1, Dev::Overlay, 1),
                range(2, 1, Dev::Overlay, 2),
                range(3, 7, Dev::Base, 3),
                range(10, 1, Dev::Overlay, 10),
                range(11, 1, Dev::Base, 11),
            ],
        );
    }

    #[test]
    fn last_sector_in_diff() {
        let diff = BTreeSet::from([0, 99]);
        let map = CompositeRangeMap::build(&diff, 100, Dev::Overlay, Dev::Base).unwrap();
        check_cover(&map, &diff);
        assert_eq!(map.ranges().last(), Some(&range(99, 1, Dev::Overlay, 99)));
    }

    #[test]
    fn empty_diff_is_all_base() {
        let map = CompositeRangeMap::build(&BTreeSet::new(), 20480, Dev::Overlay, Dev::Base)
            .unwrap();
        assert_eq!(map.ranges(), [range(0, 20480, Dev::Base, 0)]);
    }

    #[test]
    fn empty_device_has_no_ranges() {
        let map = CompositeRangeMap::build(&BTreeSet::new(), 0, Dev::Overlay, Dev::Base).unwrap();
        assert!(map.ranges().is_empty());
    }

    #[test]
    fn diff_beyond_device_is_rejected() {
        let diff = BTreeSet::from([3, 20480]);
        assert!(matches!(
            CompositeRangeMap::build(&diff, 20480, Dev::Overlay, Dev::Base),
            Err(Error::SectorOutOfRange {
                sector: 20480,
                total: 20480,
            })
        ));
    }

    #[test]
    fn random_diffs_cover_the_device() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let total = rng.gen_range(1..5000u64);
            let count = rng.gen_range(0..64);
            let diff: BTreeSet<u64> = (0..count).map(|_| rng.gen_range(0..total)).collect();

            let map = CompositeRangeMap::build(&diff, total, Dev::Overlay, Dev::Base).unwrap();
            check_cover(&map, &diff);

            let overlay_sectors: u64 = map
                .ranges()
                .iter()
                .filter(|it| it.source == Dev::Overlay)
                .map(|it| it.len)
                .sum();
            assert_eq!(overlay_sectors, diff.len() as u64);
        }
    }

    #[test]
    fn renders_dmsetup_table() {
        let diff = BTreeSet::from([2048]);
        let map = CompositeRangeMap::build(&diff, 20480, "/dev/loop1", "/dev/loop0").unwrap();

        assert_eq!(
            map.to_string(),
            "0 2048 linear /dev/loop0 0\n\
             2048 1 linear /dev/loop1 2048\n\
             2049 18431 linear /dev/loop0 2049",
        );
    }
}
