/// Disk geometry and sector addressing

use crate::error::{DfsError, Result};
use crate::format::constants::*;
use std::ops::Range;
use std::path::Path;

/// Physical layout of a DFS image
///
/// Every track holds ten 256-byte sectors. On a double-sided image the
/// tracks of the two heads are either interleaved track by track
/// (`.dsd` style) or stored as two consecutive blocks (`linear`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Number of heads (1 or 2)
    pub heads: u8,
    /// Tracks per side (40 or 80)
    pub tracks: u8,
    /// Each side stored as one contiguous block
    pub linear: bool,
}

/// Caller supplied overrides for geometry resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryHints {
    /// Explicit number of heads
    pub heads: Option<u8>,
    /// Explicit number of tracks
    pub tracks: Option<u8>,
    /// Explicit layout
    pub linear: Option<bool>,
}

impl Geometry {
    /// Create a validated geometry
    pub fn new(heads: u8, tracks: u8, linear: bool) -> Result<Self> {
        if heads != 1 && heads != 2 {
            return Err(DfsError::InvalidGeometry(format!(
                "heads must be 1 or 2, got {}",
                heads
            )));
        }
        if tracks != 40 && tracks != 80 {
            return Err(DfsError::InvalidGeometry(format!(
                "tracks must be 40 or 80, got {}",
                tracks
            )));
        }
        Ok(Self {
            heads,
            tracks,
            linear,
        })
    }

    /// Single-sided 80 track (.ssd)
    pub fn ssd_80() -> Self {
        Self {
            heads: 1,
            tracks: 80,
            linear: false,
        }
    }

    /// Single-sided 40 track
    pub fn ssd_40() -> Self {
        Self {
            heads: 1,
            tracks: 40,
            linear: false,
        }
    }

    /// Double-sided interleaved 80 track (.dsd)
    pub fn dsd_80() -> Self {
        Self {
            heads: 2,
            tracks: 80,
            linear: false,
        }
    }

    /// Double-sided interleaved 40 track
    pub fn dsd_40() -> Self {
        Self {
            heads: 2,
            tracks: 40,
            linear: false,
        }
    }

    /// Sectors on one side
    pub fn sectors_per_side(&self) -> u16 {
        self.tracks as u16 * SECTORS_PER_TRACK as u16
    }

    /// Size of one side in bytes
    pub fn side_size(&self) -> usize {
        self.tracks as usize * TRACK_SIZE
    }

    /// Size of the whole image in bytes
    pub fn total_size(&self) -> usize {
        self.heads as usize * self.side_size()
    }

    fn check_head(&self, head: u8) -> Result<()> {
        if head >= self.heads {
            return Err(DfsError::InvalidHead {
                head,
                heads: self.heads,
            });
        }
        Ok(())
    }

    fn check_track(&self, head: u8, track: u8) -> Result<()> {
        if track >= self.tracks {
            return Err(DfsError::InvalidTrack {
                head,
                track,
                max: self.tracks - 1,
            });
        }
        Ok(())
    }

    fn check_sector(track: u8, sector: u8) -> Result<()> {
        if sector as usize >= SECTORS_PER_TRACK {
            return Err(DfsError::InvalidSector {
                track,
                sector,
                max: SECTORS_PER_TRACK as u8 - 1,
            });
        }
        Ok(())
    }

    /// Byte offset of the first byte of a track
    pub fn track_start(&self, head: u8, track: u8) -> Result<usize> {
        self.check_head(head)?;
        self.check_track(head, track)?;

        let (head, track) = (head as usize, track as usize);
        let index = if self.linear {
            head * self.tracks as usize + track
        } else {
            track * self.heads as usize + head
        };
        Ok(index * TRACK_SIZE)
    }

    /// Byte offset just past the last byte of a track
    pub fn track_end(&self, head: u8, track: u8) -> Result<usize> {
        Ok(self.track_start(head, track)? + TRACK_SIZE)
    }

    /// Byte offset of the first byte of a sector
    pub fn sector_start(&self, head: u8, track: u8, sector: u8) -> Result<usize> {
        Self::check_sector(track, sector)?;
        Ok(self.track_start(head, track)? + sector as usize * SECTOR_SIZE)
    }

    /// Byte offset just past the last byte of a sector
    pub fn sector_end(&self, head: u8, track: u8, sector: u8) -> Result<usize> {
        Ok(self.sector_start(head, track, sector)? + SECTOR_SIZE)
    }

    /// Convert a logical sector number to (track, sector)
    pub fn logical_to_physical(&self, logical: u16) -> Result<(u8, u8)> {
        if logical >= self.sectors_per_side() {
            return Err(DfsError::InvalidLogicalSector {
                sector: logical,
                count: self.sectors_per_side(),
            });
        }
        let spt = SECTORS_PER_TRACK as u16;
        Ok(((logical / spt) as u8, (logical % spt) as u8))
    }

    /// Convert (track, sector) to a logical sector number
    pub fn physical_to_logical(&self, track: u8, sector: u8) -> Result<u16> {
        self.check_track(0, track)?;
        Self::check_sector(track, sector)?;
        Ok(track as u16 * SECTORS_PER_TRACK as u16 + sector as u16)
    }

    /// Byte offset of a logical sector on a head
    pub fn logical_sector_start(&self, head: u8, logical: u16) -> Result<usize> {
        let (track, sector) = self.logical_to_physical(logical)?;
        self.sector_start(head, track, sector)
    }

    /// Byte ranges covering logical sectors `start..end` of a head
    ///
    /// Physically adjacent ranges are merged, so a linear or single-sided
    /// layout always yields at most one range.
    pub fn sector_chunks(&self, head: u8, start: u16, end: u16) -> Result<Vec<Range<usize>>> {
        self.check_head(head)?;
        let count = self.sectors_per_side();
        if end > count {
            return Err(DfsError::InvalidLogicalSector { sector: end, count });
        }
        if start > end {
            return Err(DfsError::InvalidLogicalSector {
                sector: start,
                count,
            });
        }

        let spt = SECTORS_PER_TRACK as u16;
        let mut chunks: Vec<Range<usize>> = Vec::new();
        let mut logical = start;
        while logical < end {
            let (track, sector) = self.logical_to_physical(logical)?;
            let run = (end - logical).min(spt - sector as u16);
            let begin = self.sector_start(head, track, sector)?;
            let range = begin..begin + run as usize * SECTOR_SIZE;

            match chunks.last_mut() {
                Some(last) if last.end == range.start => last.end = range.end,
                _ => chunks.push(range),
            }
            logical += run;
        }

        Ok(chunks)
    }

    /// Byte range of both catalog sectors of a head
    pub fn catalog_range(&self, head: u8) -> Result<Range<usize>> {
        let start = self.sector_start(head, 0, 0)?;
        Ok(start..start + CATALOG_SIZE)
    }

    /// Smallest image size holding the catalogs of every head
    pub fn min_catalog_size(&self) -> usize {
        (0..self.heads)
            .filter_map(|head| self.catalog_range(head).ok())
            .map(|range| range.end)
            .max()
            .unwrap_or(CATALOG_SIZE)
    }

    /// Work out the geometry of an image from its name and contents
    ///
    /// `existing_size` is the size of an existing file and
    /// `catalog_sectors` the sector count read from its first catalog.
    /// Explicit hints always win over inferred values.
    pub fn resolve(
        path: &Path,
        existing_size: Option<usize>,
        catalog_sectors: Option<u16>,
        hints: GeometryHints,
    ) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let extension = extension.as_deref();

        let heads = match hints.heads {
            Some(heads) => heads,
            None => match (extension, existing_size) {
                (Some("dsd"), _) => 2,
                (_, Some(size)) if size > SSD_80_SIZE => 2,
                _ => 1,
            },
        };

        let tracks = match hints.tracks {
            Some(tracks) => tracks,
            None => match existing_size {
                Some(size) if size > heads as usize * SSD_40_SIZE => 80,
                Some(_) if catalog_sectors == Some(SECTORS_40_TRACKS) => 40,
                _ => 80,
            },
        };

        let linear = match hints.linear {
            Some(linear) => linear,
            None => heads == 2 && extension == Some("ssd"),
        };

        let geometry = Self::new(heads, tracks, linear)?;
        log::debug!(
            "resolved geometry for {}: {} heads, {} tracks, linear={}",
            path.display(),
            geometry.heads,
            geometry.tracks,
            geometry.linear
        );
        Ok(geometry)
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::ssd_80()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_geometry() {
        assert!(Geometry::new(3, 80, false).is_err());
        assert!(Geometry::new(1, 35, false).is_err());
        assert!(Geometry::new(2, 40, true).is_ok());
    }

    #[test]
    fn test_track_offsets_interleaved() {
        let g = Geometry::dsd_80();
        assert_eq!(g.track_start(0, 0).unwrap(), 0);
        assert_eq!(g.track_start(1, 0).unwrap(), TRACK_SIZE);
        assert_eq!(g.track_start(0, 1).unwrap(), 2 * TRACK_SIZE);
        assert_eq!(g.track_start(1, 79).unwrap(), 159 * TRACK_SIZE);
    }

    #[test]
    fn test_track_offsets_linear() {
        let g = Geometry::new(2, 40, true).unwrap();
        assert_eq!(g.track_start(0, 39).unwrap(), 39 * TRACK_SIZE);
        assert_eq!(g.track_start(1, 0).unwrap(), 40 * TRACK_SIZE);
    }

    #[test]
    fn test_out_of_range() {
        let g = Geometry::ssd_40();
        assert!(matches!(g.track_start(1, 0), Err(DfsError::InvalidHead { .. })));
        assert!(matches!(g.track_start(0, 40), Err(DfsError::InvalidTrack { .. })));
        assert!(matches!(g.sector_start(0, 0, 10), Err(DfsError::InvalidSector { .. })));
        assert!(g.logical_to_physical(400).is_err());
    }

    #[test]
    fn test_logical_round_trip() {
        let g = Geometry::ssd_80();
        for n in 0..g.sectors_per_side() {
            let (t, s) = g.logical_to_physical(n).unwrap();
            assert_eq!(g.physical_to_logical(t, s).unwrap(), n);
        }
    }

    #[test]
    fn test_chunks_single_sided() {
        let g = Geometry::ssd_80();
        let chunks = g.sector_chunks(0, 5, 25).unwrap();
        assert_eq!(chunks, vec![5 * SECTOR_SIZE..25 * SECTOR_SIZE]);
    }

    #[test]
    fn test_chunks_interleaved() {
        let g = Geometry::dsd_80();
        let chunks = g.sector_chunks(1, 8, 12).unwrap();
        assert_eq!(
            chunks,
            vec![
                TRACK_SIZE + 8 * SECTOR_SIZE..2 * TRACK_SIZE,
                3 * TRACK_SIZE..3 * TRACK_SIZE + 2 * SECTOR_SIZE,
            ]
        );
    }

    #[test]
    fn test_chunks_empty_and_end() {
        let g = Geometry::ssd_40();
        assert!(g.sector_chunks(0, 3, 3).unwrap().is_empty());
        assert_eq!(g.sector_chunks(0, 390, 400).unwrap().len(), 1);
        assert!(g.sector_chunks(0, 390, 401).is_err());
    }

    #[test]
    fn test_resolve_from_extension() {
        let g = Geometry::resolve(Path::new("game.dsd"), None, None, GeometryHints::default())
            .unwrap();
        assert_eq!(g, Geometry::dsd_80());

        let g = Geometry::resolve(Path::new("GAME.SSD"), None, None, GeometryHints::default())
            .unwrap();
        assert_eq!(g, Geometry::ssd_80());
    }

    #[test]
    fn test_resolve_from_size() {
        let g = Geometry::resolve(
            Path::new("disk.img"),
            Some(400 * 1024),
            None,
            GeometryHints::default(),
        )
        .unwrap();
        assert_eq!(g.heads, 2);
        assert_eq!(g.tracks, 80);

        let g = Geometry::resolve(
            Path::new("small.ssd"),
            Some(20 * SECTOR_SIZE),
            Some(SECTORS_40_TRACKS),
            GeometryHints::default(),
        )
        .unwrap();
        assert_eq!(g.tracks, 40);
    }

    #[test]
    fn test_resolve_linear_for_double_sided_ssd() {
        let hints = GeometryHints {
            heads: Some(2),
            ..Default::default()
        };
        let g = Geometry::resolve(Path::new("both.ssd"), None, None, hints).unwrap();
        assert!(g.linear);

        let g = Geometry::resolve(
            Path::new("x.ssd"),
            Some(2 * SSD_80_SIZE),
            None,
            GeometryHints::default(),
        )
        .unwrap();
        assert_eq!(g, Geometry::new(2, 80, true).unwrap());

        let g = Geometry::resolve(
            Path::new("x.ssd"),
            Some(SSD_80_SIZE),
            None,
            GeometryHints::default(),
        )
        .unwrap();
        assert_eq!(g, Geometry::ssd_80());
    }

    #[test]
    fn test_resolve_rejects_bad_hint() {
        let hints = GeometryHints {
            tracks: Some(35),
            ..Default::default()
        };
        assert!(Geometry::resolve(Path::new("x.ssd"), None, None, hints).is_err());
    }
}
