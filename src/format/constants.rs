/// DFS format sizes and catalog offsets

/// Size of a sector in bytes
pub const SECTOR_SIZE: usize = 256;

/// Sectors on every track
pub const SECTORS_PER_TRACK: usize = 10;

/// Size of a track in bytes
pub const TRACK_SIZE: usize = SECTOR_SIZE * SECTORS_PER_TRACK;

/// Number of catalog sectors at the start of each side
pub const CATALOG_SECTORS: u16 = 2;

/// Size of both catalog sectors together
pub const CATALOG_SIZE: usize = CATALOG_SECTORS as usize * SECTOR_SIZE;

/// Size of one catalog record
pub const ENTRY_SIZE: usize = 8;

/// Maximum number of files per side
pub const MAX_FILES: usize = 31;

/// Largest valid last-entry offset
pub const MAX_LAST_ENTRY_OFFSET: usize = MAX_FILES * ENTRY_SIZE;

/// Length of a disk title
pub const TITLE_LENGTH: usize = 12;

/// Title bytes stored in the first catalog sector
pub const TITLE_HEAD_LENGTH: usize = 8;

/// Maximum filename length (without directory)
pub const NAME_LENGTH: usize = 7;

/// Default directory character
pub const DEFAULT_DIRECTORY: char = '$';

/// Sectors on a 40-track side
pub const SECTORS_40_TRACKS: u16 = 400;

/// Sectors on an 80-track side
pub const SECTORS_80_TRACKS: u16 = 800;

/// Largest value held by an 18-bit address or length field
pub const MAX_ADDRESS: u32 = 0x3_FFFF;

/// Largest value held by the 10-bit start sector field
pub const MAX_START_SECTOR: u16 = 0x3FF;

/// Reserved bits of the option byte
pub const OPT_RESERVED_BITS: u8 = 0xCC;

/// Offsets within the second catalog sector
pub mod catalog2 {
    /// Sequence number (BCD)
    pub const SEQUENCE: usize = 4;
    /// Offset of the last entry (8 * file count)
    pub const LAST_ENTRY: usize = 5;
    /// Boot option and sector-count high bits
    pub const OPT: usize = 6;
    /// Sector-count low byte
    pub const SECTORS_LO: usize = 7;
}

/// Size of a single-sided 80-track image
pub const SSD_80_SIZE: usize = 80 * TRACK_SIZE;

/// Size of a single-sided 40-track image
pub const SSD_40_SIZE: usize = 40 * TRACK_SIZE;

/// Number of disk slots in an MMB container
pub const MMB_SLOTS: usize = 511;

/// Size of one MMB index record
pub const MMB_RECORD_SIZE: usize = 16;

/// Size of the MMB index block (onboot record plus one record per slot)
pub const MMB_INDEX_SIZE: usize = (MMB_SLOTS + 1) * MMB_RECORD_SIZE;

/// Size of one MMB disk slot (80 tracks, one side)
pub const MMB_SLOT_SIZE: usize = SSD_80_SIZE;

/// Size of a fully allocated MMB container
pub const MMB_FILE_SIZE: usize = MMB_INDEX_SIZE + MMB_SLOTS * MMB_SLOT_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(TRACK_SIZE, 2560);
        assert_eq!(SSD_80_SIZE, 204_800);
        assert_eq!(MAX_LAST_ENTRY_OFFSET, 248);
        assert_eq!(CATALOG_SIZE, 512);
        assert_eq!(MMB_INDEX_SIZE, 8192);
        assert_eq!(MMB_FILE_SIZE, 8192 + 511 * 204_800);
    }
}
