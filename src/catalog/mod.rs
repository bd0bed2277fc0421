/// Catalog of one disk side
///
/// The catalog occupies logical sectors 0 and 1 of a side. Sector 0
/// holds the first 8 title characters followed by 31 name records,
/// sector 1 the remaining 4 title characters, the sequence number,
/// the last entry offset, the option byte, the sector count and 31
/// attribute records.

/// Entry records and names
pub mod entry;

pub use entry::{
    fold_address, is_valid_name_char, sectors_for, validate_directory, validate_filename,
    EntryRecord, FileEntry, ParsedName,
};

use crate::error::{DfsError, Result};
use crate::format::constants::*;
use crate::format::BootOption;

/// View over both catalog sectors of a side
#[derive(Debug)]
pub struct Catalog<B> {
    bytes: B,
}

fn record_offset(index: usize) -> usize {
    ENTRY_SIZE + index * ENTRY_SIZE
}

impl<B: AsRef<[u8]>> Catalog<B> {
    /// Wrap at least two sectors of bytes
    pub fn new(bytes: B) -> Result<Self> {
        if bytes.as_ref().len() < CATALOG_SIZE {
            return Err(DfsError::invalid_format(format!(
                "catalog needs {} bytes, got {}",
                CATALOG_SIZE,
                bytes.as_ref().len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Wrap bytes already known to hold both sectors
    pub(crate) fn wrap(bytes: B) -> Self {
        debug_assert!(bytes.as_ref().len() >= CATALOG_SIZE);
        Self { bytes }
    }

    fn first(&self) -> &[u8] {
        &self.bytes.as_ref()[..SECTOR_SIZE]
    }

    fn second(&self) -> &[u8] {
        &self.bytes.as_ref()[SECTOR_SIZE..CATALOG_SIZE]
    }

    /// Both catalog sectors
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes.as_ref()[..CATALOG_SIZE]
    }

    /// Raw 12 title bytes
    pub fn raw_title(&self) -> [u8; TITLE_LENGTH] {
        let mut title = [0u8; TITLE_LENGTH];
        title[..TITLE_HEAD_LENGTH].copy_from_slice(&self.first()[..TITLE_HEAD_LENGTH]);
        title[TITLE_HEAD_LENGTH..]
            .copy_from_slice(&self.second()[..TITLE_LENGTH - TITLE_HEAD_LENGTH]);
        title
    }

    /// Disk title up to the first NUL, trailing spaces removed
    pub fn title(&self) -> String {
        decode_title(&self.raw_title())
    }

    /// BCD sequence number
    pub fn sequence_number(&self) -> u8 {
        self.second()[catalog2::SEQUENCE]
    }

    /// Offset of the last entry (8 per file)
    pub fn last_entry_offset(&self) -> usize {
        self.second()[catalog2::LAST_ENTRY] as usize
    }

    /// Number of files, clamped to the catalog capacity
    pub fn number_of_files(&self) -> usize {
        (self.last_entry_offset() / ENTRY_SIZE).min(MAX_FILES)
    }

    /// Raw option byte
    pub fn opt_byte(&self) -> u8 {
        self.second()[catalog2::OPT]
    }

    /// Boot option (bits 4-5 of the option byte)
    pub fn boot_option(&self) -> BootOption {
        BootOption::from_bits(self.opt_byte() >> 4)
    }

    /// Sectors on the side (10 bits)
    pub fn number_of_sectors(&self) -> u16 {
        ((self.opt_byte() & 3) as u16) << 8 | self.second()[catalog2::SECTORS_LO] as u16
    }

    /// Record accessor for an entry index
    pub fn entry(&self, index: usize) -> Result<EntryRecord<&[u8]>> {
        check_index(index)?;
        let offset = record_offset(index);
        Ok(EntryRecord::new(
            &self.first()[offset..offset + ENTRY_SIZE],
            &self.second()[offset..offset + ENTRY_SIZE],
        ))
    }

    /// Records of all files in catalog order
    pub fn entries(&self) -> impl Iterator<Item = EntryRecord<&[u8]>> + '_ {
        (0..self.number_of_files()).filter_map(move |index| self.entry(index).ok())
    }
}

/// Decode title bytes up to the first NUL, trailing spaces removed
pub(crate) fn decode_title(raw: &[u8]) -> String {
    raw.iter()
        .take_while(|&&b| b != 0)
        .map(|b| (b & 0x7F) as char)
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Validate a title and pad it with NULs to 12 bytes
pub(crate) fn encode_title(title: &str) -> Result<[u8; TITLE_LENGTH]> {
    if let Some(c) = title.chars().find(|c| !matches!(*c as u32, 32..=126)) {
        return Err(DfsError::invalid_value(format!(
            "title contains invalid character {:?}",
            c
        )));
    }
    if title.len() > TITLE_LENGTH {
        return Err(DfsError::invalid_value(format!(
            "title '{}' longer than {} characters",
            title, TITLE_LENGTH
        )));
    }
    let mut raw = [0u8; TITLE_LENGTH];
    raw[..title.len()].copy_from_slice(title.as_bytes());
    Ok(raw)
}

fn check_index(index: usize) -> Result<()> {
    if index >= MAX_FILES {
        return Err(DfsError::invalid_value(format!(
            "catalog index {} out of range",
            index
        )));
    }
    Ok(())
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Catalog<B> {
    fn sectors_mut(&mut self) -> (&mut [u8], &mut [u8]) {
        self.bytes.as_mut()[..CATALOG_SIZE].split_at_mut(SECTOR_SIZE)
    }

    /// Set the title (up to 12 printable characters, NUL padded)
    pub fn set_title(&mut self, title: &str) -> Result<()> {
        let raw = encode_title(title)?;
        let (first, second) = self.sectors_mut();
        first[..TITLE_HEAD_LENGTH].copy_from_slice(&raw[..TITLE_HEAD_LENGTH]);
        second[..TITLE_LENGTH - TITLE_HEAD_LENGTH].copy_from_slice(&raw[TITLE_HEAD_LENGTH..]);
        Ok(())
    }

    /// Set the BCD sequence number
    pub fn set_sequence_number(&mut self, sequence: u8) {
        self.sectors_mut().1[catalog2::SEQUENCE] = sequence;
    }

    /// Advance the BCD sequence number, wrapping 99 to 00
    pub fn increment_sequence(&mut self) {
        let sequence = self.sequence_number();
        let (mut high, mut low) = (sequence >> 4, (sequence & 0x0F) + 1);
        if low > 9 {
            low = 0;
            high += 1;
        }
        if high > 9 {
            high = 0;
        }
        self.set_sequence_number(high << 4 | low);
    }

    pub(crate) fn set_last_entry_offset(&mut self, offset: usize) {
        self.sectors_mut().1[catalog2::LAST_ENTRY] = offset as u8;
    }

    /// Set the boot option, keeping the other option bits
    pub fn set_boot_option(&mut self, option: BootOption) {
        let opt = self.opt_byte();
        self.sectors_mut().1[catalog2::OPT] = (opt & !0x30) | option.bits() << 4;
    }

    /// Set the sector count
    pub fn set_number_of_sectors(&mut self, sectors: u16) -> Result<()> {
        if sectors > MAX_START_SECTOR {
            return Err(DfsError::invalid_value(format!(
                "sector count {} does not fit in 10 bits",
                sectors
            )));
        }
        let opt = self.opt_byte();
        let second = self.sectors_mut().1;
        second[catalog2::OPT] = (opt & !3) | (sectors >> 8) as u8;
        second[catalog2::SECTORS_LO] = sectors as u8;
        Ok(())
    }

    /// Mutable record accessor for an entry index
    pub fn entry_mut(&mut self, index: usize) -> Result<EntryRecord<&mut [u8]>> {
        check_index(index)?;
        let offset = record_offset(index);
        let (first, second) = self.sectors_mut();
        Ok(EntryRecord::new(
            &mut first[offset..offset + ENTRY_SIZE],
            &mut second[offset..offset + ENTRY_SIZE],
        ))
    }

    /// Erase the catalog and set the sector count
    pub fn format(&mut self, sectors: u16) -> Result<()> {
        self.bytes.as_mut()[..CATALOG_SIZE].fill(0);
        self.set_number_of_sectors(sectors)
    }

    /// Open a record slot at `index`, moving later records up
    ///
    /// The caller checks there is room for one more file.
    pub(crate) fn shift_up(&mut self, index: usize) {
        let count = self.number_of_files();
        let (start, end) = (record_offset(index), record_offset(count));
        let (first, second) = self.sectors_mut();
        first.copy_within(start..end, start + ENTRY_SIZE);
        second.copy_within(start..end, start + ENTRY_SIZE);
        self.set_last_entry_offset((count + 1) * ENTRY_SIZE);
    }

    /// Close the record slot at `index`, moving later records down
    pub(crate) fn shift_down(&mut self, index: usize) {
        let count = self.number_of_files();
        if index >= count {
            return;
        }
        let (start, end) = (record_offset(index + 1), record_offset(count));
        let last = record_offset(count - 1);
        let (first, second) = self.sectors_mut();
        first.copy_within(start..end, start - ENTRY_SIZE);
        second.copy_within(start..end, start - ENTRY_SIZE);
        first[last..last + ENTRY_SIZE].fill(0);
        second[last..last + ENTRY_SIZE].fill(0);
        self.set_last_entry_offset((count - 1) * ENTRY_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank() -> Catalog<Vec<u8>> {
        let mut catalog = Catalog::new(vec![0u8; CATALOG_SIZE]).unwrap();
        catalog.format(SECTORS_80_TRACKS).unwrap();
        catalog
    }

    #[test]
    fn test_too_small() {
        assert!(Catalog::new(vec![0u8; 300]).is_err());
    }

    #[test]
    fn test_sector_count_encoding() {
        let catalog = blank();
        assert_eq!(catalog.number_of_sectors(), 800);
        assert_eq!(catalog.opt_byte(), 3);
        assert_eq!(catalog.as_bytes()[SECTOR_SIZE + 7], 0x20);
    }

    #[test]
    fn test_title_split() {
        let mut catalog = blank();
        catalog.set_title("HELLO WORLD!").unwrap();
        assert_eq!(&catalog.as_bytes()[..8], b"HELLO WO");
        assert_eq!(&catalog.as_bytes()[SECTOR_SIZE..SECTOR_SIZE + 4], b"RLD!");
        assert_eq!(catalog.title(), "HELLO WORLD!");

        catalog.set_title("GAMES").unwrap();
        assert_eq!(catalog.title(), "GAMES");
        assert!(catalog.set_title("THIRTEEN CHAR").is_err());
    }

    #[test]
    fn test_boot_option_keeps_sector_bits() {
        let mut catalog = blank();
        catalog.set_boot_option(BootOption::Exec);
        assert_eq!(catalog.boot_option(), BootOption::Exec);
        assert_eq!(catalog.number_of_sectors(), 800);
        assert_eq!(catalog.opt_byte(), 0x33);
    }

    #[test]
    fn test_sequence_bcd() {
        let mut catalog = blank();
        catalog.set_sequence_number(0x09);
        catalog.increment_sequence();
        assert_eq!(catalog.sequence_number(), 0x10);
        catalog.set_sequence_number(0x99);
        catalog.increment_sequence();
        assert_eq!(catalog.sequence_number(), 0x00);
    }

    #[test]
    fn test_shift_up_and_down() {
        let mut catalog = blank();
        for (i, name) in ["C", "B", "A"].iter().enumerate() {
            catalog.shift_up(i);
            let mut record = catalog.entry_mut(i).unwrap();
            record.set_filename(name).unwrap();
            record.set_directory('$').unwrap();
        }
        assert_eq!(catalog.number_of_files(), 3);

        catalog.shift_up(1);
        catalog.entry_mut(1).unwrap().set_fullname("$.X").unwrap();
        let names: Vec<String> = catalog.entries().map(|e| e.filename()).collect();
        assert_eq!(names, vec!["C", "X", "B", "A"]);
        assert_eq!(catalog.last_entry_offset(), 32);

        catalog.shift_down(0);
        let names: Vec<String> = catalog.entries().map(|e| e.filename()).collect();
        assert_eq!(names, vec!["X", "B", "A"]);
        assert_eq!(catalog.last_entry_offset(), 24);
        assert!(catalog.as_bytes()[32..40].iter().all(|&b| b == 0));
    }
}
