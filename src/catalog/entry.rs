/// Catalog entry records, file entry snapshots and DFS names
///
/// Each file owns one 8-byte record in each catalog sector:
///
/// ```text
/// sector 0:  name[0..7] (7-bit ASCII, space padded)  dir | locked << 7
/// sector 1:  load lo16  exec lo16  length lo16  high bits  start lo8
/// high bits: b7-6 exec  b5-4 length  b3-2 load  b1-0 start
/// ```

use crate::error::{DfsError, Result};
use crate::format::constants::*;
use std::fmt;

const HIGH_START: u8 = 0;
const HIGH_LOAD: u8 = 2;
const HIGH_LENGTH: u8 = 4;
const HIGH_EXEC: u8 = 6;

/// Check a character is allowed in a DFS filename or directory
///
/// Any printable ASCII character except the `.` and `:` name separators.
pub fn is_valid_name_char(c: char) -> bool {
    matches!(c as u32, 32..=126) && !matches!(c, '.' | ':')
}

/// Validate a filename (without directory)
pub fn validate_filename(name: &str) -> Result<()> {
    // Trailing spaces are padding on disk
    if name.trim_end_matches(' ').is_empty() || name.chars().count() > NAME_LENGTH {
        return Err(DfsError::InvalidFilename(format!(
            "'{}' must be 1 to {} characters",
            name, NAME_LENGTH
        )));
    }
    if let Some(c) = name.chars().find(|c| !is_valid_name_char(*c)) {
        return Err(DfsError::InvalidFilename(format!(
            "'{}' contains invalid character {:?}",
            name, c
        )));
    }
    Ok(())
}

/// Validate a directory character
pub fn validate_directory(directory: char) -> Result<()> {
    if !is_valid_name_char(directory) {
        return Err(DfsError::InvalidFilename(format!(
            "invalid directory {:?}",
            directory
        )));
    }
    Ok(())
}

/// Fold an address into the 18-bit catalog field
///
/// Values with all of the top 14 bits set (`FFFFxxxx` I/O processor
/// addresses) fold down to `3xxxx`.
pub fn fold_address(address: u32) -> Result<u32> {
    if address <= MAX_ADDRESS {
        Ok(address)
    } else if address & !MAX_ADDRESS == !MAX_ADDRESS {
        Ok(address & MAX_ADDRESS)
    } else {
        Err(DfsError::invalid_value(format!(
            "address {:08X} does not fit in 18 bits",
            address
        )))
    }
}

/// A name of the form `[:drive.][dir.]name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Head selected by the drive prefix
    pub head: Option<u8>,
    /// Directory character
    pub directory: char,
    /// Filename without directory
    pub filename: String,
}

impl ParsedName {
    /// Parse and validate a DFS name
    pub fn parse(name: &str) -> Result<Self> {
        let mut rest = name;
        let mut head = None;

        if let Some(stripped) = rest.strip_prefix(':') {
            let mut chars = stripped.chars();
            let drive = chars
                .next()
                .and_then(|c| c.to_digit(10))
                .ok_or_else(|| DfsError::InvalidFilename(format!("'{}': bad drive", name)))?;
            head = Some(match drive {
                0 => 0,
                2 => 1,
                _ => {
                    return Err(DfsError::InvalidFilename(format!(
                        "'{}': drive {} is not on this image",
                        name, drive
                    )))
                }
            });
            rest = chars.as_str();
            rest = rest.strip_prefix('.').ok_or_else(|| {
                DfsError::InvalidFilename(format!("'{}': expected '.' after drive", name))
            })?;
        }

        let mut chars = rest.chars();
        let (directory, filename) = match (chars.next(), chars.next()) {
            (Some(dir), Some('.')) => (dir, chars.as_str()),
            _ => (DEFAULT_DIRECTORY, rest),
        };

        validate_directory(directory)?;
        validate_filename(filename)?;

        Ok(Self {
            head,
            directory,
            filename: filename.to_string(),
        })
    }

    /// `dir.name`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.directory, self.filename)
    }

    /// Case-insensitive comparison with an entry
    pub fn matches(&self, entry: &FileEntry) -> bool {
        entry.matches(self.directory, &self.filename)
    }
}

/// Bit-level accessor over the two 8-byte records of one catalog entry
#[derive(Debug)]
pub struct EntryRecord<B> {
    name: B,
    attr: B,
}

impl<B: AsRef<[u8]>> EntryRecord<B> {
    /// Wrap the name record (sector 0) and attribute record (sector 1)
    pub fn new(name: B, attr: B) -> Self {
        debug_assert!(name.as_ref().len() >= ENTRY_SIZE && attr.as_ref().len() >= ENTRY_SIZE);
        Self { name, attr }
    }

    fn name_bytes(&self) -> &[u8] {
        &self.name.as_ref()[..ENTRY_SIZE]
    }

    fn attr_bytes(&self) -> &[u8] {
        &self.attr.as_ref()[..ENTRY_SIZE]
    }

    fn high_bits(&self, shift: u8) -> u32 {
        ((self.attr_bytes()[6] >> shift) & 3) as u32
    }

    fn word(&self, offset: usize) -> u32 {
        let a = self.attr_bytes();
        u16::from_le_bytes([a[offset], a[offset + 1]]) as u32
    }

    /// Filename with padding removed
    pub fn filename(&self) -> String {
        self.name_bytes()[..NAME_LENGTH]
            .iter()
            .map(|b| (b & 0x7F) as char)
            .collect::<String>()
            .trim_end_matches(|c: char| c == ' ' || c == '\0')
            .to_string()
    }

    /// Directory character
    pub fn directory(&self) -> char {
        (self.name_bytes()[7] & 0x7F) as char
    }

    /// Locked flag
    pub fn locked(&self) -> bool {
        self.name_bytes()[7] & 0x80 != 0
    }

    /// `dir.name`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.directory(), self.filename())
    }

    /// 18-bit load address
    pub fn load_address(&self) -> u32 {
        self.word(0) | self.high_bits(HIGH_LOAD) << 16
    }

    /// 18-bit execution address
    pub fn exec_address(&self) -> u32 {
        self.word(2) | self.high_bits(HIGH_EXEC) << 16
    }

    /// 18-bit file length
    pub fn length(&self) -> u32 {
        self.word(4) | self.high_bits(HIGH_LENGTH) << 16
    }

    /// 10-bit start sector
    pub fn start_sector(&self) -> u16 {
        self.attr_bytes()[7] as u16 | (self.high_bits(HIGH_START) as u16) << 8
    }

    /// Number of sectors occupied
    pub fn sectors(&self) -> u16 {
        sectors_for(self.length() as usize)
    }

    /// First sector after the file
    pub fn end_sector(&self) -> u16 {
        self.start_sector() + self.sectors()
    }

    /// Decode into an owned snapshot
    pub fn to_entry(&self, head: u8, index: usize) -> FileEntry {
        FileEntry {
            head,
            index,
            directory: self.directory(),
            filename: self.filename(),
            locked: self.locked(),
            load_address: self.load_address(),
            exec_address: self.exec_address(),
            length: self.length(),
            start_sector: self.start_sector(),
        }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> EntryRecord<B> {
    fn name_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.name.as_mut()[..ENTRY_SIZE]
    }

    fn attr_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.attr.as_mut()[..ENTRY_SIZE]
    }

    fn set_high_bits(&mut self, shift: u8, value: u32) {
        let a = self.attr_bytes_mut();
        a[6] = (a[6] & !(3 << shift)) | (((value & 3) as u8) << shift);
    }

    fn set_word(&mut self, offset: usize, value: u32) {
        let bytes = (value as u16).to_le_bytes();
        self.attr_bytes_mut()[offset..offset + 2].copy_from_slice(&bytes);
    }

    /// Set the filename (1-7 valid characters)
    pub fn set_filename(&mut self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        let n = self.name_bytes_mut();
        n[..NAME_LENGTH].fill(b' ');
        for (slot, c) in n.iter_mut().zip(filename.bytes()) {
            *slot = c;
        }
        Ok(())
    }

    /// Set the directory, keeping the locked flag
    pub fn set_directory(&mut self, directory: char) -> Result<()> {
        validate_directory(directory)?;
        let n = self.name_bytes_mut();
        n[7] = (n[7] & 0x80) | directory as u8;
        Ok(())
    }

    /// Set directory and filename from `dir.name` or `name`
    pub fn set_fullname(&mut self, fullname: &str) -> Result<()> {
        let parsed = ParsedName::parse(fullname)?;
        self.set_directory(parsed.directory)?;
        self.set_filename(&parsed.filename)
    }

    /// Set the locked flag
    pub fn set_locked(&mut self, locked: bool) {
        let n = self.name_bytes_mut();
        if locked {
            n[7] |= 0x80;
        } else {
            n[7] &= 0x7F;
        }
    }

    /// Set the load address
    pub fn set_load_address(&mut self, address: u32) -> Result<()> {
        let address = fold_address(address)?;
        self.set_word(0, address);
        self.set_high_bits(HIGH_LOAD, address >> 16);
        Ok(())
    }

    /// Set the execution address
    pub fn set_exec_address(&mut self, address: u32) -> Result<()> {
        let address = fold_address(address)?;
        self.set_word(2, address);
        self.set_high_bits(HIGH_EXEC, address >> 16);
        Ok(())
    }

    /// Set the file length
    pub fn set_length(&mut self, length: u32) -> Result<()> {
        if length > MAX_ADDRESS {
            return Err(DfsError::DataTooLarge {
                size: length as usize,
                capacity: MAX_ADDRESS as usize,
            });
        }
        self.set_word(4, length);
        self.set_high_bits(HIGH_LENGTH, length >> 16);
        Ok(())
    }

    /// Set the start sector
    pub fn set_start_sector(&mut self, sector: u16) -> Result<()> {
        if sector > MAX_START_SECTOR {
            return Err(DfsError::invalid_value(format!(
                "start sector {} does not fit in 10 bits",
                sector
            )));
        }
        self.attr_bytes_mut()[7] = sector as u8;
        self.set_high_bits(HIGH_START, (sector >> 8) as u32);
        Ok(())
    }

    /// Zero both records
    pub fn clear(&mut self) {
        self.name_bytes_mut().fill(0);
        self.attr_bytes_mut().fill(0);
    }
}

/// Number of sectors needed for `bytes`
pub fn sectors_for(bytes: usize) -> u16 {
    bytes.div_ceil(SECTOR_SIZE) as u16
}

/// Decoded catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Head the file is on
    pub head: u8,
    /// Catalog index (0 is nearest the end of the disk)
    pub index: usize,
    /// Directory character
    pub directory: char,
    /// Filename without directory
    pub filename: String,
    /// Locked flag
    pub locked: bool,
    /// 18-bit load address
    pub load_address: u32,
    /// 18-bit execution address
    pub exec_address: u32,
    /// Length in bytes
    pub length: u32,
    /// First logical sector
    pub start_sector: u16,
}

impl FileEntry {
    /// `dir.name`
    pub fn fullname(&self) -> String {
        format!("{}.{}", self.directory, self.filename)
    }

    /// `:drive.dir.name`
    pub fn drive_name(&self) -> String {
        format!(":{}.{}", self.head * 2, self.fullname())
    }

    /// Number of sectors occupied
    pub fn sectors(&self) -> u16 {
        sectors_for(self.length as usize)
    }

    /// First sector after the file
    pub fn end_sector(&self) -> u16 {
        self.start_sector + self.sectors()
    }

    /// Case-insensitive name comparison
    pub fn matches(&self, directory: char, filename: &str) -> bool {
        self.directory.eq_ignore_ascii_case(&directory)
            && self.filename.eq_ignore_ascii_case(filename)
    }

    /// Expand an 18-bit address to the 32-bit host form
    pub fn host_address(address: u32) -> u32 {
        if address & 0x3_0000 == 0x3_0000 {
            address | !MAX_ADDRESS
        } else {
            address
        }
    }
}

fn info_address(address: u32) -> u32 {
    if address & 0x3_0000 == 0x3_0000 {
        0xFF_0000 | (address & 0xFFFF)
    } else {
        address
    }
}

impl fmt::Display for FileEntry {
    /// `*INFO` style line
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<9} {} {:06X} {:06X} {:06X} {:03X}",
            self.fullname(),
            if self.locked { 'L' } else { ' ' },
            info_address(self.load_address),
            info_address(self.exec_address),
            self.length,
            self.start_sector
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EntryRecord<[u8; 8]> {
        EntryRecord::new([0u8; 8], [0u8; 8])
    }

    #[test]
    fn test_name_fields() {
        let mut r = record();
        r.set_fullname("A.HELLO").unwrap();
        r.set_locked(true);

        assert_eq!(r.filename(), "HELLO");
        assert_eq!(r.directory(), 'A');
        assert!(r.locked());
        assert_eq!(r.fullname(), "A.HELLO");
        assert_eq!(&r.name_bytes()[..7], b"HELLO  ");

        r.set_directory('$').unwrap();
        assert!(r.locked());
        r.set_locked(false);
        assert_eq!(r.name_bytes()[7], b'$');
    }

    #[test]
    fn test_high_bits_packing() {
        let mut r = record();
        r.set_load_address(0x3_1900).unwrap();
        r.set_exec_address(0x2_8023).unwrap();
        r.set_length(0x1_0000).unwrap();
        r.set_start_sector(0x2FF).unwrap();

        // exec=2, length=1, load=3, start=2
        assert_eq!(r.attr_bytes()[6], 0b10_01_11_10);
        assert_eq!(r.load_address(), 0x3_1900);
        assert_eq!(r.exec_address(), 0x2_8023);
        assert_eq!(r.length(), 0x1_0000);
        assert_eq!(r.start_sector(), 0x2FF);
        assert_eq!(r.attr_bytes()[7], 0xFF);
    }

    #[test]
    fn test_setters_do_not_disturb_neighbours() {
        let mut r = record();
        r.set_exec_address(0x3_FFFF).unwrap();
        r.set_start_sector(0x3FF).unwrap();
        r.set_load_address(0).unwrap();
        r.set_length(0).unwrap();
        assert_eq!(r.exec_address(), 0x3_FFFF);
        assert_eq!(r.start_sector(), 0x3FF);
    }

    #[test]
    fn test_host_addresses_fold() {
        let mut r = record();
        r.set_load_address(0xFFFF_1900).unwrap();
        assert_eq!(r.load_address(), 0x3_1900);
        assert_eq!(FileEntry::host_address(r.load_address()), 0xFFFF_1900);
        assert!(r.set_load_address(0x0100_0000).is_err());
        assert!(r.set_start_sector(0x400).is_err());
        assert!(r.set_length(0x4_0000).is_err());
    }

    #[test]
    fn test_invalid_names() {
        let mut r = record();
        assert!(r.set_filename("").is_err());
        assert!(r.set_filename("TOOLONGX").is_err());
        assert!(r.set_filename("A.B").is_err());
        assert!(r.set_filename("A:B").is_err());
        assert!(r.set_filename("   ").is_err());
        assert!(r.set_filename("caf\u{e9}").is_err());
        assert!(r.set_filename("\x7F").is_err());
        assert!(r.set_directory('.').is_err());
    }

    #[test]
    fn test_punctuation_names() {
        let mut r = record();
        for name in ["A#B", "Q\"R", "X*", "TWO UP", "~"] {
            r.set_filename(name).unwrap();
            assert_eq!(r.filename(), name);
        }
        r.set_directory('#').unwrap();
        assert_eq!(r.directory(), '#');

        let p = ParsedName::parse("*.A#B").unwrap();
        assert_eq!(p.directory, '*');
        assert_eq!(p.filename, "A#B");
        let p = ParsedName::parse(":2.Q\"R").unwrap();
        assert_eq!(p.fullname(), "$.Q\"R");
    }

    #[test]
    fn test_parse_names() {
        let p = ParsedName::parse("ELITE").unwrap();
        assert_eq!(p.directory, '$');
        assert_eq!(p.filename, "ELITE");
        assert_eq!(p.head, None);

        let p = ParsedName::parse(":2.B.DATA").unwrap();
        assert_eq!(p.head, Some(1));
        assert_eq!(p.fullname(), "B.DATA");

        let p = ParsedName::parse(":0.!BOOT").unwrap();
        assert_eq!(p.head, Some(0));
        assert_eq!(p.directory, '$');

        assert!(ParsedName::parse(":1.X").is_err());
        assert!(ParsedName::parse(":0X").is_err());
        assert!(ParsedName::parse("A.").is_err());
    }

    #[test]
    fn test_entry_display() {
        let entry = FileEntry {
            head: 0,
            index: 0,
            directory: '$',
            filename: "ELITE".into(),
            locked: true,
            load_address: 0x3_1900,
            exec_address: 0x801F,
            length: 0x4A00,
            start_sector: 2,
        };
        assert_eq!(entry.to_string(), "$.ELITE   L FF1900 00801F 004A00 002");
        assert_eq!(entry.sectors(), 0x4A);
        assert_eq!(entry.end_sector(), 0x4C);
        assert_eq!(entry.drive_name(), ":0.$.ELITE");
        assert!(entry.matches('$', "elite"));
    }

    #[test]
    fn test_sectors_for() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(256), 1);
        assert_eq!(sectors_for(300), 2);
    }
}
