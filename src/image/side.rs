/// One surface of a DFS image: catalog access and allocation

use crate::catalog::{sectors_for, Catalog, FileEntry, ParsedName};
use crate::digest::{attribute_prefix, DigestAlgorithm, DigestMode};
use crate::error::{DfsError, Result};
use crate::format::constants::*;
use crate::format::BootOption;
use crate::image::builder::AddOptions;
use crate::image::sectors::Sectors;
use crate::image::DiskImage;
use crate::warn::{report, WarnMode, Warning, WarningKind, WarningSink};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// View of one head of an image
///
/// `I` is `&DiskImage` for read access and `&mut DiskImage` for the
/// mutating operations. Catalog entries are ordered so that index 0
/// holds the file nearest the end of the side and the highest index
/// the file nearest the catalog.
#[derive(Debug)]
pub struct DiskSide<I> {
    image: I,
    head: u8,
    catalog_offset: usize,
}

/// A free run of sectors and the catalog index a file placed there takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// First free sector
    pub start: u16,
    /// Number of free sectors
    pub sectors: u16,
    /// Catalog index for a file allocated here
    pub index: usize,
}

impl<I: Deref<Target = DiskImage>> DiskSide<I> {
    pub(crate) fn new(image: I, head: u8) -> Result<Self> {
        let catalog_offset = image.geometry.catalog_range(head)?.start;
        Ok(Self {
            image,
            head,
            catalog_offset,
        })
    }

    /// Head number
    pub fn head(&self) -> u8 {
        self.head
    }

    /// DFS drive number of this head (0 or 2)
    pub fn drive(&self) -> u8 {
        self.head * 2
    }

    /// Owning image
    pub fn image(&self) -> &DiskImage {
        &self.image
    }

    /// Read-only view of the catalog sectors
    pub fn catalog(&self) -> Catalog<&[u8]> {
        Catalog::wrap(&self.image.data[self.catalog_offset..self.catalog_offset + CATALOG_SIZE])
    }

    /// False once validation found a fatal problem
    pub fn is_valid(&self) -> bool {
        self.image.valid[self.head as usize]
    }

    /// Disk title
    pub fn title(&self) -> String {
        self.catalog().title()
    }

    /// BCD sequence number
    pub fn sequence_number(&self) -> u8 {
        self.catalog().sequence_number()
    }

    /// Boot option
    pub fn boot_option(&self) -> BootOption {
        self.catalog().boot_option()
    }

    /// Sector count recorded in the catalog
    pub fn number_of_sectors(&self) -> u16 {
        self.catalog().number_of_sectors()
    }

    /// Sectors physically present on this head
    pub fn physical_sectors(&self) -> u16 {
        self.image.geometry.sectors_per_side()
    }

    fn data_limit(&self) -> u16 {
        self.number_of_sectors().min(self.physical_sectors())
    }

    /// Number of catalog entries
    pub fn number_of_files(&self) -> usize {
        self.catalog().number_of_files()
    }

    /// Entry at a catalog index
    pub fn entry(&self, index: usize) -> Result<FileEntry> {
        if index >= self.number_of_files() {
            return Err(DfsError::invalid_value(format!(
                "no entry {} on side {}",
                index, self.head
            )));
        }
        Ok(self.catalog().entry(index)?.to_entry(self.head, index))
    }

    /// All entries in catalog order
    pub fn files(&self) -> Vec<FileEntry> {
        let head = self.head;
        self.catalog()
            .entries()
            .enumerate()
            .map(move |(index, record)| record.to_entry(head, index))
            .collect()
    }

    /// Look up a file by directory and name
    pub fn find(&self, directory: char, filename: &str) -> Option<FileEntry> {
        self.files()
            .into_iter()
            .find(|entry| entry.matches(directory, filename))
    }

    fn parse_name(&self, name: &str) -> Result<ParsedName> {
        let parsed = ParsedName::parse(name)?;
        match parsed.head {
            Some(head) if head != self.head => Err(DfsError::invalid_value(format!(
                "'{}' is not on drive {}",
                name,
                self.drive()
            ))),
            _ => Ok(parsed),
        }
    }

    /// Look up a file by `[:drive.][dir.]name`
    pub fn find_entry(&self, name: &str) -> Result<FileEntry> {
        let parsed = self.parse_name(name)?;
        self.find(parsed.directory, &parsed.filename)
            .ok_or_else(|| DfsError::FileNotFound(parsed.fullname()))
    }

    /// Sectors allocated to files
    pub fn used_sectors(&self) -> u16 {
        self.files().iter().map(FileEntry::sectors).sum::<u16>()
    }

    /// Sectors not allocated to any file
    ///
    /// Includes the two catalog sectors, so `used_sectors() + free_sectors()`
    /// is always `number_of_sectors()`.
    pub fn free_sectors(&self) -> u16 {
        self.number_of_sectors().saturating_sub(self.used_sectors())
    }

    /// Free sectors that a new file could occupy
    pub fn available_sectors(&self) -> u16 {
        self.free_sectors().saturating_sub(CATALOG_SECTORS)
    }

    /// First sector after the highest allocated sector
    pub fn last_used_sector(&self) -> u16 {
        self.files()
            .iter()
            .map(FileEntry::end_sector)
            .fold(CATALOG_SECTORS, u16::max)
    }

    /// Gaps between the catalog and the files, lowest first
    pub fn free_blocks(&self) -> Vec<FreeBlock> {
        let mut blocks = Vec::new();
        let mut cursor = CATALOG_SECTORS;
        for entry in self.files().iter().rev() {
            if entry.start_sector > cursor {
                blocks.push(FreeBlock {
                    start: cursor,
                    sectors: entry.start_sector - cursor,
                    index: entry.index + 1,
                });
            }
            cursor = cursor.max(entry.end_sector());
        }
        let end = self.number_of_sectors();
        if end > cursor {
            blocks.push(FreeBlock {
                start: cursor,
                sectors: end - cursor,
                index: 0,
            });
        }
        blocks
    }

    /// Size in sectors of the largest free block
    pub fn largest_free_block(&self) -> u16 {
        self.free_blocks()
            .iter()
            .map(|block| block.sectors)
            .max()
            .unwrap_or(0)
    }

    /// Lowest free block holding `min_bytes`, as (start sector, catalog index)
    pub fn find_free_block(&self, min_bytes: usize) -> Option<(u16, usize)> {
        let needed = sectors_for(min_bytes);
        let mut cursor = CATALOG_SECTORS;
        for entry in self.files().iter().rev() {
            if entry.start_sector >= cursor && entry.start_sector - cursor >= needed {
                return Some((cursor, entry.index + 1));
            }
            cursor = cursor.max(entry.end_sector());
        }
        let end = self.number_of_sectors();
        (end >= cursor && end - cursor >= needed).then_some((cursor, 0))
    }

    fn check_data_access(&self, end: u16) -> Result<()> {
        if self.image.catalog_only && end > CATALOG_SECTORS {
            return Err(DfsError::access_denied(
                "only the catalog of this image was loaded",
            ));
        }
        Ok(())
    }

    /// Logical sectors `start..end`
    pub fn get_sectors(&self, start: u16, end: u16, used_size: Option<usize>) -> Result<Sectors> {
        self.check_data_access(end)?;
        Sectors::new(&self.image, self.head, start, end, used_size)
    }

    /// Sectors from (track, sector) up to but excluding (track, sector)
    ///
    /// The end may be one track past the last track with sector 0.
    pub fn get_physical_sectors(
        &self,
        start_track: u8,
        start_sector: u8,
        end_track: u8,
        end_sector: u8,
    ) -> Result<Sectors> {
        let geometry = self.image.geometry;
        let start = geometry.physical_to_logical(start_track, start_sector)?;
        let end = if end_track == geometry.tracks && end_sector == 0 {
            geometry.sectors_per_side()
        } else {
            geometry.physical_to_logical(end_track, end_sector)?
        };
        self.get_sectors(start, end, None)
    }

    /// Sectors of a file, `used_size` set to its length
    pub fn entry_sectors(&self, entry: &FileEntry) -> Result<Sectors> {
        if entry.end_sector() > self.physical_sectors() {
            return Err(DfsError::corrupt(
                self.head,
                format!("{} extends past the end of the side", entry.fullname()),
            ));
        }
        self.get_sectors(
            entry.start_sector,
            entry.end_sector(),
            Some(entry.length as usize),
        )
    }

    /// Contents of a file
    pub fn read_entry(&self, entry: &FileEntry) -> Result<Vec<u8>> {
        self.entry_sectors(entry)?.read_all(&self.image)
    }

    /// Contents of a file by name
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.find_entry(name)?;
        self.read_entry(&entry)
    }

    fn entry_stream(&self, entry: &FileEntry, mode: DigestMode) -> Result<Vec<u8>> {
        let sectors = self.entry_sectors(entry)?;
        let mut stream = attribute_prefix(
            mode,
            entry.load_address,
            entry.exec_address,
            entry.locked,
        );
        match mode {
            DigestMode::All => stream.extend(sectors.read_raw(&self.image)?),
            _ => stream.extend(sectors.read_all(&self.image)?),
        }
        Ok(stream)
    }

    /// Hex digest of one file
    pub fn entry_digest(
        &self,
        entry: &FileEntry,
        mode: DigestMode,
        algorithm: DigestAlgorithm,
    ) -> Result<String> {
        Ok(algorithm.hex_digest(&self.entry_stream(entry, mode)?))
    }

    /// Hex digest of the side
    ///
    /// `All` hashes every sector, `Used` the sectors up to the last
    /// used one; `File` and `Data` hash the files in name order.
    pub fn digest(&self, mode: DigestMode, algorithm: DigestAlgorithm) -> Result<String> {
        let mut hasher = algorithm.hasher();
        match mode {
            DigestMode::All | DigestMode::Used => {
                let end = match mode {
                    DigestMode::All => self.physical_sectors(),
                    _ => self.last_used_sector().min(self.physical_sectors()),
                };
                hasher.update(&self.get_sectors(0, end, None)?.read_raw(&self.image)?);
            }
            DigestMode::File | DigestMode::Data => {
                let mut files = self.files();
                files.sort_by_key(|entry| entry.fullname());
                for entry in &files {
                    if mode == DigestMode::File {
                        hasher.update(entry.fullname().as_bytes());
                    }
                    hasher.update(&self.entry_stream(entry, mode)?);
                }
            }
        }
        Ok(hasher.finalize_hex())
    }

    /// DFS `*CAT` style listing
    pub fn cat(&self) -> String {
        let catalog = self.catalog();
        let option = catalog.boot_option();
        let mut out = format!("{} ({:02X})\n", catalog.title(), catalog.sequence_number());
        out.push_str(&format!(
            "{:<20}{}\n",
            format!("Drive {}", self.drive()),
            format!("Option {} ({})", option.bits(), option)
        ));
        out.push_str(&format!(
            "{:<20}Lib. :0.$\n\n",
            format!("Dir. :{}.$", self.drive())
        ));

        let mut files = self.files();
        files.sort_by(|a, b| {
            (a.directory != DEFAULT_DIRECTORY, a.directory, &a.filename).cmp(&(
                b.directory != DEFAULT_DIRECTORY,
                b.directory,
                &b.filename,
            ))
        });

        let cells: Vec<String> = files
            .iter()
            .map(|entry| {
                let name = if entry.directory == DEFAULT_DIRECTORY {
                    format!("    {}", entry.filename)
                } else {
                    format!("  {}.{}", entry.directory, entry.filename)
                };
                format!("{:<13}{}", name, if entry.locked { " L" } else { "" })
            })
            .collect();
        for row in cells.chunks(2) {
            out.push_str(&format!("{:<20}{}", row[0], row.get(1).map_or("", String::as_str)));
            out.push('\n');
        }
        out
    }

    /// Every validation problem of the side, in discovery order
    pub fn check(&self) -> Vec<Warning> {
        let head = self.head;
        let catalog = self.catalog();
        let mut warnings = Vec::new();

        let sectors = catalog.number_of_sectors();
        if sectors != SECTORS_40_TRACKS && sectors != SECTORS_80_TRACKS {
            warnings.push(Warning::side(
                WarningKind::SectorCount,
                head,
                format!("unsupported sector count {}", sectors),
            ));
        } else if sectors > self.physical_sectors() {
            warnings.push(Warning::side(
                WarningKind::SectorCount,
                head,
                format!(
                    "sector count {} exceeds the {} sectors of the image",
                    sectors,
                    self.physical_sectors()
                ),
            ));
        }

        let offset = catalog.last_entry_offset();
        if offset % ENTRY_SIZE != 0 || offset > MAX_LAST_ENTRY_OFFSET {
            warnings.push(Warning::side(
                WarningKind::CatalogOffset,
                head,
                format!("invalid last entry offset {}", offset),
            ));
        }

        if catalog.opt_byte() & OPT_RESERVED_BITS != 0 {
            warnings.push(Warning::side(
                WarningKind::OptionBits,
                head,
                format!("reserved option bits set ({:02X})", catalog.opt_byte()),
            ));
        }

        let files = self.files();
        let limit = self.data_limit();
        let mut seen: Vec<String> = Vec::new();
        for entry in &files {
            let name = entry.fullname();
            if crate::catalog::validate_filename(&entry.filename).is_err()
                || crate::catalog::validate_directory(entry.directory).is_err()
            {
                warnings.push(Warning::file(
                    WarningKind::FileName,
                    head,
                    &name,
                    "invalid characters in name",
                ));
            }
            let folded = name.to_ascii_uppercase();
            if seen.contains(&folded) {
                warnings.push(Warning::file(
                    WarningKind::DuplicateName,
                    head,
                    &name,
                    "name used more than once",
                ));
            }
            seen.push(folded);

            if entry.start_sector < CATALOG_SECTORS || entry.end_sector() > limit {
                warnings.push(Warning::file(
                    WarningKind::FileBounds,
                    head,
                    &name,
                    format!(
                        "sectors {:03X}-{:03X} outside {:03X}-{:03X}",
                        entry.start_sector,
                        entry.end_sector(),
                        CATALOG_SECTORS,
                        limit
                    ),
                ));
            }
        }

        let mut cursor = CATALOG_SECTORS;
        let mut ordered = true;
        for entry in files.iter().rev() {
            if entry.start_sector < cursor {
                ordered = false;
                warnings.push(Warning::file(
                    WarningKind::FileOrder,
                    head,
                    &entry.fullname(),
                    format!(
                        "starts at {:03X} before the end of the previous file ({:03X})",
                        entry.start_sector, cursor
                    ),
                ));
                break;
            }
            cursor = entry.end_sector();
        }
        if !ordered {
            warnings.extend(self.check_sectors_allocation());
        }

        warnings
    }

    /// Overlapping files, found by mapping every sector to its owner
    pub fn check_sectors_allocation(&self) -> Vec<Warning> {
        let files = self.files();
        let mut owners: BTreeMap<u16, usize> = BTreeMap::new();
        let mut pairs: Vec<(usize, usize)> = Vec::new();

        for (position, entry) in files.iter().enumerate() {
            for sector in entry.start_sector..entry.end_sector() {
                match owners.get(&sector) {
                    Some(&other) => {
                        if !pairs.contains(&(other, position)) {
                            pairs.push((other, position));
                        }
                    }
                    None => {
                        owners.insert(sector, position);
                    }
                }
            }
        }

        pairs
            .into_iter()
            .map(|(a, b)| {
                Warning::file(
                    WarningKind::FileOverlap,
                    self.head,
                    &files[b].fullname(),
                    format!("overlaps {}", files[a].fullname()),
                )
            })
            .collect()
    }
}

impl<I: DerefMut<Target = DiskImage>> DiskSide<I> {
    fn catalog_mut(&mut self) -> Catalog<&mut [u8]> {
        self.image.modified = true;
        let offset = self.catalog_offset;
        Catalog::wrap(&mut self.image.data[offset..offset + CATALOG_SIZE])
    }

    fn check_writable(&self) -> Result<()> {
        self.image.check_writable()
    }

    fn check_mutable(&self) -> Result<()> {
        self.check_writable()?;
        if !self.is_valid() {
            return Err(DfsError::corrupt(
                self.head,
                "side failed validation and cannot be modified",
            ));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.catalog_mut().increment_sequence();
    }

    /// Set the disk title
    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.check_mutable()?;
        self.catalog_mut().set_title(title)?;
        self.touch();
        Ok(())
    }

    /// Set the boot option
    pub fn set_boot_option(&mut self, option: BootOption) -> Result<()> {
        self.check_mutable()?;
        self.catalog_mut().set_boot_option(option);
        self.touch();
        Ok(())
    }

    /// Set the sequence number directly
    pub fn set_sequence_number(&mut self, sequence: u8) -> Result<()> {
        self.check_mutable()?;
        self.catalog_mut().set_sequence_number(sequence);
        Ok(())
    }

    /// Write an empty catalog for the full size of the head
    pub fn format(&mut self) -> Result<()> {
        self.check_writable()?;
        self.format_catalog()
    }

    pub(crate) fn format_catalog(&mut self) -> Result<()> {
        let sectors = self.physical_sectors();
        self.catalog_mut().format(sectors)?;
        self.image.valid[self.head as usize] = true;
        log::debug!("formatted side {} with {} sectors", self.head, sectors);
        Ok(())
    }

    /// Validate the catalog, report problems and update the valid flag
    pub fn validate(&mut self, sink: &mut dyn WarningSink, mode: WarnMode) -> bool {
        let warnings = self.check();
        let valid = !warnings.iter().any(Warning::is_fatal);
        self.image.valid[self.head as usize] = valid;
        report(sink, mode, &warnings);
        valid
    }

    /// Overwrite the first sectors of the side with a raw copy
    ///
    /// The catalog sector count is clamped to the size of this head.
    pub(crate) fn restore(&mut self, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        let end = sectors_for(data.len());
        self.get_sectors(0, end, None)?
            .write_all(&mut self.image, data)?;
        let physical = self.physical_sectors();
        if self.number_of_sectors() > physical {
            self.catalog_mut().set_number_of_sectors(physical)?;
        }
        log::debug!("restored {} sectors onto side {}", end, self.head);
        Ok(())
    }

    /// Open a catalog slot at `index` for a file at `start_sector`
    pub(crate) fn insert_entry(
        &mut self,
        index: usize,
        name: &ParsedName,
        start_sector: u16,
        length: usize,
    ) -> Result<()> {
        let count = self.number_of_files();
        if (count + 1) * ENTRY_SIZE > MAX_LAST_ENTRY_OFFSET {
            return Err(DfsError::CatalogFull { head: self.head });
        }
        if index > count {
            return Err(DfsError::invalid_value(format!(
                "insert position {} past {} entries",
                index, count
            )));
        }

        let end_sector = start_sector + sectors_for(length);
        if index > 0 {
            let after = self.entry(index - 1)?;
            if after.start_sector < end_sector {
                return Err(DfsError::corrupt(
                    self.head,
                    format!("new file would overlap {}", after.fullname()),
                ));
            }
        }
        if index < count {
            let before = self.entry(index)?;
            if before.end_sector() > start_sector {
                return Err(DfsError::corrupt(
                    self.head,
                    format!("new file would overlap {}", before.fullname()),
                ));
            }
        }

        let mut catalog = self.catalog_mut();
        catalog.shift_up(index);
        let mut record = catalog.entry_mut(index)?;
        record.clear();
        record.set_directory(name.directory)?;
        record.set_filename(&name.filename)?;
        record.set_start_sector(start_sector)?;
        record.set_length(length as u32)?;
        Ok(())
    }

    /// Remove the catalog slot at `index`
    pub(crate) fn remove_entry(&mut self, index: usize) -> Result<()> {
        if index >= self.number_of_files() {
            return Err(DfsError::invalid_value(format!(
                "no entry {} on side {}",
                index, self.head
            )));
        }
        self.catalog_mut().shift_down(index);
        Ok(())
    }

    fn allocate(&mut self, name: &ParsedName, length: usize, options: &AddOptions) -> Result<(u16, usize)> {
        if let Some(existing) = self.find(name.directory, &name.filename) {
            if !options.replace {
                return Err(DfsError::FileExists(existing.fullname()));
            }
            if existing.locked && !options.ignore_access {
                return Err(DfsError::access_denied(format!(
                    "{} is locked",
                    existing.fullname()
                )));
            }
            self.remove_entry(existing.index)?;
        }

        if self.number_of_files() >= MAX_FILES {
            return Err(DfsError::CatalogFull { head: self.head });
        }

        let needed = sectors_for(length);
        let free = self.available_sectors();
        if needed > free {
            return Err(DfsError::DiskFull { needed, free });
        }

        let largest = self.largest_free_block();
        if largest < needed {
            if options.no_compact {
                return Err(DfsError::NoContiguousSpace { needed, largest });
            }
            self.compact_files()?;
        }

        self.find_free_block(length)
            .ok_or_else(|| DfsError::NoContiguousSpace {
                needed,
                largest: self.largest_free_block(),
            })
    }

    /// Add a file, compacting first if free space is fragmented
    ///
    /// On failure the catalog is left as it was.
    pub fn add(&mut self, name: &str, data: &[u8], options: &AddOptions) -> Result<FileEntry> {
        self.check_mutable()?;
        let parsed = self.parse_name(name)?;
        let load = crate::catalog::fold_address(options.load.unwrap_or(0))?;
        let exec = match options.exec {
            Some(exec) => crate::catalog::fold_address(exec)?,
            None => load,
        };
        if data.len() > MAX_ADDRESS as usize {
            return Err(DfsError::DataTooLarge {
                size: data.len(),
                capacity: MAX_ADDRESS as usize,
            });
        }

        let snapshot = self.catalog().as_bytes().to_vec();
        let (start, index) = match self.allocate(&parsed, data.len(), options) {
            Ok(slot) => slot,
            Err(err) => {
                self.restore_catalog(&snapshot);
                return Err(err);
            }
        };

        self.insert_entry(index, &parsed, start, data.len())?;
        {
            let mut catalog = self.catalog_mut();
            let mut record = catalog.entry_mut(index)?;
            record.set_load_address(load)?;
            record.set_exec_address(exec)?;
            record.set_locked(options.locked.unwrap_or(false));
        }
        let entry = self.entry(index)?;
        let sectors = self.get_sectors(start, entry.end_sector(), None)?;
        sectors.write_all(&mut self.image, data)?;
        self.touch();

        log::debug!(
            "added {} at sector {:03X} ({} bytes) on side {}",
            entry.fullname(),
            start,
            data.len(),
            self.head
        );
        Ok(entry)
    }

    fn restore_catalog(&mut self, snapshot: &[u8]) {
        let offset = self.catalog_offset;
        self.image.data[offset..offset + CATALOG_SIZE].copy_from_slice(snapshot);
    }

    fn find_mutable(&self, name: &str, ignore_access: bool) -> Result<FileEntry> {
        let entry = self.find_entry(name)?;
        if entry.locked && !ignore_access {
            return Err(DfsError::access_denied(format!(
                "{} is locked",
                entry.fullname()
            )));
        }
        Ok(entry)
    }

    /// Delete a file, leaving its data in place
    pub fn delete(&mut self, name: &str, ignore_access: bool) -> Result<FileEntry> {
        self.check_mutable()?;
        let entry = self.find_mutable(name, ignore_access)?;
        self.remove_entry(entry.index)?;
        self.touch();
        Ok(entry)
    }

    /// Rename a file on this side
    pub fn rename(&mut self, from: &str, to: &str, options: &AddOptions) -> Result<FileEntry> {
        self.check_mutable()?;
        let entry = self.find_mutable(from, options.ignore_access)?;
        let target = self.parse_name(to)?;

        if let Some(existing) = self.find(target.directory, &target.filename) {
            if existing.index != entry.index {
                if !options.replace {
                    return Err(DfsError::FileExists(existing.fullname()));
                }
                if existing.locked && !options.ignore_access {
                    return Err(DfsError::access_denied(format!(
                        "{} is locked",
                        existing.fullname()
                    )));
                }
                self.remove_entry(existing.index)?;
            }
        }

        // Indices shift when a replaced file sat below the source
        let index = self
            .find(entry.directory, &entry.filename)
            .map(|e| e.index)
            .ok_or_else(|| DfsError::FileNotFound(entry.fullname()))?;
        {
            let mut catalog = self.catalog_mut();
            let mut record = catalog.entry_mut(index)?;
            record.set_directory(target.directory)?;
            record.set_filename(&target.filename)?;
            if let Some(load) = options.load {
                record.set_load_address(load)?;
            }
            if let Some(exec) = options.exec {
                record.set_exec_address(exec)?;
            }
            if let Some(locked) = options.locked {
                record.set_locked(locked);
            }
        }
        self.touch();
        self.entry(index)
    }

    /// Lock or unlock a file
    pub fn set_locked(&mut self, name: &str, locked: bool) -> Result<FileEntry> {
        self.check_mutable()?;
        let entry = self.find_entry(name)?;
        self.catalog_mut().entry_mut(entry.index)?.set_locked(locked);
        self.touch();
        self.entry(entry.index)
    }

    /// Change the load and execution addresses of a file
    ///
    /// Locked files are refused unless `ignore_access` is set.
    pub fn set_addresses(
        &mut self,
        name: &str,
        load: Option<u32>,
        exec: Option<u32>,
        ignore_access: bool,
    ) -> Result<FileEntry> {
        self.check_mutable()?;
        let entry = self.find_mutable(name, ignore_access)?;
        {
            let mut catalog = self.catalog_mut();
            let mut record = catalog.entry_mut(entry.index)?;
            if let Some(load) = load {
                record.set_load_address(load)?;
            }
            if let Some(exec) = exec {
                record.set_exec_address(exec)?;
            }
        }
        self.touch();
        self.entry(entry.index)
    }

    /// Rewrite a file in place; data must fit the allocated sectors
    pub fn write_entry(&mut self, entry: &FileEntry, data: &[u8]) -> Result<FileEntry> {
        self.check_mutable()?;
        if entry.locked {
            return Err(DfsError::access_denied(format!(
                "{} is locked",
                entry.fullname()
            )));
        }
        let sectors = self.entry_sectors(entry)?;
        sectors.write_all(&mut self.image, data)?;
        self.catalog_mut()
            .entry_mut(entry.index)?
            .set_length(data.len() as u32)?;
        self.touch();
        self.entry(entry.index)
    }

    /// Slide every file toward the catalog, leaving one free block at the end
    ///
    /// Returns true if any file moved.
    pub fn compact(&mut self) -> Result<bool> {
        self.check_mutable()?;
        self.compact_files()
    }

    fn compact_files(&mut self) -> Result<bool> {
        let files = self.files();

        let mut cursor = CATALOG_SECTORS;
        for entry in files.iter().rev() {
            if entry.start_sector < cursor {
                return Err(DfsError::corrupt(
                    self.head,
                    format!("{} is out of catalog order", entry.fullname()),
                ));
            }
            cursor = entry.end_sector();
        }
        if cursor > self.physical_sectors() {
            return Err(DfsError::corrupt(
                self.head,
                "files extend past the end of the side",
            ));
        }

        let old_end = self.last_used_sector();
        let mut cursor = CATALOG_SECTORS;
        let mut moved = false;
        for entry in files.iter().rev() {
            if entry.start_sector != cursor {
                self.move_sectors(entry.start_sector, cursor, entry.sectors())?;
                self.catalog_mut()
                    .entry_mut(entry.index)?
                    .set_start_sector(cursor)?;
                log::debug!(
                    "moved {} from {:03X} to {:03X}",
                    entry.fullname(),
                    entry.start_sector,
                    cursor
                );
                moved = true;
            }
            cursor += entry.sectors();
        }

        if moved {
            if old_end > cursor {
                let tail = Sectors::new(&self.image, self.head, cursor, old_end, None)?;
                tail.fill(&mut self.image, 0)?;
            }
            self.touch();
        }
        Ok(moved)
    }

    fn move_sectors(&mut self, from: u16, to: u16, count: u16) -> Result<()> {
        let geometry = self.image.geometry;
        for i in 0..count {
            let source = geometry.logical_sector_start(self.head, from + i)?;
            let target = geometry.logical_sector_start(self.head, to + i)?;
            self.image
                .data
                .copy_within(source..source + SECTOR_SIZE, target);
        }
        self.image.modified = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Geometry;

    fn image() -> DiskImage {
        DiskImage::new(Geometry::ssd_80())
    }

    fn add(image: &mut DiskImage, name: &str, size: usize) -> FileEntry {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        image
            .side_mut(0)
            .unwrap()
            .add(name, &data, &AddOptions::new())
            .unwrap()
    }

    #[test]
    fn test_empty_side() {
        let image = image();
        let side = image.side(0).unwrap();
        assert_eq!(side.number_of_files(), 0);
        assert_eq!(side.number_of_sectors(), 800);
        assert_eq!(side.used_sectors(), 0);
        assert_eq!(side.free_sectors(), 800);
        assert_eq!(side.available_sectors(), 798);
        assert_eq!(side.largest_free_block(), 798);
        assert_eq!(side.find_free_block(1000), Some((2, 0)));
        assert!(side.cat().starts_with(" (00)\n"));
    }

    #[test]
    fn test_add_orders_entries() {
        let mut image = image();
        add(&mut image, "FIRST", 300);
        add(&mut image, "SECOND", 256);

        let side = image.side(0).unwrap();
        let files = side.files();
        assert_eq!(files[0].filename, "SECOND");
        assert_eq!(files[0].start_sector, 4);
        assert_eq!(files[1].filename, "FIRST");
        assert_eq!(files[1].start_sector, 2);
        assert_eq!(side.used_sectors() + side.free_sectors(), 800);
        assert_eq!(side.sequence_number(), 0x02);
    }

    #[test]
    fn test_add_fills_gap_with_correct_index() {
        let mut image = image();
        add(&mut image, "A", 512);
        add(&mut image, "B", 512);
        add(&mut image, "C", 512);
        image.side_mut(0).unwrap().delete("B", false).unwrap();

        let entry = add(&mut image, "D", 256);
        assert_eq!(entry.start_sector, 4);
        let names: Vec<String> = image
            .side(0)
            .unwrap()
            .files()
            .into_iter()
            .map(|e| e.filename)
            .collect();
        assert_eq!(names, vec!["C", "D", "A"]);
        assert!(image.side(0).unwrap().check().is_empty());
    }

    #[test]
    fn test_add_existing() {
        let mut image = image();
        add(&mut image, "GAME", 100);
        let mut side = image.side_mut(0).unwrap();
        let result = side.add("$.game", b"x", &AddOptions::new());
        assert!(matches!(result, Err(DfsError::FileExists(_))));

        side.set_locked("GAME", true).unwrap();
        let result = side.add("GAME", b"x", &AddOptions::new().replace(true));
        assert!(matches!(result, Err(DfsError::AccessDenied(_))));
        assert_eq!(side.number_of_files(), 1);

        let entry = side
            .add("GAME", b"new", &AddOptions::new().replace(true).ignore_access(true))
            .unwrap();
        assert_eq!(entry.length, 3);
        assert_eq!(side.number_of_files(), 1);
        assert_eq!(side.read_file("GAME").unwrap(), b"new");
    }

    #[test]
    fn test_catalog_full() {
        let mut image = image();
        for i in 0..MAX_FILES {
            add(&mut image, &format!("F{}", i), 10);
        }
        let mut side = image.side_mut(0).unwrap();
        let result = side.add("LAST", b"x", &AddOptions::new());
        assert!(matches!(result, Err(DfsError::CatalogFull { head: 0 })));
        assert_eq!(side.number_of_files(), MAX_FILES);
    }

    #[test]
    fn test_disk_full_restores_replaced_entry() {
        let mut image = image();
        add(&mut image, "BIG", 700 * SECTOR_SIZE);
        let before = image.side(0).unwrap().catalog().as_bytes().to_vec();

        let mut side = image.side_mut(0).unwrap();
        let result = side.add(
            "BIG",
            &vec![1u8; 900 * SECTOR_SIZE],
            &AddOptions::new().replace(true),
        );
        assert!(result.unwrap_err().is_capacity());
        assert_eq!(side.catalog().as_bytes(), &before[..]);
    }

    #[test]
    fn test_disk_full_leaves_catalog_sectors() {
        let mut image = image();
        add(&mut image, "FILL", 797 * SECTOR_SIZE);
        let mut side = image.side_mut(0).unwrap();
        assert_eq!(side.used_sectors(), 797);
        assert_eq!(side.free_sectors(), 3);

        side.add("ONE", b"x", &AddOptions::new()).unwrap();
        assert_eq!(side.free_sectors(), 2);
        assert_eq!(side.available_sectors(), 0);
        let result = side.add("TWO", b"x", &AddOptions::new());
        assert!(matches!(
            result,
            Err(DfsError::DiskFull { needed: 1, free: 0 })
        ));
        assert_eq!(side.number_of_files(), 2);
    }

    #[test]
    fn test_compact_before_add() {
        let mut image = image();
        add(&mut image, "A", 200 * SECTOR_SIZE);
        add(&mut image, "B", 200 * SECTOR_SIZE);
        add(&mut image, "C", 200 * SECTOR_SIZE);
        add(&mut image, "D", 190 * SECTOR_SIZE);
        image.side_mut(0).unwrap().delete("A", false).unwrap();
        image.side_mut(0).unwrap().delete("C", false).unwrap();

        let data = vec![7u8; 300 * SECTOR_SIZE];
        let mut side = image.side_mut(0).unwrap();
        assert_eq!(side.largest_free_block(), 200);
        let result = side.add("E", &data, &AddOptions::new().no_compact(true));
        assert!(matches!(result, Err(DfsError::NoContiguousSpace { .. })));

        let b = side.read_file("B").unwrap();
        let entry = side.add("E", &data, &AddOptions::new()).unwrap();
        assert_eq!(entry.start_sector, 392);
        assert_eq!(side.read_file("B").unwrap(), b);
        assert_eq!(side.read_file("E").unwrap(), data);
        assert!(side.check().is_empty());
    }

    #[test]
    fn test_compact_zeroes_tail() {
        let mut image = image();
        add(&mut image, "A", 512);
        add(&mut image, "B", 512);
        image.side_mut(0).unwrap().delete("A", false).unwrap();

        let mut side = image.side_mut(0).unwrap();
        assert!(side.compact().unwrap());
        assert_eq!(side.entry(0).unwrap().start_sector, 2);
        assert_eq!(side.last_used_sector(), 4);
        let tail = side.get_sectors(4, 6, None).unwrap();
        assert!(tail.read_raw(side.image()).unwrap().iter().all(|&b| b == 0));
        assert!(!side.compact().unwrap());
    }

    #[test]
    fn test_delete_keeps_order() {
        let mut image = image();
        add(&mut image, "A", 100);
        add(&mut image, "B", 100);
        add(&mut image, "C", 100);
        let before = image.side(0).unwrap().files();

        let mut side = image.side_mut(0).unwrap();
        side.delete("B", false).unwrap();
        assert_eq!(side.catalog().last_entry_offset(), 16);
        let after = side.files();
        assert_eq!(after[0].start_sector, before[0].start_sector);
        assert_eq!(after[1].start_sector, before[2].start_sector);
        assert_eq!(after[1].filename, "A");
    }

    #[test]
    fn test_rename() {
        let mut image = image();
        add(&mut image, "OLD", 100);
        add(&mut image, "OTHER", 100);
        let mut side = image.side_mut(0).unwrap();

        let entry = side.rename("OLD", "B.NEW", &AddOptions::new()).unwrap();
        assert_eq!(entry.fullname(), "B.NEW");
        assert!(side.find_entry("OLD").unwrap_err().is_not_found());

        let result = side.rename("B.NEW", "OTHER", &AddOptions::new());
        assert!(matches!(result, Err(DfsError::FileExists(_))));
        side.rename("B.NEW", "OTHER", &AddOptions::new().replace(true))
            .unwrap();
        assert_eq!(side.number_of_files(), 1);
        assert_eq!(side.files()[0].start_sector, 2);
    }

    #[test]
    fn test_set_addresses_respects_lock() {
        let mut image = image();
        add(&mut image, "CODE", 100);
        let mut side = image.side_mut(0).unwrap();
        side.set_locked("CODE", true).unwrap();

        let result = side.set_addresses("CODE", Some(0x1900), None, false);
        assert!(matches!(result, Err(DfsError::AccessDenied(_))));
        assert_eq!(side.find_entry("CODE").unwrap().load_address, 0);

        let entry = side
            .set_addresses("CODE", Some(0x1900), Some(0x8023), true)
            .unwrap();
        assert_eq!(entry.load_address, 0x1900);
        assert_eq!(entry.exec_address, 0x8023);
        assert!(entry.locked);
    }

    #[test]
    fn test_write_entry_in_place() {
        let mut image = image();
        let entry = add(&mut image, "TEXT", 500);
        let mut side = image.side_mut(0).unwrap();
        let updated = side.write_entry(&entry, b"short").unwrap();
        assert_eq!(updated.length, 5);
        assert_eq!(side.read_entry(&updated).unwrap(), b"short");
        let result = side.write_entry(&updated, &[0u8; 600]);
        assert!(matches!(result, Err(DfsError::DataTooLarge { .. })));
    }

    #[test]
    fn test_invalid_side_blocks_mutation() {
        let mut image = image();
        add(&mut image, "A", 100);
        let mut side = image.side_mut(0).unwrap();
        side.catalog_mut().set_number_of_sectors(123).unwrap();

        let mut warnings: Vec<Warning> = Vec::new();
        assert!(!side.validate(&mut warnings, WarnMode::All));
        assert_eq!(warnings[0].kind, WarningKind::SectorCount);
        assert!(side.read_file("A").is_ok());
        assert!(matches!(
            side.add("B", b"x", &AddOptions::new()),
            Err(DfsError::CatalogCorrupt { .. })
        ));
    }

    #[test]
    fn test_overlap_detected() {
        let mut image = image();
        add(&mut image, "A", 512);
        add(&mut image, "B", 512);
        let mut side = image.side_mut(0).unwrap();
        side.catalog_mut().entry_mut(0).unwrap().set_start_sector(3).unwrap();

        let warnings = side.check();
        let kinds: Vec<WarningKind> = warnings.iter().map(|w| w.kind).collect();
        assert!(kinds.contains(&WarningKind::FileOrder));
        assert!(kinds.contains(&WarningKind::FileOverlap));
        assert!(matches!(side.compact(), Err(DfsError::CatalogCorrupt { .. })));
    }

    #[test]
    fn test_option_bits_not_fatal() {
        let mut image = image();
        let mut side = image.side_mut(0).unwrap();
        let opt = side.catalog().opt_byte();
        side.image.data[SECTOR_SIZE + catalog2::OPT] = opt | 0x40;

        let mut warnings: Vec<Warning> = Vec::new();
        assert!(side.validate(&mut warnings, WarnMode::First));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::OptionBits);
    }

    #[test]
    fn test_cat_listing() {
        let mut image = image();
        {
            let mut side = image.side_mut(0).unwrap();
            side.set_title("GAMES").unwrap();
            side.set_boot_option(BootOption::Exec).unwrap();
        }
        add(&mut image, "!BOOT", 10);
        add(&mut image, "B.DATA", 10);
        image.side_mut(0).unwrap().set_locked("!BOOT", true).unwrap();

        let cat = image.side(0).unwrap().cat();
        let lines: Vec<&str> = cat.lines().collect();
        assert_eq!(lines[0], "GAMES (05)");
        assert!(lines[1].starts_with("Drive 0"));
        assert!(lines[1].ends_with("Option 3 (EXEC)"));
        assert!(lines[4].starts_with("    !BOOT     L"));
        assert!(lines[4].contains("  B.DATA"));
    }

    #[test]
    fn test_side_digests_differ_by_mode() {
        let mut image = image();
        add(&mut image, "A", 300);
        let side = image.side(0).unwrap();
        let all = side.digest(DigestMode::All, DigestAlgorithm::Sha1).unwrap();
        let used = side.digest(DigestMode::Used, DigestAlgorithm::Sha1).unwrap();
        let data = side.digest(DigestMode::Data, DigestAlgorithm::Sha1).unwrap();
        assert_ne!(all, used);
        assert_ne!(used, data);

        let entry = side.find_entry("A").unwrap();
        let content = side.read_entry(&entry).unwrap();
        assert_eq!(
            side.entry_digest(&entry, DigestMode::Data, DigestAlgorithm::Sha1)
                .unwrap(),
            DigestAlgorithm::Sha1.hex_digest(&content)
        );
    }

    #[test]
    fn test_read_only_image() {
        let mut image = image();
        image.for_write = false;
        let mut side = image.side_mut(0).unwrap();
        assert!(matches!(
            side.add("A", b"x", &AddOptions::new()),
            Err(DfsError::AccessDenied(_))
        ));
    }

    #[test]
    fn test_physical_sectors() {
        let image = DiskImage::new(Geometry::dsd_40());
        let side = image.side(1).unwrap();
        let sectors = side.get_physical_sectors(0, 5, 2, 0).unwrap();
        assert_eq!(sectors.start_sector(), 5);
        assert_eq!(sectors.sector_count(), 15);
        assert_eq!(sectors.chunks().len(), 2);
        assert!(side.get_physical_sectors(39, 0, 40, 0).is_ok());
    }
}
