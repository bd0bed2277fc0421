/// DFS image data structures

/// Options for opening images and adding files
pub mod builder;
/// Logical sector runs
pub mod sectors;
/// Catalog and allocation engine of one side
pub mod side;

pub use builder::{AddOptions, ImageOptions};
pub use sectors::{hexdump, Sectors};
pub use side::{DiskSide, FreeBlock};

use crate::catalog::{FileEntry, ParsedName};
use crate::digest::DigestAlgorithm;
use crate::error::{DfsError, Result};
use crate::format::constants::*;
use crate::format::{Geometry, OpenMode, SizeOption};
use crate::mmb::{Container, MmbStatus};
use crate::warn::{report, Silent, WarnMode, Warning, WarningKind, WarningSink};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Where an image is persisted
#[derive(Debug, Clone)]
pub(crate) enum Backing {
    /// Not saved anywhere yet
    Memory,
    /// A plain `.ssd`/`.dsd` file
    File(PathBuf),
    /// A slot of an MMB container
    Slot {
        container: Rc<RefCell<Container>>,
        index: usize,
    },
}

/// A DFS disk image held in memory
///
/// The buffer always spans the full geometry. Sides are reached through
/// [`DiskImage::side`] and [`DiskImage::side_mut`]; file level
/// operations take names of the form `[:drive.][dir.]name`, where drive
/// 0 is head 0 and drive 2 is head 1.
#[derive(Debug)]
pub struct DiskImage {
    pub(crate) id: u64,
    pub(crate) geometry: Geometry,
    pub(crate) data: Vec<u8>,
    pub(crate) valid: [bool; 2],
    pub(crate) modified: bool,
    pub(crate) for_write: bool,
    pub(crate) catalog_only: bool,
    pub(crate) original_size: usize,
    pub(crate) size_option: SizeOption,
    pub(crate) warn_mode: WarnMode,
    pub(crate) backing: Backing,
}

impl DiskImage {
    /// Create a formatted, writable image in memory
    pub fn new(geometry: Geometry) -> Self {
        let mut image = Self::from_parts(
            geometry,
            vec![0u8; geometry.total_size()],
            &ImageOptions::new().write(true),
            Backing::Memory,
            0,
        );
        image.format_sides();
        image.modified = true;
        image
    }

    pub(crate) fn from_parts(
        geometry: Geometry,
        data: Vec<u8>,
        options: &ImageOptions,
        backing: Backing,
        original_size: usize,
    ) -> Self {
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            geometry,
            data,
            valid: [true; 2],
            modified: false,
            for_write: options.for_write,
            catalog_only: options.catalog_only,
            original_size,
            size_option: options.size_option,
            warn_mode: options.warn_mode,
            backing,
        }
    }

    /// Options builder for [`ImageOptions::open`]
    pub fn options() -> ImageOptions {
        ImageOptions::new()
    }

    /// Open an existing image read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ImageOptions::new().mode(OpenMode::Existing).open(path)
    }

    /// Create a new image file, geometry inferred from the extension
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        ImageOptions::new()
            .write(true)
            .mode(OpenMode::New)
            .open(path)
    }

    pub(crate) fn format_sides(&mut self) {
        for head in 0..self.geometry.heads {
            if let Ok(mut side) = DiskSide::new(&mut *self, head) {
                let _ = side.format_catalog();
            }
        }
    }

    /// Geometry of the image
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Number of heads
    pub fn heads(&self) -> u8 {
        self.geometry.heads
    }

    /// Backing file path (the container for MMB slots)
    pub fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::Memory => None,
            Backing::File(path) => Some(path.clone()),
            Backing::Slot { container, .. } => Some(container.borrow().path.clone()),
        }
    }

    /// MMB slot the image lives in
    pub fn slot(&self) -> Option<usize> {
        match &self.backing {
            Backing::Slot { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// False for an MMB slot that has never been written
    pub fn is_initialized(&self) -> bool {
        match &self.backing {
            Backing::Slot { container, index } => {
                container.borrow().status(*index) != MmbStatus::Uninitialized
            }
            _ => true,
        }
    }

    /// Whether there are unsaved changes
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether the image was opened for writing
    pub fn is_writable(&self) -> bool {
        self.for_write
    }

    /// Whether only the catalog sectors were loaded
    pub fn is_catalog_only(&self) -> bool {
        self.catalog_only
    }

    /// Size of the file when it was opened
    pub fn original_size(&self) -> usize {
        self.original_size
    }

    /// Size policy used by [`DiskImage::save`]
    pub fn size_option(&self) -> SizeOption {
        self.size_option
    }

    /// Change the size policy used by [`DiskImage::save`]
    pub fn set_size_option(&mut self, size_option: SizeOption) {
        self.size_option = size_option;
    }

    /// The whole image buffer
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        if !self.for_write {
            return Err(DfsError::access_denied("image is open read-only"));
        }
        if self.catalog_only {
            return Err(DfsError::access_denied("image is catalog-only"));
        }
        Ok(())
    }

    fn check_data(&self) -> Result<()> {
        if self.catalog_only {
            return Err(DfsError::access_denied(
                "only the catalog of this image was loaded",
            ));
        }
        Ok(())
    }

    /// Read access to one head
    pub fn side(&self, head: u8) -> Result<DiskSide<&DiskImage>> {
        DiskSide::new(self, head)
    }

    /// Write access to one head
    pub fn side_mut(&mut self, head: u8) -> Result<DiskSide<&mut DiskImage>> {
        DiskSide::new(self, head)
    }

    /// Read access to every head
    pub fn sides(&self) -> impl Iterator<Item = DiskSide<&DiskImage>> + '_ {
        (0..self.geometry.heads).filter_map(move |head| self.side(head).ok())
    }

    /// Heads a name refers to: its drive if given, otherwise all
    pub fn default_sides(&self, name: Option<&str>) -> Result<Vec<u8>> {
        let head = match name {
            Some(name) => ParsedName::parse(name)?.head,
            None => None,
        };
        match head {
            Some(head) if head >= self.geometry.heads => Err(DfsError::InvalidHead {
                head,
                heads: self.geometry.heads,
            }),
            Some(head) => Ok(vec![head]),
            None => Ok((0..self.geometry.heads).collect()),
        }
    }

    /// Find a file; without a drive prefix every head is searched
    pub fn get_entry(&self, name: &str) -> Result<FileEntry> {
        let parsed = ParsedName::parse(name)?;
        for head in self.default_sides(Some(name))? {
            if let Some(entry) = self.side(head)?.find(parsed.directory, &parsed.filename) {
                return Ok(entry);
            }
        }
        Err(DfsError::FileNotFound(parsed.fullname()))
    }

    /// Every file on every head
    pub fn files(&self) -> Vec<FileEntry> {
        self.sides().flat_map(|side| side.files()).collect()
    }

    /// Files accepted by `filter`
    pub fn get_files<F>(&self, filter: F) -> Vec<FileEntry>
    where
        F: Fn(&FileEntry) -> bool,
    {
        self.files().into_iter().filter(|entry| filter(entry)).collect()
    }

    /// Contents of a file
    pub fn read_file(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self.get_entry(name)?;
        self.side(entry.head)?.read_entry(&entry)
    }

    /// Add a file to the head named by its drive prefix (default head 0)
    pub fn add_file(&mut self, name: &str, data: &[u8], options: &AddOptions) -> Result<FileEntry> {
        let head = ParsedName::parse(name)?.head.unwrap_or(0);
        self.side_mut(head)?.add(name, data, options)
    }

    /// Delete a file
    pub fn delete(&mut self, name: &str, ignore_access: bool) -> Result<FileEntry> {
        let entry = self.get_entry(name)?;
        self.side_mut(entry.head)?
            .delete(&entry.drive_name(), ignore_access)
    }

    /// Delete every file accepted by `filter`, returning how many went
    ///
    /// Nothing is deleted if a selected file is locked and
    /// `ignore_access` is false.
    pub fn destroy<F>(&mut self, filter: F, ignore_access: bool) -> Result<usize>
    where
        F: Fn(&FileEntry) -> bool,
    {
        let targets = self.get_files(filter);
        if !ignore_access {
            if let Some(locked) = targets.iter().find(|entry| entry.locked) {
                return Err(DfsError::access_denied(format!(
                    "{} is locked",
                    locked.drive_name()
                )));
            }
        }
        for entry in &targets {
            self.side_mut(entry.head)?
                .delete(&entry.drive_name(), ignore_access)?;
        }
        Ok(targets.len())
    }

    /// Rename a file, moving it to the other head if the new name says so
    pub fn rename(&mut self, from: &str, to: &str, options: &AddOptions) -> Result<FileEntry> {
        let source = self.get_entry(from)?;
        let target = ParsedName::parse(to)?;
        let head = target.head.unwrap_or(source.head);

        if head == source.head {
            return self
                .side_mut(head)?
                .rename(&source.drive_name(), to, options);
        }

        if source.locked && !options.ignore_access {
            return Err(DfsError::access_denied(format!(
                "{} is locked",
                source.drive_name()
            )));
        }
        self.check_writable()?;
        if !self.side(source.head)?.is_valid() {
            return Err(DfsError::corrupt(
                source.head,
                "side failed validation and cannot be modified",
            ));
        }

        let data = self.side(source.head)?.read_entry(&source)?;
        let entry = self
            .side_mut(head)?
            .add(to, &data, &inherit(&source, options))?;
        self.side_mut(source.head)?
            .delete(&source.drive_name(), true)?;
        Ok(entry)
    }

    /// Copy a file, to the other head or under a new name
    pub fn copy(&mut self, from: &str, to: &str, options: &AddOptions) -> Result<FileEntry> {
        let source = self.get_entry(from)?;
        let target = ParsedName::parse(to)?;
        let head = target.head.unwrap_or(source.head);
        if head == source.head && source.matches(target.directory, &target.filename) {
            return Err(DfsError::invalid_value(format!(
                "cannot copy {} onto itself",
                source.drive_name()
            )));
        }

        let data = self.side(source.head)?.read_entry(&source)?;
        let to = format!(":{}.{}", head * 2, target.fullname());
        self.side_mut(head)?
            .add(&to, &data, &inherit(&source, options))
    }

    /// Lock a file
    pub fn lock(&mut self, name: &str) -> Result<FileEntry> {
        let entry = self.get_entry(name)?;
        self.side_mut(entry.head)?
            .set_locked(&entry.drive_name(), true)
    }

    /// Unlock a file
    pub fn unlock(&mut self, name: &str) -> Result<FileEntry> {
        let entry = self.get_entry(name)?;
        self.side_mut(entry.head)?
            .set_locked(&entry.drive_name(), false)
    }

    /// Compact one head, or all of them; true if anything moved
    pub fn compact(&mut self, head: Option<u8>) -> Result<bool> {
        let heads = match head {
            Some(head) => vec![head],
            None => (0..self.geometry.heads).collect(),
        };
        let mut moved = false;
        for head in heads {
            moved |= self.side_mut(head)?.compact()?;
        }
        Ok(moved)
    }

    /// Erase the catalogs of every head
    pub fn format(&mut self) -> Result<()> {
        self.check_writable()?;
        for head in 0..self.geometry.heads {
            self.side_mut(head)?.format()?;
        }
        Ok(())
    }

    /// Validate every head, reporting through `sink` per the warn mode
    ///
    /// Returns true if every head can be modified.
    pub fn validate(&mut self, sink: &mut dyn WarningSink) -> bool {
        if self.original_size % SECTOR_SIZE != 0 {
            let warning = Warning {
                kind: WarningKind::ImageSize,
                head: None,
                file: None,
                message: format!(
                    "image size {} is not a multiple of {}",
                    self.original_size, SECTOR_SIZE
                ),
            };
            report(sink, self.warn_mode, &[warning]);
        }

        let mode = self.warn_mode;
        let mut valid = true;
        for head in 0..self.geometry.heads {
            if let Ok(mut side) = self.side_mut(head) {
                valid &= side.validate(sink, mode);
            }
        }
        valid
    }

    /// Offset just past the highest used sector of any head
    pub fn min_size(&self) -> usize {
        self.sides()
            .filter_map(|side| {
                let last = side.last_used_sector().min(side.physical_sectors());
                self.geometry
                    .logical_sector_start(side.head(), last - 1)
                    .ok()
                    .map(|start| start + SECTOR_SIZE)
            })
            .max()
            .unwrap_or(CATALOG_SIZE)
            .max(self.geometry.min_catalog_size())
    }

    /// Number of bytes written by a save under `option`
    pub fn output_size(&self, option: SizeOption) -> usize {
        if self.slot().is_some() {
            return MMB_SLOT_SIZE;
        }
        let size = match option {
            SizeOption::Keep => self
                .original_size
                .div_ceil(SECTOR_SIZE)
                .saturating_mul(SECTOR_SIZE)
                .max(self.min_size()),
            SizeOption::Expand => self.geometry.total_size(),
            SizeOption::Shrink => self.min_size(),
        };
        size.min(self.geometry.total_size())
    }

    /// Hex digest of the bytes a save under `option` would write
    pub fn digest(&self, algorithm: DigestAlgorithm, option: SizeOption) -> Result<String> {
        self.check_data()?;
        Ok(algorithm.hex_digest(&self.data[..self.output_size(option)]))
    }

    /// Write the image back to where it came from
    pub fn save(&mut self) -> Result<()> {
        if !self.for_write {
            return Err(DfsError::access_denied("image is open read-only"));
        }
        match self.backing.clone() {
            Backing::Memory => return Err(DfsError::NoBackingFile),
            Backing::File(path) => {
                let size = self.output_size(self.size_option);
                crate::io::writer::write_image(
                    self,
                    &path,
                    size,
                    self.size_option == SizeOption::Shrink,
                )?;
                self.original_size = size;
            }
            Backing::Slot { container, index } => {
                container.borrow_mut().save_slot(index, self)?;
            }
        }
        self.modified = false;
        Ok(())
    }

    /// Write the image to a new plain image file and switch to it
    pub fn save_as<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.check_data()?;
        if builder::is_mmb_path(path) {
            return Err(DfsError::invalid_value(
                "use MmbFile::open_entry to write into a container",
            ));
        }
        self.backing = Backing::File(path.to_path_buf());
        self.original_size = 0;
        let size = self.output_size(self.size_option);
        crate::io::writer::write_image(self, path, size, true)?;
        self.original_size = size;
        self.for_write = true;
        self.modified = false;
        log::info!("saved image as {} ({} bytes)", path.display(), size);
        Ok(())
    }

    /// Save pending changes and release the image
    ///
    /// An image with no backing file or slot has nothing to flush; use
    /// [`save_as`](Self::save_as) first to keep its contents.
    pub fn close(mut self) -> Result<()> {
        if !self.modified || !self.for_write {
            return Ok(());
        }
        if matches!(self.backing, Backing::Memory) {
            log::debug!("closing in-memory image without saving");
            return Ok(());
        }
        self.save()
    }

    /// Release the image without saving
    pub fn discard(self) {
        if self.modified {
            log::debug!("discarding unsaved changes");
        }
    }

    fn same_storage(&self, other: &DiskImage) -> bool {
        match (&self.backing, &other.backing) {
            (Backing::File(a), Backing::File(b)) => same_file(a, b),
            (
                Backing::Slot {
                    container: a,
                    index: i,
                },
                Backing::Slot {
                    container: b,
                    index: j,
                },
            ) => i == j && (Rc::ptr_eq(a, b) || same_file(&a.borrow().path, &b.borrow().path)),
            _ => false,
        }
    }

    fn check_alias(&self, source: &DiskImage, source_head: u8, head: u8) -> Result<()> {
        if source_head == head && self.same_storage(source) {
            return Err(DfsError::invalid_value(
                "source and destination are the same side of the same image",
            ));
        }
        Ok(())
    }

    /// Copy every file of a side of `source` to a head of this image
    pub fn copy_over(
        &mut self,
        source: &DiskImage,
        source_head: u8,
        head: u8,
        options: &AddOptions,
    ) -> Result<usize> {
        self.check_alias(source, source_head, head)?;
        let from = source.side(source_head)?;
        let files = from.files();
        for entry in files.iter().rev() {
            let data = from.read_entry(entry)?;
            let name = format!(":{}.{}", head * 2, entry.fullname());
            self.side_mut(head)?
                .add(&name, &data, &inherit(entry, options))?;
        }
        Ok(files.len())
    }

    /// Copy the used sectors of a side of `source` over a head of this image
    pub fn backup(&mut self, source: &DiskImage, source_head: u8, head: u8) -> Result<()> {
        self.check_alias(source, source_head, head)?;
        self.check_writable()?;
        let from = source.side(source_head)?;
        let end = from.last_used_sector().min(from.physical_sectors());
        let data = from.get_sectors(0, end, None)?.read_raw(source)?;

        let mut side = self.side_mut(head)?;
        if end > side.physical_sectors() {
            return Err(DfsError::DiskFull {
                needed: end,
                free: side.physical_sectors(),
            });
        }
        side.restore(&data)?;
        side.validate(&mut Silent, WarnMode::None);
        Ok(())
    }
}

/// Source attributes unless overridden
fn inherit(source: &FileEntry, options: &AddOptions) -> AddOptions {
    AddOptions {
        load: options.load.or(Some(source.load_address)),
        exec: options.exec.or(Some(source.exec_address)),
        locked: options.locked.or(Some(source.locked)),
        ..*options
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DiskImage {
        let mut image = DiskImage::new(Geometry::dsd_80());
        image
            .add_file("$.HELLO", b"HELLO WORLD", &AddOptions::new().load(0x1900))
            .unwrap();
        image
            .add_file(":2.B.DATA", &[1u8; 600], &AddOptions::new())
            .unwrap();
        image
    }

    #[test]
    fn test_new_image() {
        let image = DiskImage::new(Geometry::ssd_40());
        assert_eq!(image.as_bytes().len(), SSD_40_SIZE);
        assert_eq!(image.side(0).unwrap().number_of_sectors(), 400);
        assert!(image.is_modified());
        assert!(image.is_writable());
        assert!(image.side(1).is_err());
    }

    #[test]
    fn test_get_entry_searches_heads() {
        let image = sample();
        assert_eq!(image.get_entry("hello").unwrap().head, 0);
        assert_eq!(image.get_entry("B.DATA").unwrap().head, 1);
        assert!(image.get_entry(":0.B.DATA").unwrap_err().is_not_found());
        assert_eq!(image.files().len(), 2);
        assert_eq!(image.get_files(|e| e.directory == 'B').len(), 1);
    }

    #[test]
    fn test_default_sides() {
        let image = sample();
        assert_eq!(image.default_sides(None).unwrap(), vec![0, 1]);
        assert_eq!(image.default_sides(Some(":2.X")).unwrap(), vec![1]);
        let single = DiskImage::new(Geometry::ssd_80());
        assert!(single.default_sides(Some(":2.X")).is_err());
    }

    #[test]
    fn test_rename_across_heads() {
        let mut image = sample();
        image.lock("HELLO").unwrap();
        let result = image.rename("HELLO", ":2.HELLO", &AddOptions::new());
        assert!(matches!(result, Err(DfsError::AccessDenied(_))));

        let entry = image
            .rename("HELLO", ":2.HELLO", &AddOptions::new().ignore_access(true))
            .unwrap();
        assert_eq!(entry.head, 1);
        assert_eq!(entry.load_address, 0x1900);
        assert!(entry.locked);
        assert_eq!(image.side(0).unwrap().number_of_files(), 0);
        assert_eq!(image.read_file(":2.HELLO").unwrap(), b"HELLO WORLD");
    }

    #[test]
    fn test_copy() {
        let mut image = sample();
        let entry = image.copy("HELLO", "COPY", &AddOptions::new()).unwrap();
        assert_eq!(entry.exec_address, 0x1900);
        assert_eq!(image.read_file("COPY").unwrap(), b"HELLO WORLD");
        assert!(image.copy("HELLO", "$.HELLO", &AddOptions::new()).is_err());
        image.copy("HELLO", ":2.HELLO", &AddOptions::new()).unwrap();
        assert_eq!(image.side(1).unwrap().number_of_files(), 2);
    }

    #[test]
    fn test_destroy() {
        let mut image = sample();
        image.copy("HELLO", "HELLO2", &AddOptions::new()).unwrap();
        image.lock("HELLO2").unwrap();

        let result = image.destroy(|e| e.filename.starts_with("HELLO"), false);
        assert!(matches!(result, Err(DfsError::AccessDenied(_))));
        assert_eq!(image.files().len(), 3);

        let count = image
            .destroy(|e| e.filename.starts_with("HELLO"), true)
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(image.files().len(), 1);
    }

    #[test]
    fn test_output_sizes() {
        let mut image = sample();
        let min = image.min_size();
        // B.DATA occupies sectors 2-4 of head 1, interleaved after track 0 of head 0
        assert_eq!(min, TRACK_SIZE + 5 * SECTOR_SIZE);
        assert_eq!(image.output_size(SizeOption::Shrink), min);
        assert_eq!(image.output_size(SizeOption::Expand), 2 * SSD_80_SIZE);
        assert_eq!(image.output_size(SizeOption::Keep), min);
        image.original_size = 100_000;
        assert_eq!(image.output_size(SizeOption::Keep), 100_096);
    }

    #[test]
    fn test_save_without_backing() {
        let mut image = sample();
        assert!(matches!(image.save(), Err(DfsError::NoBackingFile)));
    }

    #[test]
    fn test_close_in_memory_image() {
        let image = sample();
        assert!(image.is_modified());
        assert!(image.close().is_ok());
    }

    #[test]
    fn test_punctuation_filenames() {
        let mut image = DiskImage::new(Geometry::ssd_80());
        image.add_file("A#B", b"hash", &AddOptions::new()).unwrap();
        image.add_file("Q\"R", b"quote", &AddOptions::new()).unwrap();
        image.add_file("#.STAR*", b"star", &AddOptions::new()).unwrap();

        assert_eq!(image.read_file("A#B").unwrap(), b"hash");
        assert_eq!(image.read_file("$.Q\"R").unwrap(), b"quote");
        assert_eq!(image.get_entry("#.STAR*").unwrap().directory, '#');
        assert!(image.side(0).unwrap().check().is_empty());
        assert!(image.add_file("A.B.C", b"x", &AddOptions::new()).is_err());
    }

    #[test]
    fn test_copy_over_and_backup() {
        let source = sample();
        let mut target = DiskImage::new(Geometry::ssd_80());
        assert_eq!(target.copy_over(&source, 1, 0, &AddOptions::new()).unwrap(), 1);
        assert_eq!(target.read_file("B.DATA").unwrap(), vec![1u8; 600]);

        let mut copy = DiskImage::new(Geometry::ssd_40());
        copy.backup(&source, 0, 0).unwrap();
        assert_eq!(copy.read_file("HELLO").unwrap(), b"HELLO WORLD");
        assert_eq!(copy.side(0).unwrap().number_of_sectors(), 400);
        assert!(copy.side(0).unwrap().is_valid());
    }

    #[test]
    fn test_image_digest_changes() {
        let mut image = sample();
        let before = image.digest(DigestAlgorithm::Sha1, SizeOption::Expand).unwrap();
        image.add_file("MORE", b"x", &AddOptions::new()).unwrap();
        let after = image.digest(DigestAlgorithm::Sha1, SizeOption::Expand).unwrap();
        assert_ne!(before, after);
        assert_eq!(before.len(), 40);
    }
}
