/// MMB containers: many single-sided DFS disks behind one index
///
/// The file starts with an 8192-byte index. Record 0 holds the onboot
/// table (low bytes of the slots for drives 0-3, then the high bytes);
/// record `i + 1` describes slot `i`: 12 title bytes, 2 pad bytes, the
/// sequence number and a status byte. The 511 slots follow the index,
/// each the size of an 80-track single-sided image.

use crate::catalog::{decode_title, encode_title, Catalog};
use crate::error::{DfsError, Result};
use crate::format::constants::*;
use crate::format::{Geometry, OpenMode};
use crate::image::{Backing, DiskImage, ImageOptions};
use crate::warn::{LogSink, WarningSink};
use std::cell::RefCell;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const STATUS_OFFSET: usize = 15;
const SEQUENCE_OFFSET: usize = 14;
const ONBOOT_DRIVES: usize = 4;

/// State of a container slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmbStatus {
    /// Initialised and write protected
    Locked,
    /// Initialised and writable
    Unlocked,
    /// Never formatted
    Uninitialized,
    /// Unknown status byte
    Invalid(u8),
}

impl MmbStatus {
    /// Decode a status byte
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => MmbStatus::Locked,
            0x0F => MmbStatus::Unlocked,
            0xF0 | 0xFF => MmbStatus::Uninitialized,
            other => MmbStatus::Invalid(other),
        }
    }

    /// Status byte written to the index
    pub fn byte(&self) -> u8 {
        match self {
            MmbStatus::Locked => 0x00,
            MmbStatus::Unlocked => 0x0F,
            MmbStatus::Uninitialized => 0xF0,
            MmbStatus::Invalid(byte) => *byte,
        }
    }

    /// Whether the slot holds a disk
    pub fn is_initialized(&self) -> bool {
        matches!(self, MmbStatus::Locked | MmbStatus::Unlocked)
    }
}

/// Snapshot of one index record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmbEntry {
    /// Slot number
    pub index: usize,
    /// Title stored in the index
    pub title: String,
    /// Sequence number stored in the index
    pub sequence: u8,
    /// Slot status
    pub status: MmbStatus,
}

impl fmt::Display for MmbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = match self.status {
            MmbStatus::Locked => "L",
            MmbStatus::Unlocked => "U",
            MmbStatus::Uninitialized => "-",
            MmbStatus::Invalid(_) => "?",
        };
        write!(f, "{:>3} {:<12} {}", self.index, self.title, flag)
    }
}

/// Open container file and its index, shared by every slot image
#[derive(Debug)]
pub(crate) struct Container {
    file: File,
    pub(crate) path: PathBuf,
    index: Vec<u8>,
    index_modified: bool,
    writable: bool,
}

fn check_slot(index: usize) -> Result<()> {
    if index >= MMB_SLOTS {
        return Err(DfsError::invalid_value(format!(
            "slot {} out of range (0-{})",
            index,
            MMB_SLOTS - 1
        )));
    }
    Ok(())
}

fn slot_offset(index: usize) -> u64 {
    (MMB_INDEX_SIZE + index * MMB_SLOT_SIZE) as u64
}

impl Container {
    fn open(path: &Path, writable: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => DfsError::FileNotFound(path.display().to_string()),
                _ => DfsError::Io(err),
            })?;

        let size = file.metadata()?.len() as usize;
        if size < MMB_INDEX_SIZE {
            return Err(DfsError::invalid_format(format!(
                "{}: {} bytes is too small for an MMB index",
                path.display(),
                size
            )));
        }
        let mut index = vec![0u8; MMB_INDEX_SIZE];
        file.read_exact(&mut index)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            index,
            index_modified: false,
            writable,
        })
    }

    fn record(&self, index: usize) -> &[u8] {
        let start = (index + 1) * MMB_RECORD_SIZE;
        &self.index[start..start + MMB_RECORD_SIZE]
    }

    fn record_mut(&mut self, index: usize) -> &mut [u8] {
        self.index_modified = true;
        let start = (index + 1) * MMB_RECORD_SIZE;
        &mut self.index[start..start + MMB_RECORD_SIZE]
    }

    pub(crate) fn status(&self, index: usize) -> MmbStatus {
        if index >= MMB_SLOTS {
            return MmbStatus::Invalid(0);
        }
        MmbStatus::from_byte(self.record(index)[STATUS_OFFSET])
    }

    fn set_status(&mut self, index: usize, status: MmbStatus) {
        self.record_mut(index)[STATUS_OFFSET] = status.byte();
    }

    fn entry(&self, index: usize) -> MmbEntry {
        let record = self.record(index);
        MmbEntry {
            index,
            title: decode_title(&record[..TITLE_LENGTH]),
            sequence: record[SEQUENCE_OFFSET],
            status: MmbStatus::from_byte(record[STATUS_OFFSET]),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(DfsError::access_denied(format!(
                "{} is open read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn flush_index(&mut self) -> Result<()> {
        self.check_writable()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.index)?;
        self.file.flush()?;
        self.index_modified = false;
        Ok(())
    }

    /// Read a slot region; bytes past the end of a short file read as zero
    fn read_slot(&mut self, index: usize, length: usize) -> Result<Vec<u8>> {
        let offset = slot_offset(index);
        let size = self.file.metadata()?.len();
        let available = size.saturating_sub(offset).min(length as u64) as usize;

        let mut data = vec![0u8; length];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data[..available])?;
        Ok(data)
    }

    fn write_slot(&mut self, index: usize, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.file.seek(SeekFrom::Start(slot_offset(index)))?;
        self.file.write_all(&data[..MMB_SLOT_SIZE])?;
        Ok(())
    }

    /// Persist a slot image and copy its title and sequence into the index
    pub(crate) fn save_slot(&mut self, index: usize, image: &DiskImage) -> Result<()> {
        check_slot(index)?;
        self.write_slot(index, image.as_bytes())?;

        let catalog = Catalog::new(&image.as_bytes()[..CATALOG_SIZE])?;
        let title = catalog.raw_title();
        let sequence = catalog.sequence_number();
        let promote = self.status(index) == MmbStatus::Uninitialized;

        let record = self.record_mut(index);
        record[..TITLE_LENGTH].copy_from_slice(&title);
        record[SEQUENCE_OFFSET] = sequence;
        if promote {
            self.set_status(index, MmbStatus::Unlocked);
        }
        self.flush_index()?;

        log::debug!("saved slot {} of {}", index, self.path.display());
        Ok(())
    }
}

/// An open MMB container
///
/// Slot images opened through [`MmbFile::open_entry`] share the
/// container's file handle; it is closed when the last of them and the
/// `MmbFile` itself are dropped.
#[derive(Debug, Clone)]
pub struct MmbFile {
    container: Rc<RefCell<Container>>,
}

impl MmbFile {
    /// Open an existing container
    pub fn open<P: AsRef<Path>>(path: P, for_write: bool) -> Result<Self> {
        let container = Container::open(path.as_ref(), for_write)?;
        log::debug!(
            "opened MMB {}{}",
            container.path.display(),
            if for_write { "" } else { " read-only" }
        );
        Ok(Self {
            container: Rc::new(RefCell::new(container)),
        })
    }

    /// Create an empty container with every slot uninitialised
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    DfsError::FileExists(path.display().to_string())
                }
                _ => DfsError::Io(err),
            })?;

        let mut index = vec![0u8; MMB_INDEX_SIZE];
        for drive in 0..ONBOOT_DRIVES {
            index[drive] = drive as u8;
        }
        for slot in 0..MMB_SLOTS {
            index[(slot + 1) * MMB_RECORD_SIZE + STATUS_OFFSET] = MmbStatus::Uninitialized.byte();
        }
        file.write_all(&index)?;
        file.set_len(MMB_FILE_SIZE as u64)?;
        file.flush()?;

        log::info!("created MMB {}", path.display());
        Ok(Self {
            container: Rc::new(RefCell::new(Container {
                file,
                path: path.to_path_buf(),
                index,
                index_modified: false,
                writable: true,
            })),
        })
    }

    /// Path of the container file
    pub fn path(&self) -> PathBuf {
        self.container.borrow().path.clone()
    }

    /// Whether the container was opened for writing
    pub fn is_writable(&self) -> bool {
        self.container.borrow().writable
    }

    /// Whether the index has unsaved changes
    pub fn is_modified(&self) -> bool {
        self.container.borrow().index_modified
    }

    /// Number of live holders of the shared file handle
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.container)
    }

    /// Index record of one slot
    pub fn entry(&self, index: usize) -> Result<MmbEntry> {
        check_slot(index)?;
        Ok(self.container.borrow().entry(index))
    }

    /// Index records of every slot
    pub fn entries(&self) -> Vec<MmbEntry> {
        let container = self.container.borrow();
        (0..MMB_SLOTS).map(|index| container.entry(index)).collect()
    }

    fn mutate<F>(&self, index: usize, action: F) -> Result<()>
    where
        F: FnOnce(&mut Container, MmbStatus) -> Result<()>,
    {
        check_slot(index)?;
        let mut container = self.container.borrow_mut();
        container.check_writable()?;
        let status = container.status(index);
        if let MmbStatus::Invalid(byte) = status {
            return Err(DfsError::invalid_format(format!(
                "slot {} has invalid status {:02X}",
                index, byte
            )));
        }
        action(&mut *container, status)
    }

    /// Format an uninitialised slot and mark it unlocked
    pub fn activate(&self, index: usize) -> Result<()> {
        self.mutate(index, |container, status| {
            if status.is_initialized() {
                return Err(DfsError::invalid_value(format!(
                    "slot {} is already active",
                    index
                )));
            }
            let image = DiskImage::new(Geometry::ssd_80());
            container.write_slot(index, image.as_bytes())?;
            let record = container.record_mut(index);
            record[..SEQUENCE_OFFSET + 1].fill(0);
            container.set_status(index, MmbStatus::Unlocked);
            log::info!("activated slot {}", index);
            Ok(())
        })
    }

    /// Mark an unlocked slot uninitialised
    pub fn deactivate(&self, index: usize) -> Result<()> {
        self.mutate(index, |container, status| {
            if status == MmbStatus::Locked {
                return Err(DfsError::access_denied(format!("slot {} is locked", index)));
            }
            container.set_status(index, MmbStatus::Uninitialized);
            Ok(())
        })
    }

    fn set_locked(&self, index: usize, locked: bool) -> Result<()> {
        self.mutate(index, |container, status| {
            if !status.is_initialized() {
                return Err(DfsError::invalid_value(format!(
                    "slot {} is not initialised",
                    index
                )));
            }
            let status = if locked {
                MmbStatus::Locked
            } else {
                MmbStatus::Unlocked
            };
            container.set_status(index, status);
            Ok(())
        })
    }

    /// Write protect a slot
    pub fn lock(&self, index: usize) -> Result<()> {
        self.set_locked(index, true)
    }

    /// Remove the write protection of a slot
    pub fn unlock(&self, index: usize) -> Result<()> {
        self.set_locked(index, false)
    }

    /// Set the title held in the index (the slot's catalog is untouched)
    pub fn set_title(&self, index: usize, title: &str) -> Result<()> {
        let raw = encode_title(title)?;
        self.mutate(index, |container, _| {
            container.record_mut(index)[..TITLE_LENGTH].copy_from_slice(&raw);
            Ok(())
        })
    }

    /// Slots inserted in drives 0-3 at boot
    pub fn onboot(&self) -> [u16; 4] {
        let container = self.container.borrow();
        let mut slots = [0u16; 4];
        for (drive, slot) in slots.iter_mut().enumerate() {
            *slot = container.index[drive] as u16
                | (container.index[drive + ONBOOT_DRIVES] as u16) << 8;
        }
        slots
    }

    /// Set the slot inserted in a drive at boot
    pub fn set_onboot(&self, drive: usize, slot: usize) -> Result<()> {
        if drive >= ONBOOT_DRIVES {
            return Err(DfsError::invalid_value(format!(
                "onboot drive {} out of range (0-3)",
                drive
            )));
        }
        check_slot(slot)?;
        let mut container = self.container.borrow_mut();
        container.check_writable()?;
        container.index[drive] = slot as u8;
        container.index[drive + ONBOOT_DRIVES] = (slot >> 8) as u8;
        container.index_modified = true;
        Ok(())
    }

    /// Open a slot as a disk image, reporting problems through `log`
    pub fn open_entry(&self, index: usize, options: &ImageOptions) -> Result<DiskImage> {
        self.open_entry_with_sink(index, options, &mut LogSink)
    }

    /// Open a slot as a disk image, reporting problems to `sink`
    pub fn open_entry_with_sink(
        &self,
        index: usize,
        options: &ImageOptions,
        sink: &mut dyn WarningSink,
    ) -> Result<DiskImage> {
        check_slot(index)?;
        options.check()?;
        let status = self.container.borrow().status(index);

        if let MmbStatus::Invalid(byte) = status {
            return Err(DfsError::invalid_format(format!(
                "slot {} has invalid status {:02X}",
                index, byte
            )));
        }
        let initialized = status.is_initialized();
        match options.mode {
            OpenMode::Existing if !initialized => {
                return Err(DfsError::access_denied(format!(
                    "slot {} is not initialised",
                    index
                )))
            }
            OpenMode::New if initialized => {
                return Err(DfsError::FileExists(format!("slot {}", index)))
            }
            _ => {}
        }
        if options.for_write {
            self.container.borrow().check_writable()?;
            if status == MmbStatus::Locked {
                return Err(DfsError::access_denied(format!("slot {} is locked", index)));
            }
        }

        let backing = Backing::Slot {
            container: Rc::clone(&self.container),
            index,
        };
        let geometry = Geometry::ssd_80();
        let image = if initialized {
            let data = self.container.borrow_mut().read_slot(index, MMB_SLOT_SIZE)?;
            let mut image = DiskImage::from_parts(geometry, data, options, backing, MMB_SLOT_SIZE);
            image.validate(sink);
            image
        } else {
            let mut image = DiskImage::from_parts(
                geometry,
                vec![0u8; MMB_SLOT_SIZE],
                options,
                backing,
                MMB_SLOT_SIZE,
            );
            image.format_sides();
            image.modified = options.for_write;
            image
        };

        log::debug!(
            "opened slot {} ({:?}){}",
            index,
            status,
            if options.for_write { "" } else { " read-only" }
        );
        Ok(image)
    }

    /// Copy each initialised slot's catalog title into the index
    ///
    /// Returns the number of records changed.
    pub fn drecat(&self) -> Result<usize> {
        let mut container = self.container.borrow_mut();
        container.check_writable()?;
        let mut updated = 0;
        for index in 0..MMB_SLOTS {
            if !container.status(index).is_initialized() {
                continue;
            }
            let bytes = container.read_slot(index, CATALOG_SIZE)?;
            let title = Catalog::new(&bytes[..])?.raw_title();
            if container.record(index)[..TITLE_LENGTH] != title {
                container.record_mut(index)[..TITLE_LENGTH].copy_from_slice(&title);
                updated += 1;
            }
        }
        if updated > 0 {
            log::info!("drecat updated {} titles", updated);
        }
        Ok(updated)
    }

    /// Write the index if it has changed
    pub fn save(&self) -> Result<()> {
        let mut container = self.container.borrow_mut();
        if container.index_modified {
            container.flush_index()?;
        }
        Ok(())
    }

    /// Save the index and release this handle
    pub fn close(self) -> Result<()> {
        self.save()
    }
}
