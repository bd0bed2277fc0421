/// Options for opening images and adding files

use crate::error::{DfsError, Result};
use crate::format::{GeometryHints, OpenMode, SizeOption};
use crate::image::DiskImage;
use crate::mmb::MmbFile;
use crate::warn::{LogSink, WarnMode, WarningSink};
use std::path::Path;

/// Builder for opening or creating disk images
///
/// ```no_run
/// use dfsmanager::{ImageOptions, OpenMode};
///
/// let image = ImageOptions::new()
///     .write(true)
///     .mode(OpenMode::New)
///     .tracks(40)
///     .open("games.ssd")?;
/// # Ok::<(), dfsmanager::DfsError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub(crate) for_write: bool,
    pub(crate) mode: OpenMode,
    pub(crate) hints: GeometryHints,
    pub(crate) catalog_only: bool,
    pub(crate) size_option: SizeOption,
    pub(crate) warn_mode: WarnMode,
    pub(crate) index: Option<usize>,
}

impl ImageOptions {
    /// Read-only, open-or-create, geometry inferred
    pub fn new() -> Self {
        Self::default()
    }

    /// Open for writing
    pub fn write(mut self, for_write: bool) -> Self {
        self.for_write = for_write;
        self
    }

    /// Set the open mode
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Force the number of heads
    pub fn heads(mut self, heads: u8) -> Self {
        self.hints.heads = Some(heads);
        self
    }

    /// Force the number of tracks
    pub fn tracks(mut self, tracks: u8) -> Self {
        self.hints.tracks = Some(tracks);
        self
    }

    /// Force linear or interleaved layout
    pub fn linear(mut self, linear: bool) -> Self {
        self.hints.linear = Some(linear);
        self
    }

    /// Load only the catalog sectors
    pub fn catalog_only(mut self, catalog_only: bool) -> Self {
        self.catalog_only = catalog_only;
        self
    }

    /// Set the size policy used when saving
    pub fn size_option(mut self, size_option: SizeOption) -> Self {
        self.size_option = size_option;
        self
    }

    /// Set how many validation problems are reported per side
    pub fn warn_mode(mut self, warn_mode: WarnMode) -> Self {
        self.warn_mode = warn_mode;
        self
    }

    /// Select a slot of an MMB container
    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Whether the image will be writable
    pub fn is_write(&self) -> bool {
        self.for_write
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.for_write && self.catalog_only {
            return Err(DfsError::invalid_value(
                "catalog-only images cannot be opened for writing",
            ));
        }
        Ok(())
    }

    /// Open an image, reporting validation problems through `log`
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<DiskImage> {
        self.open_with_sink(path, &mut LogSink)
    }

    /// Open an image, reporting validation problems to `sink`
    ///
    /// Paths ending in `.mmb` need an `index` and open that slot.
    pub fn open_with_sink<P: AsRef<Path>>(
        &self,
        path: P,
        sink: &mut dyn WarningSink,
    ) -> Result<DiskImage> {
        let path = path.as_ref();
        self.check()?;

        match (is_mmb_path(path), self.index) {
            (true, Some(index)) => {
                let mmb = MmbFile::open(path, self.for_write)?;
                mmb.open_entry_with_sink(index, self, sink)
            }
            (true, None) => Err(DfsError::invalid_value(format!(
                "{}: an MMB container needs a slot index",
                path.display()
            ))),
            (false, Some(index)) => Err(DfsError::invalid_value(format!(
                "{}: slot index {} given for a plain image",
                path.display(),
                index
            ))),
            (false, None) => crate::io::reader::read_image(path, self, sink),
        }
    }
}

/// True for paths with an `.mmb` extension
pub fn is_mmb_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mmb"))
}

/// Options for adding, copying or renaming a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Load address (default 0, or the source file's when copying)
    pub load: Option<u32>,
    /// Execution address (default the load address)
    pub exec: Option<u32>,
    /// Locked flag (default unlocked, or the source file's when copying)
    pub locked: Option<bool>,
    /// Replace an existing file of the same name
    pub replace: bool,
    /// Replace or move locked files
    pub ignore_access: bool,
    /// Fail rather than compact when space is fragmented
    pub no_compact: bool,
}

impl AddOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the load address
    pub fn load(mut self, load: u32) -> Self {
        self.load = Some(load);
        self
    }

    /// Set the execution address
    pub fn exec(mut self, exec: u32) -> Self {
        self.exec = Some(exec);
        self
    }

    /// Set the locked flag
    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    /// Allow replacing an existing file
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Allow replacing locked files
    pub fn ignore_access(mut self, ignore_access: bool) -> Self {
        self.ignore_access = ignore_access;
        self
    }

    /// Never compact to make room
    pub fn no_compact(mut self, no_compact: bool) -> Self {
        self.no_compact = no_compact;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = ImageOptions::new();
        assert!(!options.is_write());
        assert_eq!(options.mode, OpenMode::Always);
        assert_eq!(options.size_option, SizeOption::Keep);
        assert_eq!(options.hints, GeometryHints::default());
    }

    #[test]
    fn test_options_custom() {
        let options = ImageOptions::new()
            .write(true)
            .heads(2)
            .tracks(40)
            .linear(true)
            .warn_mode(WarnMode::All);
        assert_eq!(options.hints.heads, Some(2));
        assert_eq!(options.hints.tracks, Some(40));
        assert_eq!(options.hints.linear, Some(true));
        assert_eq!(options.warn_mode, WarnMode::All);
    }

    #[test]
    fn test_write_and_catalog_only_conflict() {
        let options = ImageOptions::new().write(true).catalog_only(true);
        assert!(matches!(options.check(), Err(DfsError::InvalidValue(_))));
    }

    #[test]
    fn test_index_on_plain_image() {
        let result = ImageOptions::new().index(3).open("disk.ssd");
        assert!(matches!(result, Err(DfsError::InvalidValue(_))));
    }

    #[test]
    fn test_mmb_path() {
        assert!(is_mmb_path(Path::new("BEEB.MMB")));
        assert!(!is_mmb_path(Path::new("beeb.ssd")));
    }

    #[test]
    fn test_add_options_builder() {
        let options = AddOptions::new().load(0x1900).locked(true).replace(true);
        assert_eq!(options.load, Some(0x1900));
        assert_eq!(options.exec, None);
        assert_eq!(options.locked, Some(true));
        assert!(options.replace && !options.no_compact);
    }
}
