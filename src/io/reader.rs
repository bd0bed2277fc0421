/// SSD/DSD file reader

use crate::catalog::Catalog;
use crate::error::{DfsError, Result};
use crate::format::constants::*;
use crate::format::{Geometry, OpenMode};
use crate::image::{Backing, DiskImage, ImageOptions};
use crate::warn::WarningSink;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Open or create a plain image file according to `options`
///
/// Validation problems are reported to `sink`; an invalid side still
/// opens but refuses modification.
pub fn read_image(
    path: &Path,
    options: &ImageOptions,
    sink: &mut dyn WarningSink,
) -> Result<DiskImage> {
    let exists = path.exists();
    match options.mode {
        OpenMode::Existing if !exists => {
            return Err(DfsError::FileNotFound(path.display().to_string()))
        }
        OpenMode::New if exists => return Err(DfsError::FileExists(path.display().to_string())),
        _ => {}
    }

    if !exists {
        if !options.for_write {
            return Err(DfsError::FileNotFound(path.display().to_string()));
        }
        return create_image(path, options);
    }

    let mut file = File::open(path)?;
    let size = file.metadata()?.len() as usize;
    let catalog_sectors = peek_sector_count(&mut file, size)?;
    let geometry = Geometry::resolve(path, Some(size), catalog_sectors, options.hints)?;

    if size > geometry.total_size() {
        return Err(DfsError::invalid_format(format!(
            "{}: {} bytes is larger than a {}-head {}-track image",
            path.display(),
            size,
            geometry.heads,
            geometry.tracks
        )));
    }
    if size < geometry.min_catalog_size() {
        return Err(DfsError::invalid_format(format!(
            "{}: {} bytes is too small to hold the catalog",
            path.display(),
            size
        )));
    }

    let mut data = vec![0u8; geometry.total_size()];
    if options.catalog_only {
        for head in 0..geometry.heads {
            let range = geometry.catalog_range(head)?;
            file.seek(SeekFrom::Start(range.start as u64))?;
            file.read_exact(&mut data[range])?;
        }
    } else {
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut data[..size])?;
    }

    let mut image = DiskImage::from_parts(
        geometry,
        data,
        options,
        Backing::File(path.to_path_buf()),
        size,
    );
    image.validate(sink);

    log::info!(
        "opened {} ({} bytes, {} heads, {} tracks{})",
        path.display(),
        size,
        geometry.heads,
        geometry.tracks,
        if options.for_write { "" } else { ", read-only" }
    );
    Ok(image)
}

/// Sector count of head 0, used to tell 40 from 80 track images
fn peek_sector_count(file: &mut File, size: usize) -> Result<Option<u16>> {
    if size < CATALOG_SIZE {
        return Ok(None);
    }
    let mut buffer = [0u8; CATALOG_SIZE];
    file.read_exact(&mut buffer)?;
    Ok(Some(Catalog::new(&buffer[..])?.number_of_sectors()))
}

/// Format a new image and write it out at once
fn create_image(path: &Path, options: &ImageOptions) -> Result<DiskImage> {
    let geometry = Geometry::resolve(path, None, None, options.hints)?;
    let mut image = DiskImage::new(geometry);
    image.backing = Backing::File(path.to_path_buf());
    image.size_option = options.size_option;
    image.warn_mode = options.warn_mode;
    image.original_size = geometry.total_size();
    image.save()?;

    log::info!(
        "created {} ({} heads, {} tracks)",
        path.display(),
        geometry.heads,
        geometry.tracks
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warn::{Warning, WarningKind};

    fn open(path: &Path, options: ImageOptions) -> (Result<DiskImage>, Vec<Warning>) {
        let mut warnings = Vec::new();
        let result = read_image(path, &options, &mut warnings);
        (result, warnings)
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.ssd");
        let (result, _) = open(&path, ImageOptions::new());
        assert!(result.unwrap_err().is_not_found());
        let (result, _) = open(&path, ImageOptions::new().write(true).mode(OpenMode::Existing));
        assert!(result.unwrap_err().is_not_found());
    }

    #[test]
    fn test_create_writes_full_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.dsd");
        let (result, _) = open(&path, ImageOptions::new().write(true).tracks(40));
        let image = result.unwrap();
        assert_eq!(image.heads(), 2);
        assert!(!image.is_modified());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * SSD_40_SIZE as u64);

        let (result, _) = open(&path, ImageOptions::new().write(true).mode(OpenMode::New));
        assert!(matches!(result, Err(DfsError::FileExists(_))));
    }

    #[test]
    fn test_short_image_detected_as_40_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.ssd");
        let mut image = DiskImage::new(Geometry::ssd_40());
        image.add_file("A", b"abc", &Default::default()).unwrap();
        crate::io::writer::write_image(&image, &path, 3 * SECTOR_SIZE, true).unwrap();

        let (result, warnings) = open(&path, ImageOptions::new());
        let image = result.unwrap();
        assert_eq!(image.geometry(), Geometry::ssd_40());
        assert!(warnings.is_empty());
        assert_eq!(image.read_file("A").unwrap(), b"abc");
    }

    #[test]
    fn test_size_checks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.ssd");
        std::fs::write(&path, [0u8; 100]).unwrap();
        let (result, _) = open(&path, ImageOptions::new());
        assert!(matches!(result, Err(DfsError::InvalidFormat(_))));

        let path = dir.path().join("huge.ssd");
        std::fs::write(&path, vec![0u8; 2 * SSD_80_SIZE + SECTOR_SIZE]).unwrap();
        let (result, _) = open(&path, ImageOptions::new());
        assert!(matches!(result, Err(DfsError::InvalidFormat(_))));
    }

    #[test]
    fn test_double_sided_ssd_detected_from_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("both.ssd");
        let mut image = DiskImage::new(Geometry::new(2, 80, true).unwrap());
        image.add_file(":2.LOWER", b"second side", &Default::default()).unwrap();
        std::fs::write(&path, image.as_bytes()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 409_600);

        let (result, warnings) = open(&path, ImageOptions::new());
        let image = result.unwrap();
        assert_eq!(
            image.geometry(),
            Geometry { heads: 2, tracks: 80, linear: true }
        );
        assert!(warnings.is_empty());
        assert_eq!(image.read_file(":2.LOWER").unwrap(), b"second side");
    }

    #[test]
    fn test_odd_size_warns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.ssd");
        let image = DiskImage::new(Geometry::ssd_80());
        crate::io::writer::write_image(&image, &path, CATALOG_SIZE + 10, true).unwrap();

        let (result, warnings) = open(&path, ImageOptions::new());
        assert!(result.is_ok());
        assert_eq!(warnings[0].kind, WarningKind::ImageSize);
    }

    #[test]
    fn test_catalog_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.ssd");
        let mut image = DiskImage::new(Geometry::ssd_80());
        image.add_file("DATA", &[9u8; 1000], &Default::default()).unwrap();
        image.save_as(&path).unwrap();

        let (result, _) = open(&path, ImageOptions::new().catalog_only(true));
        let image = result.unwrap();
        assert!(image.is_catalog_only());
        assert_eq!(image.get_entry("DATA").unwrap().length, 1000);
        assert!(matches!(image.read_file("DATA"), Err(DfsError::AccessDenied(_))));
    }
}
