/// SSD/DSD file writer

use crate::error::{DfsError, Result};
use crate::image::DiskImage;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Write the first `size` bytes of an image to `path`
///
/// The file is created if missing. Bytes past `size` in an existing
/// file are left alone unless `truncate` is set.
pub fn write_image<P: AsRef<Path>>(
    image: &DiskImage,
    path: P,
    size: usize,
    truncate: bool,
) -> Result<()> {
    let path = path.as_ref();
    let data = image.as_bytes();
    if size > data.len() {
        return Err(DfsError::DataTooLarge {
            size,
            capacity: data.len(),
        });
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    file.write_all(&data[..size])?;
    if truncate {
        file.set_len(size as u64)?;
    }
    file.flush()?;

    log::debug!("wrote {} bytes to {}", size, path.display());
    Ok(())
}
