/// Logical sector runs of a disk side

use crate::digest::DigestAlgorithm;
use crate::error::{DfsError, Result};
use crate::format::constants::SECTOR_SIZE;
use crate::image::DiskImage;
use std::fmt::Write as _;
use std::ops::Range;

/// A run of logically contiguous sectors on one head
///
/// The run is stored as byte ranges into the image buffer. On an
/// interleaved double-sided image every track boundary starts a new
/// range. A `Sectors` value does not borrow the image; each access
/// takes the image it was created from and checks it is the same one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sectors {
    image_id: u64,
    head: u8,
    start: u16,
    count: u16,
    chunks: Vec<Range<usize>>,
    used_size: usize,
}

impl Sectors {
    /// Address logical sectors `start..end` of `head`
    ///
    /// `used_size` defaults to the whole run.
    pub(crate) fn new(
        image: &DiskImage,
        head: u8,
        start: u16,
        end: u16,
        used_size: Option<usize>,
    ) -> Result<Self> {
        let chunks = image.geometry.sector_chunks(head, start, end)?;
        let size = (end - start) as usize * SECTOR_SIZE;
        let used_size = used_size.unwrap_or(size);
        if used_size > size {
            return Err(DfsError::DataTooLarge {
                size: used_size,
                capacity: size,
            });
        }
        Ok(Self {
            image_id: image.id,
            head,
            start,
            count: end - start,
            chunks,
            used_size,
        })
    }

    /// Head the run is on
    pub fn head(&self) -> u8 {
        self.head
    }

    /// First logical sector
    pub fn start_sector(&self) -> u16 {
        self.start
    }

    /// Number of sectors in the run
    pub fn sector_count(&self) -> u16 {
        self.count
    }

    /// Size of the run in bytes
    pub fn size(&self) -> usize {
        self.count as usize * SECTOR_SIZE
    }

    /// Bytes in use (the file length for a file run)
    pub fn used_size(&self) -> usize {
        self.used_size
    }

    /// True when the last sector is only partly used
    pub fn is_partial(&self) -> bool {
        self.used_size < self.size()
    }

    /// Byte ranges of the image buffer covered by the run
    pub fn chunks(&self) -> &[Range<usize>] {
        &self.chunks
    }

    fn check_image(&self, image: &DiskImage) -> Result<()> {
        if image.id != self.image_id {
            return Err(DfsError::invalid_value(
                "sector range belongs to a different image",
            ));
        }
        Ok(())
    }

    /// Copy of the used bytes
    pub fn read_all(&self, image: &DiskImage) -> Result<Vec<u8>> {
        let mut data = self.read_raw(image)?;
        data.truncate(self.used_size);
        Ok(data)
    }

    /// Copy of every byte in the run
    pub fn read_raw(&self, image: &DiskImage) -> Result<Vec<u8>> {
        self.check_image(image)?;
        let mut data = Vec::with_capacity(self.size());
        for chunk in &self.chunks {
            data.extend_from_slice(&image.data[chunk.clone()]);
        }
        Ok(data)
    }

    /// Write `data` from the start of the run and zero the remainder
    pub fn write_all(&self, image: &mut DiskImage, data: &[u8]) -> Result<()> {
        self.check_image(image)?;
        if data.len() > self.size() {
            return Err(DfsError::DataTooLarge {
                size: data.len(),
                capacity: self.size(),
            });
        }

        let mut remaining = data;
        for chunk in &self.chunks {
            let target = &mut image.data[chunk.clone()];
            let n = remaining.len().min(target.len());
            target[..n].copy_from_slice(&remaining[..n]);
            target[n..].fill(0);
            remaining = &remaining[n..];
        }
        image.modified = true;
        Ok(())
    }

    /// Fill the run with one byte value
    pub fn fill(&self, image: &mut DiskImage, value: u8) -> Result<()> {
        self.check_image(image)?;
        for chunk in &self.chunks {
            image.data[chunk.clone()].fill(value);
        }
        image.modified = true;
        Ok(())
    }

    /// Append another run of the same image
    pub fn extend(&mut self, other: &Sectors) -> Result<()> {
        if other.image_id != self.image_id {
            return Err(DfsError::invalid_value(
                "cannot join sector ranges of different images",
            ));
        }
        if self.is_partial() {
            return Err(DfsError::invalid_value(
                "cannot extend a partially used sector range",
            ));
        }

        for chunk in &other.chunks {
            match self.chunks.last_mut() {
                Some(last) if last.end == chunk.start => last.end = chunk.end,
                _ => self.chunks.push(chunk.clone()),
            }
        }
        self.used_size = self.size() + other.used_size;
        self.count += other.count;
        Ok(())
    }

    /// Hex digest of the used bytes
    pub fn digest(&self, image: &DiskImage, algorithm: DigestAlgorithm) -> Result<String> {
        self.check_image(image)?;
        let mut hasher = algorithm.hasher();
        let mut remaining = self.used_size;
        for chunk in &self.chunks {
            let n = remaining.min(chunk.len());
            hasher.update(&image.data[chunk.start..chunk.start + n]);
            remaining -= n;
        }
        Ok(hasher.finalize_hex())
    }

    /// Hex and ASCII dump of the used bytes
    pub fn hexdump(&self, image: &DiskImage) -> Result<String> {
        Ok(hexdump(&self.read_all(image)?))
    }
}

/// Format bytes as 16-byte hex and ASCII lines
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:06X}: ", i * 16);
        for j in 0..16 {
            match chunk.get(j) {
                Some(byte) => {
                    let _ = write!(out, "{:02X} ", byte);
                }
                None => out.push_str("   "),
            }
            if j == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        for &byte in chunk {
            out.push(if (32..127).contains(&byte) {
                byte as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}
