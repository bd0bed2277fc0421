use thiserror::Error;

/// Result type alias for DFS operations
pub type Result<T> = std::result::Result<T, DfsError>;

/// Errors that can occur when working with DFS images
#[derive(Debug, Error)]
pub enum DfsError {
    /// I/O error occurred while reading or writing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt, oversized or undersized image
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Unsupported heads/tracks combination
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Head number outside the image
    #[error("Invalid head {head} (image has {heads})")]
    InvalidHead {
        /// Requested head
        head: u8,
        /// Number of heads in the image
        heads: u8,
    },

    /// Track number outside the image
    #[error("Invalid track {track} on head {head} (max: {max})")]
    InvalidTrack {
        /// Head number
        head: u8,
        /// Track number
        track: u8,
        /// Maximum allowed track number
        max: u8,
    },

    /// Sector number outside a track
    #[error("Invalid sector {sector} on track {track} (max: {max})")]
    InvalidSector {
        /// Track number
        track: u8,
        /// Sector number
        sector: u8,
        /// Maximum allowed sector number
        max: u8,
    },

    /// Logical sector number outside a side
    #[error("Invalid logical sector {sector} (side has {count})")]
    InvalidLogicalSector {
        /// Logical sector number
        sector: u16,
        /// Number of sectors on the side
        count: u16,
    },

    /// Catalog of a side is inconsistent; mutation is refused
    #[error("Catalog corrupt on head {head}: {message}")]
    CatalogCorrupt {
        /// Head number
        head: u8,
        /// Description of the problem
        message: String,
    },

    /// Invalid filename
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    /// Invalid argument value (address, title, option...)
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// File not found in catalog
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// File already exists in catalog
    #[error("File exists: {0}")]
    FileExists(String),

    /// Locked file, read-only image or locked container slot
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// No free catalog slot
    #[error("Catalog full on head {head}")]
    CatalogFull {
        /// Head number
        head: u8,
    },

    /// Not enough free sectors in total
    #[error("Disk full: {needed} sectors needed, {free} free")]
    DiskFull {
        /// Sectors required
        needed: u16,
        /// Sectors available for file data
        free: u16,
    },

    /// Enough free sectors but no contiguous run large enough
    #[error("No contiguous space: {needed} sectors needed, largest free block is {largest}")]
    NoContiguousSpace {
        /// Sectors required
        needed: u16,
        /// Largest contiguous free block
        largest: u16,
    },

    /// Data does not fit the target range
    #[error("Data too large: {size} bytes, capacity {capacity}")]
    DataTooLarge {
        /// Size of the data
        size: usize,
        /// Available capacity in bytes
        capacity: usize,
    },

    /// Image has no file to be saved to
    #[error("Image has no backing file")]
    NoBackingFile,
}

impl DfsError {
    /// Create an invalid format error
    pub fn invalid_format<S: Into<String>>(message: S) -> Self {
        DfsError::InvalidFormat(message.into())
    }

    /// Create an invalid value error
    pub fn invalid_value<S: Into<String>>(message: S) -> Self {
        DfsError::InvalidValue(message.into())
    }

    /// Create an access denied error
    pub fn access_denied<S: Into<String>>(message: S) -> Self {
        DfsError::AccessDenied(message.into())
    }

    /// Create a catalog corruption error
    pub fn corrupt<S: Into<String>>(head: u8, message: S) -> Self {
        DfsError::CatalogCorrupt {
            head,
            message: message.into(),
        }
    }

    /// True for name lookup misses
    pub fn is_not_found(&self) -> bool {
        matches!(self, DfsError::FileNotFound(_))
    }

    /// True for catalog-full, disk-full and fragmentation errors
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            DfsError::CatalogFull { .. }
                | DfsError::DiskFull { .. }
                | DfsError::NoContiguousSpace { .. }
                | DfsError::DataTooLarge { .. }
        )
    }
}
