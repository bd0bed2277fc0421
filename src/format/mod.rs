/// DFS format constants, geometry and option types

/// Format constants
pub mod constants;
/// Geometry and sector addressing
pub mod geometry;

pub use constants::*;
pub use geometry::{Geometry, GeometryHints};

use crate::error::{DfsError, Result};

/// How an image file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Open an existing file or create a new one
    #[default]
    Always,
    /// The file must already exist
    Existing,
    /// The file must not exist yet
    New,
}

/// Output size policy when saving an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeOption {
    /// Keep the original size, growing only to include used data
    #[default]
    Keep,
    /// Write the full geometry size
    Expand,
    /// Write only up to the last used sector and truncate
    Shrink,
}

/// Boot option stored in the catalog (`*OPT 4`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootOption {
    /// No action
    #[default]
    Off,
    /// `*LOAD $.!BOOT`
    Load,
    /// `*RUN $.!BOOT`
    Run,
    /// `*EXEC $.!BOOT`
    Exec,
}

impl BootOption {
    /// Decode from the two option bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => BootOption::Off,
            1 => BootOption::Load,
            2 => BootOption::Run,
            _ => BootOption::Exec,
        }
    }

    /// Encode as the two option bits
    pub fn bits(&self) -> u8 {
        match self {
            BootOption::Off => 0,
            BootOption::Load => 1,
            BootOption::Run => 2,
            BootOption::Exec => 3,
        }
    }

    /// Parse a number (0-3) or name
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "0" | "off" => Ok(BootOption::Off),
            "1" | "load" => Ok(BootOption::Load),
            "2" | "run" => Ok(BootOption::Run),
            "3" | "exec" => Ok(BootOption::Exec),
            other => Err(DfsError::invalid_value(format!("boot option '{}'", other))),
        }
    }
}

impl std::fmt::Display for BootOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BootOption::Off => write!(f, "off"),
            BootOption::Load => write!(f, "LOAD"),
            BootOption::Run => write!(f, "RUN"),
            BootOption::Exec => write!(f, "EXEC"),
        }
    }
}
