/// Validation warnings and the sinks they are reported to

use std::fmt;

/// Category of a validation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Image file size is odd (not a sector multiple)
    ImageSize,
    /// Sector count in catalog is unsupported or exceeds the geometry
    SectorCount,
    /// Last entry offset is not a multiple of 8 or too large
    CatalogOffset,
    /// Reserved option bits are set
    OptionBits,
    /// Filename or directory contains invalid characters
    FileName,
    /// Two entries share a name
    DuplicateName,
    /// File lies outside the data area of the side
    FileBounds,
    /// Entries are not in descending start sector order
    FileOrder,
    /// Two files claim the same sector
    FileOverlap,
}

impl WarningKind {
    /// Fatal problems make the side invalid for mutation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WarningKind::SectorCount
                | WarningKind::CatalogOffset
                | WarningKind::FileBounds
                | WarningKind::FileOrder
                | WarningKind::FileOverlap
        )
    }
}

/// A single validation problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Problem category
    pub kind: WarningKind,
    /// Head the problem was found on, if side specific
    pub head: Option<u8>,
    /// Full name of the file concerned, if any
    pub file: Option<String>,
    /// Human readable description
    pub message: String,
}

impl Warning {
    /// Create a side-level warning
    pub fn side<S: Into<String>>(kind: WarningKind, head: u8, message: S) -> Self {
        Self {
            kind,
            head: Some(head),
            file: None,
            message: message.into(),
        }
    }

    /// Create a warning about one file
    pub fn file<S: Into<String>>(kind: WarningKind, head: u8, file: &str, message: S) -> Self {
        Self {
            kind,
            head: Some(head),
            file: Some(file.to_string()),
            message: message.into(),
        }
    }

    /// Whether this problem blocks mutation of the side
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(head) = self.head {
            write!(f, "side {}: ", head)?;
        }
        if let Some(file) = &self.file {
            write!(f, "{}: ", file)?;
        }
        write!(f, "{}", self.message)
    }
}

/// How many validation problems are forwarded to the sink per side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WarnMode {
    /// Report nothing
    None,
    /// Report the first problem only
    #[default]
    First,
    /// Report every problem
    All,
}

/// Receiver for validation warnings
pub trait WarningSink {
    /// Handle one warning
    fn warn(&mut self, warning: &Warning);
}

/// Sink forwarding warnings to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl WarningSink for LogSink {
    fn warn(&mut self, warning: &Warning) {
        log::warn!("{}", warning);
    }
}

/// Sink discarding every warning
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl WarningSink for Silent {
    fn warn(&mut self, _warning: &Warning) {}
}

impl WarningSink for Vec<Warning> {
    fn warn(&mut self, warning: &Warning) {
        self.push(warning.clone());
    }
}

/// Forward `warnings` to `sink` according to `mode`
pub fn report(sink: &mut dyn WarningSink, mode: WarnMode, warnings: &[Warning]) {
    let count = match mode {
        WarnMode::None => 0,
        WarnMode::First => 1,
        WarnMode::All => warnings.len(),
    };
    for warning in warnings.iter().take(count) {
        sink.warn(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(WarningKind::FileOverlap.is_fatal());
        assert!(WarningKind::SectorCount.is_fatal());
        assert!(!WarningKind::FileName.is_fatal());
        assert!(!WarningKind::OptionBits.is_fatal());
    }

    #[test]
    fn test_report_modes() {
        let warnings = vec![
            Warning::side(WarningKind::OptionBits, 0, "a"),
            Warning::side(WarningKind::FileOrder, 0, "b"),
        ];

        let mut sink: Vec<Warning> = Vec::new();
        report(&mut sink, WarnMode::First, &warnings);
        assert_eq!(sink.len(), 1);

        let mut sink: Vec<Warning> = Vec::new();
        report(&mut sink, WarnMode::All, &warnings);
        assert_eq!(sink.len(), 2);

        let mut sink: Vec<Warning> = Vec::new();
        report(&mut sink, WarnMode::None, &warnings);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_display() {
        let w = Warning::file(WarningKind::FileName, 1, "$.B\x01D", "invalid character");
        assert_eq!(w.to_string(), "side 1: $.B\x01D: invalid character");
    }
}
