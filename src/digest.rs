/// Content digests of files, sides and images

use crate::error::{DfsError, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Which bytes of a file or side are hashed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestMode {
    /// Attributes and every allocated sector
    All,
    /// Attributes and used bytes only
    #[default]
    Used,
    /// Addresses and content
    File,
    /// Content only
    Data,
}

impl DigestMode {
    /// Parse a mode name
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "all" => Ok(DigestMode::All),
            "used" => Ok(DigestMode::Used),
            "file" => Ok(DigestMode::File),
            "data" => Ok(DigestMode::Data),
            other => Err(DfsError::invalid_value(format!("digest mode '{}'", other))),
        }
    }
}

/// Hash function used for digests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// SHA-1
    #[default]
    Sha1,
    /// SHA-256
    Sha256,
}

impl DigestAlgorithm {
    /// Parse an algorithm name
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(DigestAlgorithm::Sha1),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            other => Err(DfsError::invalid_value(format!(
                "digest algorithm '{}'",
                other
            ))),
        }
    }

    /// Start a new hash
    pub fn hasher(&self) -> Hasher {
        match self {
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Hash one buffer and return lowercase hex
    pub fn hex_digest(&self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize_hex()
    }
}

/// Running hash of either algorithm
#[derive(Clone)]
pub enum Hasher {
    /// SHA-1 state
    Sha1(Sha1),
    /// SHA-256 state
    Sha256(Sha256),
}

impl Hasher {
    /// Feed bytes
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Finish and return lowercase hex
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Attribute prefix of an entry digest stream
pub(crate) fn attribute_prefix(mode: DigestMode, load: u32, exec: u32, locked: bool) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(9);
    match mode {
        DigestMode::All | DigestMode::Used => {
            prefix.extend_from_slice(&load.to_le_bytes());
            prefix.extend_from_slice(&exec.to_le_bytes());
            prefix.push(locked as u8);
        }
        DigestMode::File => {
            prefix.extend_from_slice(&load.to_le_bytes());
            prefix.extend_from_slice(&exec.to_le_bytes());
        }
        DigestMode::Data => {}
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            DigestAlgorithm::Sha1.hex_digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(
            DigestAlgorithm::Sha256.hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = DigestAlgorithm::Sha1.hasher();
        hasher.update(b"ab");
        hasher.update(b"c");
        assert_eq!(hasher.finalize_hex(), DigestAlgorithm::Sha1.hex_digest(b"abc"));
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(attribute_prefix(DigestMode::Used, 0x1900, 0x8023, true).len(), 9);
        assert_eq!(
            attribute_prefix(DigestMode::File, 0x1900, 0x8023, true),
            vec![0x00, 0x19, 0, 0, 0x23, 0x80, 0, 0]
        );
        assert!(attribute_prefix(DigestMode::Data, 1, 2, false).is_empty());
    }

    #[test]
    fn test_parse() {
        assert_eq!(DigestMode::parse("DATA").unwrap(), DigestMode::Data);
        assert_eq!(DigestAlgorithm::parse("SHA-256").unwrap(), DigestAlgorithm::Sha256);
        assert!(DigestAlgorithm::parse("md5").is_err());
    }
}
