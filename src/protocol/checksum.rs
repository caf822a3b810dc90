//! Checksum types for download verification
//!
//! Supports SHA-1, SHA-256 and MD5 digests.

use serde::{Deserialize, Serialize};

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-1 hash (160-bit), recorded for completed files by default
    #[default]
    Sha1,
    /// SHA-256 hash (256-bit)
    Sha256,
    /// MD5 hash (128-bit, fast but less secure)
    Md5,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha1 => write!(f, "SHA1"),
            ChecksumAlgorithm::Sha256 => write!(f, "SHA256"),
            ChecksumAlgorithm::Md5 => write!(f, "MD5"),
        }
    }
}

/// Expected checksum for verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedChecksum {
    /// The hash algorithm to use
    pub algorithm: ChecksumAlgorithm,
    /// The expected hash value (hex-encoded, compared case-insensitively)
    pub value: String,
}

impl ExpectedChecksum {
    /// Create a SHA-1 checksum expectation
    pub fn sha1(hex_value: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha1,
            value: hex_value.into().to_lowercase(),
        }
    }

    /// Create a SHA-256 checksum expectation
    pub fn sha256(hex_value: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            value: hex_value.into().to_lowercase(),
        }
    }

    /// Create an MD5 checksum expectation
    pub fn md5(hex_value: impl Into<String>) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Md5,
            value: hex_value.into().to_lowercase(),
        }
    }

    /// Parse from a string like "sha1:abc123" or "sha256:def456"
    pub fn parse(s: &str) -> Option<Self> {
        let (algo, hash) = s.split_once(':')?;
        let algorithm = match algo.to_lowercase().as_str() {
            "sha1" | "sha-1" => ChecksumAlgorithm::Sha1,
            "sha256" | "sha-256" => ChecksumAlgorithm::Sha256,
            "md5" => ChecksumAlgorithm::Md5,
            _ => return None,
        };
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            algorithm,
            value: hash.to_lowercase(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_prefixes() {
        let c = ExpectedChecksum::parse("SHA-1:ABCDEF").unwrap();
        assert_eq!(c.algorithm, ChecksumAlgorithm::Sha1);
        assert_eq!(c.value, "abcdef");

        let c = ExpectedChecksum::parse("md5:00ff").unwrap();
        assert_eq!(c.algorithm, ChecksumAlgorithm::Md5);
    }

    #[test]
    fn parse_rejects_unknown_or_empty() {
        assert!(ExpectedChecksum::parse("crc32:1234").is_none());
        assert!(ExpectedChecksum::parse("sha1:").is_none());
        assert!(ExpectedChecksum::parse("deadbeef").is_none());
    }
}
