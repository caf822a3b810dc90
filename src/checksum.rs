//! Post-download content verification
//!
//! Verification is advisory: it produces a digest for the metadata record
//! and a list of warnings, but never decides whether a file counts as
//! downloaded. Any failure to hash yields [`UNAVAILABLE`].

use crate::error::{QueueError, Result, StorageErrorKind};
use crate::protocol::{ChecksumAlgorithm, ExpectedChecksum};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Digest recorded when the file could not be hashed
pub const UNAVAILABLE: &str = "unavailable";

/// Outcome of verifying a completed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Hex digest, or [`UNAVAILABLE`]
    pub checksum: String,
    /// Size on disk in bytes (0 if unreadable)
    pub size: u64,
    /// Problems found; empty when the file looks intact
    pub warnings: Vec<String>,
}

impl Verification {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn unavailable(size: u64, warning: String) -> Self {
        Self {
            checksum: UNAVAILABLE.to_string(),
            size,
            warnings: vec![warning],
        }
    }
}

/// Verify a file that the transport reported as complete.
///
/// Re-checks existence, rejects empty files, compares against the size the
/// transport announced (if any) and against an expected digest (if any).
pub async fn validate_download(
    path: &Path,
    algorithm: ChecksumAlgorithm,
    expected_size: Option<u64>,
    expected: Option<&ExpectedChecksum>,
) -> Verification {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Verification::unavailable(0, format!("{} is not a file", path.display())),
        Err(e) => {
            return Verification::unavailable(0, format!("{} is missing: {}", path.display(), e))
        }
    };

    if size == 0 {
        return Verification::unavailable(0, format!("{} is empty", path.display()));
    }

    let mut warnings = Vec::new();
    if let Some(expected_size) = expected_size {
        if expected_size != size {
            warnings.push(format!(
                "size mismatch: expected {} bytes, found {} bytes",
                expected_size, size
            ));
        }
    }

    let checksum = match compute_checksum(path, algorithm).await {
        Ok(digest) => digest,
        Err(e) => {
            warnings.push(format!("checksum failed: {}", e));
            UNAVAILABLE.to_string()
        }
    };

    if let Some(expected) = expected {
        let actual = if expected.algorithm == algorithm && checksum != UNAVAILABLE {
            Ok(checksum.clone())
        } else {
            compute_checksum(path, expected.algorithm).await
        };
        match actual {
            Ok(actual) if actual.eq_ignore_ascii_case(&expected.value) => {}
            Ok(actual) => warnings.push(mismatch_message(expected, &actual)),
            Err(e) => warnings.push(format!("checksum failed: {}", e)),
        }
    }

    Verification {
        checksum,
        size,
        warnings,
    }
}

/// Verify file checksum against expected value
///
/// Returns `Ok(true)` if checksums match, `Ok(false)` if they don't.
/// Returns `Err` if the file cannot be read.
pub async fn verify_checksum(path: &Path, expected: &ExpectedChecksum) -> Result<bool> {
    let computed = compute_checksum(path, expected.algorithm).await?;
    Ok(computed.eq_ignore_ascii_case(&expected.value))
}

/// Compute file checksum using specified algorithm
///
/// Returns the hex-encoded hash value.
pub async fn compute_checksum(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    match algorithm {
        ChecksumAlgorithm::Sha1 => hash_file::<Sha1>(path).await,
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(path).await,
        ChecksumAlgorithm::Md5 => hash_file::<Md5>(path).await,
    }
}

async fn hash_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = File::open(path).await.map_err(|e| {
        QueueError::storage(
            StorageErrorKind::Io,
            path,
            format!("Failed to open file for checksum: {}", e),
        )
    })?;

    // 64KB buffer for efficient reading
    let mut buffer = vec![0u8; 64 * 1024];
    let mut hasher = D::new();
    loop {
        let n = file.read(&mut buffer).await.map_err(|e| {
            QueueError::storage(
                StorageErrorKind::Io,
                path,
                format!("Failed to read file for checksum: {}", e),
            )
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn mismatch_message(expected: &ExpectedChecksum, actual: &str) -> String {
    format!(
        "{} mismatch: expected {}, got {}",
        expected.algorithm, expected.value, actual
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    fn hello() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"Hello, World!").unwrap();
        file
    }

    #[tokio::test]
    async fn test_sha1_checksum() {
        let file = hello();
        let computed = compute_checksum(file.path(), ChecksumAlgorithm::Sha1)
            .await
            .unwrap();
        assert_eq!(computed, "0a0a9f2a6772942557ab5355d76af442f8f65e01");
    }

    #[tokio::test]
    async fn test_md5_checksum() {
        let file = hello();
        let computed = compute_checksum(file.path(), ChecksumAlgorithm::Md5)
            .await
            .unwrap();
        assert_eq!(computed, "65a8e27d8879283831b664bd8b7f0ad4");
    }

    #[tokio::test]
    async fn test_sha256_checksum() {
        let file = hello();
        let computed = compute_checksum(file.path(), ChecksumAlgorithm::Sha256)
            .await
            .unwrap();
        assert_eq!(
            computed,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_verify_checksum() {
        let file = hello();
        let expected = ExpectedChecksum::md5("65A8E27D8879283831B664BD8B7F0AD4");
        assert!(verify_checksum(file.path(), &expected).await.unwrap());

        let wrong = ExpectedChecksum::md5("0000000000000000000000000000000");
        assert!(!verify_checksum(file.path(), &wrong).await.unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let v = validate_download(
            &dir.path().join("nope.bin"),
            ChecksumAlgorithm::Sha1,
            None,
            None,
        )
        .await;
        assert_eq!(v.checksum, UNAVAILABLE);
        assert!(!v.is_clean());
    }

    #[tokio::test]
    async fn empty_file_is_unavailable() {
        let file = NamedTempFile::new().unwrap();
        let v = validate_download(file.path(), ChecksumAlgorithm::Sha1, None, None).await;
        assert_eq!(v.checksum, UNAVAILABLE);
        assert_eq!(v.size, 0);
    }

    #[tokio::test]
    async fn intact_file_is_clean() {
        let file = hello();
        let expected = ExpectedChecksum::sha256(
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
        );
        let v = validate_download(file.path(), ChecksumAlgorithm::Sha1, Some(13), Some(&expected))
            .await;
        assert!(v.is_clean(), "{:?}", v.warnings);
        assert_eq!(v.checksum, "0a0a9f2a6772942557ab5355d76af442f8f65e01");
        assert_eq!(v.size, 13);
    }

    #[tokio::test]
    async fn expected_digest_case_is_ignored() {
        let file = hello();
        // Same algorithm as the computed digest, so no second pass over the file
        let expected = ExpectedChecksum {
            algorithm: ChecksumAlgorithm::Sha1,
            value: "0A0A9F2A6772942557AB5355D76AF442F8F65E01".into(),
        };
        let v = validate_download(file.path(), ChecksumAlgorithm::Sha1, None, Some(&expected))
            .await;
        assert!(v.is_clean(), "{:?}", v.warnings);
    }

    #[tokio::test]
    async fn mismatches_are_warnings_only() {
        let file = hello();
        let expected = ExpectedChecksum::sha1("ffff");
        let v = validate_download(file.path(), ChecksumAlgorithm::Sha1, Some(99), Some(&expected))
            .await;
        assert_eq!(v.warnings.len(), 2);
        assert_ne!(v.checksum, UNAVAILABLE);
    }
}
