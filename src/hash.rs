// src/hash.rs

//! Checksums for artifact and metadata integrity
//!
//! Artifacts and repository files carry a `checksums` map keyed by algorithm
//! name. Only SHA-256 is produced and verified; unknown algorithms in a map
//! are ignored so catalogs written by newer tools stay readable.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Key used for SHA-256 entries in a checksum map
pub const SHA256: &str = "sha256";

/// Algorithm name to lowercase hex digest
pub type Checksums = BTreeMap<String, String>;

/// Compute the SHA-256 hex digest of a byte slice
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 hex digest of data from a reader
pub fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 hex digest of a file, streaming its content
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    Ok(sha256_reader(&mut file)?)
}

/// Build a checksum map for a file
pub fn checksums_for_file(path: &Path) -> Result<Checksums> {
    let mut sums = Checksums::new();
    sums.insert(SHA256.to_string(), sha256_file(path)?);
    Ok(sums)
}

/// Verify a file against a checksum map
///
/// A map without a SHA-256 entry verifies trivially.
pub fn verify_file(path: &Path, expected: &Checksums) -> Result<()> {
    let Some(want) = expected.get(SHA256) else {
        return Ok(());
    };

    let actual = sha256_file(path)?;
    if actual == want.to_lowercase() {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            expected: want.clone(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_verify_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();
        file.flush().unwrap();

        let sums = checksums_for_file(file.path()).unwrap();
        assert!(verify_file(file.path(), &sums).is_ok());

        let mut uppercase = Checksums::new();
        uppercase.insert(SHA256.into(), sums[SHA256].to_uppercase());
        assert!(verify_file(file.path(), &uppercase).is_ok());

        let mut bad = Checksums::new();
        bad.insert(SHA256.into(), "00".repeat(32));
        assert!(matches!(
            verify_file(file.path(), &bad),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_without_sha256_entry() {
        let file = NamedTempFile::new().unwrap();
        let mut sums = Checksums::new();
        sums.insert("md5".into(), "abc".into());
        assert!(verify_file(file.path(), &sums).is_ok());
    }
}
