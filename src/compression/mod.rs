// src/compression/mod.rs

//! Archive pack/unpack with optional compression
//!
//! Artifacts and repository trees are tar archives, optionally compressed
//! with gzip or zstd. Callers only see "pack a directory" and "unpack an
//! archive into a directory"; the codec is picked by [`CompressionType`].

use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Plain tar
    #[default]
    #[serde(alias = "")]
    None,
    /// Gzip compression (.gz)
    Gzip,
    /// Zstandard compression (.zst)
    Zstd,
}

impl CompressionType {
    /// Detect compression format from file extension
    ///
    /// ```
    /// use quarry::compression::CompressionType;
    ///
    /// assert_eq!(CompressionType::from_extension("tree.tar.gz"), CompressionType::Gzip);
    /// assert_eq!(CompressionType::from_extension("foo.tar.zst"), CompressionType::Zstd);
    /// assert_eq!(CompressionType::from_extension("foo.tar"), CompressionType::None);
    /// ```
    pub fn from_extension(path: &str) -> Self {
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Self::Gzip
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Self::Zstd
        } else {
            Self::None
        }
    }

    /// Get the file extension appended after `.tar`
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Create a decompressing reader for the given format
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionType,
) -> Result<Box<dyn Read + 'a>> {
    match format {
        CompressionType::None => Ok(Box::new(reader)),
        CompressionType::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        CompressionType::Zstd => Ok(Box::new(zstd::Decoder::new(reader)?)),
    }
}

/// Pack the contents of `src_dir` into a tar archive at `dest`
pub fn pack_archive(src_dir: &Path, dest: &Path, format: CompressionType) -> Result<()> {
    debug!("Packing {} into {} ({})", src_dir.display(), dest.display(), format);
    let file = BufWriter::new(File::create(dest)?);

    match format {
        CompressionType::None => {
            let mut file = write_tar(src_dir, file)?;
            file.flush()?;
        }
        CompressionType::Gzip => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            write_tar(src_dir, encoder)?.finish()?.flush()?;
        }
        CompressionType::Zstd => {
            let encoder = zstd::Encoder::new(file, 3)?;
            write_tar(src_dir, encoder)?.finish()?.flush()?;
        }
    }
    Ok(())
}

fn write_tar<W: Write>(src_dir: &Path, writer: W) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", src_dir)?;
    builder.into_inner()
}

/// Unpack an archive into `dest_dir`, returning the regular files and
/// symlinks it contained as rootfs-relative paths
///
/// Entries whose path would escape `dest_dir` are rejected.
pub fn unpack_archive(archive: &Path, dest_dir: &Path, format: CompressionType) -> Result<Vec<String>> {
    debug!("Unpacking {} into {}", archive.display(), dest_dir.display());
    fs::create_dir_all(dest_dir)?;

    let reader = BufReader::new(File::open(archive)?);
    let decoder = create_decoder(reader, format)?;
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);

    let mut files = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.to_path_buf();
        let relative = match sanitize_path(&raw) {
            Ok(p) => p,
            // "./" itself
            Err(Error::InvalidPath(_)) => continue,
            Err(e) => return Err(e),
        };

        let kind = entry.header().entry_type();
        if !entry.unpack_in(dest_dir)? {
            return Err(Error::PathTraversal(raw.display().to_string()));
        }
        if kind.is_file() || kind.is_symlink() || kind.is_hard_link() {
            files.push(relative.to_string_lossy().to_string());
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(dir.path().join("usr/bin/tool"), b"#!/bin/sh\n").unwrap();
        fs::write(dir.path().join("etc/tool.conf"), b"key=value\n").unwrap();
        dir
    }

    #[test]
    fn test_pack_unpack_each_format() {
        for format in [CompressionType::None, CompressionType::Gzip, CompressionType::Zstd] {
            let tree = sample_tree();
            let out = TempDir::new().unwrap();
            let archive = out.path().join(format!("a.tar{}", format.extension()));

            pack_archive(tree.path(), &archive, format).unwrap();
            let dest = out.path().join("dest");
            let files = unpack_archive(&archive, &dest, format).unwrap();

            assert_eq!(files, vec!["etc/tool.conf", "usr/bin/tool"], "{}", format);
            assert_eq!(fs::read(dest.join("etc/tool.conf")).unwrap(), b"key=value\n");
        }
    }

    #[test]
    fn test_serde_names() {
        let t: CompressionType = serde_yaml::from_str("zstd").unwrap();
        assert_eq!(t, CompressionType::Zstd);
        let t: CompressionType = serde_yaml::from_str("\"\"").unwrap();
        assert_eq!(t, CompressionType::None);
    }
}
