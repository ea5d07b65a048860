// src/repository/artifact.rs

//! Package artifacts: the transportable form of a concrete package

use crate::compression::CompressionType;
use crate::error::{Error, Result};
use crate::filesystem::path::sanitize_filename;
use crate::hash::{self, Checksums};
use crate::package::{Finalizer, Package, Stone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One compiled package version ready for download and unpack
///
/// Created when a catalog is parsed; transport fills in `cache_path` once
/// the archive is in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageArtifact {
    /// Archive path relative to the repository root
    #[serde(default)]
    pub path: String,
    #[serde(skip)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub checksums: Checksums,
    #[serde(default, rename = "compressiontype")]
    pub compression_type: CompressionType,
    /// Files shipped by the archive, relative to the rootfs
    #[serde(default)]
    pub files: Vec<String>,
    pub runtime: Package,
    #[serde(default, rename = "compilespec", skip_serializing_if = "Option::is_none")]
    pub compile_spec: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizer: Option<Finalizer>,
    /// Priority of the repository this artifact was found in
    #[serde(skip)]
    pub priority: i32,
}

impl PackageArtifact {
    pub fn new(runtime: Package) -> Self {
        Self {
            path: String::new(),
            cache_path: None,
            checksums: Checksums::new(),
            compression_type: CompressionType::None,
            files: Vec::new(),
            runtime,
            compile_spec: None,
            finalizer: None,
            priority: 0,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// Parse a `metadata.yaml` or `metadata.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let artifact = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::ParseError(format!("Invalid artifact metadata {}: {}", path.display(), e))
            })?
        };
        Ok(artifact)
    }

    /// Overlay the authoritative relations of a package definition
    ///
    /// Definitions can change without rebuilding the artifact, so the
    /// catalog's copy of requires, conflicts, provides and annotations wins.
    pub fn merge_definition(&mut self, definition: &Package) {
        self.runtime.requires = definition.requires.clone();
        self.runtime.conflicts = definition.conflicts.clone();
        self.runtime.provides = definition.provides.clone();
        self.runtime.annotations = definition.annotations.clone();
        if !definition.labels.is_empty() {
            self.runtime.labels = definition.labels.clone();
        }
        self.runtime.hidden = definition.hidden;
    }

    pub fn package(&self) -> &Package {
        &self.runtime
    }

    pub fn repository(&self) -> Option<&str> {
        self.runtime.repository.as_deref()
    }

    /// Archive file name, validated as a single path component
    pub fn file_name(&self) -> Result<String> {
        let name = Path::new(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                Error::InvalidPath(format!("Artifact for {} has no archive path", self.runtime))
            })?;
        sanitize_filename(&name)
    }

    /// Check a local copy against the catalog checksums
    pub fn verify(&self, path: &Path) -> Result<()> {
        hash::verify_file(path, &self.checksums)
    }

    pub fn to_stone(&self) -> Stone {
        self.runtime.to_stone(self.files.clone())
    }
}

/// Ordered collection of artifacts produced by a resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactsPack {
    artifacts: Vec<PackageArtifact>,
}

impl ArtifactsPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append unless the same concrete package is already present
    pub fn push(&mut self, artifact: PackageArtifact) {
        if !self.contains(&artifact.runtime) {
            self.artifacts.push(artifact);
        }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PackageArtifact> {
        self.artifacts.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PackageArtifact> {
        self.artifacts.iter_mut()
    }

    /// The artifact for exactly this package
    pub fn find(&self, pkg: &Package) -> Option<&PackageArtifact> {
        self.artifacts.iter().find(|a| a.runtime.same_as(pkg))
    }

    /// The artifact sharing this package's identity, at any version
    pub fn find_identity(&self, pkg: &Package) -> Option<&PackageArtifact> {
        self.artifacts.iter().find(|a| a.runtime.same_identity(pkg))
    }

    pub fn contains(&self, pkg: &Package) -> bool {
        self.find(pkg).is_some()
    }

    pub fn packages(&self) -> Vec<Package> {
        self.artifacts.iter().map(|a| a.runtime.clone()).collect()
    }

    pub fn retain(&mut self, f: impl FnMut(&PackageArtifact) -> bool) {
        self.artifacts.retain(f);
    }

    pub fn as_slice(&self) -> &[PackageArtifact] {
        &self.artifacts
    }

    pub fn into_vec(self) -> Vec<PackageArtifact> {
        self.artifacts
    }
}

impl FromIterator<PackageArtifact> for ArtifactsPack {
    fn from_iter<I: IntoIterator<Item = PackageArtifact>>(iter: I) -> Self {
        let mut pack = ArtifactsPack::new();
        for artifact in iter {
            pack.push(artifact);
        }
        pack
    }
}

impl IntoIterator for ArtifactsPack {
    type Item = PackageArtifact;
    type IntoIter = std::vec::IntoIter<PackageArtifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.into_iter()
    }
}

impl<'a> IntoIterator for &'a ArtifactsPack {
    type Item = &'a PackageArtifact;
    type IntoIter = std::slice::Iter<'a, PackageArtifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.artifacts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageRef;
    use tempfile::TempDir;

    #[test]
    fn test_load_yaml_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.yaml");
        fs::write(
            &path,
            r#"
path: app-foo-1.0.package.tar.zst
compressiontype: zstd
checksums:
  sha256: deadbeef
files:
  - usr/bin/foo
runtime:
  category: app
  name: foo
  version: "1.0"
  requires:
    - lib/bar>=1.0
"#,
        )
        .unwrap();

        let artifact = PackageArtifact::load(&path).unwrap();
        assert_eq!(artifact.compression_type, CompressionType::Zstd);
        assert_eq!(artifact.files, vec!["usr/bin/foo"]);
        assert_eq!(artifact.runtime.fingerprint(), "app/foo@1.0");
        assert_eq!(artifact.file_name().unwrap(), "app-foo-1.0.package.tar.zst");
        assert!(artifact.cache_path.is_none());
    }

    #[test]
    fn test_load_json_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        fs::write(
            &path,
            r#"{"path":"x.tar","runtime":{"category":"app","name":"x","version":"2"}}"#,
        )
        .unwrap();
        let artifact = PackageArtifact::load(&path).unwrap();
        assert_eq!(artifact.runtime.fingerprint(), "app/x@2");
    }

    #[test]
    fn test_merge_definition_overrides_relations() {
        let mut artifact = PackageArtifact::new(
            Package::new("app", "foo", "1.0")
                .unwrap()
                .with_requires(vec![PackageRef::parse("lib/old").unwrap()]),
        );
        let def = Package::new("app", "foo", "1.0")
            .unwrap()
            .with_requires(vec![PackageRef::parse("lib/new>=2").unwrap()])
            .with_annotation("config_protect", "/etc/foo");

        artifact.merge_definition(&def);
        assert_eq!(artifact.runtime.requires, def.requires);
        assert_eq!(artifact.runtime.config_protect_dir(), Some("/etc/foo"));
    }

    #[test]
    fn test_file_name_rejects_missing_path() {
        let artifact = PackageArtifact::new(Package::new("app", "foo", "1.0").unwrap());
        assert!(artifact.file_name().is_err());
    }

    #[test]
    fn test_pack_deduplicates() {
        let a = PackageArtifact::new(Package::new("app", "foo", "1.0").unwrap());
        let b = PackageArtifact::new(Package::new("app", "foo", "2.0").unwrap());
        let pack: ArtifactsPack = vec![a.clone(), a.clone(), b].into_iter().collect();
        assert_eq!(pack.len(), 2);
        assert!(pack.contains(&a.runtime));
        assert!(pack.find_identity(&a.runtime).is_some());
    }
}
