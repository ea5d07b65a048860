// src/package/mod.rs

//! Package model: identities, references and relation graph nodes
//!
//! A [`Package`] is always concrete (category, name and an exact version) and
//! carries its `requires`, `conflicts` and `provides` relations. Relations
//! point at [`PackageRef`]s, which are either concrete pins or selectors
//! (an identity plus a version range). Identity for matching purposes is the
//! `(category, name)` pair.

mod reference;

pub use reference::PackageRef;

use crate::error::{Error, Result};
use crate::hash;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Annotation key naming the package's config-protect directory
pub const CONFIG_PROTECT_ANNOTATION: &str = "config_protect";

/// Identity of a package: `(category, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    pub category: String,
    pub name: String,
}

impl Identity {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }

    /// Parse `category/name`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (category, name) = s.split_once('/').ok_or_else(|| {
            Error::ParseError(format!("Package '{}' is not in category/name form", s))
        })?;

        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
        };
        if !valid(category) || !valid(name) {
            return Err(Error::ParseError(format!("Invalid package identity '{}'", s)));
        }

        Ok(Self::new(category, name))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

impl TryFrom<String> for Identity {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Identity::parse(&s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

/// A concrete package and its relations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub category: String,
    pub name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<PackageRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub hidden: bool,
    /// Name of the repository this package was found in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uri: Vec<String>,
}

impl Package {
    /// Create a package with no relations
    pub fn new(category: &str, name: &str, version: &str) -> Result<Self> {
        let identity = Identity::parse(&format!("{}/{}", category, name))?;
        Ok(Self {
            category: identity.category,
            name: identity.name,
            version: Version::parse(version)?,
            requires: Vec::new(),
            conflicts: Vec::new(),
            provides: Vec::new(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            hidden: false,
            repository: None,
            description: None,
            license: None,
            uri: Vec::new(),
        })
    }

    /// Parse `category/name@version` into a bare package
    pub fn parse(s: &str) -> Result<Self> {
        match PackageRef::parse(s)? {
            PackageRef::Concrete { identity, version } => Ok(Self::new(
                &identity.category,
                &identity.name,
                &version.to_string(),
            )?),
            PackageRef::Selector { .. } => Err(Error::ParseError(format!(
                "'{}' is a selector, a concrete version is required",
                s
            ))),
        }
    }

    pub fn with_requires(mut self, requires: Vec<PackageRef>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_conflicts(mut self, conflicts: Vec<PackageRef>) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn with_provides(mut self, provides: Vec<PackageRef>) -> Self {
        self.provides = provides;
        self
    }

    pub fn with_repository(mut self, repository: &str) -> Self {
        self.repository = Some(repository.to_string());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.category, &self.name)
    }

    /// Concrete reference pinning this exact package
    pub fn to_ref(&self) -> PackageRef {
        PackageRef::Concrete {
            identity: self.identity(),
            version: self.version.clone(),
        }
    }

    /// `category/name@version`, the key used by databases and indexes
    pub fn fingerprint(&self) -> String {
        format!("{}/{}@{}", self.category, self.name, self.version)
    }

    /// Same identity and same version
    pub fn same_as(&self, other: &Package) -> bool {
        self.category == other.category
            && self.name == other.name
            && self.version == other.version
    }

    pub fn same_identity(&self, other: &Package) -> bool {
        self.category == other.category && self.name == other.name
    }

    /// True if this package, or anything it provides, satisfies `req`
    pub fn satisfies(&self, req: &PackageRef) -> bool {
        req.matches(self) || self.provided_ref(req).is_some()
    }

    /// The provides entry standing in for `req`, if any
    pub fn provided_ref(&self, req: &PackageRef) -> Option<&PackageRef> {
        self.provides.iter().find(|p| {
            p.identity() == req.identity()
                && match p {
                    PackageRef::Concrete { version, .. } => req.admits(version),
                    // An unversioned provide stands in for any range
                    PackageRef::Selector { .. } => true,
                }
        })
    }

    /// Whether this package and `other` cannot coexist
    ///
    /// Conflicts are symmetric: either side declaring the other is enough.
    pub fn conflicts_with(&self, other: &Package) -> bool {
        self.conflicts.iter().any(|c| other.satisfies(c))
            || other.conflicts.iter().any(|c| self.satisfies(c))
    }

    /// Content hash of the package definition, used to detect respins
    ///
    /// The source repository is not part of the definition.
    pub fn definition_hash(&self) -> String {
        let mut canonical = self.clone();
        canonical.repository = None;
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hash::sha256(&bytes)
    }

    pub fn config_protect_dir(&self) -> Option<&str> {
        self.annotations
            .get(CONFIG_PROTECT_ANNOTATION)
            .map(String::as_str)
    }

    /// Lightweight record for search and removal paths
    pub fn to_stone(&self, files: Vec<String>) -> Stone {
        Stone {
            category: self.category.clone(),
            name: self.name.clone(),
            version: self.version.to_string(),
            files,
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.category, self.name, self.version)
    }
}

/// Lightweight installed-package record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stone {
    pub category: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl fmt::Display for Stone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.category, self.name, self.version)
    }
}

/// Post-install and pre-uninstall command bundle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalizer {
    #[serde(default)]
    pub shell: Vec<String>,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub uninstall: Vec<String>,
}

impl Finalizer {
    /// Shell used to run each command, `sh -c` unless overridden
    pub fn shell(&self) -> Vec<String> {
        if self.shell.is_empty() {
            vec!["sh".to_string(), "-c".to_string()]
        } else {
            self.shell.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.uninstall.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(s: &str) -> PackageRef {
        PackageRef::parse(s).unwrap()
    }

    #[test]
    fn test_identity_parse() {
        let id = Identity::parse("lib/bar").unwrap();
        assert_eq!(id.category, "lib");
        assert_eq!(id.name, "bar");
        assert_eq!(id.to_string(), "lib/bar");
        assert!(Identity::parse("bar").is_err());
        assert!(Identity::parse("lib/").is_err());
        assert!(Identity::parse("lib/b ar").is_err());
    }

    #[test]
    fn test_package_parse_requires_concrete() {
        let pkg = Package::parse("app/foo@1.0").unwrap();
        assert_eq!(pkg.fingerprint(), "app/foo@1.0");
        assert!(Package::parse("app/foo>=1.0").is_err());
    }

    #[test]
    fn test_satisfies_direct_and_provides() {
        let bar = Package::new("lib", "bar", "2.0").unwrap();
        assert!(bar.satisfies(&sel("lib/bar>=1.0")));
        assert!(!bar.satisfies(&sel("lib/bar<2.0")));

        let compat = Package::new("lib", "bar-compat", "1.0")
            .unwrap()
            .with_provides(vec![sel("lib/bar@1.5")]);
        assert!(compat.satisfies(&sel("lib/bar>=1.0")));
        assert!(!compat.satisfies(&sel("lib/bar>=2.0")));

        let virt = Package::new("lib", "virt", "1.0")
            .unwrap()
            .with_provides(vec![sel("virtual/mta")]);
        assert!(virt.satisfies(&sel("virtual/mta>=3")));
    }

    #[test]
    fn test_conflicts_are_symmetric() {
        let a = Package::new("app", "a", "1.0")
            .unwrap()
            .with_conflicts(vec![sel("app/b")]);
        let b = Package::new("app", "b", "1.0").unwrap();
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));

        let c = Package::new("app", "c", "1.0").unwrap();
        assert!(!a.conflicts_with(&c));
    }

    #[test]
    fn test_definition_hash_ignores_repository() {
        let a = Package::new("app", "a", "1.0").unwrap();
        let b = a.clone().with_repository("main");
        assert_eq!(a.definition_hash(), b.definition_hash());

        let c = a.clone().with_requires(vec![sel("lib/z")]);
        assert_ne!(a.definition_hash(), c.definition_hash());
    }

    #[test]
    fn test_package_yaml_round_trip() {
        let yaml = r#"
category: app
name: foo
version: "1.0"
requires:
  - lib/bar>=1.0
annotations:
  config_protect: /etc/foo
"#;
        let pkg: Package = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pkg.requires, vec![sel("lib/bar>=1.0")]);
        assert_eq!(pkg.config_protect_dir(), Some("/etc/foo"));
        assert!(!pkg.hidden);
    }

    #[test]
    fn test_finalizer_default_shell() {
        let fin = Finalizer::default();
        assert_eq!(fin.shell(), vec!["sh", "-c"]);
        assert!(fin.is_empty());
    }
}
