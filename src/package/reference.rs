// src/package/reference.rs

//! Package references used by relations and requests

use super::{Identity, Package};
use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a package: either a concrete pin or a selector over a range
///
/// Accepted forms:
/// - `cat/name` selector admitting any version
/// - `cat/name@1.2` concrete
/// - `cat/name@>=1.2` or `cat/name>=1.2` selector
/// - `cat/name=1.2` concrete
/// - `cat/name@>=1.0,<2.0` selector over a range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PackageRef {
    Concrete { identity: Identity, version: Version },
    Selector {
        identity: Identity,
        range: VersionConstraint,
    },
}

impl PackageRef {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let slash = s.find('/').ok_or_else(|| {
            Error::ParseError(format!("Package '{}' is not in category/name form", s))
        })?;

        let split = s[slash..]
            .find(['@', '<', '>', '=', '!'])
            .map(|i| i + slash);

        let (identity, range) = match split {
            Some(i) => {
                let range = s[i..].strip_prefix('@').unwrap_or(&s[i..]);
                (Identity::parse(&s[..i])?, VersionConstraint::parse(range)?)
            }
            None => (Identity::parse(s)?, VersionConstraint::Any),
        };

        Ok(Self::from_constraint(identity, range))
    }

    /// Build a reference, collapsing an exact constraint to a concrete pin
    pub fn from_constraint(identity: Identity, range: VersionConstraint) -> Self {
        match range {
            VersionConstraint::Exact(version) => PackageRef::Concrete { identity, version },
            range => PackageRef::Selector { identity, range },
        }
    }

    /// Selector admitting any version of `identity`
    pub fn any(identity: Identity) -> Self {
        PackageRef::Selector {
            identity,
            range: VersionConstraint::Any,
        }
    }

    pub fn identity(&self) -> &Identity {
        match self {
            PackageRef::Concrete { identity, .. } | PackageRef::Selector { identity, .. } => {
                identity
            }
        }
    }

    pub fn is_selector(&self) -> bool {
        matches!(self, PackageRef::Selector { .. })
    }

    /// The range this reference accepts
    pub fn constraint(&self) -> VersionConstraint {
        match self {
            PackageRef::Concrete { version, .. } => VersionConstraint::Exact(version.clone()),
            PackageRef::Selector { range, .. } => range.clone(),
        }
    }

    /// Admission: does this reference accept `version`
    pub fn admits(&self, version: &Version) -> bool {
        match self {
            PackageRef::Concrete { version: pinned, .. } => pinned == version,
            PackageRef::Selector { range, .. } => range.satisfies(version),
        }
    }

    /// Same identity and admitted version
    pub fn matches(&self, pkg: &Package) -> bool {
        let id = self.identity();
        id.category == pkg.category && id.name == pkg.name && self.admits(&pkg.version)
    }

    /// Version of a concrete reference
    pub fn version(&self) -> Option<&Version> {
        match self {
            PackageRef::Concrete { version, .. } => Some(version),
            PackageRef::Selector { .. } => None,
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageRef::Concrete { identity, version } => write!(f, "{}@{}", identity, version),
            PackageRef::Selector {
                identity,
                range: VersionConstraint::Any,
            } => write!(f, "{}", identity),
            PackageRef::Selector { identity, range } => write!(f, "{}@{}", identity, range),
        }
    }
}

impl TryFrom<String> for PackageRef {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        PackageRef::parse(&s)
    }
}

impl From<PackageRef> for String {
    fn from(r: PackageRef) -> Self {
        r.to_string()
    }
}

impl From<&Package> for PackageRef {
    fn from(pkg: &Package) -> Self {
        pkg.to_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selector_forms() {
        for s in ["lib/bar>=1.0", "lib/bar@>=1.0", "lib/bar@>= 1.0"] {
            let r = PackageRef::parse(s).unwrap();
            assert!(r.is_selector(), "{} should be a selector", s);
            assert_eq!(r.identity(), &Identity::new("lib", "bar"));
            assert!(r.admits(&Version::parse("1.0").unwrap()));
            assert!(!r.admits(&Version::parse("0.9").unwrap()));
        }
    }

    #[test]
    fn test_parse_concrete_forms() {
        for s in ["lib/bar@1.0", "lib/bar=1.0", "lib/bar@=1.0"] {
            let r = PackageRef::parse(s).unwrap();
            assert!(!r.is_selector(), "{} should be concrete", s);
            assert_eq!(r.version(), Some(&Version::parse("1.0").unwrap()));
        }
    }

    #[test]
    fn test_parse_bare_identity_is_any() {
        let r = PackageRef::parse("lib/bar").unwrap();
        assert_eq!(
            r,
            PackageRef::Selector {
                identity: Identity::new("lib", "bar"),
                range: VersionConstraint::Any
            }
        );
        assert!(r.admits(&Version::parse("123").unwrap()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(PackageRef::parse("bar>=1.0").is_err());
        assert!(PackageRef::parse("lib/bar@").is_ok()); // empty range = any
        assert!(PackageRef::parse("lib/bar>=").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["lib/bar", "lib/bar@1.0", "lib/bar@>=1.0,<2.0"] {
            let r = PackageRef::parse(s).unwrap();
            assert_eq!(r.to_string(), s);
            assert_eq!(PackageRef::parse(&r.to_string()).unwrap(), r);
        }
    }

    #[test]
    fn test_matches_requires_identity() {
        let r = PackageRef::parse("lib/bar>=1.0").unwrap();
        let bar = Package::new("lib", "bar", "1.5").unwrap();
        let baz = Package::new("lib", "baz", "1.5").unwrap();
        assert!(r.matches(&bar));
        assert!(!r.matches(&baz));
    }
}
