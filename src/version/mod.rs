// src/version/mod.rs

//! Version handling and range admission for package relations
//!
//! Versions use the `[epoch:]version[-release]` form. The version and release
//! parts are compared segment by segment: runs of digits compare numerically,
//! runs of letters compare lexically, and a numeric segment is always newer
//! than an alphabetic one (`1.0 > 1.a`). Separators only delimit segments.
//!
//! A [`VersionConstraint`] is the range side of *admission*: the predicate
//! "does range R accept concrete version V". Admission depends only on the
//! version string, never on the object carrying it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A parsed package version with epoch, version, and release components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl Version {
    /// Parse a version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-r4" → epoch=0, version="1.2.3", release=Some("r4")
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (epoch_str, rest) = match s.find(':') {
            Some(colon_pos) => (&s[..colon_pos], &s[colon_pos + 1..]),
            None => ("0", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str.parse::<u64>().map_err(|e| {
                Error::ParseError(format!("Invalid epoch in version '{}': {}", s, e))
            })?
        };

        let (version, release) = match rest.find('-') {
            Some(dash_pos) => (
                rest[..dash_pos].to_string(),
                Some(rest[dash_pos + 1..].to_string()).filter(|r| !r.is_empty()),
            ),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty version component in '{}'",
                s
            )));
        }
        if version.chars().any(char::is_whitespace) {
            return Err(Error::ParseError(format!("Whitespace in version '{}'", s)));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two versions
    pub fn compare(&self, other: &Version) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_segments(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (Some(a), Some(b)) => compare_segments(a, b),
            })
    }
}

/// Segment-wise comparison of two version strings
fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut left = Segments::new(a);
    let mut right = Segments::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ord = match (l, r) {
                    (Segment::Numeric(x), Segment::Numeric(y)) => {
                        let x = x.trim_start_matches('0');
                        let y = y.trim_start_matches('0');
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    (Segment::Alpha(x), Segment::Alpha(y)) => x.cmp(y),
                    (Segment::Numeric(_), Segment::Alpha(_)) => Ordering::Greater,
                    (Segment::Alpha(_), Segment::Numeric(_)) => Ordering::Less,
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

enum Segment<'a> {
    Numeric(&'a str),
    Alpha(&'a str),
}

struct Segments<'a> {
    rest: &'a str,
}

impl<'a> Segments<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rest = self.rest.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
        let first = self.rest.chars().next()?;

        let end = if first.is_ascii_digit() {
            self.rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(self.rest.len())
        } else {
            self.rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(self.rest.len())
        };

        let (segment, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if first.is_ascii_digit() {
            Segment::Numeric(segment)
        } else {
            Segment::Alpha(segment)
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Version::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl std::str::FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    // Must agree with `compare`: "1.01" and "1.1" are the same version.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.epoch.hash(state);
        for part in [Some(self.version.as_str()), self.release.as_deref()] {
            if let Some(part) = part {
                for segment in Segments::new(part) {
                    match segment {
                        Segment::Numeric(n) => {
                            0u8.hash(state);
                            n.trim_start_matches('0').hash(state);
                        }
                        Segment::Alpha(a) => {
                            1u8.hash(state);
                            a.hash(state);
                        }
                    }
                }
            }
            0xffu8.hash(state);
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Exact version match
    Exact(Version),
    /// Greater than
    GreaterThan(Version),
    /// Greater than or equal
    GreaterOrEqual(Version),
    /// Less than
    LessThan(Version),
    /// Less than or equal
    LessOrEqual(Version),
    /// Not equal
    NotEqual(Version),
    /// Both constraints must be satisfied (for ranges like ">= 1.0, < 2.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a version constraint string
    ///
    /// Examples:
    /// - ">= 1.2.3" → GreaterOrEqual(1.2.3)
    /// - "<2.0.0" → LessThan(2.0.0)
    /// - "= 1.5.0" → Exact(1.5.0)
    /// - ">= 1.0, < 2.0" → And(..)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if let Some((head, tail)) = s.split_once(',') {
            let left = Self::parse(head)?;
            let right = Self::parse(tail)?;
            return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(Version::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(Version::parse(rest.trim_start_matches('='))?))
        } else {
            // No operator means exact match
            Ok(VersionConstraint::Exact(Version::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }

    /// True when the constraint pins a single version
    pub fn is_exact(&self) -> bool {
        matches!(self, VersionConstraint::Exact(_))
    }

    /// Check if two constraints can be satisfied simultaneously
    ///
    /// Exact bounds are checked against the other side; open ranges are
    /// checked by comparing their lower and upper bounds.
    pub fn is_compatible_with(&self, other: &VersionConstraint) -> bool {
        match (self, other) {
            (VersionConstraint::Any, _) | (_, VersionConstraint::Any) => true,
            (VersionConstraint::Exact(v), c) | (c, VersionConstraint::Exact(v)) => c.satisfies(v),
            _ => {
                let (low, high) = merge_bounds(self.bounds(), other.bounds());
                match (low, high) {
                    (Some((lv, lincl)), Some((hv, hincl))) => match lv.cmp(hv) {
                        Ordering::Less => true,
                        Ordering::Equal => lincl && hincl,
                        Ordering::Greater => false,
                    },
                    _ => true,
                }
            }
        }
    }

    /// Lower and upper bounds as (version, inclusive) pairs
    fn bounds(&self) -> (Option<(&Version, bool)>, Option<(&Version, bool)>) {
        match self {
            VersionConstraint::GreaterThan(v) => (Some((v, false)), None),
            VersionConstraint::GreaterOrEqual(v) => (Some((v, true)), None),
            VersionConstraint::LessThan(v) => (None, Some((v, false))),
            VersionConstraint::LessOrEqual(v) => (None, Some((v, true))),
            VersionConstraint::Exact(v) => (Some((v, true)), Some((v, true))),
            VersionConstraint::And(l, r) => merge_bounds(l.bounds(), r.bounds()),
            VersionConstraint::Any | VersionConstraint::NotEqual(_) => (None, None),
        }
    }
}

type Bounds<'a> = (Option<(&'a Version, bool)>, Option<(&'a Version, bool)>);

/// Intersect two bound pairs: highest lower bound, lowest upper bound
fn merge_bounds<'a>(a: Bounds<'a>, b: Bounds<'a>) -> Bounds<'a> {
    let low = match (a.0, b.0) {
        (Some(x), Some(y)) => Some(match x.0.cmp(y.0) {
            Ordering::Greater => x,
            Ordering::Less => y,
            Ordering::Equal => (x.0, x.1 && y.1),
        }),
        (x, y) => x.or(y),
    };
    let high = match (a.1, b.1) {
        (Some(x), Some(y)) => Some(match x.0.cmp(y.0) {
            Ordering::Less => x,
            Ordering::Greater => y,
            Ordering::Equal => (x.0, x.1 && y.1),
        }),
        (x, y) => x.or(y),
    };
    (low, high)
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "={}", v),
            VersionConstraint::GreaterThan(v) => write!(f, ">{}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">={}", v),
            VersionConstraint::LessThan(v) => write!(f, "<{}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<={}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!={}", v),
            VersionConstraint::And(left, right) => write!(f, "{},{}", left, right),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_parse_simple() {
        let ver = v("1.2.3");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.version, "1.2.3");
        assert_eq!(ver.release, None);
    }

    #[test]
    fn test_version_parse_with_epoch_and_release() {
        let ver = v("1:2.3.4-r5");
        assert_eq!(ver.epoch, 1);
        assert_eq!(ver.version, "2.3.4");
        assert_eq!(ver.release, Some("r5".to_string()));
    }

    #[test]
    fn test_version_parse_rejects_empty() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1:").is_err());
        assert!(Version::parse("x:1.0").is_err());
    }

    #[test]
    fn test_compare_numeric_segments() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99.99"));
        assert!(v("1.0.1") > v("1.0"));
        assert_eq!(v("1.01"), v("1.1"));
    }

    #[test]
    fn test_compare_alpha_segments() {
        assert!(v("1.0b") > v("1.0a"));
        assert!(v("1.0") > v("1.a"));
    }

    #[test]
    fn test_compare_epoch_wins() {
        assert!(v("1:1.0") > v("9.9"));
    }

    #[test]
    fn test_compare_release() {
        assert!(v("1.0-2") > v("1.0-1"));
        assert!(v("1.0-1") > v("1.0"));
    }

    #[test]
    fn test_equal_versions_hash_equal() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(v("1.01"));
        assert!(set.contains(&v("1.1")));
    }

    #[test]
    fn test_constraint_parse_without_spaces() {
        let c = VersionConstraint::parse(">=1.0").unwrap();
        assert!(c.satisfies(&v("1.0")));
        assert!(c.satisfies(&v("2.0")));
        assert!(!c.satisfies(&v("0.9")));
    }

    #[test]
    fn test_constraint_range() {
        let c = VersionConstraint::parse(">= 1.0, < 2.0").unwrap();
        assert!(c.satisfies(&v("1.5")));
        assert!(!c.satisfies(&v("2.0")));
        assert!(!c.satisfies(&v("0.9")));
    }

    #[test]
    fn test_constraint_exact_and_any() {
        assert!(VersionConstraint::parse("1.2").unwrap().satisfies(&v("1.2")));
        assert!(VersionConstraint::parse("=1.2").unwrap().satisfies(&v("1.2")));
        assert!(VersionConstraint::parse("*").unwrap().satisfies(&v("42")));
        assert!(VersionConstraint::parse("").unwrap().satisfies(&v("42")));
    }

    #[test]
    fn test_admission_depends_only_on_version_string() {
        let c = VersionConstraint::parse(">1.0").unwrap();
        let b = v("1.5");
        let c2 = v("1.5");
        assert_eq!(c.satisfies(&b), c.satisfies(&c2));
    }

    #[test]
    fn test_constraint_compatibility() {
        let ge2 = VersionConstraint::parse(">=2.0").unwrap();
        let lt2 = VersionConstraint::parse("<2.0").unwrap();
        let le2 = VersionConstraint::parse("<=2.0").unwrap();
        let lt3 = VersionConstraint::parse("<3.0").unwrap();
        assert!(!ge2.is_compatible_with(&lt2));
        assert!(ge2.is_compatible_with(&le2));
        assert!(ge2.is_compatible_with(&lt3));
        assert!(!ge2.is_compatible_with(&VersionConstraint::parse("1.0").unwrap()));
    }

    #[test]
    fn test_constraint_display() {
        let c = VersionConstraint::parse(">= 1.0.0, < 2.0.0").unwrap();
        assert_eq!(c.to_string(), ">=1.0.0,<2.0.0");
        assert_eq!(VersionConstraint::parse(c.to_string().as_str()).unwrap(), c);
    }
}
