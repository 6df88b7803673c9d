//! Module versions and dependency constraints
//!
//! A version is a dotted sequence of numbers with an optional pre-release
//! label: `1`, `0.4`, `1.2.3`, `0.4-alpha`, `2.0-rc1`. Missing trailing parts
//! compare as zero, so `1.2` and `1.2.0` are the same version.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing versions and constraints
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid constraint format
    #[error("Invalid constraint format: {0}")]
    InvalidConstraint(String),

    /// Unknown pre-release label
    #[error("Invalid pre-release tag: {0}")]
    InvalidPrerelease(String),
}

/// The versions a store can supply for one module name
pub type VersionSet = BTreeSet<Version>;

/// Pre-release stages, in ascending order of maturity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrereleaseKind {
    Dev,
    Ci,
    Qc,
    Alpha,
    Beta,
    Rc,
}

impl PrereleaseKind {
    fn label(self) -> &'static str {
        match self {
            PrereleaseKind::Dev => "dev",
            PrereleaseKind::Ci => "ci",
            PrereleaseKind::Qc => "qc",
            PrereleaseKind::Alpha => "alpha",
            PrereleaseKind::Beta => "beta",
            PrereleaseKind::Rc => "rc",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        Some(match label {
            "dev" => PrereleaseKind::Dev,
            "ci" => PrereleaseKind::Ci,
            "qc" => PrereleaseKind::Qc,
            "alpha" => PrereleaseKind::Alpha,
            "beta" => PrereleaseKind::Beta,
            "rc" => PrereleaseKind::Rc,
            _ => return None,
        })
    }
}

/// Pre-release label such as `alpha` or `rc2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prerelease {
    pub kind: PrereleaseKind,
    pub number: Option<u64>,
}

impl Prerelease {
    fn parse(s: &str) -> Result<Self, VersionError> {
        let split = s.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(s.len());
        let (label, rest) = s.split_at(split);
        let kind = PrereleaseKind::from_label(&label.to_ascii_lowercase())
            .ok_or_else(|| VersionError::InvalidPrerelease(s.to_string()))?;

        let rest = rest.strip_prefix('.').unwrap_or(rest);
        let number = if rest.is_empty() {
            None
        } else {
            Some(
                rest.parse()
                    .map_err(|_| VersionError::InvalidPrerelease(s.to_string()))?,
            )
        };

        Ok(Self { kind, number })
    }
}

impl fmt::Display for Prerelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.label())?;
        if let Some(n) = self.number {
            write!(f, "{}", n)?;
        }
        Ok(())
    }
}

/// A module version
#[derive(Debug, Clone)]
pub struct Version {
    parts: Vec<u64>,
    prerelease: Option<Prerelease>,
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        if s.is_empty() {
            return Err(VersionError::InvalidVersion("empty version".to_string()));
        }

        let (numbers, prerelease) = match s.find('-') {
            Some(pos) => (&s[..pos], Some(Prerelease::parse(&s[pos + 1..])?)),
            None => (s, None),
        };

        let parts = numbers
            .split('.')
            .map(|part| {
                part.parse::<u64>().map_err(|_| {
                    VersionError::InvalidVersion(format!("Invalid version part '{}' in '{}'", part, s))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { parts, prerelease })
    }

    /// Create a release version from its numeric parts
    pub fn new(parts: impl Into<Vec<u64>>) -> Self {
        let mut parts = parts.into();
        if parts.is_empty() {
            parts.push(0);
        }
        Self {
            parts,
            prerelease: None,
        }
    }

    /// Attach a pre-release label
    pub fn with_prerelease(mut self, kind: PrereleaseKind, number: Option<u64>) -> Self {
        self.prerelease = Some(Prerelease { kind, number });
        self
    }

    /// Numeric parts as written
    pub fn parts(&self) -> &[u64] {
        &self.parts
    }

    /// First numeric part
    pub fn major(&self) -> u64 {
        self.parts[0]
    }

    pub fn prerelease(&self) -> Option<Prerelease> {
        self.prerelease
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn part(&self, index: usize) -> u64 {
        self.parts.get(index).copied().unwrap_or(0)
    }

    /// Parts with trailing zeros removed; used for equality and hashing
    fn significant_parts(&self) -> &[u64] {
        let len = self
            .parts
            .iter()
            .rposition(|&p| p != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        &self.parts[..len]
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", part)?;
        }
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_parts().hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            match self.part(i).cmp(&other.part(i)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        // a pre-release sorts before the release it leads up to
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Version requirement attached to a dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// Exactly this version (`=1.2` or `1.2`)
    Exact(Version),

    /// This version or any later one (`>=1.2`)
    AtLeast(Version),

    /// This version or later with the same major part (`^1.2`)
    Compatible(Version),

    /// Any version (`*`)
    Any,
}

impl Constraint {
    /// Parse a constraint string
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::InvalidConstraint("empty constraint".to_string()));
        }
        if s == "*" {
            return Ok(Constraint::Any);
        }

        let wrap = |e: VersionError| VersionError::InvalidConstraint(format!("{}: {}", s, e));

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(Constraint::AtLeast(Version::parse(rest).map_err(wrap)?))
        } else if let Some(rest) = s.strip_prefix('^') {
            Ok(Constraint::Compatible(Version::parse(rest).map_err(wrap)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(Constraint::Exact(Version::parse(rest).map_err(wrap)?))
        } else {
            Ok(Constraint::Exact(Version::parse(s).map_err(wrap)?))
        }
    }

    /// Check whether a version satisfies this constraint
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Constraint::Exact(v) => version == v,
            Constraint::AtLeast(v) => version >= v,
            Constraint::Compatible(v) => version >= v && version.major() == v.major(),
            Constraint::Any => true,
        }
    }

    /// Pick the highest version in `available` that satisfies this constraint
    pub fn best_match<'a>(&self, available: &'a VersionSet) -> Option<&'a Version> {
        available.iter().rev().find(|v| self.matches(v))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Exact(v) => write!(f, "={}", v),
            Constraint::AtLeast(v) => write!(f, ">={}", v),
            Constraint::Compatible(v) => write!(f, "^{}", v),
            Constraint::Any => f.write_str("*"),
        }
    }
}

impl FromStr for Constraint {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Constraint::parse(s)
    }
}
