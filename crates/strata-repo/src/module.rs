//! The module model
//!
//! A [`Module`] is an opaque compiled unit. The repository layer only looks at
//! its identity (name and optional version), its classification inside a
//! bundle, and the dependencies it declares. The compiled payload travels
//! along as an uninterpreted byte blob.

use crate::codec::{ByteReader, ByteWriter, DecodeError};
use crate::version::{Constraint, Version};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Invalid module name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid module name '{name}': {reason}")]
pub struct NameError {
    pub name: String,
    pub reason: &'static str,
}

/// Check that `name` is a dot-qualified identifier such as `lib.collections`
pub fn validate_name(name: &str) -> Result<(), NameError> {
    let fail = |reason| {
        Err(NameError {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return fail("name is empty");
    }
    for segment in name.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            None => return fail("empty segment"),
            Some(c) if c.is_ascii_digit() => return fail("segment starts with a digit"),
            Some(c) if !(c.is_alphanumeric() || c == '_') => {
                return fail("segment starts with an invalid character")
            }
            _ => {}
        }
        if !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return fail("invalid character");
        }
    }
    Ok(())
}

/// Role of a module inside a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The bundle's identity
    Primary,
    /// Included alongside the primary
    Embedded,
    /// Required but not included; carries no content
    Fingerprint,
}

impl Classification {
    fn to_u8(self) -> u8 {
        match self {
            Classification::Primary => 0,
            Classification::Embedded => 1,
            Classification::Fingerprint => 2,
        }
    }

    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Classification::Primary),
            1 => Some(Classification::Embedded),
            2 => Some(Classification::Fingerprint),
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Classification::Primary => "primary",
            Classification::Embedded => "embedded",
            Classification::Fingerprint => "fingerprint",
        })
    }
}

/// How strongly a dependency is needed
///
/// Ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ImportMode {
    Optional,
    Desired,
    #[default]
    Required,
}

impl ImportMode {
    fn to_u8(self) -> u8 {
        match self {
            ImportMode::Optional => 0,
            ImportMode::Desired => 1,
            ImportMode::Required => 2,
        }
    }

    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ImportMode::Optional),
            1 => Some(ImportMode::Desired),
            2 => Some(ImportMode::Required),
            _ => None,
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportMode::Optional => "optional",
            ImportMode::Desired => "desired",
            ImportMode::Required => "required",
        })
    }
}

/// A declared dependency on another module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub name: String,
    pub constraint: Option<Constraint>,
    pub mode: ImportMode,
}

impl Dependency {
    /// A required dependency with no version constraint
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            mode: ImportMode::Required,
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    /// Whether `version` satisfies this dependency's constraint
    ///
    /// An unversioned module only satisfies an unconstrained dependency.
    pub fn accepts(&self, version: Option<&Version>) -> bool {
        match (&self.constraint, version) {
            (None, _) | (Some(Constraint::Any), _) => true,
            (Some(c), Some(v)) => c.matches(v),
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(c) = &self.constraint {
            write!(f, " {}", c)?;
        }
        if self.mode != ImportMode::Required {
            write!(f, " ({})", self.mode)?;
        }
        Ok(())
    }
}

/// An opaque compiled unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    name: String,
    version: Option<Version>,
    classification: Classification,
    /// Sorted by name, at most one entry per name
    dependencies: Vec<Dependency>,
    /// For fingerprints: the strongest requirement recorded for this name
    requirement: Option<Dependency>,
    content: Vec<u8>,
}

impl Module {
    /// Create an empty primary module
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            classification: Classification::Primary,
            dependencies: Vec::new(),
            requirement: None,
            content: Vec::new(),
        }
    }

    /// Create the fingerprint placeholder for a dependency
    pub fn fingerprint(dep: &Dependency) -> Self {
        Self {
            name: dep.name.clone(),
            version: None,
            classification: Classification::Fingerprint,
            dependencies: Vec::new(),
            requirement: Some(dep.clone()),
            content: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.set_classification(classification);
        self
    }

    pub fn with_dependency(mut self, dep: Dependency) -> Self {
        self.add_dependency(dep);
        self
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn set_version(&mut self, version: Option<Version>) {
        self.version = version;
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn set_classification(&mut self, classification: Classification) {
        self.classification = classification;
    }

    pub fn is_fingerprint(&self) -> bool {
        self.classification == Classification::Fingerprint
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.dependency(name).is_some()
    }

    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies
            .binary_search_by(|d| d.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.dependencies[i])
    }

    /// Declare a dependency, replacing any earlier one with the same name
    pub fn add_dependency(&mut self, dep: Dependency) {
        match self
            .dependencies
            .binary_search_by(|d| d.name.as_str().cmp(&dep.name))
        {
            Ok(i) => self.dependencies[i] = dep,
            Err(i) => self.dependencies.insert(i, dep),
        }
    }

    /// Requirement recorded by a fingerprint
    pub fn requirement(&self) -> Option<&Dependency> {
        self.requirement.as_ref()
    }

    /// Fold another dependent's requirement into this fingerprint
    ///
    /// The stronger import mode wins; the first recorded constraint is kept.
    pub fn absorb_requirement(&mut self, dep: &Dependency) {
        match &mut self.requirement {
            Some(existing) => {
                existing.mode = existing.mode.max(dep.mode);
                if existing.constraint.is_none() {
                    existing.constraint = dep.constraint.clone();
                }
            }
            None => self.requirement = Some(dep.clone()),
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// SHA-256 of the encoded record, as lowercase hex
    pub fn digest(&self) -> String {
        let mut writer = ByteWriter::new();
        self.encode(&mut writer);
        hex::encode(Sha256::digest(writer.buffer()))
    }

    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.emit_string(&self.name);
        writer.emit_u8(self.classification.to_u8());
        encode_opt(writer, self.version.as_ref().map(|v| v.to_string()));

        match &self.requirement {
            Some(req) if self.is_fingerprint() => {
                writer.emit_u8(1);
                encode_dependency(writer, req);
            }
            _ => writer.emit_u8(0),
        }

        writer.emit_u32(self.dependencies.len() as u32);
        for dep in &self.dependencies {
            encode_dependency(writer, dep);
        }

        writer.emit_bytes(&self.content);
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let name = reader.read_string()?;
        validate_name(&name).map_err(|e| DecodeError::InvalidField {
            field: "module name",
            offset,
            reason: e.reason.to_string(),
        })?;

        let offset = reader.position();
        let tag = reader.read_u8()?;
        let classification = Classification::from_u8(tag).ok_or(DecodeError::InvalidTag {
            kind: "classification",
            tag,
            offset,
        })?;

        let offset = reader.position();
        let version = decode_opt(reader)?
            .map(|s| Version::parse(&s))
            .transpose()
            .map_err(|e| DecodeError::InvalidField {
                field: "version",
                offset,
                reason: e.to_string(),
            })?;

        let requirement = match reader.read_u8()? {
            0 => None,
            _ => Some(decode_dependency(reader)?),
        };

        let count = reader.read_u32()? as usize;
        let mut module = Module {
            name,
            version,
            classification,
            dependencies: Vec::with_capacity(count.min(1024)),
            requirement,
            content: Vec::new(),
        };
        for _ in 0..count {
            module.add_dependency(decode_dependency(reader)?);
        }
        module.content = reader.read_bytes()?;

        Ok(module)
    }
}

fn encode_opt(writer: &mut ByteWriter, value: Option<String>) {
    match value {
        Some(s) => {
            writer.emit_u8(1);
            writer.emit_string(&s);
        }
        None => writer.emit_u8(0),
    }
}

fn decode_opt(reader: &mut ByteReader<'_>) -> Result<Option<String>, DecodeError> {
    match reader.read_u8()? {
        0 => Ok(None),
        _ => Ok(Some(reader.read_string()?)),
    }
}

fn encode_dependency(writer: &mut ByteWriter, dep: &Dependency) {
    writer.emit_string(&dep.name);
    encode_opt(writer, dep.constraint.as_ref().map(|c| c.to_string()));
    writer.emit_u8(dep.mode.to_u8());
}

fn decode_dependency(reader: &mut ByteReader<'_>) -> Result<Dependency, DecodeError> {
    let offset = reader.position();
    let name = reader.read_string()?;
    validate_name(&name).map_err(|e| DecodeError::InvalidField {
        field: "dependency name",
        offset,
        reason: e.reason.to_string(),
    })?;

    let offset = reader.position();
    let constraint = decode_opt(reader)?
        .map(|s| Constraint::parse(&s))
        .transpose()
        .map_err(|e| DecodeError::InvalidField {
            field: "constraint",
            offset,
            reason: e.to_string(),
        })?;

    let offset = reader.position();
    let tag = reader.read_u8()?;
    let mode = ImportMode::from_u8(tag).ok_or(DecodeError::InvalidTag {
        kind: "import mode",
        tag,
        offset,
    })?;

    Ok(Dependency {
        name,
        constraint,
        mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(module: &Module) -> Module {
        let mut writer = ByteWriter::new();
        module.encode(&mut writer);
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        let decoded = Module::decode(&mut reader).unwrap();
        assert!(!reader.has_more());
        decoded
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("lib").is_ok());
        assert!(validate_name("lib.collections.map").is_ok());
        assert!(validate_name("my_app-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a..b").is_err());
        assert!(validate_name(".a").is_err());
        assert!(validate_name("1lib").is_err());
        assert!(validate_name("lib/x").is_err());
    }

    #[test]
    fn test_dependencies_are_a_set() {
        let module = Module::new("app")
            .with_dependency(Dependency::new("zeta"))
            .with_dependency(Dependency::new("alpha"))
            .with_dependency(Dependency::new("zeta").with_mode(ImportMode::Optional));

        let names: Vec<_> = module.dependencies().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(module.dependency("zeta").unwrap().mode, ImportMode::Optional);
        assert!(module.depends_on("alpha"));
        assert!(!module.depends_on("beta"));
    }

    #[test]
    fn test_record_roundtrip() {
        let module = Module::new("app.main")
            .with_version(Version::parse("1.2-beta").unwrap())
            .with_classification(Classification::Embedded)
            .with_dependency(
                Dependency::new("lib").with_constraint(Constraint::parse("^1.0").unwrap()),
            )
            .with_dependency(Dependency::new("extra").with_mode(ImportMode::Desired))
            .with_content(vec![0xCA, 0xFE]);

        assert_eq!(roundtrip(&module), module);
    }

    #[test]
    fn test_fingerprint_keeps_requirement() {
        let dep = Dependency::new("lib")
            .with_constraint(Constraint::parse(">=2").unwrap())
            .with_mode(ImportMode::Desired);
        let fp = Module::fingerprint(&dep);
        assert!(fp.is_fingerprint());
        assert!(fp.content().is_empty());

        let decoded = roundtrip(&fp);
        assert_eq!(decoded.requirement(), Some(&dep));
    }

    #[test]
    fn test_absorb_requirement() {
        let mut fp = Module::fingerprint(&Dependency::new("lib").with_mode(ImportMode::Optional));
        fp.absorb_requirement(
            &Dependency::new("lib").with_constraint(Constraint::parse("^1").unwrap()),
        );
        let req = fp.requirement().unwrap();
        assert_eq!(req.mode, ImportMode::Required);
        assert_eq!(req.constraint, Some(Constraint::parse("^1").unwrap()));
    }

    #[test]
    fn test_dependency_accepts() {
        let v1 = Version::parse("1.3").unwrap();
        assert!(Dependency::new("lib").accepts(None));
        let constrained = Dependency::new("lib").with_constraint(Constraint::parse(">=1.2").unwrap());
        assert!(constrained.accepts(Some(&v1)));
        assert!(!constrained.accepts(None));
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = Module::new("app").with_content(vec![1]);
        let b = Module::new("app").with_content(vec![2]);
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_decode_rejects_bad_classification() {
        let mut writer = ByteWriter::new();
        writer.emit_string("app");
        writer.emit_u8(9);
        let bytes = writer.into_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            Module::decode(&mut reader),
            Err(DecodeError::InvalidTag { tag: 9, .. })
        ));
    }
}
