//! Bundles: one primary module plus embedded modules and fingerprints
//!
//! A bundle is also the on-disk unit. A single-module file is simply a bundle
//! whose only real module is its primary.
//!
//! File layout:
//! ```text
//! magic "STRM" | major u16 | minor u16 | flags u32 | crc32 u32   (16 bytes)
//! primary name | record count u32 | module records...
//! ```
//! The checksum covers everything after the header.

use crate::codec::{ByteReader, ByteWriter, DecodeError};
use crate::module::{validate_name, Classification, Module, NameError};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Magic number at the start of every module file
pub const MAGIC: [u8; 4] = *b"STRM";

/// Format major version; files with another major version are rejected
pub const FORMAT_MAJOR: u16 = 1;

/// Format minor version; files with a newer minor version are rejected
pub const FORMAT_MINOR: u16 = 0;

/// File extension for module files
pub const EXTENSION: &str = "xtc";

const HEADER_LEN: usize = 16;

/// Errors in the binary file format
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid magic number: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("Unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Primary module '{0}' is missing")]
    MissingPrimary(String),

    #[error("Module '{0}' appears more than once")]
    DuplicateModule(String),

    #[error("Module '{0}' is classified primary but is not the bundle's primary")]
    UnexpectedPrimary(String),

    #[error("{0} trailing bytes after last module")]
    TrailingBytes(usize),
}

/// Errors from merging and persisting bundles
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("No modules to bundle")]
    NoModules,

    #[error("Primary module '{0}' not found among the inputs")]
    PrimaryNotFound(String),

    #[error("Conflicting module name '{0}': more than one input provides it")]
    Conflict(String),

    #[error(transparent)]
    InvalidName(#[from] NameError),

    #[error("Invalid module file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Repository(#[from] crate::store::RepositoryError),
}

/// An in-memory bundle
///
/// Invariant: no name is present both in `modules` and in `fingerprints`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    primary: String,
    /// Primary and embedded modules
    modules: BTreeMap<String, Module>,
    fingerprints: BTreeMap<String, Module>,
}

impl Bundle {
    /// Start a bundle from its primary module
    ///
    /// The module is reclassified as primary and a fingerprint is recorded for
    /// each of its dependencies.
    pub fn new(primary: Module) -> Result<Self, BundleError> {
        validate_name(primary.name())?;
        Ok(Self::single(primary))
    }

    /// Bundle for a module whose name is already validated
    pub(crate) fn single(mut primary: Module) -> Self {
        primary.set_classification(Classification::Primary);

        let mut bundle = Self {
            primary: primary.name().to_string(),
            modules: BTreeMap::new(),
            fingerprints: BTreeMap::new(),
        };
        bundle.record_fingerprints(&primary);
        bundle.modules.insert(bundle.primary.clone(), primary);
        bundle
    }

    /// Merge one module into the bundle
    ///
    /// Real modules become embedded (an embedded input stays embedded) and
    /// must not collide with a name already present. Fingerprints are folded
    /// into any existing fingerprint of the same name.
    pub fn merge_module(&mut self, module: Module) -> Result<(), BundleError> {
        self.insert(module)?;
        self.reclassify();
        Ok(())
    }

    fn insert(&mut self, mut module: Module) -> Result<(), BundleError> {
        validate_name(module.name())?;

        if module.is_fingerprint() {
            match self.fingerprints.get_mut(module.name()) {
                Some(existing) => {
                    if let Some(req) = module.requirement() {
                        existing.absorb_requirement(req);
                    }
                }
                None => {
                    self.fingerprints.insert(module.name().to_string(), module);
                }
            }
            return Ok(());
        }

        if self.modules.contains_key(module.name()) {
            return Err(BundleError::Conflict(module.name().to_string()));
        }

        if module.classification() == Classification::Primary {
            module.set_classification(Classification::Embedded);
        }
        self.record_fingerprints(&module);
        debug!(module = module.name(), bundle = %self.primary, "embedding module");
        self.modules.insert(module.name().to_string(), module);
        Ok(())
    }

    fn record_fingerprints(&mut self, module: &Module) {
        for dep in module.dependencies() {
            if dep.name == module.name() || self.modules.contains_key(&dep.name) {
                continue;
            }
            self.fingerprints
                .entry(dep.name.clone())
                .and_modify(|fp| fp.absorb_requirement(dep))
                .or_insert_with(|| Module::fingerprint(dep));
        }
    }

    /// Drop every fingerprint whose name is now provided by a real module
    ///
    /// # Returns
    /// The number of fingerprints removed
    pub fn reclassify(&mut self) -> usize {
        let before = self.fingerprints.len();
        let modules = &self.modules;
        self.fingerprints.retain(|name, _| !modules.contains_key(name));
        before - self.fingerprints.len()
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    pub fn primary(&self) -> &Module {
        // the constructor and decoder both guarantee the primary entry
        &self.modules[&self.primary]
    }

    /// Look up a primary or embedded module; fingerprints are not returned
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn fingerprint(&self, name: &str) -> Option<&Module> {
        self.fingerprints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Names of the primary and embedded modules, sorted
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn embedded(&self) -> impl Iterator<Item = &Module> {
        self.modules
            .values()
            .filter(|m| m.classification() == Classification::Embedded)
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Module> {
        self.fingerprints.values()
    }

    /// Total number of records (modules and fingerprints)
    pub fn len(&self) -> usize {
        self.modules.len() + self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode the bundle into file bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(256);

        writer.emit_raw(&MAGIC);
        writer.emit_u16(FORMAT_MAJOR);
        writer.emit_u16(FORMAT_MINOR);
        writer.emit_u32(0);
        let checksum_offset = writer.reserve_u32();

        writer.emit_string(&self.primary);
        writer.emit_u32(self.len() as u32);

        // primary first, then the rest in name order
        self.primary().encode(&mut writer);
        for module in self.modules.values().filter(|m| m.name() != self.primary) {
            module.encode(&mut writer);
        }
        for fp in self.fingerprints.values() {
            fp.encode(&mut writer);
        }

        let checksum = crc32fast::hash(&writer.buffer()[HEADER_LEN..]);
        writer.patch_u32(checksum_offset, checksum);
        writer.into_bytes()
    }

    /// Decode file bytes into a bundle
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let mut reader = ByteReader::new(data);

        let magic: [u8; 4] = reader.read_raw()?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }

        let major = reader.read_u16()?;
        let minor = reader.read_u16()?;
        if major != FORMAT_MAJOR || minor > FORMAT_MINOR {
            return Err(FormatError::UnsupportedVersion { major, minor });
        }

        let _flags = reader.read_u32()?;
        let expected = reader.read_u32()?;
        let actual = crc32fast::hash(&data[HEADER_LEN..]);
        if expected != actual {
            return Err(FormatError::ChecksumMismatch { expected, actual });
        }

        let primary = reader.read_string()?;
        let count = reader.read_u32()? as usize;

        let mut modules = BTreeMap::new();
        let mut fingerprints = BTreeMap::new();
        for _ in 0..count {
            let module = Module::decode(&mut reader)?;
            let name = module.name().to_string();
            if modules.contains_key(&name) || fingerprints.contains_key(&name) {
                return Err(FormatError::DuplicateModule(name));
            }
            match module.classification() {
                Classification::Fingerprint => {
                    fingerprints.insert(name, module);
                }
                Classification::Primary if name != primary => {
                    return Err(FormatError::UnexpectedPrimary(name));
                }
                _ => {
                    modules.insert(name, module);
                }
            }
        }

        if reader.has_more() {
            return Err(FormatError::TrailingBytes(reader.remaining()));
        }

        match modules.get(&primary) {
            Some(m) if m.classification() == Classification::Primary => {}
            _ => return Err(FormatError::MissingPrimary(primary)),
        }

        Ok(Self {
            primary,
            modules,
            fingerprints,
        })
    }

    /// Write the bundle to `path` atomically
    pub fn write(&self, path: &Path) -> Result<(), BundleError> {
        write_atomic(path, &self.encode()).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), primary = %self.primary, "wrote bundle");
        Ok(())
    }

    /// Read a bundle from `path`
    pub fn read(path: &Path) -> Result<Self, BundleError> {
        let bytes = fs::read(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&bytes).map_err(|source| BundleError::Format {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Merge modules into a bundle
///
/// # Arguments
/// * `modules` - Inputs, in order
/// * `primary_name` - Name of the module to use as the primary; the first
///   input when `None`
///
/// # Returns
/// * `Ok(Bundle)` - The merged bundle with fingerprints reclassified
/// * `Err(BundleError::NoModules)` - `modules` is empty
/// * `Err(BundleError::PrimaryNotFound)` - No input has `primary_name`
/// * `Err(BundleError::Conflict)` - Two inputs share a name
pub fn merge_bundle(
    mut modules: Vec<Module>,
    primary_name: Option<&str>,
) -> Result<Bundle, BundleError> {
    if modules.is_empty() {
        return Err(BundleError::NoModules);
    }

    let index = match primary_name {
        Some(name) => modules
            .iter()
            .position(|m| m.name() == name && !m.is_fingerprint())
            .ok_or_else(|| BundleError::PrimaryNotFound(name.to_string()))?,
        None => 0,
    };
    let primary = modules.remove(index);

    let mut bundle = Bundle::new(primary)?;
    for module in modules {
        bundle.insert(module)?;
    }
    let removed = bundle.reclassify();
    debug!(
        primary = %bundle.primary,
        modules = bundle.modules.len(),
        fingerprints = bundle.fingerprints.len(),
        resolved = removed,
        "merged bundle"
    );

    Ok(bundle)
}

/// Write `bytes` to a temporary sibling of `path`, then rename into place
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
