//! Module stores
//!
//! A store persists modules over a single location. The kinds form a closed
//! set, [`Store`], which dispatches to the [`ModuleStore`] capability of each
//! kind:
//!
//! - [`DirStore`]: a directory of independent `.xtc` files
//! - [`FileStore`]: one writable single-module file
//! - [`BundleStore`]: one read-only file holding a module or a bundle
//! - [`MemoryStore`]: the in-memory build cache

mod dir;
mod file;
mod memory;

pub use dir::DirStore;
pub use file::{BundleStore, FileStore};
pub use memory::{CacheStats, MemoryStore};

use crate::bundle::{FormatError, EXTENSION};
use crate::module::{Module, NameError};
use crate::version::{Version, VersionSet};
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors from stores and repository chains
///
/// "Not found" is never an error; lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A library path that does not exist or cannot be opened
    #[error("Unreadable module path {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed module file
    #[error("Corrupt module file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: FormatError,
    },

    #[error("Store {0} is not writable")]
    NotWritable(String),

    /// A single-module file already holds a different module
    #[error("{path} already holds module '{existing}', cannot store '{requested}'")]
    Occupied {
        path: PathBuf,
        existing: String,
        requested: String,
    },

    #[error(transparent)]
    InvalidName(#[from] NameError),
}

impl RepositoryError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, source: FormatError) -> Self {
        RepositoryError::Corrupt {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Capability shared by every store kind and by repository chains
pub trait ModuleStore {
    /// Names of all modules this store can supply
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError>;

    /// Load a module by name
    ///
    /// With `version`, only a module carrying exactly that version matches.
    fn lookup(&self, name: &str, version: Option<&Version>)
        -> Result<Option<Module>, RepositoryError>;

    /// Persist a module under its own name
    ///
    /// Fails with [`RepositoryError::NotWritable`] on read-only stores. A
    /// failed write leaves no partial module visible.
    fn store(&self, module: &Module) -> Result<(), RepositoryError>;

    /// Versions available for `name`
    ///
    /// `None` exactly when the name does not resolve; otherwise possibly empty.
    fn available_versions(&self, name: &str) -> Result<Option<VersionSet>, RepositoryError> {
        Ok(self.lookup(name, None)?.map(|m| m.version().cloned().into_iter().collect()))
    }

    fn is_writable(&self) -> bool;

    /// Human-readable description for diagnostics
    fn describe(&self) -> String;
}

/// Keep a looked-up module only if it matches the requested version
pub(crate) fn filter_version(module: Option<Module>, version: Option<&Version>) -> Option<Module> {
    match version {
        Some(v) => module.filter(|m| m.version() == Some(v)),
        None => module,
    }
}

/// One concrete store
#[derive(Debug, Clone)]
pub enum Store {
    Directory(Arc<DirStore>),
    File(Arc<FileStore>),
    Bundle(Arc<BundleStore>),
    Memory(Arc<MemoryStore>),
}

impl Store {
    /// Open a library path read-only
    ///
    /// A path ending in `.x` is mapped to `.xtc`, and a missing path without
    /// an extension gets `.xtc` appended. Directories become directory
    /// stores; files become bundle stores.
    ///
    /// # Returns
    /// * `Ok(Store)` - The opened store
    /// * `Err(RepositoryError::Unreadable)` - The path does not exist
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let path = normalize_library_path(path);
        let metadata = std::fs::metadata(&path).map_err(|source| RepositoryError::Unreadable {
            path: path.clone(),
            source,
        })?;

        if metadata.is_dir() {
            Ok(Store::Directory(Arc::new(DirStore::new(path))))
        } else {
            Ok(Store::Bundle(Arc::new(BundleStore::new(path))))
        }
    }

    /// Open a path as a writable result store
    ///
    /// An existing directory (or a path ending in a separator) becomes a
    /// writable directory store; anything else is a single-module file.
    pub fn open_writable(path: &Path) -> Result<Self, RepositoryError> {
        let looks_like_dir = path.as_os_str().to_string_lossy().ends_with(std::path::MAIN_SEPARATOR);
        if path.is_dir() || looks_like_dir {
            std::fs::create_dir_all(path).map_err(|e| RepositoryError::io(path, e))?;
            return Ok(Store::Directory(Arc::new(DirStore::writable(path))));
        }
        Ok(Store::File(Arc::new(FileStore::new(normalize_library_path(path)))))
    }

    fn inner(&self) -> &dyn ModuleStore {
        match self {
            Store::Directory(s) => s.as_ref(),
            Store::File(s) => s.as_ref(),
            Store::Bundle(s) => s.as_ref(),
            Store::Memory(s) => s.as_ref(),
        }
    }
}

impl ModuleStore for Store {
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError> {
        self.inner().list_names()
    }

    fn lookup(
        &self,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Module>, RepositoryError> {
        self.inner().lookup(name, version)
    }

    fn store(&self, module: &Module) -> Result<(), RepositoryError> {
        self.inner().store(module)
    }

    fn available_versions(&self, name: &str) -> Result<Option<VersionSet>, RepositoryError> {
        self.inner().available_versions(name)
    }

    fn is_writable(&self) -> bool {
        self.inner().is_writable()
    }

    fn describe(&self) -> String {
        self.inner().describe()
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Apply the `.x` to `.xtc` and missing-extension conventions to a path
pub fn normalize_library_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("x") => path.with_extension(EXTENSION),
        None if !path.exists() => {
            let mut name = path.as_os_str().to_os_string();
            name.push(".");
            name.push(EXTENSION);
            PathBuf::from(name)
        }
        _ => path.to_path_buf(),
    }
}
