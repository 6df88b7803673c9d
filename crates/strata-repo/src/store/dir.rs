use super::{filter_version, ModuleStore, RepositoryError};
use crate::bundle::{write_atomic, Bundle, EXTENSION};
use crate::module::{validate_name, Module};
use crate::version::Version;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace};

/// Parsed file, valid while the file's modification time is unchanged
#[derive(Debug)]
struct CachedFile {
    mtime: Option<SystemTime>,
    bundle: Arc<Bundle>,
}

/// A directory of independent module files
///
/// Module `a.b.c` is looked for in `a.b.c.xtc` and then in `a.xtc`; a file is
/// accepted only when its primary module has the requested name.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    writable: bool,
    /// Name written files after the full module name instead of its first segment
    qualified_names: bool,
    cache: Mutex<FxHashMap<PathBuf, CachedFile>>,
}

impl DirStore {
    /// Open a read-only directory store
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writable: false,
            qualified_names: false,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Open a writable directory store
    pub fn writable(root: impl Into<PathBuf>) -> Self {
        Self {
            writable: true,
            ..Self::new(root)
        }
    }

    pub fn with_qualified_names(mut self, qualified: bool) -> Self {
        self.qualified_names = qualified;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a module would be written to
    pub fn file_for(&self, name: &str) -> PathBuf {
        let stem = if self.qualified_names {
            name
        } else {
            name.split('.').next().unwrap_or(name)
        };
        self.root.join(format!("{}.{}", stem, EXTENSION))
    }

    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.root.join(format!("{}.{}", name, EXTENSION))];
        if let Some((first, _)) = name.split_once('.') {
            paths.push(self.root.join(format!("{}.{}", first, EXTENSION)));
        }
        paths
    }

    /// Parse `path`, reusing the cached parse if the file is unchanged
    ///
    /// Returns `Ok(None)` if the file does not exist.
    fn load(&self, path: &Path) -> Result<Option<Arc<Bundle>>, RepositoryError> {
        let metadata = match fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(RepositoryError::io(path, e)),
        };
        let mtime = metadata.modified().ok();

        if let Some(cached) = self.cache.lock().get(path) {
            if mtime.is_some() && cached.mtime == mtime {
                trace!(path = %path.display(), "parse cache hit");
                return Ok(Some(Arc::clone(&cached.bundle)));
            }
        }

        let bytes = fs::read(path).map_err(|e| RepositoryError::io(path, e))?;
        let bundle =
            Arc::new(Bundle::decode(&bytes).map_err(|e| RepositoryError::corrupt(path, e))?);
        debug!(path = %path.display(), primary = bundle.primary_name(), "parsed module file");

        self.cache.lock().insert(
            path.to_path_buf(),
            CachedFile {
                mtime,
                bundle: Arc::clone(&bundle),
            },
        );
        Ok(Some(bundle))
    }

    /// Pick the file `name` is written to
    ///
    /// The first-segment file is preferred, but a file already holding a
    /// different module is never overwritten: the module then goes to its
    /// fully qualified file, which lookups try first.
    fn target_for(&self, name: &str) -> Result<PathBuf, RepositoryError> {
        let preferred = self.file_for(name);
        let qualified = self.root.join(format!("{}.{}", name, EXTENSION));
        let holder = |path: &Path| -> Result<Option<String>, RepositoryError> {
            Ok(self.load(path)?.map(|b| b.primary_name().to_string()))
        };

        let qualified_holder = if qualified != preferred {
            holder(&qualified)?
        } else {
            None
        };
        if qualified_holder.as_deref() == Some(name) {
            return Ok(qualified);
        }

        match holder(&preferred)? {
            None => Ok(preferred),
            Some(existing) if existing == name => Ok(preferred),
            Some(existing) => match qualified_holder {
                _ if qualified == preferred => Err(RepositoryError::Occupied {
                    path: preferred,
                    existing,
                    requested: name.to_string(),
                }),
                None => {
                    debug!(module = name, occupied_by = %existing, "using qualified file name");
                    Ok(qualified)
                }
                Some(other) => Err(RepositoryError::Occupied {
                    path: qualified,
                    existing: other,
                    requested: name.to_string(),
                }),
            },
        }
    }

    fn module_files(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        let entries = fs::read_dir(&self.root).map_err(|e| RepositoryError::io(&self.root, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| RepositoryError::io(&self.root, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl ModuleStore for DirStore {
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError> {
        let mut names = BTreeSet::new();
        for path in self.module_files()? {
            if let Some(bundle) = self.load(&path)? {
                names.insert(bundle.primary_name().to_string());
            }
        }
        Ok(names)
    }

    fn lookup(
        &self,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Module>, RepositoryError> {
        for path in self.candidates(name) {
            if let Some(bundle) = self.load(&path)? {
                if bundle.primary_name() == name {
                    return Ok(filter_version(Some(bundle.primary().clone()), version));
                }
            }
        }
        Ok(None)
    }

    fn store(&self, module: &Module) -> Result<(), RepositoryError> {
        if !self.writable {
            return Err(RepositoryError::NotWritable(self.describe()));
        }
        validate_name(module.name())?;

        let path = self.target_for(module.name())?;
        let bundle = Bundle::single(module.clone());
        write_atomic(&path, &bundle.encode()).map_err(|e| RepositoryError::io(&path, e))?;

        let mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        self.cache.lock().insert(
            path.clone(),
            CachedFile {
                mtime,
                bundle: Arc::new(bundle),
            },
        );
        debug!(module = module.name(), path = %path.display(), "stored module");
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}
