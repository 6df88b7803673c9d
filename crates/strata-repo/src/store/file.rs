use super::{filter_version, ModuleStore, RepositoryError};
use crate::bundle::{write_atomic, Bundle};
use crate::module::{validate_name, Module};
use crate::version::Version;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

fn read_bundle(path: &Path) -> Result<Option<Bundle>, RepositoryError> {
    match fs::read(path) {
        Ok(bytes) => Bundle::decode(&bytes)
            .map(Some)
            .map_err(|e| RepositoryError::corrupt(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RepositoryError::io(path, e)),
    }
}

/// A read-only file holding one module or a bundle of modules
///
/// The file is parsed on first use and the parse is kept for the life of the
/// store. Fingerprints inside the bundle are not resolvable through it.
#[derive(Debug)]
pub struct BundleStore {
    path: PathBuf,
    bundle: OnceCell<Arc<Bundle>>,
}

impl BundleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bundle: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed bundle
    pub fn bundle(&self) -> Result<&Arc<Bundle>, RepositoryError> {
        self.bundle.get_or_try_init(|| {
            let bundle = read_bundle(&self.path)?.ok_or_else(|| RepositoryError::Unreadable {
                path: self.path.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "module file disappeared"),
            })?;
            debug!(
                path = %self.path.display(),
                primary = bundle.primary_name(),
                "loaded bundle"
            );
            Ok(Arc::new(bundle))
        })
    }
}

impl ModuleStore for BundleStore {
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError> {
        Ok(self.bundle()?.module_names().map(str::to_string).collect())
    }

    fn lookup(
        &self,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Module>, RepositoryError> {
        Ok(filter_version(self.bundle()?.get(name).cloned(), version))
    }

    fn store(&self, _module: &Module) -> Result<(), RepositoryError> {
        Err(RepositoryError::NotWritable(self.describe()))
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("bundle {}", self.path.display())
    }
}

/// A writable file holding exactly one module
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    current: Mutex<Option<Arc<Bundle>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<Arc<Bundle>>, RepositoryError> {
        let mut current = self.current.lock();
        if current.is_none() {
            *current = read_bundle(&self.path)?.map(Arc::new);
        }
        Ok(current.clone())
    }
}

impl ModuleStore for FileStore {
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError> {
        Ok(self
            .load()?
            .map(|b| b.primary_name().to_string())
            .into_iter()
            .collect())
    }

    fn lookup(
        &self,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Module>, RepositoryError> {
        let module = self
            .load()?
            .filter(|b| b.primary_name() == name)
            .map(|b| b.primary().clone());
        Ok(filter_version(module, version))
    }

    fn store(&self, module: &Module) -> Result<(), RepositoryError> {
        validate_name(module.name())?;
        if let Some(existing) = self.load()? {
            if existing.primary_name() != module.name() {
                return Err(RepositoryError::Occupied {
                    path: self.path.clone(),
                    existing: existing.primary_name().to_string(),
                    requested: module.name().to_string(),
                });
            }
        }

        let bundle = Bundle::single(module.clone());
        write_atomic(&self.path, &bundle.encode())
            .map_err(|e| RepositoryError::io(&self.path, e))?;
        *self.current.lock() = Some(Arc::new(bundle));
        debug!(module = module.name(), path = %self.path.display(), "stored module");
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::merge_bundle;
    use crate::module::{Classification, Dependency};
    use tempfile::TempDir;

    #[test]
    fn test_bundle_store_lookup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.xtc");
        merge_bundle(
            vec![
                Module::new("app").with_dependency(Dependency::new("ext")),
                Module::new("app.util"),
            ],
            None,
        )
        .unwrap()
        .write(&path)
        .unwrap();

        let store = BundleStore::new(&path);
        let names: Vec<_> = store.list_names().unwrap().into_iter().collect();
        assert_eq!(names, vec!["app", "app.util"]);

        let util = store.lookup("app.util", None).unwrap().unwrap();
        assert_eq!(util.classification(), Classification::Embedded);
        // fingerprints are placeholders, not modules
        assert!(store.lookup("ext", None).unwrap().is_none());
    }

    #[test]
    fn test_bundle_store_parsed_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.xtc");
        Bundle::new(Module::new("app")).unwrap().write(&path).unwrap();

        let store = BundleStore::new(&path);
        assert!(store.lookup("app", None).unwrap().is_some());
        fs::remove_file(&path).unwrap();
        assert!(store.lookup("app", None).unwrap().is_some());
    }

    #[test]
    fn test_bundle_store_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.xtc");
        fs::write(&path, b"STRM").unwrap();
        let store = BundleStore::new(&path);
        assert!(matches!(
            store.lookup("bad", None),
            Err(RepositoryError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("out.xtc"));
        assert!(store.lookup("app", None).unwrap().is_none());

        store.store(&Module::new("app").with_content(vec![9])).unwrap();
        assert_eq!(store.lookup("app", None).unwrap().unwrap().content(), &[9]);

        // a fresh store sees what was written
        let reopened = FileStore::new(dir.path().join("out.xtc"));
        assert_eq!(reopened.list_names().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_occupied() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("out.xtc"));
        store.store(&Module::new("app")).unwrap();
        store.store(&Module::new("app").with_content(vec![1])).unwrap();
        assert!(matches!(
            store.store(&Module::new("other")),
            Err(RepositoryError::Occupied { .. })
        ));
    }
}
