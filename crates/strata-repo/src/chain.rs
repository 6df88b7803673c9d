//! Repository chains
//!
//! A chain resolves names by trying its entries in priority order. The head
//! is always an in-memory build cache; with read-through enabled, a module
//! found further down the chain is copied into the head before it is
//! returned, so the next lookup is answered by the cache.
//!
//! A malformed entry is a hard failure for that name: the error is returned
//! instead of falling through to lower-priority entries.

use crate::module::{Dependency, Module};
use crate::store::{MemoryStore, ModuleStore, RepositoryError, Store};
use crate::version::{Version, VersionSet};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// One entry below the head of a chain
#[derive(Debug, Clone)]
pub enum ChainEntry {
    Store(Store),
    Chain(RepositoryChain),
}

impl ChainEntry {
    fn as_store(&self) -> &dyn ModuleStore {
        match self {
            ChainEntry::Store(s) => s,
            ChainEntry::Chain(c) => c,
        }
    }
}

/// Ordered composition of stores with a build cache at its head
#[derive(Debug, Clone)]
pub struct RepositoryChain {
    head: Arc<MemoryStore>,
    entries: Vec<ChainEntry>,
    read_through: bool,
}

impl RepositoryChain {
    /// Create an empty chain over `head`
    pub fn new(head: Arc<MemoryStore>) -> Self {
        Self {
            head,
            entries: Vec::new(),
            read_through: true,
        }
    }

    pub fn with_read_through(mut self, read_through: bool) -> Self {
        self.read_through = read_through;
        self
    }

    pub fn push_store(&mut self, store: Store) {
        self.entries.push(ChainEntry::Store(store));
    }

    pub fn push_chain(&mut self, chain: RepositoryChain) {
        self.entries.push(ChainEntry::Chain(chain));
    }

    /// The writable head every build writes into
    pub fn build_cache(&self) -> &Arc<MemoryStore> {
        &self.head
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn read_through(&self) -> bool {
        self.read_through
    }

    /// Resolve a dependency, honoring its version constraint
    ///
    /// Returns `Ok(None)` when the name is absent or the module found does not
    /// satisfy the constraint.
    pub fn resolve(&self, dep: &Dependency) -> Result<Option<Module>, RepositoryError> {
        let found = self.lookup(&dep.name, None)?;
        Ok(found.filter(|m| dep.accepts(m.version())))
    }
}

impl ModuleStore for RepositoryChain {
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError> {
        let mut names = self.head.list_names()?;
        for entry in &self.entries {
            names.extend(entry.as_store().list_names()?);
        }
        Ok(names)
    }

    fn lookup(
        &self,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Module>, RepositoryError> {
        if let Some(module) = self.head.lookup(name, version)? {
            trace!(module = name, "served from build cache");
            return Ok(Some(module));
        }

        for (index, entry) in self.entries.iter().enumerate() {
            let store = entry.as_store();
            if let Some(module) = store.lookup(name, version)? {
                debug!(module = name, source = %store.describe(), entry = index + 1, "resolved");
                if self.read_through {
                    self.head.cache(&module)?;
                }
                return Ok(Some(module));
            }
        }

        trace!(module = name, "not found in chain");
        Ok(None)
    }

    fn store(&self, module: &Module) -> Result<(), RepositoryError> {
        self.head.store(module)
    }

    fn available_versions(&self, name: &str) -> Result<Option<VersionSet>, RepositoryError> {
        let mut result: Option<VersionSet> = self.head.available_versions(name)?;
        for entry in &self.entries {
            if let Some(versions) = entry.as_store().available_versions(name)? {
                result.get_or_insert_with(VersionSet::new).extend(versions);
            }
        }
        Ok(result)
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = std::iter::once(self.head.describe())
            .chain(self.entries.iter().map(|e| e.as_store().describe()))
            .collect();
        format!("chain [{}]", parts.join(", "))
    }
}

/// Build a chain from library paths with a fresh build cache at its head
///
/// # Arguments
/// * `paths` - Library paths in priority order; directories become directory
///   stores, files become bundle stores
///
/// # Returns
/// * `Ok(RepositoryChain)` - The chain; an empty `paths` yields just the head
/// * `Err(RepositoryError::Unreadable)` - A path does not exist
pub fn open_repository_chain<P: AsRef<Path>>(
    paths: &[P],
) -> Result<RepositoryChain, RepositoryError> {
    let mut chain = RepositoryChain::new(Arc::new(MemoryStore::new()));
    for path in paths {
        let store = Store::open(path.as_ref())?;
        debug!(store = %store, "added to module path");
        chain.push_store(store);
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DirStore;
    use crate::version::Constraint;
    use tempfile::TempDir;

    fn dir_with(modules: &[Module]) -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = DirStore::writable(dir.path());
        for m in modules {
            store.store(m).unwrap();
        }
        let store = Store::Directory(Arc::new(DirStore::new(dir.path())));
        (dir, store)
    }

    #[test]
    fn test_empty_chain_has_head() {
        let paths: [&Path; 0] = [];
        let chain = open_repository_chain(&paths).unwrap();
        assert!(chain.entries().is_empty());
        assert!(chain.lookup("anything", None).unwrap().is_none());
        chain.store(&Module::new("app")).unwrap();
        assert!(chain.build_cache().contains("app"));
    }

    #[test]
    fn test_read_through_disabled() {
        let (_dir, store) = dir_with(&[Module::new("lib")]);
        let mut chain = RepositoryChain::new(Arc::new(MemoryStore::new())).with_read_through(false);
        chain.push_store(store);

        assert!(chain.lookup("lib", None).unwrap().is_some());
        assert!(chain.build_cache().is_empty());
    }

    #[test]
    fn test_read_through_leaves_reservation() {
        let v1_0 = Version::parse("1.0").unwrap();
        let (_dir, store) = dir_with(&[Module::new("lib").with_version(v1_0.clone())]);
        let mut chain = RepositoryChain::new(Arc::new(MemoryStore::new()));
        chain.push_store(store);
        assert!(chain.build_cache().reserve(Module::new("lib")));

        // the unversioned placeholder does not match, so the lookup falls through
        let found = chain.lookup("lib", Some(&v1_0)).unwrap().unwrap();
        assert_eq!(found.version(), Some(&v1_0));
        assert!(chain.build_cache().is_reserved("lib"));
        assert_eq!(chain.build_cache().lookup("lib", None).unwrap().unwrap().version(), None);
    }

    #[test]
    fn test_nested_chain() {
        let (_dir, store) = dir_with(&[Module::new("deep")]);
        let mut inner = RepositoryChain::new(Arc::new(MemoryStore::new()));
        inner.push_store(store);

        let mut outer = RepositoryChain::new(Arc::new(MemoryStore::new()));
        outer.push_chain(inner.clone());

        assert!(outer.lookup("deep", None).unwrap().is_some());
        assert!(outer.build_cache().contains("deep"));
        assert!(inner.build_cache().contains("deep"));
        assert!(outer.list_names().unwrap().contains("deep"));
    }

    #[test]
    fn test_available_versions_union() {
        let (_d1, s1) = dir_with(&[Module::new("lib").with_version(Version::parse("1.0").unwrap())]);
        let (_d2, s2) = dir_with(&[Module::new("lib").with_version(Version::parse("2.0").unwrap())]);
        let mut chain = RepositoryChain::new(Arc::new(MemoryStore::new()));
        chain.push_store(s1);
        chain.push_store(s2);

        let versions = chain.available_versions("lib").unwrap().unwrap();
        assert_eq!(versions.len(), 2);
        assert!(chain.available_versions("none").unwrap().is_none());
    }

    #[test]
    fn test_resolve_checks_constraint() {
        let (_dir, store) =
            dir_with(&[Module::new("lib").with_version(Version::parse("1.4").unwrap())]);
        let mut chain = RepositoryChain::new(Arc::new(MemoryStore::new()));
        chain.push_store(store);

        let ok = Dependency::new("lib").with_constraint(Constraint::parse("^1.0").unwrap());
        let too_new = Dependency::new("lib").with_constraint(Constraint::parse(">=2").unwrap());
        assert!(chain.resolve(&ok).unwrap().is_some());
        assert!(chain.resolve(&too_new).unwrap().is_none());
    }
}
