use super::{filter_version, ModuleStore, RepositoryError};
use crate::module::{validate_name, Module};
use crate::version::Version;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// Build cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached modules, reservations included
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups the cache could not answer
    pub misses: usize,
    /// Modules written into the cache
    pub writes: usize,
}

impl CacheStats {
    /// Get cache hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
enum Entry {
    /// Name claimed by a unit still being built
    Reserved(Module),
    Stored(Module),
}

impl Entry {
    fn module(&self) -> &Module {
        match self {
            Entry::Reserved(m) | Entry::Stored(m) => m,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: usize,
    misses: usize,
    writes: usize,
}

/// In-memory, writable store scoped to one build
///
/// Used as the head of every repository chain. Units reserve their names here
/// at namespace population so siblings can see each other's placeholder
/// while linking.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    counters: Mutex<Counters>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `placeholder.name()` for a unit under construction
    ///
    /// Returns `false` if the name is already reserved or stored.
    pub fn reserve(&self, placeholder: Module) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(placeholder.name()) {
            return false;
        }
        trace!(module = placeholder.name(), "reserved");
        entries.insert(placeholder.name().to_string(), Entry::Reserved(placeholder));
        true
    }

    /// Drop a reservation; stored modules are left untouched
    pub fn release(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        if matches!(entries.get(name), Some(Entry::Reserved(_))) {
            entries.remove(name);
            debug!(module = name, "released reservation");
            true
        } else {
            false
        }
    }

    /// Cache a module read from further down a chain
    ///
    /// A reserved name is left alone: only the reserving unit may replace its
    /// placeholder. Returns `false` if nothing was written.
    pub fn cache(&self, module: &Module) -> Result<bool, RepositoryError> {
        validate_name(module.name())?;
        let mut entries = self.entries.write();
        if let Some(Entry::Reserved(_)) = entries.get(module.name()) {
            trace!(module = module.name(), "reserved; not caching");
            return Ok(false);
        }
        entries.insert(module.name().to_string(), Entry::Stored(module.clone()));
        drop(entries);
        self.counters.lock().writes += 1;
        trace!(module = module.name(), "cached");
        Ok(true)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        matches!(self.entries.read().get(name), Some(Entry::Reserved(_)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = self.counters.lock();
        CacheStats {
            entries: self.len(),
            hits: counters.hits,
            misses: counters.misses,
            writes: counters.writes,
        }
    }

    /// Remove every entry and reset statistics
    pub fn clear(&self) {
        self.entries.write().clear();
        *self.counters.lock() = Counters::default();
    }
}

impl ModuleStore for MemoryStore {
    fn list_names(&self) -> Result<BTreeSet<String>, RepositoryError> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn lookup(
        &self,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Module>, RepositoryError> {
        let found = self.entries.read().get(name).map(|e| e.module().clone());
        let found = filter_version(found, version);

        let mut counters = self.counters.lock();
        if found.is_some() {
            counters.hits += 1;
        } else {
            counters.misses += 1;
        }
        Ok(found)
    }

    fn store(&self, module: &Module) -> Result<(), RepositoryError> {
        validate_name(module.name())?;
        self.entries
            .write()
            .insert(module.name().to_string(), Entry::Stored(module.clone()));
        self.counters.lock().writes += 1;
        trace!(module = module.name(), "cached");
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "build cache".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Classification;

    #[test]
    fn test_store_and_lookup() {
        let cache = MemoryStore::new();
        assert!(cache.lookup("app", None).unwrap().is_none());
        cache.store(&Module::new("app")).unwrap();
        assert!(cache.lookup("app", None).unwrap().is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reserve_and_release() {
        let cache = MemoryStore::new();
        let placeholder = Module::new("app").with_classification(Classification::Fingerprint);
        assert!(cache.reserve(placeholder.clone()));
        assert!(!cache.reserve(placeholder));
        assert!(cache.is_reserved("app"));
        assert!(cache.lookup("app", None).unwrap().is_some());

        assert!(cache.release("app"));
        assert!(!cache.contains("app"));
        assert!(cache.lookup("app", None).unwrap().is_none());
    }

    #[test]
    fn test_cache_keeps_reservation() {
        let cache = MemoryStore::new();
        assert!(cache.reserve(Module::new("lib")));

        let library = Module::new("lib").with_version(Version::parse("1.0").unwrap());
        assert!(!cache.cache(&library).unwrap());
        assert!(cache.is_reserved("lib"));
        assert_eq!(cache.lookup("lib", None).unwrap().unwrap().version(), None);

        assert!(cache.cache(&Module::new("other")).unwrap());
        assert!(cache.cache(&Module::new("other").with_content(vec![1])).unwrap());
        assert_eq!(cache.stats().writes, 2);
    }

    #[test]
    fn test_release_keeps_stored_module() {
        let cache = MemoryStore::new();
        cache.store(&Module::new("app")).unwrap();
        assert!(!cache.release("app"));
        assert!(cache.contains("app"));
        assert!(!cache.is_reserved("app"));
    }

    #[test]
    fn test_store_replaces_reservation() {
        let cache = MemoryStore::new();
        cache.reserve(Module::new("app"));
        cache.store(&Module::new("app").with_content(vec![3])).unwrap();
        assert!(!cache.is_reserved("app"));
        assert_eq!(cache.lookup("app", None).unwrap().unwrap().content(), &[3]);
    }

    #[test]
    fn test_empty_stats() {
        let stats = MemoryStore::new().stats();
        assert_eq!(stats, CacheStats::default());
        assert_eq!(stats.hit_ratio(), 0.0);
    }
}
