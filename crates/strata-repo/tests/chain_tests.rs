//! Repository chain behavior over real stores on disk

use std::fs;
use std::sync::Arc;

use strata_repo::{
    open_repository_chain, Bundle, DirStore, MemoryStore, Module, ModuleStore, RepositoryChain,
    RepositoryError, Store,
};
use tempfile::TempDir;

fn write_module(dir: &TempDir, module: Module) {
    DirStore::writable(dir.path()).store(&module).unwrap();
}

#[test]
fn test_first_entry_wins() {
    let s2 = TempDir::new().unwrap();
    let s3 = TempDir::new().unwrap();
    let s4 = TempDir::new().unwrap();
    write_module(&s2, Module::new("shared").with_content(b"from-s2".to_vec()));
    write_module(&s3, Module::new("other"));
    write_module(&s4, Module::new("shared").with_content(b"from-s4".to_vec()));

    let chain = open_repository_chain(&[s2.path(), s3.path(), s4.path()]).unwrap();
    let found = chain.lookup("shared", None).unwrap().unwrap();
    assert_eq!(found.content(), b"from-s2");
}

#[test]
fn test_read_through_serves_second_lookup_from_cache() {
    let lib = TempDir::new().unwrap();
    write_module(&lib, Module::new("lib").with_content(vec![1, 2, 3]));

    let chain = open_repository_chain(&[lib.path()]).unwrap();
    let first = chain.lookup("lib", None).unwrap().unwrap();
    assert!(chain.build_cache().contains("lib"));
    let hits_before = chain.build_cache().stats().hits;

    // once cached, the backing file is no longer consulted
    fs::remove_file(lib.path().join("lib.xtc")).unwrap();
    let second = chain.lookup("lib", None).unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.digest(), second.digest());
    assert_eq!(chain.build_cache().stats().hits, hits_before + 1);
}

#[test]
fn test_pkg_lookup_caches_into_build_cache() {
    let lib = TempDir::new().unwrap();
    Bundle::new(Module::new("pkg"))
        .unwrap()
        .write(&lib.path().join("pkg.xtc"))
        .unwrap();

    let cache = Arc::new(MemoryStore::new());
    let mut chain = RepositoryChain::new(Arc::clone(&cache));
    chain.push_store(Store::open(lib.path()).unwrap());

    assert!(cache.lookup("pkg", None).unwrap().is_none());
    let pkg = chain.lookup("pkg", None).unwrap().unwrap();
    assert_eq!(pkg.name(), "pkg");
    assert!(cache.contains("pkg"));
    assert_eq!(cache.stats().writes, 1);
}

#[test]
fn test_corrupt_entry_does_not_fall_through() {
    let broken = TempDir::new().unwrap();
    let good = TempDir::new().unwrap();
    fs::write(broken.path().join("lib.xtc"), b"STRM\x01\x00\x00\x00garbage").unwrap();
    write_module(&good, Module::new("lib"));

    let chain = open_repository_chain(&[broken.path(), good.path()]).unwrap();
    let err = chain.lookup("lib", None).unwrap_err();
    assert!(matches!(err, RepositoryError::Corrupt { .. }));
    assert!(!chain.build_cache().contains("lib"));
}

#[test]
fn test_missing_is_absent_not_error() {
    let lib = TempDir::new().unwrap();
    let chain = open_repository_chain(&[lib.path()]).unwrap();
    assert!(chain.lookup("nothing.here", None).unwrap().is_none());
    assert!(chain.available_versions("nothing.here").unwrap().is_none());
}

#[test]
fn test_unreadable_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does-not-exist");
    assert!(matches!(
        open_repository_chain(&[missing]),
        Err(RepositoryError::Unreadable { .. })
    ));
}

#[test]
fn test_list_names_is_union() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write_module(&a, Module::new("alpha"));
    write_module(&b, Module::new("beta"));
    write_module(&b, Module::new("alpha"));

    let chain = open_repository_chain(&[a.path(), b.path()]).unwrap();
    chain.store(&Module::new("gamma")).unwrap();

    let names: Vec<_> = chain.list_names().unwrap().into_iter().collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_library_file_entry() {
    let dir = TempDir::new().unwrap();
    Bundle::new(Module::new("single"))
        .unwrap()
        .write(&dir.path().join("single.xtc"))
        .unwrap();

    // `.x` and bare paths map onto the `.xtc` file
    let chain = open_repository_chain(&[dir.path().join("single.x")]).unwrap();
    assert!(chain.lookup("single", None).unwrap().is_some());
    let chain = open_repository_chain(&[dir.path().join("single")]).unwrap();
    assert!(chain.lookup("single", None).unwrap().is_some());
}

#[test]
fn test_head_write_does_not_touch_entries() {
    let lib = TempDir::new().unwrap();
    let chain = open_repository_chain(&[lib.path()]).unwrap();
    chain.store(&Module::new("built")).unwrap();
    assert!(fs::read_dir(lib.path()).unwrap().next().is_none());
    assert!(chain.lookup("built", None).unwrap().is_some());
}
