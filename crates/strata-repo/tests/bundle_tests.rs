//! Bundle merge properties and the bundler end to end

use strata_repo::bundler::{self, BundlerOptions};
use strata_repo::{
    merge_bundle, Bundle, BundleError, Classification, Constraint, Dependency, ImportMode, Module,
    Version,
};
use tempfile::TempDir;

fn module(name: &str, deps: &[&str]) -> Module {
    deps.iter()
        .fold(Module::new(name), |m, d| m.with_dependency(Dependency::new(*d)))
}

#[test]
fn test_merge_preserves_identity() {
    let a = module("a", &[]);
    let b = module("b", &["a"]);
    let c = module("c", &[]);

    let bundle = merge_bundle(vec![a, b, c], Some("b")).unwrap();
    assert_eq!(bundle.primary_name(), "b");
    assert_eq!(bundle.primary().classification(), Classification::Primary);

    let names: Vec<_> = bundle.module_names().collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    for name in ["a", "c"] {
        assert_eq!(bundle.get(name).unwrap().classification(), Classification::Embedded);
    }
    assert_eq!(bundle.fingerprints().count(), 0);
}

#[test]
fn test_merge_defaults_to_first_input() {
    let bundle = merge_bundle(vec![module("x", &[]), module("y", &[])], None).unwrap();
    assert_eq!(bundle.primary_name(), "x");
}

#[test]
fn test_merge_empty() {
    assert!(matches!(merge_bundle(vec![], None), Err(BundleError::NoModules)));
}

#[test]
fn test_merge_primary_not_found() {
    let err = merge_bundle(vec![module("x", &[])], Some("y")).unwrap_err();
    assert!(matches!(err, BundleError::PrimaryNotFound(name) if name == "y"));
}

#[test]
fn test_merge_conflict() {
    let err = merge_bundle(vec![module("x", &[]), module("dup", &[]), module("dup", &[])], None)
        .unwrap_err();
    assert!(matches!(err, BundleError::Conflict(name) if name == "dup"));
}

#[test]
fn test_merge_resolves_lib_fingerprint() {
    let a = module("a", &["lib"]);
    let lib = module("lib", &[]);
    let bundle = merge_bundle(vec![a, lib], None).unwrap();
    assert_eq!(bundle.fingerprints().count(), 0);
    assert!(bundle.fingerprint("lib").is_none());
}

#[test]
fn test_merge_keeps_unsatisfied_fingerprint() {
    let bundle = merge_bundle(
        vec![Module::new("app").with_dependency(
            Dependency::new("ext")
                .with_constraint(Constraint::parse(">=2.0").unwrap())
                .with_mode(ImportMode::Desired),
        )],
        None,
    )
    .unwrap();

    let fp = bundle.fingerprint("ext").unwrap();
    assert!(fp.is_fingerprint());
    let req = fp.requirement().unwrap();
    assert_eq!(req.mode, ImportMode::Desired);
    assert_eq!(req.constraint, Some(Constraint::parse(">=2.0").unwrap()));
    // fingerprints are not modules of the bundle
    assert!(bundle.get("ext").is_none());
}

#[test]
fn test_embedded_input_stays_embedded() {
    let embedded = Module::new("helper").with_classification(Classification::Embedded);
    let bundle = merge_bundle(vec![module("app", &["helper"]), embedded], None).unwrap();
    assert_eq!(bundle.get("helper").unwrap().classification(), Classification::Embedded);
}

#[test]
fn test_write_read_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app.xtc");
    let bundle = merge_bundle(
        vec![
            module("app", &["lib", "missing"]).with_version(Version::parse("1.0").unwrap()),
            module("lib", &["app"]).with_content(vec![7; 32]),
        ],
        None,
    )
    .unwrap();

    bundle.write(&path).unwrap();
    let read = Bundle::read(&path).unwrap();
    assert_eq!(read, bundle);
    assert_eq!(read.primary().digest(), bundle.primary().digest());
}

#[test]
fn test_read_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.xtc");
    std::fs::write(&path, b"not a module").unwrap();
    assert!(matches!(Bundle::read(&path), Err(BundleError::Format { .. })));
}

#[test]
fn test_bundler_end_to_end() {
    let dir = TempDir::new().unwrap();
    let app_path = dir.path().join("app.xtc");
    let lib_path = dir.path().join("lib.xtc");
    let out_path = dir.path().join("out").join("app-bundle.xtc");

    Bundle::new(module("app", &["lib", "ext"])).unwrap().write(&app_path).unwrap();
    Bundle::new(module("lib", &[])).unwrap().write(&lib_path).unwrap();

    // ext is available on the module path
    let libs = TempDir::new().unwrap();
    Bundle::new(module("ext", &[]))
        .unwrap()
        .write(&libs.path().join("ext.xtc"))
        .unwrap();

    let report = bundler::run(&BundlerOptions {
        inputs: vec![app_path, lib_path],
        output: out_path.clone(),
        primary: None,
        module_path: vec![libs.path().to_path_buf()],
    })
    .unwrap();

    assert!(report.unresolved.is_empty());
    let written = Bundle::read(&out_path).unwrap();
    assert_eq!(written.primary_name(), "app");
    assert!(written.get("lib").is_some());
    assert!(written.fingerprint("ext").is_some());
    assert!(written.fingerprint("lib").is_none());
}

#[test]
fn test_bundler_reports_unresolved_fingerprints() {
    let dir = TempDir::new().unwrap();
    let app_path = dir.path().join("app.xtc");
    Bundle::new(module("app", &["nowhere"])).unwrap().write(&app_path).unwrap();

    let report = bundler::run(&BundlerOptions {
        inputs: vec![app_path],
        output: dir.path().join("bundle.xtc"),
        primary: Some("app".to_string()),
        module_path: vec![],
    })
    .unwrap();

    let names: Vec<_> = report.unresolved.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["nowhere"]);
    assert!(report.output.exists());
}

#[test]
fn test_bundler_conflict_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("one.xtc");
    let second = dir.path().join("two.xtc");
    Bundle::new(module("same", &[])).unwrap().write(&first).unwrap();
    Bundle::new(module("same", &[])).unwrap().write(&second).unwrap();

    let output = dir.path().join("bundle.xtc");
    let err = bundler::run(&BundlerOptions {
        inputs: vec![first, second],
        output: output.clone(),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, BundleError::Conflict(_)));
    assert!(!output.exists());
}
