//! Merging independently compiled module files into one bundle file

use crate::bundle::{merge_bundle, Bundle, BundleError};
use crate::chain::{open_repository_chain, ChainEntry, RepositoryChain};
use crate::module::{Dependency, Module};
use crate::store::{ModuleStore, Store};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Bundler options
#[derive(Debug, Clone, Default)]
pub struct BundlerOptions {
    /// Module files to merge, in order
    pub inputs: Vec<PathBuf>,
    /// Where to write the bundle
    pub output: PathBuf,
    /// Primary module name; defaults to the first input's primary
    pub primary: Option<String>,
    /// Library paths used to check that fingerprints can be resolved
    pub module_path: Vec<PathBuf>,
}

/// Result of a bundler run
#[derive(Debug)]
pub struct BundleReport {
    pub bundle: Bundle,
    pub output: PathBuf,
    /// Fingerprints no module path entry can satisfy
    pub unresolved: Vec<Dependency>,
}

/// Load every real module of one input, primary first
fn input_modules(entry: &ChainEntry) -> Result<Vec<Module>, BundleError> {
    if let ChainEntry::Store(Store::Bundle(store)) = entry {
        let bundle = store.bundle()?;
        let mut modules = vec![bundle.primary().clone()];
        modules.extend(bundle.embedded().cloned());
        return Ok(modules);
    }

    let store: &dyn ModuleStore = match entry {
        ChainEntry::Store(s) => s,
        ChainEntry::Chain(c) => c,
    };
    let mut modules = Vec::new();
    for name in store.list_names()? {
        if let Some(module) = store.lookup(&name, None)? {
            modules.push(module);
        }
    }
    Ok(modules)
}

/// Fingerprints of `bundle` that `chain` cannot satisfy
fn unresolved_fingerprints(
    bundle: &Bundle,
    chain: &RepositoryChain,
) -> Result<Vec<Dependency>, BundleError> {
    let mut unresolved = Vec::new();
    for fp in bundle.fingerprints() {
        let dep = fp
            .requirement()
            .cloned()
            .unwrap_or_else(|| Dependency::new(fp.name()));
        if chain.resolve(&dep)?.is_none() {
            warn!(module = %dep, bundle = bundle.primary_name(), "unresolved fingerprint");
            unresolved.push(dep);
        }
    }
    Ok(unresolved)
}

/// Merge the inputs and write the bundle
pub fn run(options: &BundlerOptions) -> Result<BundleReport, BundleError> {
    if options.inputs.is_empty() {
        return Err(BundleError::NoModules);
    }

    let inputs = open_repository_chain(&options.inputs)?.with_read_through(false);
    let mut modules = Vec::new();
    for entry in inputs.entries() {
        let loaded = input_modules(entry)?;
        debug!(count = loaded.len(), "loaded input");
        modules.extend(loaded);
    }

    let bundle = merge_bundle(modules, options.primary.as_deref())?;

    let module_path = open_repository_chain(&options.module_path)?;
    let unresolved = unresolved_fingerprints(&bundle, &module_path)?;

    bundle.write(&options.output)?;
    info!(
        output = %options.output.display(),
        primary = bundle.primary_name(),
        modules = bundle.module_names().count(),
        fingerprints = bundle.fingerprints().count(),
        "bundle written"
    );

    Ok(BundleReport {
        bundle,
        output: options.output.clone(),
        unresolved,
    })
}
