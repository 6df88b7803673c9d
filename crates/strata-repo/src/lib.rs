//! Strata module repository
//!
//! This crate stores, retrieves, merges and cross-resolves compiled modules:
//! - `module`: the module model (names, classifications, dependencies)
//! - `version`: versions and dependency constraints
//! - `bundle`: bundles and the on-disk file format
//! - `store`: directory, file, bundle and in-memory stores
//! - `chain`: layered lookup with a build cache at the head
//! - `bundler`: merging module files into one bundle file

#![warn(rust_2018_idioms)]

pub mod bundle;
pub mod bundler;
pub mod chain;
pub mod codec;
pub mod module;
pub mod store;
pub mod version;

pub use bundle::{merge_bundle, Bundle, BundleError, FormatError, EXTENSION};
pub use bundler::{BundleReport, BundlerOptions};
pub use chain::{open_repository_chain, ChainEntry, RepositoryChain};
pub use module::{validate_name, Classification, Dependency, ImportMode, Module, NameError};
pub use store::{
    BundleStore, CacheStats, DirStore, FileStore, MemoryStore, ModuleStore, RepositoryError, Store,
};
pub use version::{Constraint, Version, VersionError, VersionSet};
