//! Strata resolution driver
//!
//! Advances a set of compilation units through their build stages, re-running
//! each stage until every unit reports completion or a bounded pass budget is
//! used up. Dependency modules are resolved through a
//! [`strata_repo::RepositoryChain`] whose build cache also holds each unit's
//! reserved placeholder while it is being built.

#![warn(rust_2018_idioms)]

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod stage;
pub mod unit;

pub use config::{ConfigError, PipelineConfig, DEFAULT_MAX_TRIES};
pub use diagnostics::{
    CollectingSink, DeferredId, Diagnostic, DiagnosticSink, ErrorList, Severity, TracingSink,
};
pub use driver::{run_pipeline, InternalError, PipelineOutcome, PipelineReport, ResolutionDriver};
pub use stage::Stage;
pub use unit::{CompilationUnit, Frontend, PrebuiltFrontend, StageContext};
