//! Compilation units and the front-end seam
//!
//! The driver decides *when* each stage runs; a [`Frontend`] decides what a
//! stage does for one module. Stage methods return `true` once the stage is
//! complete for that unit, or `false` to be called again on the next pass.

use crate::diagnostics::{ErrorList, Severity};
use crate::stage::Stage;
use strata_repo::{Module, RepositoryChain};
use tracing::trace;

/// What a front-end sees while running a stage
pub struct StageContext<'a> {
    /// Active repository chain, build cache at its head
    pub chain: &'a RepositoryChain,
    /// Set on the final pass of a fixed-point loop
    pub last_try: bool,
    pub diagnostics: &'a mut ErrorList,
}

/// Per-module stage implementations
pub trait Frontend {
    /// Name of the module this unit produces
    fn module_name(&self) -> &str;

    /// Whether a previously emitted module is still current
    fn is_up_to_date(&self) -> bool {
        false
    }

    /// Create the initial module structure
    ///
    /// The returned module is reserved in the build cache under its name and
    /// its declared dependencies are resolved during linking.
    fn populate_namespace(&mut self, cx: &mut StageContext<'_>) -> Module;

    /// Bind resolved dependency modules
    fn link(&mut self, _cx: &mut StageContext<'_>, _dependencies: &[Module]) -> bool {
        true
    }

    fn resolve_names(&mut self, cx: &mut StageContext<'_>) -> bool;

    fn validate_expressions(&mut self, cx: &mut StageContext<'_>) -> bool;

    fn generate_code(&mut self, cx: &mut StageContext<'_>) -> bool;

    /// Report front-end-held deferred work as errors
    fn flush_deferred(&mut self, _diagnostics: &mut ErrorList) {}

    /// Produce the finished module
    fn emit(&mut self, cx: &mut StageContext<'_>) -> Module;
}

/// One module's in-progress build state
pub struct CompilationUnit {
    name: String,
    frontend: Box<dyn Frontend>,
    stage: Stage,
    diagnostics: ErrorList,
    /// Reserved placeholder, then the finished module
    module: Option<Module>,
    dependencies: Vec<Module>,
    reserved: bool,
    skipped: bool,
}

impl CompilationUnit {
    pub fn new(frontend: Box<dyn Frontend>) -> Self {
        let name = frontend.module_name().to_string();
        Self {
            diagnostics: ErrorList::for_unit(name.clone()),
            name,
            frontend,
            stage: Stage::Initial,
            module: None,
            dependencies: Vec::new(),
            reserved: false,
            skipped: false,
        }
    }

    pub fn from_frontend(frontend: impl Frontend + 'static) -> Self {
        Self::new(Box::new(frontend))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Still taking part in the build
    pub fn is_live(&self) -> bool {
        !self.skipped && !self.stage.is_terminal()
    }

    /// Left out of the build because it is up to date
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub(crate) fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn diagnostics(&self) -> &ErrorList {
        &self.diagnostics
    }

    pub(crate) fn diagnostics_mut(&mut self) -> &mut ErrorList {
        &mut self.diagnostics
    }

    /// The placeholder module, or the emitted module once finished
    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    pub fn dependencies(&self) -> &[Module] {
        &self.dependencies
    }

    pub fn is_up_to_date(&self) -> bool {
        self.frontend.is_up_to_date()
    }

    pub(crate) fn is_reserved(&self) -> bool {
        self.reserved
    }

    pub(crate) fn set_reserved(&mut self, reserved: bool) {
        self.reserved = reserved;
    }

    pub(crate) fn set_dependencies(&mut self, dependencies: Vec<Module>) {
        self.dependencies = dependencies;
    }

    /// Whether the unit's errors have reached `severity`
    pub fn abort_requested(&self, severity: Severity) -> bool {
        self.diagnostics.has_reached(severity)
    }

    pub(crate) fn abort(&mut self) {
        trace!(unit = %self.name, from = %self.stage, "unit aborted");
        self.stage = Stage::Aborted;
    }

    pub(crate) fn populate_namespace(&mut self, chain: &RepositoryChain) -> Module {
        let mut cx = StageContext {
            chain,
            last_try: true,
            diagnostics: &mut self.diagnostics,
        };
        let module = self.frontend.populate_namespace(&mut cx);
        self.module = Some(module.clone());
        self.stage = Stage::NamespacePopulated;
        module
    }

    /// Run one pass of an iterative stage
    ///
    /// A unit already past `stage` reports done without running it again.
    pub(crate) fn advance(&mut self, stage: Stage, chain: &RepositoryChain, last_try: bool) -> bool {
        if self.stage >= stage {
            return true;
        }

        let mut cx = StageContext {
            chain,
            last_try,
            diagnostics: &mut self.diagnostics,
        };
        let done = match stage {
            Stage::Linked => self.frontend.link(&mut cx, &self.dependencies),
            Stage::NamesResolved => self.frontend.resolve_names(&mut cx),
            Stage::ExpressionsValidated => self.frontend.validate_expressions(&mut cx),
            Stage::CodeGenerated => self.frontend.generate_code(&mut cx),
            _ => true,
        };

        if done {
            self.stage = stage;
        }
        done
    }

    pub(crate) fn flush_deferred_as_errors(&mut self) -> usize {
        self.frontend.flush_deferred(&mut self.diagnostics);
        self.diagnostics.flush_deferred()
    }

    pub(crate) fn emit(&mut self, chain: &RepositoryChain) -> Module {
        let mut cx = StageContext {
            chain,
            last_try: true,
            diagnostics: &mut self.diagnostics,
        };
        self.frontend.emit(&mut cx)
    }

    pub(crate) fn finish(&mut self, module: Module) {
        self.module = Some(module);
        self.stage = Stage::Emitted;
    }
}

impl std::fmt::Debug for CompilationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationUnit")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("worst", &self.diagnostics.worst())
            .finish()
    }
}

/// Front-end for a module that is already compiled
///
/// Every stage completes immediately. Running such units through the driver
/// checks that their dependencies resolve and stamps and stores the result.
#[derive(Debug, Clone)]
pub struct PrebuiltFrontend {
    module: Module,
    up_to_date: bool,
}

impl PrebuiltFrontend {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            up_to_date: false,
        }
    }

    pub fn with_up_to_date(mut self, up_to_date: bool) -> Self {
        self.up_to_date = up_to_date;
        self
    }
}

impl Frontend for PrebuiltFrontend {
    fn module_name(&self) -> &str {
        self.module.name()
    }

    fn is_up_to_date(&self) -> bool {
        self.up_to_date
    }

    fn populate_namespace(&mut self, _cx: &mut StageContext<'_>) -> Module {
        self.module.clone()
    }

    fn resolve_names(&mut self, _cx: &mut StageContext<'_>) -> bool {
        true
    }

    fn validate_expressions(&mut self, _cx: &mut StageContext<'_>) -> bool {
        true
    }

    fn generate_code(&mut self, _cx: &mut StageContext<'_>) -> bool {
        true
    }

    fn emit(&mut self, _cx: &mut StageContext<'_>) -> Module {
        self.module.clone()
    }
}
