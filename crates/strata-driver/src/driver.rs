//! The resolution driver
//!
//! Units move through their stages together. Each iterative stage is a
//! bounded fixed-point loop: every live unit is asked to advance, in a stable
//! order, until all report completion or the pass budget runs out. Running
//! out is a toolchain defect; remaining deferred work is flushed as errors
//! and the run fails with an [`InternalError`].

use crate::config::{ConfigError, PipelineConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity, TracingSink};
use crate::stage::Stage;
use crate::unit::CompilationUnit;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use strata_repo::{
    validate_name, Classification, Dependency, ImportMode, Module, ModuleStore, RepositoryChain,
    RepositoryError, Store,
};
use thiserror::Error;
use tracing::{debug, error, info, info_span};

/// A fixed-point stage failed to converge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage '{stage}' did not converge after {passes} passes")]
pub struct InternalError {
    pub stage: Stage,
    pub passes: usize,
}

/// Overall result of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Success,
    Failure(InternalError),
    Aborted,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Success)
    }
}

/// Everything a caller needs to know about a finished run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    /// Units that reached `Emitted`, in unit order
    pub emitted: Vec<String>,
    pub aborted: Vec<String>,
    /// Units left out because they were up to date
    pub skipped: Vec<String>,
    /// Passes each iterative stage took
    pub passes: Vec<(Stage, usize)>,
    pub errors: usize,
    pub warnings: usize,
    /// Diagnostics raised by the driver itself rather than by a unit
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineReport {
    fn new() -> Self {
        Self {
            outcome: PipelineOutcome::Success,
            emitted: Vec::new(),
            aborted: Vec::new(),
            skipped: Vec::new(),
            passes: Vec::new(),
            errors: 0,
            warnings: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Passes taken by `stage`, if it ran to completion
    pub fn passes_for(&self, stage: Stage) -> Option<usize> {
        self.passes.iter().find(|(s, _)| *s == stage).map(|(_, n)| *n)
    }
}

/// Result of checking a unit's watermark after a stage call
enum Check {
    Continue,
    UnitAborted,
    RunAborted,
}

/// How an iterative stage ended
enum StageEnd {
    Done,
    Failed(InternalError),
    Aborted,
}

/// Drives compilation units through their stages
pub struct ResolutionDriver {
    config: PipelineConfig,
    chain: RepositoryChain,
    output: Option<Store>,
    sink: Box<dyn DiagnosticSink>,
    deadline: Option<Instant>,
    report: PipelineReport,
}

impl ResolutionDriver {
    /// Create a driver over `chain`
    ///
    /// # Returns
    /// * `Err(ConfigError::Invalid)` - `config` fails validation
    pub fn new(chain: RepositoryChain, config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_config(chain, config))
    }

    /// Create a driver from a configuration known to be valid
    pub(crate) fn with_config(chain: RepositoryChain, config: PipelineConfig) -> Self {
        Self {
            config,
            chain,
            output: None,
            sink: Box::new(TracingSink),
            deadline: None,
            report: PipelineReport::new(),
        }
    }

    /// Also store emitted modules into `output`
    pub fn with_output(mut self, output: Store) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn chain(&self) -> &RepositoryChain {
        &self.chain
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every unit through all stages
    pub fn run(&mut self, units: &mut [CompilationUnit]) -> PipelineReport {
        self.report = PipelineReport::new();
        self.deadline = self
            .config
            .pass_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let outcome = self.run_stages(units);
        self.finish(units, outcome)
    }

    fn run_stages(&mut self, units: &mut [CompilationUnit]) -> PipelineOutcome {
        if !self.config.force_rebuild {
            for unit in units.iter_mut().filter(|u| u.is_up_to_date()) {
                debug!(unit = unit.name(), "up to date; skipping");
                unit.skip();
            }
            if units.iter().all(CompilationUnit::is_skipped) {
                info!(units = units.len(), "all modules are up to date");
                return PipelineOutcome::Success;
            }
        }

        info!("Creating modules and populating namespaces");
        if !self.populate_namespaces(units) {
            return PipelineOutcome::Aborted;
        }

        info!("Resolving names and dependencies");
        if !self.resolve_dependencies(units) {
            return PipelineOutcome::Aborted;
        }

        for stage in Stage::ITERATIVE {
            if stage == Stage::ExpressionsValidated {
                info!("Validating expressions");
            } else if stage == Stage::CodeGenerated {
                info!("Generating code");
            }
            match self.fixed_point(stage, units) {
                StageEnd::Done => {}
                StageEnd::Failed(err) => return PipelineOutcome::Failure(err),
                StageEnd::Aborted => return PipelineOutcome::Aborted,
            }
        }

        info!("Storing results of compilation");
        if !self.emit_modules(units) {
            return PipelineOutcome::Aborted;
        }

        if units.iter().any(|u| u.stage() == Stage::Aborted) {
            PipelineOutcome::Aborted
        } else {
            PipelineOutcome::Success
        }
    }

    /// Reserve each unit's name in the build cache
    ///
    /// Returns `false` if the run must stop.
    fn populate_namespaces(&mut self, units: &mut [CompilationUnit]) -> bool {
        let _span = info_span!("stage", stage = %Stage::NamespacePopulated).entered();
        let cache = std::sync::Arc::clone(self.chain.build_cache());
        let mut seen = HashSet::new();

        for unit in units.iter_mut().filter(|u| u.is_live()) {
            let name = unit.name().to_string();
            if let Err(e) = validate_name(&name) {
                unit.diagnostics_mut().log(Severity::Error, e.to_string());
            } else if !seen.insert(name.clone()) {
                unit.diagnostics_mut()
                    .log(Severity::Error, format!("Duplicate module name: \"{}\"", name));
            } else {
                let placeholder = unit.populate_namespace(&self.chain);
                if placeholder.name() != name {
                    unit.diagnostics_mut().push(Diagnostic::internal(format!(
                        "front-end for \"{}\" produced module \"{}\"",
                        name,
                        placeholder.name()
                    )));
                } else if cache.reserve(placeholder) {
                    unit.set_reserved(true);
                } else {
                    unit.diagnostics_mut().log(
                        Severity::Error,
                        format!("Module name \"{}\" is already in the build cache", name),
                    );
                }
            }

            if let Check::RunAborted = self.check(unit) {
                return false;
            }
        }
        true
    }

    fn resolve_dependency(&self, dep: &Dependency) -> Result<Option<Module>, RepositoryError> {
        // a sibling's placeholder carries no version yet
        if self.chain.build_cache().is_reserved(&dep.name) {
            return self.chain.build_cache().lookup(&dep.name, None);
        }
        self.chain.resolve(dep)
    }

    /// Look up every declared dependency, then run the linking loop
    fn resolve_dependencies(&mut self, units: &mut [CompilationUnit]) -> bool {
        for unit in units.iter_mut().filter(|u| u.is_live()) {
            let declared: Vec<Dependency> = unit
                .module()
                .map(|m| m.dependencies().to_vec())
                .unwrap_or_default();

            let mut resolved = Vec::with_capacity(declared.len());
            for dep in &declared {
                match self.resolve_dependency(dep) {
                    Ok(Some(module)) => resolved.push(module),
                    Ok(None) if dep.mode == ImportMode::Required => {
                        unit.diagnostics_mut()
                            .log(Severity::Error, format!("Missing dependency: \"{}\"", dep));
                    }
                    Ok(None) => {
                        unit.diagnostics_mut().log(
                            Severity::Warning,
                            format!("{} dependency \"{}\" not found", dep.mode, dep.name),
                        );
                    }
                    Err(e) => unit.diagnostics_mut().log(Severity::Error, e.to_string()),
                }
            }
            unit.set_dependencies(resolved);

            if let Check::RunAborted = self.check(unit) {
                return false;
            }
        }
        true
    }

    fn fixed_point(&mut self, stage: Stage, units: &mut [CompilationUnit]) -> StageEnd {
        let _span = info_span!("stage", stage = %stage).entered();
        let mut remaining = self.config.max_tries;
        let mut passes = 0;

        loop {
            if self.timed_out() {
                self.driver_diagnostic(Diagnostic::new(
                    Severity::Fatal,
                    format!("timed out during stage '{}'", stage),
                ));
                return StageEnd::Aborted;
            }

            let last_try = remaining == 1;
            let mut all_done = true;
            for unit in units.iter_mut().filter(|u| u.is_live()) {
                let done = unit.advance(stage, &self.chain, last_try);
                match self.check(unit) {
                    Check::RunAborted => return StageEnd::Aborted,
                    Check::UnitAborted => {}
                    Check::Continue => all_done &= done,
                }
            }
            passes += 1;

            if all_done {
                debug!(%stage, passes, "stage complete");
                self.report.passes.push((stage, passes));
                return StageEnd::Done;
            }

            remaining -= 1;
            if remaining == 0 {
                for unit in units.iter_mut().filter(|u| u.is_live()) {
                    unit.flush_deferred_as_errors();
                    self.forward(unit);
                }
                let err = InternalError { stage, passes };
                error!(%stage, passes, "fixed-point iteration exhausted");
                self.driver_diagnostic(Diagnostic::internal(err.to_string()));
                return StageEnd::Failed(err);
            }
        }
    }

    fn emit_modules(&mut self, units: &mut [CompilationUnit]) -> bool {
        let _span = info_span!("stage", stage = %Stage::Emitted).entered();

        for unit in units.iter_mut().filter(|u| u.is_live()) {
            let mut module = unit.emit(&self.chain);
            if module.name() != unit.name() {
                let message = format!(
                    "front-end for \"{}\" emitted module \"{}\"",
                    unit.name(),
                    module.name()
                );
                unit.diagnostics_mut().push(Diagnostic::internal(message));
            } else {
                if let Some(version) = &self.config.version {
                    module.set_version(Some(version.clone()));
                }
                module.set_classification(Classification::Primary);

                let stored = match &self.output {
                    Some(output) => output.store(&module),
                    None => Ok(()),
                }
                .and_then(|()| self.chain.build_cache().store(&module));

                match stored {
                    Ok(()) => {
                        info!(unit = unit.name(), "emitted");
                        unit.set_reserved(false);
                        unit.finish(module);
                    }
                    Err(e) => unit.diagnostics_mut().log(Severity::Error, e.to_string()),
                }
            }

            if let Check::RunAborted = self.check(unit) {
                return false;
            }
        }
        true
    }

    /// Forward new diagnostics and apply the abort thresholds
    fn check(&mut self, unit: &mut CompilationUnit) -> Check {
        self.forward(unit);

        if unit.abort_requested(self.config.run_abort_severity) {
            return Check::RunAborted;
        }
        if let Some(max) = self.config.max_errors {
            if self.report.errors >= max {
                self.driver_diagnostic(Diagnostic::new(
                    Severity::Fatal,
                    format!("too many errors ({}); stopping", self.report.errors),
                ));
                return Check::RunAborted;
            }
        }
        if unit.abort_requested(self.config.unit_abort_severity) {
            self.abort_unit(unit);
            return Check::UnitAborted;
        }
        Check::Continue
    }

    fn abort_unit(&mut self, unit: &mut CompilationUnit) {
        if unit.is_reserved() {
            self.chain.build_cache().release(unit.name());
            unit.set_reserved(false);
        }
        unit.abort();
    }

    fn forward(&mut self, unit: &mut CompilationUnit) {
        for diagnostic in unit.diagnostics_mut().take_unreported() {
            match diagnostic.severity {
                Severity::Warning => self.report.warnings += 1,
                Severity::Error | Severity::Fatal => self.report.errors += 1,
                Severity::Info => {}
            }
            self.sink.report(diagnostic);
        }
    }

    fn driver_diagnostic(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity >= Severity::Error {
            self.report.errors += 1;
        }
        self.sink.report(&diagnostic);
        self.report.diagnostics.push(diagnostic);
    }

    fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn finish(&mut self, units: &mut [CompilationUnit], outcome: PipelineOutcome) -> PipelineReport {
        let aborted = matches!(outcome, PipelineOutcome::Aborted);
        for unit in units.iter_mut() {
            // nothing partial may remain under a reserved name
            if unit.is_reserved() {
                self.chain.build_cache().release(unit.name());
                unit.set_reserved(false);
            }
            if aborted && unit.is_live() {
                unit.abort();
            }
        }

        let mut report = std::mem::replace(&mut self.report, PipelineReport::new());
        for unit in units.iter() {
            if unit.is_skipped() {
                report.skipped.push(unit.name().to_string());
            } else if unit.stage() == Stage::Emitted {
                report.emitted.push(unit.name().to_string());
            } else if unit.stage() == Stage::Aborted {
                report.aborted.push(unit.name().to_string());
            }
        }
        report.outcome = outcome;

        match &report.outcome {
            PipelineOutcome::Success => info!(
                emitted = report.emitted.len(),
                skipped = report.skipped.len(),
                "Finished"
            ),
            PipelineOutcome::Failure(err) => error!(error = %err, "internal toolchain error"),
            PipelineOutcome::Aborted => info!(
                aborted = report.aborted.len(),
                errors = report.errors,
                "Compilation aborted"
            ),
        }
        report
    }
}

/// Run `units` against `chain` with the default configuration
///
/// Diagnostics go to `tracing`. Use [`ResolutionDriver`] directly for a
/// custom configuration, sink or output store.
pub fn run_pipeline(units: &mut [CompilationUnit], chain: &RepositoryChain) -> PipelineOutcome {
    ResolutionDriver::with_config(chain.clone(), PipelineConfig::default())
        .run(units)
        .outcome
}
