//! `strata link`: run compiled modules through dependency resolution.
//!
//! Every module in the input files becomes a unit whose stages complete at
//! once, so the run checks that each declared dependency resolves through the
//! module path (or to a sibling input) and then stamps and stores the result.

use crate::output::{resolve_color_choice, StyledOutput};
use anyhow::Context;
use std::path::PathBuf;
use strata_driver::{
    CompilationUnit, Diagnostic, DiagnosticSink, PipelineConfig, PipelineOutcome,
    PrebuiltFrontend, ResolutionDriver, Severity,
};
use strata_repo::{
    open_repository_chain, Bundle, Classification, Module, ModuleStore, Store, Version,
};
use termcolor::Color;
use tracing::debug;

pub struct LinkArgs {
    pub inputs: Vec<PathBuf>,
    pub module_path: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub set_version: Option<String>,
    pub force: bool,
    pub color: Option<String>,
}

/// Prints diagnostics to stderr as the driver reports them
struct ConsoleSink {
    out: StyledOutput,
}

impl DiagnosticSink for ConsoleSink {
    fn report(&mut self, d: &Diagnostic) {
        let (label, color) = if d.internal {
            ("internal error:", Color::Magenta)
        } else {
            match d.severity {
                Severity::Info => return,
                Severity::Warning => ("warning:", Color::Yellow),
                Severity::Error => ("error:", Color::Red),
                Severity::Fatal => ("fatal:", Color::Red),
            }
        };
        let text = match &d.unit {
            Some(unit) => format!("[{}] {}", unit, d.message),
            None => d.message.clone(),
        };
        self.out.stderr_line(label, color, &text);
    }
}

/// Whether `store` already holds exactly what linking `module` would write
fn is_current(store: &Store, module: &Module, config: &PipelineConfig) -> anyhow::Result<bool> {
    let Some(existing) = store.lookup(module.name(), None)? else {
        return Ok(false);
    };
    let mut expected = module.clone();
    if let Some(version) = &config.version {
        expected.set_version(Some(version.clone()));
    }
    expected.set_classification(Classification::Primary);
    Ok(existing.digest() == expected.digest())
}

pub fn execute(
    out: &mut StyledOutput,
    args: LinkArgs,
    mut config: PipelineConfig,
) -> anyhow::Result<()> {
    if let Some(v) = &args.set_version {
        config.version = Some(Version::parse(v)?);
    }
    config.force_rebuild |= args.force;

    let chain = open_repository_chain(&args.module_path)?;
    let output = match &args.output {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            Some(Store::open_writable(dir)?)
        }
        None => None,
    };

    let mut units = Vec::new();
    for path in &args.inputs {
        let bundle = Bundle::read(path)?;
        for module in std::iter::once(bundle.primary()).chain(bundle.embedded()) {
            let up_to_date = match &output {
                Some(store) => is_current(store, module, &config)?,
                None => false,
            };
            debug!(module = module.name(), file = %path.display(), up_to_date, "loaded unit");
            let frontend = PrebuiltFrontend::new(module.clone()).with_up_to_date(up_to_date);
            units.push(CompilationUnit::from_frontend(frontend));
        }
    }

    let sink = ConsoleSink {
        out: StyledOutput::new(resolve_color_choice(args.color.as_deref())),
    };
    let mut driver = ResolutionDriver::new(chain, config)?.with_sink(Box::new(sink));
    if let Some(store) = output {
        driver = driver.with_output(store);
    }
    let report = driver.run(&mut units);

    match report.outcome {
        PipelineOutcome::Success => {
            out.success("Linked");
            out.plain(&format!(" {} module(s)", report.emitted.len()));
            if !report.skipped.is_empty() {
                out.plain(&format!(", {} up to date", report.skipped.len()));
            }
            if report.warnings > 0 {
                out.plain(&format!(", {} warning(s)", report.warnings));
            }
            out.newline();
            out.flush();
            Ok(())
        }
        PipelineOutcome::Failure(err) => {
            Err(anyhow::Error::new(err).context("internal toolchain error"))
        }
        PipelineOutcome::Aborted => anyhow::bail!(
            "linking aborted: {} error(s), {} module(s) not linked",
            report.errors,
            report.aborted.len()
        ),
    }
}
