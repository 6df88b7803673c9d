//! `strata bundle`: merge module files into one bundle file.

use crate::output::StyledOutput;
use strata_repo::{bundler, BundlerOptions};

pub fn execute(out: &mut StyledOutput, options: BundlerOptions) -> anyhow::Result<()> {
    let report = bundler::run(&options)?;
    let bundle = &report.bundle;

    out.success("Bundled");
    out.plain(&format!(
        " {} ({} embedded, {} fingerprints) into {}",
        bundle.primary_name(),
        bundle.embedded().count(),
        bundle.fingerprints().count(),
        report.output.display()
    ));
    out.newline();

    for dep in &report.unresolved {
        out.warning("warning:");
        out.plain(&format!(" fingerprint {} is not satisfied by the module path", dep));
        out.newline();
    }
    out.flush();
    Ok(())
}
