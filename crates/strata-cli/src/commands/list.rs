//! `strata list`: names resolvable through a chain of library paths.

use crate::output::StyledOutput;
use std::path::PathBuf;
use strata_repo::{open_repository_chain, ModuleStore};

pub fn execute(out: &mut StyledOutput, paths: &[PathBuf]) -> anyhow::Result<()> {
    if paths.is_empty() {
        anyhow::bail!("no library paths given (pass paths or set [repository] module-path)");
    }

    let chain = open_repository_chain(paths)?;
    let names = chain.list_names()?;
    if names.is_empty() {
        out.plain("No modules found");
        out.newline();
        return Ok(());
    }

    for name in &names {
        out.bold(name);
        if let Some(version) = chain.lookup(name, None)?.as_ref().and_then(|m| m.version()) {
            out.plain(" ");
            out.info(&version.to_string());
        }
        out.newline();
    }
    out.flush();
    Ok(())
}
