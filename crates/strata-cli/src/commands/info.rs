//! `strata info`: show what a module file contains.

use crate::output::StyledOutput;
use serde_json::json;
use std::path::Path;
use strata_repo::{Bundle, Module};

pub fn execute(out: &mut StyledOutput, file: &Path, as_json: bool) -> anyhow::Result<()> {
    let bundle = Bundle::read(file)?;

    if as_json {
        let value = json!({
            "file": file.display().to_string(),
            "primary": module_json(bundle.primary()),
            "embedded": bundle.embedded().map(module_json).collect::<Vec<_>>(),
            "fingerprints": bundle.fingerprints().map(fingerprint_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    out.bold("Primary:     ");
    print_module(out, bundle.primary());
    for module in bundle.embedded() {
        out.bold("Embedded:    ");
        print_module(out, module);
    }
    for fp in bundle.fingerprints() {
        out.bold("Fingerprint: ");
        match fp.requirement() {
            Some(dep) => out.plain(&dep.to_string()),
            None => out.plain(fp.name()),
        }
        out.newline();
    }
    out.flush();
    Ok(())
}

fn print_module(out: &mut StyledOutput, module: &Module) {
    out.plain(module.name());
    if let Some(version) = module.version() {
        out.plain(" ");
        out.info(&version.to_string());
    }
    let digest = module.digest();
    out.plain(&format!("  sha256:{}", &digest[..12]));
    out.newline();
    for dep in module.dependencies() {
        out.plain(&format!("    depends on {}", dep));
        out.newline();
    }
}

fn module_json(module: &Module) -> serde_json::Value {
    json!({
        "name": module.name(),
        "version": module.version().map(ToString::to_string),
        "digest": module.digest(),
        "size": module.content().len(),
        "dependencies": module
            .dependencies()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
    })
}

fn fingerprint_json(fp: &Module) -> serde_json::Value {
    json!({
        "name": fp.name(),
        "requirement": fp.requirement().map(ToString::to_string),
    })
}
