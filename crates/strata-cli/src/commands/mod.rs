//! Subcommand implementations

pub mod bundle;
pub mod info;
pub mod link;
pub mod list;

use crate::config::ToolConfig;
use std::path::PathBuf;

/// `-L` flags first, then `[repository] module-path`
pub fn module_path(flags: Vec<PathBuf>, config: &ToolConfig) -> Vec<PathBuf> {
    let mut paths = flags;
    paths.extend(config.repository.module_path.iter().cloned());
    paths
}
