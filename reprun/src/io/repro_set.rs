//! Reproducibility set: files that must be committed for a trusted run.
//!
//! One path per line, relative to the list file's own directory. Blank
//! lines and `#` comments are skipped. Every listed path must exist.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReproducibilitySet {
    /// Listed paths, rebased onto the list file's directory.
    pub paths: Vec<PathBuf>,
}

/// Load a reproducibility list and check that every entry exists.
pub fn load_reproducibility_set(list: &Path) -> Result<ReproducibilitySet> {
    let contents = fs::read_to_string(list).with_context(|| {
        format!(
            "read list of files under reproducibility control {}",
            list.display()
        )
    })?;
    let base = list.parent().unwrap_or_else(|| Path::new(""));

    let mut paths = Vec::new();
    for (index, raw) in contents.lines().enumerate() {
        let entry = raw.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let path = base.join(entry);
        if !path.exists() {
            bail!(
                "a file under reproducibility control at {}:{} '{}' does not exist",
                list.display(),
                index + 1,
                entry
            );
        }
        paths.push(path);
    }

    if paths.is_empty() {
        bail!(
            "no files are listed for reproducibility control in {}",
            list.display()
        );
    }
    debug!(count = paths.len(), "reproducibility set loaded");
    Ok(ReproducibilitySet { paths })
}
