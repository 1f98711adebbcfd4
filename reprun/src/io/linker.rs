//! Output linker: symbolic links from a new run to earlier step outputs.
//!
//! Links are relative (`../<source-run>/<step>`) so a results directory can
//! be moved or archived as a whole. They are read-only pointers; nothing in
//! the runner writes through them.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::links::{LinkPlan, PlannedLink};
use crate::io::stamp::RunPaths;

/// Create every planned link inside the run directory.
#[instrument(skip_all, fields(run = %run.name, links = plan.links.len()))]
pub fn create_links(run: &RunPaths, plan: &LinkPlan) -> Result<()> {
    for link in &plan.links {
        let target = link_target(link);
        let path = run.step_dir(&link.step);
        symlink_dir(&target, &path).with_context(|| {
            format!(
                "link {} -> {}",
                path.display(),
                target.display()
            )
        })?;
        debug!(step = %link.step, source = %link.source_run, "linked step output");
    }
    Ok(())
}

/// Relative target of a link, as seen from inside the new run directory.
pub fn link_target(link: &PlannedLink) -> PathBuf {
    Path::new("..").join(&link.source_run).join(&link.step)
}

#[cfg(unix)]
fn symlink_dir(target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, path: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, path)
}
