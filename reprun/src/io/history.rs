//! Run history scanner.
//!
//! Classifies every immediate subdirectory of the results root as a prior
//! run. Marker files are probed here and nowhere else; the rest of the
//! crate works with the derived [`RunStatus`].

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::core::history::RunHistory;
use crate::core::types::{Pipeline, RunRecord, RunStatus};
use crate::io::stamp::{FINAL_MARKER, REVISION_FILE};

/// Scan `results_dir`. Step directories are matched against `pipeline`;
/// without one, every subdirectory counts as a step.
#[instrument(skip_all, fields(results = %results_dir.display()))]
pub fn scan_runs(results_dir: &Path, pipeline: Option<&Pipeline>) -> Result<RunHistory> {
    let mut runs = Vec::new();
    for entry in fs::read_dir(results_dir)
        .with_context(|| format!("read results directory {}", results_dir.display()))?
    {
        let entry = entry.context("read results entry")?;
        let path = entry.path();
        // Follows symlinks: a linked run directory is still a run.
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let record = scan_run(&path, name, meta.modified().ok(), pipeline)?;
        debug!(
            run = %record.name,
            status = %record.status,
            steps = record.completed_step_count(),
            "classified run"
        );
        runs.push(record);
    }
    Ok(RunHistory::new(runs))
}

fn scan_run(
    dir: &Path,
    name: String,
    modified: Option<std::time::SystemTime>,
    pipeline: Option<&Pipeline>,
) -> Result<RunRecord> {
    let status = RunStatus::from_markers(
        dir.join(REVISION_FILE).is_file(),
        dir.join(FINAL_MARKER).exists(),
    );

    let mut steps = BTreeSet::new();
    let mut step_dir_count = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("read run directory {}", dir.display()))? {
        let entry = entry.context("read run entry")?;
        // Linked steps count as completed when their target is a directory.
        if !entry.path().is_dir() {
            continue;
        }
        step_dir_count += 1;
        let step = entry.file_name().to_string_lossy().to_string();
        if pipeline.is_none_or(|p| p.contains(&step)) {
            steps.insert(step);
        }
    }

    Ok(RunRecord {
        name,
        status,
        steps,
        step_dir_count,
        modified: modified.map(DateTime::<Utc>::from).unwrap_or_default(),
    })
}
