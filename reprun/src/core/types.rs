//! Shared deterministic types for pipeline runs.
//!
//! These types define the contracts between the resolver, the history
//! queries and the orchestrator. They never touch the filesystem; the
//! scanner in `io::history` is the only place that derives a [`RunStatus`]
//! from marker files.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// One named, ordered unit of pipeline work backed by an external script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Unique within a pipeline; used as a directory segment.
    pub name: String,
    /// Script invoked with the output directory as its sole argument.
    pub script_path: PathBuf,
    output_dir: Option<PathBuf>,
}

impl Step {
    pub fn new(name: impl Into<String>, script_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script_path: script_path.into(),
            output_dir: None,
        }
    }

    /// Output directory, once the run is known.
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Assign the output directory. A step is bound to exactly one run.
    pub fn assign_output_dir(&mut self, dir: PathBuf) -> Result<(), String> {
        if let Some(existing) = &self.output_dir {
            return Err(format!(
                "step '{}' already has output directory {}",
                self.name,
                existing.display()
            ));
        }
        self.output_dir = Some(dir);
        Ok(())
    }
}

/// Ordered sequence of steps with unique names.
///
/// Positions are 0-based offsets here; user-facing ordinals are 1-based and
/// converted at the edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Result<Self, String> {
        let mut seen = BTreeSet::new();
        for step in &steps {
            if !seen.insert(step.name.as_str()) {
                return Err(format!("duplicate step name '{}'", step.name));
            }
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get_mut(&mut self, offset: usize) -> Option<&mut Step> {
        self.steps.get_mut(offset)
    }

    /// 0-based offset of the step called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }
}

/// Status of a run directory, derived once from its marker files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Stamped with a revision and not sealed: a continuation candidate.
    Open,
    /// Carries a finality marker. Never reopened or written to.
    Sealed {
        /// Whether it was also stamped with a revision.
        reproducible: bool,
    },
    /// Not stamped with a revision (failed, interrupted, or foreign).
    Unstamped,
}

impl RunStatus {
    pub fn from_markers(has_revision: bool, has_final: bool) -> Self {
        match (has_revision, has_final) {
            (reproducible, true) => RunStatus::Sealed { reproducible },
            (true, false) => RunStatus::Open,
            (false, false) => RunStatus::Unstamped,
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, RunStatus::Sealed { .. })
    }

    pub fn is_reproducible(self) -> bool {
        matches!(
            self,
            RunStatus::Open
                | RunStatus::Sealed {
                    reproducible: true
                }
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Open => f.write_str("open"),
            RunStatus::Sealed { reproducible: true } => f.write_str("final"),
            RunStatus::Sealed {
                reproducible: false,
            } => f.write_str("final (unstamped)"),
            RunStatus::Unstamped => f.write_str("unstamped"),
        }
    }
}

/// One prior run found under the results root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    /// Directory name of the run.
    pub name: String,
    pub status: RunStatus,
    /// Subdirectories whose names match a step of the current pipeline.
    pub steps: BTreeSet<String>,
    /// Every subdirectory of the run, matching or not.
    pub step_dir_count: usize,
    pub modified: DateTime<Utc>,
}

impl RunRecord {
    pub fn completed_step_count(&self) -> usize {
        self.steps.len()
    }

    /// Reproducible and not final.
    pub fn is_usable(&self) -> bool {
        self.status == RunStatus::Open
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains(name)
    }
}

/// How to pick the start step when none is given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InferenceMode {
    /// Decide from the previous run, defaulting to a full rebuild.
    #[default]
    Infer,
    /// Resume right after the previous run's last step.
    Continue,
    /// Start from the first step.
    Rebuild,
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceMode::Infer => f.write_str("infer"),
            InferenceMode::Continue => f.write_str("continue"),
            InferenceMode::Rebuild => f.write_str("rebuild"),
        }
    }
}

/// Inclusive range of 0-based step offsets to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRange {
    pub start: usize,
    pub end: usize,
}

impl StepRange {
    /// Build from inclusive 1-based ordinals.
    pub fn from_ordinals(start: usize, end: usize) -> Self {
        debug_assert!(start >= 1 && start <= end);
        Self {
            start: start - 1,
            end: end - 1,
        }
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset <= self.end
    }

    pub fn offsets(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl fmt::Display for StepRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}..=#{}", self.start + 1, self.end + 1)
    }
}
