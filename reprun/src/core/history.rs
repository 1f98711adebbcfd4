//! Queries over the scanned run history.
//!
//! Only usable runs (stamped with a revision and not sealed) are ever
//! offered as continuation sources. Ties on modification time are broken by
//! name so the choice is stable.

use crate::core::types::RunRecord;

/// Runs found under one results root, as classified by the scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunHistory {
    runs: Vec<RunRecord>,
}

impl RunHistory {
    pub fn new(mut runs: Vec<RunRecord>) -> Self {
        runs.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
        Self { runs }
    }

    /// All runs, oldest first.
    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn get(&self, name: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|run| run.name == name)
    }

    /// Most recently modified usable run.
    pub fn most_recent_usable_run(&self) -> Option<&RunRecord> {
        self.usable_newest_first().next()
    }

    /// Most recently modified usable run holding output for `step_name`.
    pub fn most_recent_run_containing(&self, step_name: &str) -> Option<&RunRecord> {
        self.usable_newest_first()
            .find(|run| run.has_step(step_name))
    }

    fn usable_newest_first(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter().rev().filter(|run| run.is_usable())
    }
}
