//! Orchestration for one pipeline run.
//!
//! A run moves through fixed phases:
//!
//! ```text
//! Initializing -> RangeResolved -> DirectoryCreated -> Linking -> Executing -> Stamping -> Done
//! ```
//!
//! Any phase may end in `Failed`. Everything up to `RangeResolved` is
//! read-only, and the revision is read before the run directory exists, so a
//! rejected run leaves nothing behind. Once steps start, a failure keeps the
//! steps already completed or linked but never stamps the run.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::links::{LinkPlan, LinkRequest, PlannedLink, plan_links};
use crate::core::range::{RangeRequest, Resolution, resolve_range};
use crate::core::step_ref::StepRef;
use crate::core::types::{Pipeline, StepRange};
use crate::io::executor::{StepRunner, execute_step};
use crate::io::git::Vcs;
use crate::io::history::scan_runs;
use crate::io::linker::create_links;
use crate::io::pipeline_spec::load_pipeline;
use crate::io::repro_set::load_reproducibility_set;
use crate::io::stamp::{
    RunPaths, create_run_dir, write_final_marker, write_invocation, write_revision,
};
use crate::request::RunRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initializing,
    RangeResolved,
    DirectoryCreated,
    Linking,
    Executing,
    Stamping,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Initializing => "initializing",
            RunPhase::RangeResolved => "range_resolved",
            RunPhase::DirectoryCreated => "directory_created",
            RunPhase::Linking => "linking",
            RunPhase::Executing => "executing",
            RunPhase::Stamping => "stamping",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_name: String,
    pub run_dir: PathBuf,
    /// Steps executed by this run (0-based offsets).
    pub range: StepRange,
    /// Run whose outputs were reused, if any.
    pub previous_run: Option<String>,
    pub executed: Vec<String>,
    pub linked: Vec<PlannedLink>,
    /// Steps outside the range with no output anywhere.
    pub unlinked: Vec<String>,
    pub revision: String,
    pub clean: bool,
    pub sealed: bool,
}

/// Tracks the current phase so a failure can be attributed to it.
#[derive(Debug)]
struct PhaseTracker {
    current: RunPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        debug!(phase = %RunPhase::Initializing, "pipeline phase");
        Self {
            current: RunPhase::Initializing,
        }
    }

    fn advance(&mut self, next: RunPhase) {
        debug!(from = %self.current, to = %next, "pipeline phase");
        self.current = next;
    }
}

/// Run the pipeline described by `request`.
///
/// `vcs` answers cleanliness and revision queries; `runner` invokes step
/// scripts. Both are seams so the orchestration can be tested without git or
/// child processes.
#[instrument(skip_all, fields(run = %request.run_name))]
pub fn run_pipeline<V, R>(request: &RunRequest, vcs: &V, runner: &R) -> Result<RunOutcome>
where
    V: Vcs + ?Sized,
    R: StepRunner + ?Sized,
{
    let mut phases = PhaseTracker::new();
    let result = drive(request, vcs, runner, &mut phases);
    if let Err(err) = &result {
        warn!(phase = %phases.current, error = %format!("{err:#}"), "pipeline failed");
        phases.advance(RunPhase::Failed);
    }
    result
}

fn drive<V, R>(
    request: &RunRequest,
    vcs: &V,
    runner: &R,
    phases: &mut PhaseTracker,
) -> Result<RunOutcome>
where
    V: Vcs + ?Sized,
    R: StepRunner + ?Sized,
{
    let clean = assess_cleanliness(&request.reproducible_list, request.force, vcs)?;
    let mut pipeline = load_pipeline(&request.pipeline_file)?;
    let history = scan_runs(&request.results_dir, Some(&pipeline))?;

    let range_request = RangeRequest {
        start: resolve_step_ref(request.from.as_ref(), &pipeline, "--from")?,
        end: resolve_step_ref(request.to.as_ref(), &pipeline, "--to")?,
        previous_run: request.previous_run.clone(),
        mode: request.mode,
        ignore_missing_output: request.ignore_missing_output,
    };
    let resolution = resolve_range(pipeline.len(), &range_request, &history)?;
    phases.advance(RunPhase::RangeResolved);
    info!(
        range = %resolution.range,
        previous = resolution.previous.as_ref().map_or("none", |p| p.name.as_str()),
        "range resolved"
    );

    let plan = plan_links(
        &pipeline,
        &resolution,
        &history,
        LinkRequest {
            prior: resolution.range.start > 0,
            future: request.link_future,
            ignore_missing_output: request.ignore_missing_output,
        },
    )?;
    let revision = vcs
        .current_revision()
        .context("unable to read the current revision")?;

    let paths = RunPaths::new(&request.results_dir, &request.run_name);
    create_run_dir(&paths)?;
    phases.advance(RunPhase::DirectoryCreated);
    write_invocation(&paths, &request.invocation)?;

    phases.advance(RunPhase::Linking);
    link_outputs(&paths, &plan)?;

    phases.advance(RunPhase::Executing);
    let executed = execute_range(&mut pipeline, &resolution, &paths, runner)?;

    phases.advance(RunPhase::Stamping);
    write_revision(&paths.dir, &revision, clean)?;
    let sealed = request.finalize || request.force;
    if sealed {
        write_final_marker(&paths)?;
    }
    phases.advance(RunPhase::Done);
    info!(run = %paths.name, executed = executed.len(), sealed, "run complete");

    Ok(RunOutcome {
        run_name: paths.name,
        run_dir: paths.dir,
        range: resolution.range,
        previous_run: resolution.previous.map(|p| p.name),
        executed,
        linked: plan.links,
        unlinked: plan.skipped,
        revision,
        clean,
        sealed,
    })
}

/// Decide whether the run can be trusted as reproducible.
///
/// Unforced runs must be clean. Forced runs still ask version control when
/// the list is readable, and count as not clean when it is not.
pub(crate) fn assess_cleanliness<V: Vcs + ?Sized>(
    reproducible_list: &Path,
    force: bool,
    vcs: &V,
) -> Result<bool> {
    if !force {
        let set = load_reproducibility_set(reproducible_list)?;
        if !vcs.is_clean(&set.paths)? {
            bail!(
                "files under reproducibility control have uncommitted changes; commit them or use --force"
            );
        }
        return Ok(true);
    }

    match load_reproducibility_set(reproducible_list) {
        Ok(set) => {
            let clean = vcs.is_clean(&set.paths)?;
            if !clean {
                warn!("forcing a run over uncommitted changes");
            }
            Ok(clean)
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "reproducibility list unavailable, run will be marked not clean");
            Ok(false)
        }
    }
}

fn resolve_step_ref(
    step: Option<&StepRef>,
    pipeline: &Pipeline,
    flag: &str,
) -> Result<Option<usize>> {
    step.map(|step| {
        step.resolve(pipeline)
            .with_context(|| format!("invalid {flag} step {step}"))
    })
    .transpose()
}

fn link_outputs(paths: &RunPaths, plan: &LinkPlan) -> Result<()> {
    for step in &plan.skipped {
        warn!(step = %step, "no earlier output to link, step left out");
    }
    create_links(paths, plan)
}

fn execute_range<R: StepRunner + ?Sized>(
    pipeline: &mut Pipeline,
    resolution: &Resolution,
    paths: &RunPaths,
    runner: &R,
) -> Result<Vec<String>> {
    let mut executed = Vec::new();
    for offset in resolution.range.offsets() {
        let step = pipeline
            .get_mut(offset)
            .ok_or_else(|| anyhow!("step offset {offset} is outside the pipeline"))?;
        step.assign_output_dir(paths.step_dir(&step.name))
            .map_err(anyhow::Error::msg)?;
        execute_step(runner, step).with_context(|| {
            format!(
                "run '{}' stopped at step #{} '{}'",
                paths.name,
                offset + 1,
                step.name
            )
        })?;
        executed.push(step.name.clone());
    }
    Ok(executed)
}
