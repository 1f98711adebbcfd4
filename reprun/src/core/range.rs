//! Range resolution: which steps to run and which previous run to build on.
//!
//! Every ambiguous combination of hints either has a single safe default
//! (a full rebuild) or is rejected with the contradictory inputs in the
//! message. Inputs are 1-based ordinals; the resolved [`StepRange`] holds
//! 0-based offsets.

use thiserror::Error;

use crate::core::history::RunHistory;
use crate::core::types::{InferenceMode, RunRecord, RunStatus, StepRange};

/// User hints for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeRequest {
    /// Explicit first step (1-based ordinal).
    pub start: Option<usize>,
    /// Explicit last step (1-based ordinal).
    pub end: Option<usize>,
    /// Explicitly named previous run.
    pub previous_run: Option<String>,
    pub mode: InferenceMode,
    pub ignore_missing_output: bool,
}

/// Outcome of range resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub range: StepRange,
    /// Run whose outputs stand in for steps outside `range`.
    pub previous: Option<RunRecord>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("the pipeline has no steps")]
    EmptyPipeline,
    #[error("cannot run to step #{end}: the pipeline has only {len} steps")]
    EndOutOfBounds { end: usize, len: usize },
    #[error("the starting step must be positive; got #{start}")]
    StartOutOfBounds { start: usize },
    #[error("this run is meant to start at step #{start} but end at step #{end}")]
    StartAfterEnd { start: usize, end: usize },
    #[error("previous run '{0}' not found in the results directory")]
    UnknownPreviousRun(String),
    #[error("previous run '{name}' is {status} and cannot be continued")]
    PreviousRunNotUsable { name: String, status: RunStatus },
    #[error(
        "number of steps decreased since run '{previous}': it holds {had} step outputs, the pipeline now has {len} steps"
    )]
    Shrunk {
        previous: String,
        had: usize,
        len: usize,
    },
    #[error(
        "this run is meant to continue at step #{start}, but previous run '{previous}' has only {completed} steps; address this or ignore missing output"
    )]
    GapAfterPrevious {
        start: usize,
        previous: String,
        completed: usize,
    },
    #[error(
        "this run is meant to continue at step #{start}, but there is no previous run; address this or ignore missing output"
    )]
    NothingToResume { start: usize },
    #[error("pipeline set to continue from a previous run, but there are no usable previous runs")]
    ContinueWithoutPrevious,
    #[error(
        "pipeline set to continue from run '{previous}', but it already has {completed} steps and this run ends at step #{end}"
    )]
    NothingToContinue {
        previous: String,
        completed: usize,
        end: usize,
    },
    #[error("pipeline set to rebuild, but previous run '{0}' was named explicitly")]
    RebuildWithPrevious(String),
}

/// Resolve the step range for a pipeline of `pipeline_len` steps.
pub fn resolve_range(
    pipeline_len: usize,
    request: &RangeRequest,
    history: &RunHistory,
) -> Result<Resolution, RangeError> {
    if pipeline_len == 0 {
        return Err(RangeError::EmptyPipeline);
    }

    let end = match request.end {
        None => pipeline_len,
        Some(end) if (1..=pipeline_len).contains(&end) => end,
        Some(end) => {
            return Err(RangeError::EndOutOfBounds {
                end,
                len: pipeline_len,
            });
        }
    };

    let previous = select_previous(request.previous_run.as_deref(), history)?;
    if let Some(prev) = previous
        && prev.step_dir_count > pipeline_len
    {
        return Err(RangeError::Shrunk {
            previous: prev.name.clone(),
            had: prev.step_dir_count,
            len: pipeline_len,
        });
    }
    let completed = previous.map_or(0, RunRecord::completed_step_count);

    let start = match request.start {
        Some(0) => return Err(RangeError::StartOutOfBounds { start: 0 }),
        Some(start) if start > end => return Err(RangeError::StartAfterEnd { start, end }),
        Some(start) => start,
        None => infer_start(request, previous, completed, end)?,
    };

    if start > 1 && !request.ignore_missing_output {
        match previous {
            Some(prev) if start > completed + 1 => {
                return Err(RangeError::GapAfterPrevious {
                    start,
                    previous: prev.name.clone(),
                    completed,
                });
            }
            None => return Err(RangeError::NothingToResume { start }),
            Some(_) => {}
        }
    }

    Ok(Resolution {
        range: StepRange::from_ordinals(start, end),
        previous: previous.cloned(),
    })
}

fn select_previous<'a>(
    explicit: Option<&str>,
    history: &'a RunHistory,
) -> Result<Option<&'a RunRecord>, RangeError> {
    let Some(name) = explicit else {
        return Ok(history.most_recent_usable_run());
    };
    let run = history
        .get(name)
        .ok_or_else(|| RangeError::UnknownPreviousRun(name.to_string()))?;
    if !run.is_usable() {
        return Err(RangeError::PreviousRunNotUsable {
            name: name.to_string(),
            status: run.status,
        });
    }
    Ok(Some(run))
}

/// Pick the start ordinal when the user gave none.
///
/// `end` stands in for the pipeline length: a run that stops early only
/// grows the pipeline up to its own last step.
fn infer_start(
    request: &RangeRequest,
    previous: Option<&RunRecord>,
    completed: usize,
    end: usize,
) -> Result<usize, RangeError> {
    match request.mode {
        InferenceMode::Continue => {
            let prev = previous.ok_or(RangeError::ContinueWithoutPrevious)?;
            if end <= completed {
                return Err(RangeError::NothingToContinue {
                    previous: prev.name.clone(),
                    completed,
                    end,
                });
            }
            Ok(completed + 1)
        }
        InferenceMode::Rebuild => match &request.previous_run {
            Some(name) => Err(RangeError::RebuildWithPrevious(name.clone())),
            None => Ok(1),
        },
        // Resumes at the last step rather than right after the previous
        // run; the gap check in `resolve_range` rejects growth by more than
        // one step unless missing output is ignored.
        InferenceMode::Infer => match previous {
            Some(_) if end > completed => Ok(end),
            _ => Ok(1),
        },
    }
}
