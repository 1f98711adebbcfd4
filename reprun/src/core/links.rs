//! Link planning: which steps of a new run point at earlier outputs.
//!
//! Planning is pure and happens before the run directory exists, so every
//! contradiction is reported before anything is written.

use thiserror::Error;

use crate::core::history::RunHistory;
use crate::core::range::Resolution;
use crate::core::types::Pipeline;

/// A step whose output is borrowed from an earlier run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub step: String,
    pub source_run: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub links: Vec<PlannedLink>,
    /// Steps with no output anywhere, left out under `ignore_missing_output`.
    pub skipped: Vec<String>,
}

/// Which sides of the range to link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkRequest {
    /// Steps before the range.
    pub prior: bool,
    /// Steps after the range.
    pub future: bool,
    pub ignore_missing_output: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("cannot link prior steps: this run starts at the first step")]
    NoPriorSteps,
    #[error("cannot link future steps: this run already ends at the last step (#{len})")]
    NothingAhead { len: usize },
    #[error("cannot link future steps: no previous run was determined")]
    NoPreviousRun,
    #[error("previous run '{previous}' has no output for step '{step}'")]
    MissingOutput { step: String, previous: String },
}

pub fn plan_links(
    pipeline: &Pipeline,
    resolution: &Resolution,
    history: &RunHistory,
    request: LinkRequest,
) -> Result<LinkPlan, LinkError> {
    let range = resolution.range;
    let mut offsets: Vec<usize> = Vec::new();

    if request.prior {
        if range.start == 0 {
            return Err(LinkError::NoPriorSteps);
        }
        offsets.extend(0..range.start);
    }
    if request.future {
        if range.end + 1 >= pipeline.len() {
            return Err(LinkError::NothingAhead {
                len: pipeline.len(),
            });
        }
        if resolution.previous.is_none() {
            return Err(LinkError::NoPreviousRun);
        }
        offsets.extend(range.end + 1..pipeline.len());
    }

    let mut plan = LinkPlan::default();
    for offset in offsets {
        let step = &pipeline.steps()[offset].name;
        let source = match &resolution.previous {
            Some(prev) if prev.has_step(step) => Some(prev.name.clone()),
            Some(prev) if !request.ignore_missing_output => {
                return Err(LinkError::MissingOutput {
                    step: step.clone(),
                    previous: prev.name.clone(),
                });
            }
            _ if request.ignore_missing_output => history
                .most_recent_run_containing(step)
                .map(|run| run.name.clone()),
            _ => None,
        };
        match source {
            Some(source_run) => plan.links.push(PlannedLink {
                step: step.clone(),
                source_run,
            }),
            None => plan.skipped.push(step.clone()),
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RunRecord, RunStatus, Step, StepRange};
    use chrono::{TimeZone, Utc};

    fn pipeline(names: &[&str]) -> Pipeline {
        Pipeline::new(
            names
                .iter()
                .map(|name| Step::new(*name, format!("/{name}.sh")))
                .collect(),
        )
        .expect("pipeline")
    }

    fn record(name: &str, steps: &[&str], minute: u32) -> RunRecord {
        RunRecord {
            name: name.to_string(),
            status: RunStatus::Open,
            steps: steps.iter().map(|s| s.to_string()).collect(),
            step_dir_count: steps.len(),
            modified: Utc
                .with_ymd_and_hms(2024, 5, 1, 8, minute, 0)
                .single()
                .expect("valid time"),
        }
    }

    fn resolution(start: usize, end: usize, previous: Option<RunRecord>) -> Resolution {
        Resolution {
            range: StepRange { start, end },
            previous,
        }
    }

    fn prior() -> LinkRequest {
        LinkRequest {
            prior: true,
            ..LinkRequest::default()
        }
    }

    #[test]
    fn links_every_step_before_the_range() {
        let prev = record("r1", &["a", "b", "c"], 0);
        let history = RunHistory::new(vec![prev.clone()]);
        let plan = plan_links(
            &pipeline(&["a", "b", "c", "d"]),
            &resolution(3, 3, Some(prev)),
            &history,
            prior(),
        )
        .expect("plan");
        let steps: Vec<&str> = plan.links.iter().map(|l| l.step.as_str()).collect();
        assert_eq!(steps, vec!["a", "b", "c"]);
        assert!(plan.links.iter().all(|l| l.source_run == "r1"));
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn prior_linking_from_the_first_step_is_rejected() {
        let err = plan_links(
            &pipeline(&["a"]),
            &resolution(0, 0, None),
            &RunHistory::default(),
            prior(),
        )
        .expect_err("nothing prior");
        assert_eq!(err, LinkError::NoPriorSteps);
    }

    #[test]
    fn future_linking_needs_steps_after_the_range() {
        let prev = record("r1", &["a", "b"], 0);
        let request = LinkRequest {
            future: true,
            ..LinkRequest::default()
        };
        let err = plan_links(
            &pipeline(&["a", "b"]),
            &resolution(0, 1, Some(prev.clone())),
            &RunHistory::new(vec![prev.clone()]),
            request,
        )
        .expect_err("nothing ahead");
        assert_eq!(err, LinkError::NothingAhead { len: 2 });

        let plan = plan_links(
            &pipeline(&["a", "b"]),
            &resolution(0, 0, Some(prev.clone())),
            &RunHistory::new(vec![prev]),
            request,
        )
        .expect("plan");
        assert_eq!(
            plan.links,
            vec![PlannedLink {
                step: "b".to_string(),
                source_run: "r1".to_string()
            }]
        );
    }

    #[test]
    fn missing_output_fails_unless_ignored() {
        let prev = record("r2", &["a"], 2);
        let older = record("r1", &["a", "b"], 1);
        let history = RunHistory::new(vec![older, prev.clone()]);
        let pipeline = pipeline(&["a", "b", "c", "d"]);
        let res = resolution(3, 3, Some(prev));

        let err = plan_links(&pipeline, &res, &history, prior()).expect_err("missing");
        assert_eq!(
            err,
            LinkError::MissingOutput {
                step: "b".to_string(),
                previous: "r2".to_string()
            }
        );

        let request = LinkRequest {
            ignore_missing_output: true,
            ..prior()
        };
        let plan = plan_links(&pipeline, &res, &history, request).expect("plan");
        let sources: Vec<(&str, &str)> = plan
            .links
            .iter()
            .map(|l| (l.step.as_str(), l.source_run.as_str()))
            .collect();
        assert_eq!(sources, vec![("a", "r2"), ("b", "r1")]);
        assert_eq!(plan.skipped, vec!["c".to_string()]);
    }
}
