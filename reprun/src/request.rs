//! Validated configuration for one pipeline run.
//!
//! [`RunRequestBuilder`] gathers settings from the config file and the
//! command line, then checks them all at once. Every problem is reported in
//! a single error, and nothing is written before the request is valid.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use chrono::{DateTime, Local};

use crate::core::step_ref::StepRef;
use crate::core::types::InferenceMode;
use crate::io::config::ProjectConfig;
use crate::io::stamp::RESERVED_NAMES;

/// Immutable, fully validated settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub(crate) results_dir: PathBuf,
    pub(crate) reproducible_list: PathBuf,
    pub(crate) pipeline_file: PathBuf,
    pub(crate) run_name: String,
    pub(crate) from: Option<StepRef>,
    pub(crate) to: Option<StepRef>,
    pub(crate) previous_run: Option<String>,
    pub(crate) mode: InferenceMode,
    pub(crate) ignore_missing_output: bool,
    pub(crate) link_future: bool,
    pub(crate) finalize: bool,
    pub(crate) force: bool,
    pub(crate) invocation: Vec<String>,
}

impl RunRequest {
    pub fn builder(config: ProjectConfig) -> RunRequestBuilder {
        RunRequestBuilder::new(config)
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn run_dir(&self) -> PathBuf {
        self.results_dir.join(&self.run_name)
    }
}

#[derive(Debug, Clone)]
pub struct RunRequestBuilder {
    config: ProjectConfig,
    run_name: Option<String>,
    from: Option<StepRef>,
    to: Option<StepRef>,
    only: Option<StepRef>,
    previous_run: Option<String>,
    continue_previous: bool,
    rebuild: bool,
    ignore_missing_output: bool,
    link_future: bool,
    finalize: bool,
    force: bool,
    invocation: Vec<String>,
    now: Option<DateTime<Local>>,
}

impl RunRequestBuilder {
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            config,
            run_name: None,
            from: None,
            to: None,
            only: None,
            previous_run: None,
            continue_previous: false,
            rebuild: false,
            ignore_missing_output: false,
            link_future: false,
            finalize: false,
            force: false,
            invocation: Vec::new(),
            now: None,
        }
    }

    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.results_dir = dir.into();
        self
    }

    pub fn reproducible_list(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.reproducible_list = path.into();
        self
    }

    pub fn pipeline_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pipeline_file = path.into();
        self
    }

    /// Run directory name; defaults to a timestamp.
    pub fn run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = Some(name.into());
        self
    }

    pub fn from(mut self, step: StepRef) -> Self {
        self.from = Some(step);
        self
    }

    pub fn to(mut self, step: StepRef) -> Self {
        self.to = Some(step);
        self
    }

    /// Run exactly one step. Excludes `from`/`to`.
    pub fn only(mut self, step: StepRef) -> Self {
        self.only = Some(step);
        self
    }

    pub fn previous_run(mut self, name: impl Into<String>) -> Self {
        self.previous_run = Some(name.into());
        self
    }

    pub fn continue_previous(mut self, yes: bool) -> Self {
        self.continue_previous = yes;
        self
    }

    pub fn rebuild(mut self, yes: bool) -> Self {
        self.rebuild = yes;
        self
    }

    pub fn ignore_missing_output(mut self, yes: bool) -> Self {
        self.ignore_missing_output = yes;
        self
    }

    pub fn link_future(mut self, yes: bool) -> Self {
        self.link_future = yes;
        self
    }

    pub fn finalize(mut self, yes: bool) -> Self {
        self.finalize = yes;
        self
    }

    pub fn force(mut self, yes: bool) -> Self {
        self.force = yes;
        self
    }

    /// Arguments recorded in `invocation.txt`.
    pub fn invocation(mut self, args: Vec<String>) -> Self {
        self.invocation = args;
        self
    }

    /// Clock used for the default run name.
    pub fn now(mut self, now: DateTime<Local>) -> Self {
        self.now = Some(now);
        self
    }

    /// Validate everything and produce the request.
    ///
    /// Only read-only checks happen here.
    pub fn build(self) -> Result<RunRequest> {
        let mut errors: Vec<String> = Vec::new();
        let cfg = &self.config;

        if let Err(err) = cfg.validate() {
            errors.push(format!("{err:#}"));
        }
        if !cfg.results_dir.is_dir() {
            errors.push(format!(
                "results directory does not exist: {}",
                cfg.results_dir.display()
            ));
        }
        if !cfg.pipeline_file.is_file() {
            errors.push(format!(
                "no pipeline specification file at {}",
                cfg.pipeline_file.display()
            ));
        }
        if !self.force && !cfg.reproducible_list.is_file() {
            errors.push(format!(
                "list of files under reproducibility control not found: {}",
                cfg.reproducible_list.display()
            ));
        }
        if self.only.is_some() && (self.from.is_some() || self.to.is_some()) {
            errors.push("a single step can only be selected when no start or end step is given".to_string());
        }
        if self.continue_previous && self.rebuild {
            errors.push("inference behaviour specified more than once (continue and rebuild)".to_string());
        }

        let run_name = match &self.run_name {
            Some(name) => name.clone(),
            None => {
                let now = self.now.unwrap_or_else(Local::now);
                let mut name = String::new();
                if write!(name, "{}", now.format(&cfg.run_name_format)).is_err() {
                    errors.push(format!(
                        "run_name_format '{}' is not a valid time format",
                        cfg.run_name_format
                    ));
                }
                name
            }
        };
        if let Some(reason) = invalid_dir_name(&run_name) {
            errors.push(format!("run name '{run_name}' {reason}"));
        } else if cfg.results_dir.join(&run_name).exists() {
            errors.push(format!(
                "the output directory for this run already exists: {}",
                cfg.results_dir.join(&run_name).display()
            ));
        }

        if let Some(prev) = &self.previous_run {
            if let Some(reason) = invalid_dir_name(prev) {
                errors.push(format!("previous run '{prev}' {reason}"));
            } else if !cfg.results_dir.join(prev).is_dir() {
                errors.push(format!(
                    "previous run directory not found: {}",
                    cfg.results_dir.join(prev).display()
                ));
            } else if *prev == run_name {
                errors.push(format!("run '{prev}' cannot continue from itself"));
            }
        }

        if !errors.is_empty() {
            bail!("invalid configuration:\n- {}", errors.join("\n- "));
        }

        let mode = if self.continue_previous {
            InferenceMode::Continue
        } else if self.rebuild {
            InferenceMode::Rebuild
        } else {
            InferenceMode::Infer
        };
        let (from, to) = match self.only {
            Some(step) => (Some(step.clone()), Some(step)),
            None => (self.from, self.to),
        };

        Ok(RunRequest {
            results_dir: self.config.results_dir,
            reproducible_list: self.config.reproducible_list,
            pipeline_file: self.config.pipeline_file,
            run_name,
            from,
            to,
            previous_run: self.previous_run,
            mode,
            ignore_missing_output: self.ignore_missing_output,
            link_future: self.link_future,
            finalize: self.finalize,
            force: self.force,
            invocation: self.invocation,
        })
    }
}

fn invalid_dir_name(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        Some("is empty")
    } else if name.contains(['/', '\\']) || name == "." || name == ".." {
        Some("must be a single directory name")
    } else if RESERVED_NAMES.contains(&name) {
        Some("is reserved")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    struct Layout {
        _temp: tempfile::TempDir,
        config: ProjectConfig,
    }

    fn layout() -> Layout {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir(root.join("results")).expect("mkdir results");
        fs::write(root.join(".pipeline"), "a.sh A\n").expect("write spec");
        fs::write(root.join(".reproducible"), "a.sh\n").expect("write list");
        let config = ProjectConfig {
            results_dir: root.join("results"),
            reproducible_list: root.join(".reproducible"),
            pipeline_file: root.join(".pipeline"),
            ..ProjectConfig::default()
        };
        Layout {
            _temp: temp,
            config,
        }
    }

    #[test]
    fn defaults_to_timestamped_run_name() {
        let layout = layout();
        let now = Local
            .with_ymd_and_hms(2024, 2, 3, 4, 5, 6)
            .single()
            .expect("valid time");
        let request = RunRequest::builder(layout.config.clone())
            .now(now)
            .build()
            .expect("build");
        assert_eq!(request.run_name(), "2024-02-03_04-05-06.000000");
        assert_eq!(request.mode, InferenceMode::Infer);
    }

    #[test]
    fn only_sets_both_ends() {
        let layout = layout();
        let request = RunRequest::builder(layout.config.clone())
            .run_name("r")
            .only(StepRef::Name("A".to_string()))
            .build()
            .expect("build");
        assert_eq!(request.from, Some(StepRef::Name("A".to_string())));
        assert_eq!(request.to, request.from);
    }

    #[test]
    fn aggregates_every_problem() {
        let layout = layout();
        fs::create_dir(layout.config.results_dir.join("taken")).expect("mkdir");
        let err = RunRequest::builder(layout.config.clone())
            .run_name("taken")
            .pipeline_file(layout.config.results_dir.join("missing.pipeline"))
            .only(StepRef::Ordinal(1))
            .from(StepRef::Ordinal(1))
            .continue_previous(true)
            .rebuild(true)
            .previous_run("ghost")
            .build()
            .expect_err("invalid");
        let msg = err.to_string();
        assert!(msg.contains("no pipeline specification file"));
        assert!(msg.contains("single step"));
        assert!(msg.contains("inference behaviour"));
        assert!(msg.contains("already exists"));
        assert!(msg.contains("previous run directory not found"));
    }

    #[test]
    fn forcing_tolerates_missing_reproducibility_list() {
        let layout = layout();
        fs::remove_file(&layout.config.reproducible_list).expect("remove list");
        let base = RunRequest::builder(layout.config.clone()).run_name("r");
        assert!(base.clone().build().is_err());
        let request = base.force(true).build().expect("forced build");
        assert!(request.force);
    }

    #[test]
    fn rejects_path_like_run_names() {
        let layout = layout();
        let err = RunRequest::builder(layout.config.clone())
            .run_name("../escape")
            .build()
            .expect_err("invalid name");
        assert!(err.to_string().contains("single directory name"));
    }
}
