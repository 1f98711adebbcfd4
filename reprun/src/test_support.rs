//! Test-only helpers: a scratch project layout, a fake VCS and a scripted
//! step runner.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::io::config::ProjectConfig;
use crate::io::git::Vcs;
use crate::io::stamp::{FINAL_MARKER, REVISION_FILE};
use crate::request::{RunRequest, RunRequestBuilder};

/// Script that records its own name into its output directory.
pub const SUCCEEDING_SCRIPT: &str = "#!/bin/sh\nset -e\nbasename \"$0\" > \"$1/ran.txt\"\n";
/// Script that writes partial output and then fails.
pub const FAILING_SCRIPT: &str = "#!/bin/sh\necho partial > \"$1/partial.txt\"\nexit 7\n";

/// A project with a results root, one script per step, a pipeline spec and
/// a reproducibility list covering every script.
pub struct Fixture {
    temp: TempDir,
    steps: Vec<String>,
}

impl Fixture {
    pub fn new(steps: &[&str]) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let fixture = Self {
            temp,
            steps: Vec::new(),
        };
        fs::create_dir(fixture.results()).expect("mkdir results");
        fs::create_dir(fixture.root().join("steps")).expect("mkdir steps");
        fixture.with_steps(steps)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn results(&self) -> PathBuf {
        self.root().join("results")
    }

    pub fn pipeline_file(&self) -> PathBuf {
        self.root().join(".pipeline")
    }

    pub fn reproducible_list(&self) -> PathBuf {
        self.root().join(".reproducible")
    }

    pub fn config(&self) -> ProjectConfig {
        ProjectConfig {
            results_dir: self.results(),
            reproducible_list: self.reproducible_list(),
            pipeline_file: self.pipeline_file(),
            ..ProjectConfig::default()
        }
    }

    pub fn request(&self) -> RunRequestBuilder {
        RunRequest::builder(self.config()).invocation(vec!["run".to_string()])
    }

    /// Replace the pipeline with `steps`, writing a succeeding script for any
    /// step that has none yet.
    pub fn with_steps(mut self, steps: &[&str]) -> Self {
        self.set_steps(steps);
        self
    }

    pub fn set_steps(&mut self, steps: &[&str]) {
        let mut spec = String::new();
        let mut list = String::new();
        for step in steps {
            let script = self.script_path(step);
            if !script.exists() {
                self.set_script(step, SUCCEEDING_SCRIPT);
            }
            spec.push_str(&format!("steps/{step}.sh {step}\n"));
            list.push_str(&format!("steps/{step}.sh\n"));
        }
        fs::write(self.pipeline_file(), spec).expect("write pipeline");
        fs::write(self.reproducible_list(), list).expect("write reproducible list");
        self.steps = steps.iter().map(|s| s.to_string()).collect();
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn script_path(&self, step: &str) -> PathBuf {
        self.root().join("steps").join(format!("{step}.sh"))
    }

    /// Write an executable script for `step`.
    pub fn set_script(&self, step: &str, body: &str) {
        let path = self.script_path(step);
        fs::write(&path, body).expect("write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        }
    }

    /// Create a run directory by hand, as an earlier invocation would have.
    pub fn make_run(&self, name: &str, steps: &[&str], stamped: bool, sealed: bool) -> PathBuf {
        let dir = self.results().join(name);
        fs::create_dir(&dir).expect("mkdir run");
        for step in steps {
            fs::create_dir(dir.join(step)).expect("mkdir step");
        }
        if stamped {
            fs::write(dir.join(REVISION_FILE), "0000000\n").expect("write revision");
        }
        if sealed {
            fs::write(dir.join(FINAL_MARKER), "final\n").expect("write final");
        }
        dir
    }

    /// Turn the project into a git repository (once) and commit everything
    /// but the results directory. Returns the new commit id.
    pub fn commit_all(&self) -> String {
        let git = |args: &[&str]| -> String {
            let out = Command::new("git")
                .args(args)
                .current_dir(self.root())
                .output()
                .expect("spawn git");
            assert!(
                out.status.success(),
                "git {}: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr)
            );
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        };
        if !self.root().join(".git").exists() {
            git(&["init", "-q"]);
            fs::write(self.root().join(".gitignore"), "results/\n").expect("write gitignore");
        }
        git(&["add", "-A"]);
        git(&[
            "-c",
            "user.name=reprun",
            "-c",
            "user.email=reprun@example.com",
            "commit",
            "-q",
            "--allow-empty",
            "-m",
            "fixture",
        ]);
        git(&["rev-parse", "HEAD"])
    }

    /// Backdate a run directory's modification time.
    pub fn age_run(&self, name: &str, seconds: u64) {
        let when = SystemTime::now() - Duration::from_secs(seconds);
        let dir = fs::File::open(self.results().join(name)).expect("open run dir");
        dir.set_modified(when).expect("set mtime");
    }
}

/// In-memory [`Vcs`] with fixed answers.
#[derive(Debug, Clone)]
pub struct FakeVcs {
    pub clean: bool,
    pub revision: Option<String>,
}

impl FakeVcs {
    pub fn clean(revision: &str) -> Self {
        Self {
            clean: true,
            revision: Some(revision.to_string()),
        }
    }

    pub fn dirty(revision: &str) -> Self {
        Self {
            clean: false,
            revision: Some(revision.to_string()),
        }
    }

    /// Clean tree whose revision cannot be read.
    pub fn broken_revision() -> Self {
        Self {
            clean: true,
            revision: None,
        }
    }
}

impl Vcs for FakeVcs {
    fn is_clean(&self, paths: &[PathBuf]) -> Result<bool> {
        if paths.is_empty() {
            return Err(anyhow!("no files listed for reproducibility control"));
        }
        Ok(self.clean)
    }

    fn current_revision(&self) -> Result<String> {
        self.revision
            .clone()
            .ok_or_else(|| anyhow!("fatal: not a git repository"))
    }
}

/// [`StepRunner`](crate::io::executor::StepRunner) that never spawns a
/// process. Steps are identified by the name of their output directory.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    fail_at: Option<String>,
    invoked: std::cell::RefCell<Vec<String>>,
}

#[cfg(unix)]
impl ScriptedRunner {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing_at(step: &str) -> Self {
        Self {
            fail_at: Some(step.to_string()),
            invoked: Default::default(),
        }
    }

    /// Step names in invocation order.
    pub fn invoked(&self) -> Vec<String> {
        self.invoked.borrow().clone()
    }
}

#[cfg(unix)]
impl crate::io::executor::StepRunner for ScriptedRunner {
    fn invoke(&self, _script: &Path, output_dir: &Path) -> Result<std::process::ExitStatus> {
        use std::os::unix::process::ExitStatusExt;

        let step = output_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        self.invoked.borrow_mut().push(step.clone());
        fs::write(output_dir.join("out.txt"), &step)?;
        let code = if self.fail_at.as_deref() == Some(step.as_str()) {
            1
        } else {
            0
        };
        Ok(std::process::ExitStatus::from_raw(code << 8))
    }
}
