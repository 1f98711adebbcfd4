//! Step execution.
//!
//! The [`StepRunner`] trait decouples orchestration from how a script is
//! actually invoked. Tests use scripted runners that succeed or fail on
//! demand without spawning processes.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use anyhow::Result;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::types::Step;
use crate::io::process::run_inherited;

/// Runtime failure of a single step. The step's output directory has already
/// been removed when this is returned.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("pipeline step '{step}' has no output directory assigned")]
    Unassigned { step: String },
    #[error("output directory {} for step '{step}' already exists and is not empty", .dir.display())]
    OutputExists { step: String, dir: PathBuf },
    #[error("cannot create output directory {} for step '{step}': {source}", .dir.display())]
    CreateDir {
        step: String,
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("pipeline step '{step}' failed to start: {reason}")]
    Spawn { step: String, reason: String },
    #[error("pipeline step '{step}' failed: the inner script exited with {status}")]
    Failed { step: String, status: ExitStatus },
}

/// Abstraction over how a step script is invoked.
pub trait StepRunner {
    /// Run `script` with `output_dir` as its sole argument and wait for it.
    fn invoke(&self, script: &Path, output_dir: &Path) -> Result<ExitStatus>;
}

/// Runs the script as a child process with inherited stdio.
pub struct ScriptRunner;

impl StepRunner for ScriptRunner {
    fn invoke(&self, script: &Path, output_dir: &Path) -> Result<ExitStatus> {
        let mut cmd = Command::new(script);
        cmd.arg(output_dir);
        run_inherited(cmd)
    }
}

/// Execute one step whose output directory has been assigned.
///
/// Creates the directory, runs the script and blocks until it exits. On a
/// spawn failure or nonzero exit the directory is removed recursively before
/// the error is returned, so a failed step leaves nothing behind.
#[instrument(skip_all, fields(step = %step.name))]
pub fn execute_step<R: StepRunner + ?Sized>(runner: &R, step: &Step) -> Result<(), StepError> {
    let dir = step.output_dir().ok_or_else(|| StepError::Unassigned {
        step: step.name.clone(),
    })?;
    prepare_output_dir(step, dir)?;

    info!(script = %step.script_path.display(), output = %dir.display(), "running step");
    let failure = match runner.invoke(&step.script_path, dir) {
        Ok(status) if status.success() => {
            info!("step finished");
            return Ok(());
        }
        Ok(status) => StepError::Failed {
            step: step.name.clone(),
            status,
        },
        Err(err) => StepError::Spawn {
            step: step.name.clone(),
            reason: format!("{err:#}"),
        },
    };

    warn!(error = %failure, "step failed, removing its output");
    if let Err(err) = fs::remove_dir_all(dir) {
        warn!(err = %err, dir = %dir.display(), "failed to remove step output");
    }
    Err(failure)
}

fn prepare_output_dir(step: &Step, dir: &Path) -> Result<(), StepError> {
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            let empty = dir.is_dir()
                && fs::read_dir(dir)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
            if empty {
                Ok(())
            } else {
                Err(StepError::OutputExists {
                    step: step.name.clone(),
                    dir: dir.to_path_buf(),
                })
            }
        }
        Err(source) => Err(StepError::CreateDir {
            step: step.name.clone(),
            dir: dir.to_path_buf(),
            source,
        }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    struct FixedRunner {
        code: i32,
        write_file: bool,
    }

    impl StepRunner for FixedRunner {
        fn invoke(&self, _script: &Path, output_dir: &Path) -> Result<ExitStatus> {
            if self.write_file {
                fs::write(output_dir.join("partial.txt"), "partial").expect("write");
            }
            Ok(ExitStatus::from_raw(self.code << 8))
        }
    }

    struct BrokenRunner;

    impl StepRunner for BrokenRunner {
        fn invoke(&self, _script: &Path, _output_dir: &Path) -> Result<ExitStatus> {
            Err(anyhow::anyhow!("exec format error"))
        }
    }

    fn assigned_step(dir: PathBuf) -> Step {
        let mut step = Step::new("train", "/bin/true");
        step.assign_output_dir(dir).expect("assign");
        step
    }

    #[test]
    fn success_keeps_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = assigned_step(temp.path().join("train"));
        let runner = FixedRunner {
            code: 0,
            write_file: true,
        };
        execute_step(&runner, &step).expect("run");
        assert!(temp.path().join("train/partial.txt").exists());
    }

    #[test]
    fn nonzero_exit_removes_partial_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = assigned_step(temp.path().join("train"));
        let runner = FixedRunner {
            code: 1,
            write_file: true,
        };
        let err = execute_step(&runner, &step).expect_err("failure");
        assert!(matches!(err, StepError::Failed { .. }));
        assert!(!temp.path().join("train").exists());
    }

    #[test]
    fn spawn_error_removes_output_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = assigned_step(temp.path().join("train"));
        let err = execute_step(&BrokenRunner, &step).expect_err("failure");
        assert!(err.to_string().contains("exec format error"));
        assert!(!temp.path().join("train").exists());
    }

    #[test]
    fn unassigned_step_is_rejected() {
        let step = Step::new("train", "/bin/true");
        let runner = FixedRunner {
            code: 0,
            write_file: false,
        };
        assert!(matches!(
            execute_step(&runner, &step),
            Err(StepError::Unassigned { .. })
        ));
    }

    #[test]
    fn non_empty_existing_output_is_left_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("train");
        fs::create_dir(&dir).expect("mkdir");
        fs::write(dir.join("keep.txt"), "keep").expect("write");
        let step = assigned_step(dir.clone());
        let runner = FixedRunner {
            code: 0,
            write_file: false,
        };
        let err = execute_step(&runner, &step).expect_err("exists");
        assert!(matches!(err, StepError::OutputExists { .. }));
        assert!(dir.join("keep.txt").exists());
    }
}
