//! Single-script variant: run one experiment script and stamp whatever
//! directory it reports.
//!
//! The script chooses its own output location and announces it as the last
//! line of its standard output. That directory receives `rev.txt`, or
//! `sha-error.txt` when the revision cannot be read.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::executor::StepError;
use crate::io::git::Vcs;
use crate::io::process::run_teeing_stdout;
use crate::io::stamp::{write_revision, write_sha_error};
use crate::pipeline::assess_cleanliness;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub script: PathBuf,
    pub args: Vec<String>,
    pub reproducible_list: PathBuf,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Directory named by the script's last line of output.
    pub experiment_dir: PathBuf,
    pub revision: String,
    pub clean: bool,
}

/// Run the script, forwarding its stdout to `out`, then stamp its
/// experiment directory.
#[instrument(skip_all, fields(script = %request.script.display()))]
pub fn run_single<V, W>(request: &ExecRequest, vcs: &V, out: &mut W) -> Result<ExecOutcome>
where
    V: Vcs + ?Sized,
    W: Write,
{
    let clean = assess_cleanliness(&request.reproducible_list, request.force, vcs)?;
    let label = request.script.display().to_string();

    let mut cmd = Command::new(&request.script);
    cmd.args(&request.args);
    let output = run_teeing_stdout(cmd, out).map_err(|err| StepError::Spawn {
        step: label.clone(),
        reason: format!("{err:#}"),
    })?;
    if !output.status.success() {
        return Err(StepError::Failed {
            step: label,
            status: output.status,
        }
        .into());
    }

    let experiment_dir = experiment_dir(output.last_line.as_deref())?;
    info!(dir = %experiment_dir.display(), "experiment directory reported");

    match vcs.current_revision() {
        Ok(revision) => {
            write_revision(&experiment_dir, &revision, clean)?;
            Ok(ExecOutcome {
                experiment_dir,
                revision,
                clean,
            })
        }
        Err(err) => {
            let err = err.context("unable to get the commit hash");
            warn!(error = %format!("{err:#}"), "recording revision failure");
            write_sha_error(&experiment_dir, &format!("{err:#}"))?;
            Err(err)
        }
    }
}

fn experiment_dir(last_line: Option<&str>) -> Result<PathBuf> {
    let line = last_line.ok_or_else(|| {
        anyhow!("the script printed nothing; its last line must name the experiment directory")
    })?;
    let dir = Path::new(line);
    if !dir.is_dir() {
        return Err(anyhow!(
            "the script's last line of output is not an existing directory: {line}"
        ));
    }
    dir.canonicalize()
        .with_context(|| format!("resolve experiment directory {line}"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::io::stamp::{NOT_CLEAN, REVISION_FILE, SHA_ERROR_FILE};
    use crate::test_support::{FakeVcs, Fixture};
    use std::fs;

    fn exec_fixture(body: &str) -> (Fixture, ExecRequest) {
        let fixture = Fixture::new(&["experiment"]);
        fixture.set_script("experiment", body);
        let request = ExecRequest {
            script: fixture.script_path("experiment"),
            args: vec![fixture.results().display().to_string()],
            reproducible_list: fixture.reproducible_list(),
            force: false,
        };
        (fixture, request)
    }

    const REPORTING_SCRIPT: &str =
        "#!/bin/sh\nset -e\nmkdir -p \"$1/exp-1\"\necho working\necho \"$1/exp-1\"\n";

    #[test]
    fn stamps_the_reported_directory() {
        let (fixture, request) = exec_fixture(REPORTING_SCRIPT);
        let mut out = Vec::new();

        let outcome = run_single(&request, &FakeVcs::clean("abc"), &mut out).expect("exec");
        let dir = fixture.results().join("exp-1");
        assert_eq!(outcome.experiment_dir, dir.canonicalize().expect("canonical"));
        assert_eq!(
            fs::read_to_string(dir.join(REVISION_FILE)).expect("rev"),
            "abc\n"
        );
        assert!(String::from_utf8_lossy(&out).starts_with("working\n"));
    }

    #[test]
    fn forced_dirty_run_is_marked() {
        let (fixture, mut request) = exec_fixture(REPORTING_SCRIPT);
        request.force = true;

        let outcome =
            run_single(&request, &FakeVcs::dirty("abc"), &mut Vec::new()).expect("exec");
        assert!(!outcome.clean);
        let rev = fs::read_to_string(fixture.results().join("exp-1").join(REVISION_FILE))
            .expect("rev");
        assert!(rev.ends_with(&format!("{NOT_CLEAN}\n")));
    }

    #[test]
    fn dirty_tree_blocks_the_script() {
        let (fixture, request) = exec_fixture(REPORTING_SCRIPT);

        let err = run_single(&request, &FakeVcs::dirty("abc"), &mut Vec::new())
            .expect_err("dirty");
        assert!(err.to_string().contains("uncommitted changes"));
        assert!(!fixture.results().join("exp-1").exists());
    }

    #[test]
    fn nonzero_exit_is_a_step_error() {
        let (_fixture, request) = exec_fixture("#!/bin/sh\nexit 4\n");

        let err = run_single(&request, &FakeVcs::clean("abc"), &mut Vec::new())
            .expect_err("fails");
        assert!(err.is::<StepError>());
    }

    #[test]
    fn last_line_must_be_a_directory() {
        let (_fixture, request) = exec_fixture("#!/bin/sh\necho done\n");

        let err = run_single(&request, &FakeVcs::clean("abc"), &mut Vec::new())
            .expect_err("no dir");
        assert!(err.to_string().contains("not an existing directory"));
    }

    #[test]
    fn unreadable_revision_leaves_a_note() {
        let (fixture, request) = exec_fixture(REPORTING_SCRIPT);

        let err = run_single(&request, &FakeVcs::broken_revision(), &mut Vec::new())
            .expect_err("no revision");
        assert!(err.to_string().contains("commit hash"));
        let dir = fixture.results().join("exp-1");
        assert!(!dir.join(REVISION_FILE).exists());
        let note = fs::read_to_string(dir.join(SHA_ERROR_FILE)).expect("note");
        assert!(note.contains("not a git repository"));
    }
}
