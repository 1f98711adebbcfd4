//! Run directory layout and the marker files stamped into it.
//!
//! ```text
//! <results>/<run>/<step>/          executed or linked step output
//! <results>/<run>/rev.txt          commit id, plus `NOT CLEAN` when forced over a dirty tree
//! <results>/<run>/.final           present iff the run is sealed
//! <results>/<run>/invocation.txt   arguments the run was started with
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::debug;

pub const REVISION_FILE: &str = "rev.txt";
pub const FINAL_MARKER: &str = ".final";
pub const INVOCATION_FILE: &str = "invocation.txt";
pub const SHA_ERROR_FILE: &str = "sha-error.txt";
pub const NOT_CLEAN: &str = "NOT CLEAN";

/// Names a step may not take, since they collide with run-level files.
pub const RESERVED_NAMES: [&str; 4] = [REVISION_FILE, FINAL_MARKER, INVOCATION_FILE, SHA_ERROR_FILE];

/// Canonical paths within one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub name: String,
    pub dir: PathBuf,
    pub revision_path: PathBuf,
    pub final_path: PathBuf,
    pub invocation_path: PathBuf,
}

impl RunPaths {
    pub fn new(results_dir: &Path, run_name: &str) -> Self {
        let dir = results_dir.join(run_name);
        Self {
            name: run_name.to_string(),
            revision_path: dir.join(REVISION_FILE),
            final_path: dir.join(FINAL_MARKER),
            invocation_path: dir.join(INVOCATION_FILE),
            dir,
        }
    }

    pub fn step_dir(&self, step: &str) -> PathBuf {
        self.dir.join(step)
    }
}

/// Create the run directory. Fails if anything already has that name.
///
/// Uses an exclusive create so two invocations racing for one name cannot
/// both succeed.
pub fn create_run_dir(paths: &RunPaths) -> Result<()> {
    match fs::create_dir(&paths.dir) {
        Ok(()) => {
            debug!(dir = %paths.dir.display(), "run directory created");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Err(anyhow!(
            "the output directory for this run already exists: {}",
            paths.dir.display()
        )),
        Err(err) => {
            Err(err).with_context(|| format!("create run directory {}", paths.dir.display()))
        }
    }
}

/// Record the arguments the run was started with, as a JSON array.
pub fn write_invocation(paths: &RunPaths, args: &[String]) -> Result<()> {
    let mut payload = serde_json::to_string(args).context("serialize invocation")?;
    payload.insert_str(0, "args = ");
    payload.push('\n');
    write_text(&paths.invocation_path, &payload)
}

/// Write `rev.txt` into `dir`.
///
/// Refuses to touch a sealed directory.
pub fn write_revision(dir: &Path, revision: &str, clean: bool) -> Result<()> {
    ensure_not_sealed(dir)?;
    let mut contents = format!("{}\n", revision.trim());
    if !clean {
        contents.push_str(NOT_CLEAN);
        contents.push('\n');
    }
    write_text(&dir.join(REVISION_FILE), &contents)
}

/// Seal the run against continuation and further writes.
pub fn write_final_marker(paths: &RunPaths) -> Result<()> {
    ensure_not_sealed(&paths.dir)?;
    write_text(&paths.final_path, "final\n")
}

/// Leave a note where `rev.txt` would have gone.
pub fn write_sha_error(dir: &Path, message: &str) -> Result<()> {
    write_text(&dir.join(SHA_ERROR_FILE), &format!("{message}\n"))
}

fn ensure_not_sealed(dir: &Path) -> Result<()> {
    if dir.join(FINAL_MARKER).exists() {
        bail!("{} is sealed ({FINAL_MARKER} present)", dir.display());
    }
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_run_directory_is_a_collision() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        create_run_dir(&paths).expect("first create");
        let err = create_run_dir(&paths).expect_err("collision");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn revision_carries_not_clean_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_revision(temp.path(), "abc123\n", false).expect("write");
        let contents = fs::read_to_string(temp.path().join(REVISION_FILE)).expect("read");
        assert_eq!(contents, "abc123\nNOT CLEAN\n");

        write_revision(temp.path(), "def456", true).expect("rewrite");
        let contents = fs::read_to_string(temp.path().join(REVISION_FILE)).expect("read");
        assert_eq!(contents, "def456\n");
    }

    #[test]
    fn sealed_directory_is_never_written() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "sealed");
        create_run_dir(&paths).expect("create");
        write_final_marker(&paths).expect("seal");
        assert!(write_revision(&paths.dir, "abc", true).is_err());
        assert!(write_final_marker(&paths).is_err());
    }

    #[test]
    fn invocation_is_recorded_as_json_array() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "r");
        create_run_dir(&paths).expect("create");
        write_invocation(&paths, &["run".to_string(), "--from".to_string(), "2".to_string()])
            .expect("write");
        let contents = fs::read_to_string(&paths.invocation_path).expect("read");
        assert_eq!(contents, "args = [\"run\",\"--from\",\"2\"]\n");
    }
}
