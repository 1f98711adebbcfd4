//! Git adapter: the version-control oracle runs are stamped against.
//!
//! The orchestrator only needs two answers from version control (are these
//! paths committed, and what is HEAD), so we keep a small, explicit wrapper
//! around `git` subprocess calls behind the [`Vcs`] trait.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Version-control queries consumed by the orchestrator.
///
/// Failures (git missing, not a repository) are errors, never "clean".
pub trait Vcs {
    /// True if none of `paths` has uncommitted local modifications.
    fn is_clean(&self, paths: &[PathBuf]) -> Result<bool>;
    /// Identifier of the current commit.
    fn current_revision(&self) -> Result<String>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Status entries (including untracked) restricted to `paths`.
    pub fn status_of(&self, paths: &[PathBuf]) -> Result<Vec<StatusEntry>> {
        let mut args: Vec<String> = vec!["status".into(), "--porcelain=v1".into(), "--".into()];
        args.extend(paths.iter().map(|p| p.display().to_string()));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self
            .run_capture(&args)
            .context("unable to stat the git repository")?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self
            .run_capture(&["rev-parse", "HEAD"])
            .context("unable to get the commit hash")?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Vcs for Git {
    #[instrument(skip_all, fields(paths = paths.len()))]
    fn is_clean(&self, paths: &[PathBuf]) -> Result<bool> {
        if paths.is_empty() {
            return Err(anyhow!("no files listed for reproducibility control"));
        }
        let entries = self.status_of(paths)?;
        if entries.is_empty() {
            debug!("reproducibility set is clean");
            return Ok(true);
        }
        for entry in &entries {
            warn!(code = %entry.code, path = %entry.path, "uncommitted change");
        }
        Ok(false)
    }

    fn current_revision(&self) -> Result<String> {
        let sha = self.head_sha()?;
        debug!(revision = %sha, "current revision");
        Ok(sha)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
