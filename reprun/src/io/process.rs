//! Helpers for running step scripts as child processes.
//!
//! Children run to completion: there is no timeout and no cancellation, a
//! hung script blocks the pipeline until it exits.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument};

/// Captured result of a child whose stdout was teed to ours.
#[derive(Debug)]
pub struct TeeOutput {
    pub status: ExitStatus,
    /// Last non-empty line the child printed on stdout.
    pub last_line: Option<String>,
}

/// Run a command with inherited stdio and wait for it.
#[instrument(skip_all, fields(program = ?cmd.get_program()))]
pub fn run_inherited(mut cmd: Command) -> Result<ExitStatus> {
    cmd.stdin(Stdio::null());
    debug!("spawning child process");
    let status = match cmd.status() {
        Ok(status) => status,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    debug!(exit_code = ?status.code(), "command finished");
    Ok(status)
}

/// Run a command, copying its stdout line by line to `sink` while keeping
/// the last non-empty line. Stderr is inherited.
#[instrument(skip_all, fields(program = ?cmd.get_program()))]
pub fn run_teeing_stdout<W: Write>(mut cmd: Command, sink: &mut W) -> Result<TeeOutput> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;

    let last_line = tee_lines(stdout, sink);
    // Reap the child even if teeing failed.
    let status = child.wait().context("wait for command")?;
    let last_line = last_line.context("read command output")?;

    debug!(exit_code = ?status.code(), "command finished");
    Ok(TeeOutput { status, last_line })
}

fn tee_lines<R: Read, W: Write>(reader: R, sink: &mut W) -> Result<Option<String>> {
    let mut reader = BufReader::new(reader);
    let mut last = None;
    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }
        sink.write_all(&line).context("forward line")?;
        sink.flush().context("flush forwarded output")?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if !text.is_empty() {
            last = Some(text.to_string());
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tee_keeps_last_non_empty_line() {
        let input = b"first\n/tmp/experiment-1\n\n".as_slice();
        let mut sink = Vec::new();
        let last = tee_lines(input, &mut sink).expect("tee");
        assert_eq!(last.as_deref(), Some("/tmp/experiment-1"));
        assert_eq!(sink, b"first\n/tmp/experiment-1\n\n");
    }

    #[test]
    fn tee_handles_missing_trailing_newline() {
        let mut sink = Vec::new();
        let last = tee_lines(b"only".as_slice(), &mut sink).expect("tee");
        assert_eq!(last.as_deref(), Some("only"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let cmd = Command::new("/definitely/not/a/program");
        assert!(run_inherited(cmd).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn teeing_reports_exit_status() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "echo hello; echo out/dir; exit 3"]);
        let mut sink = Vec::new();
        let output = run_teeing_stdout(cmd, &mut sink).expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.last_line.as_deref(), Some("out/dir"));
        assert_eq!(sink, b"hello\nout/dir\n");
    }
}
