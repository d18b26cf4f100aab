//! Running external programs with output appended to a log file.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, error, instrument};

/// Run `cmd` to completion, appending its stdout and stderr to `log_path`.
///
/// Solver runs last hours; there is no timeout and the output is never held
/// in memory.
#[instrument(skip_all, fields(log = %log_path.display()))]
pub fn run_logged(mut cmd: Command, log_path: &Path) -> Result<ExitStatus> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("open log {}", log_path.display()))?;
    let log_err = log
        .try_clone()
        .with_context(|| format!("clone log handle {}", log_path.display()))?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };
    let status = child.wait().context("wait for command")?;
    debug!(exit_code = ?status.code(), "command finished");
    Ok(status)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn output_is_appended_to_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = temp.path().join("solver.log");
        fs::write(&log, "previous\n").expect("seed");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err 1>&2; exit 3");
        let status = run_logged(cmd, &log).expect("run");
        assert_eq!(status.code(), Some(3));

        let contents = fs::read_to_string(&log).expect("read");
        assert!(contents.starts_with("previous\n"));
        assert!(contents.contains("out\n"));
        assert!(contents.contains("err\n"));
    }

    #[test]
    fn missing_program_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cmd = Command::new(temp.path().join("no-such-solver"));
        assert!(run_logged(cmd, &temp.path().join("solver.log")).is_err());
    }
}
