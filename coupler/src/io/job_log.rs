//! Persistent job logs in the job root.
//!
//! `htcJob.stdout` records progress, `htcJob.stderr` warnings and fatal
//! diagnostics. Both are append-only product output for operators and are
//! written regardless of `RUST_LOG`; every entry is mirrored to tracing.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};

pub const JOB_STDOUT: &str = "htcJob.stdout";
pub const JOB_STDERR: &str = "htcJob.stderr";

#[derive(Debug, Clone)]
pub struct JobLog {
    out_path: PathBuf,
    err_path: PathBuf,
}

impl JobLog {
    pub fn new(root: &Path) -> Self {
        Self {
            out_path: root.join(JOB_STDOUT),
            err_path: root.join(JOB_STDERR),
        }
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    pub fn err_path(&self) -> &Path {
        &self.err_path
    }

    pub fn info(&self, message: &str) {
        info!("{message}");
        append(&self.out_path, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{message}");
        append(&self.err_path, &format!("Warning: {message}"));
    }

    pub fn error(&self, message: &str) {
        error!("{message}");
        append(&self.err_path, &format!("Error: {message}"));
    }
}

/// Log writes never abort the job; failures surface through tracing only.
fn append(path: &Path, message: &str) {
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    let line = format!("[{stamp}] {message}\n");
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()));
    if let Err(err) = result {
        warn!(path = %path.display(), err = %err, "failed to append job log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn entries_are_split_by_severity() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = JobLog::new(temp.path());
        log.info("Iteration 0: starting combustion");
        log.warn("input entry twrite_post not found");
        log.error("coolant simulation failed 6 consecutive attempts");

        let out = fs::read_to_string(log.out_path()).expect("stdout");
        let err = fs::read_to_string(log.err_path()).expect("stderr");
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("] Iteration 0: starting combustion"));
        assert!(err.contains("] Warning: input entry twrite_post not found"));
        assert!(err.contains("] Error: coolant simulation failed"));
    }
}
