//! Idempotent filesystem primitives used by recovery and the pipeline.
//!
//! Every helper is safe to replay after a kill: moves of an absent source are
//! a logged no-op and never touch the destination.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Files left behind by a crashed solver run.
pub const ERROR_ARTIFACTS: &[&str] = &["abort_trace*", "*.err"];
/// Markers the solver writes while running (`converge.done` included).
pub const TRANSIENT_MARKERS: &[&str] = &["*.done", "*.start"];
/// Solver output kept per iteration under `results/<time>/`.
pub const SOLVER_OUTPUTS: &[&str] = &["*.out", "*.echo", "*.log", "*.h5", "out0", "output"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Source and destination are the same path.
    SameFile,
    /// Source absent; typically already moved by an earlier attempt.
    SourceMissing,
}

/// Move `src` to `dst`, replacing `dst` if present.
pub fn move_path(src: &Path, dst: &Path) -> Result<MoveOutcome> {
    if src == dst {
        return Ok(MoveOutcome::SameFile);
    }
    if !src.exists() {
        warn!(src = %src.display(), dst = %dst.display(), "move source missing; skipping");
        return Ok(MoveOutcome::SourceMissing);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    remove_path(dst)?;
    fs::rename(src, dst)
        .with_context(|| format!("move {} to {}", src.display(), dst.display()))?;
    debug!(src = %src.display(), dst = %dst.display(), "moved");
    Ok(MoveOutcome::Moved)
}

/// Copy a file, replacing `dst`. Copying a path onto itself is a no-op.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if src == dst {
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::copy(src, dst).with_context(|| format!("copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Replace the contents of `path` through `<name>.tmp` in the same directory.
///
/// A kill leaves either the old file or the new one, never a truncated mix.
pub fn replace_contents(path: &Path, contents: &str) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Remove a file or directory tree. Returns whether anything was removed.
pub fn remove_path(path: &Path) -> Result<bool> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(false);
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
    } else {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(true)
}

/// Entries directly inside `dir` matching any of `patterns`, sorted.
pub fn matching(dir: &Path, patterns: &[&str]) -> Result<Vec<PathBuf>> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut found = Vec::new();
    for pattern in patterns {
        let full = format!("{base}/{pattern}");
        let paths = glob::glob(&full).with_context(|| format!("invalid glob {full}"))?;
        for path in paths {
            let path = path.with_context(|| format!("read glob match for {full}"))?;
            if !found.contains(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Remove every entry in `dir` matching `patterns`. Returns the count removed.
pub fn remove_matching(dir: &Path, patterns: &[&str]) -> Result<usize> {
    let mut removed = 0;
    for path in matching(dir, patterns)? {
        if remove_path(&path)? {
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(dir = %dir.display(), removed, "removed matching files");
    }
    Ok(removed)
}

/// Whether `dir` exists and contains at least one entry.
pub fn has_entries(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let mut entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    Ok(entries.next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_replaces_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("a.map");
        let dst = temp.path().join("archive/a.map");
        fs::create_dir_all(dst.parent().expect("parent")).expect("mkdir");
        fs::write(&src, "new").expect("write");
        fs::write(&dst, "old").expect("write");

        assert_eq!(move_path(&src, &dst).expect("move"), MoveOutcome::Moved);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).expect("read"), "new");
    }

    /// Replaying a completed move must keep the destination intact.
    #[test]
    fn move_with_missing_source_keeps_destination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("a.map");
        let dst = temp.path().join("b.map");
        fs::write(&dst, "kept").expect("write");

        assert_eq!(move_path(&src, &dst).expect("move"), MoveOutcome::SourceMissing);
        assert_eq!(fs::read_to_string(&dst).expect("read"), "kept");
    }

    #[test]
    fn move_onto_itself_is_noop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("restart.rst");
        fs::write(&path, "1.0").expect("write");
        assert_eq!(move_path(&path, &path).expect("move"), MoveOutcome::SameFile);
        assert!(path.exists());
    }

    #[test]
    fn remove_matching_handles_files_and_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::write(dir.join("converge.done"), "").expect("write");
        fs::write(dir.join("run.start"), "").expect("write");
        fs::write(dir.join("abort_trace.0"), "").expect("write");
        fs::write(dir.join("slurm.err"), "").expect("write");
        fs::write(dir.join("inputs.in"), "").expect("write");
        fs::create_dir(dir.join("output")).expect("mkdir");
        fs::write(dir.join("output/data"), "").expect("write");

        assert_eq!(remove_matching(dir, TRANSIENT_MARKERS).expect("remove"), 2);
        assert_eq!(remove_matching(dir, ERROR_ARTIFACTS).expect("remove"), 2);
        assert_eq!(remove_matching(dir, &["output"]).expect("remove"), 1);
        assert_eq!(remove_matching(dir, ERROR_ARTIFACTS).expect("remove"), 0);
        assert!(dir.join("inputs.in").exists());
    }

    #[test]
    fn replace_contents_leaves_no_temp_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("transfer.out");
        fs::write(&path, "old\n").expect("write");
        replace_contents(&path, "new\n").expect("replace");
        assert_eq!(fs::read_to_string(&path).expect("read"), "new\n");
        assert!(!temp.path().join("transfer.out.tmp").exists());
    }

    #[test]
    fn has_entries_reports_empty_and_missing_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("results");
        assert!(!has_entries(&dir).expect("missing"));
        fs::create_dir(&dir).expect("mkdir");
        assert!(!has_entries(&dir).expect("empty"));
        fs::write(dir.join("845"), "").expect("write");
        assert!(has_entries(&dir).expect("non-empty"));
    }
}
