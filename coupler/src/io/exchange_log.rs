//! Exchange log (`transfer.out`) fragments written by the solver.
//!
//! Each solver restart starts a new numbered fragment. Records begin with a
//! `Crank = <time> (DEG)` line. The first line of every fragment is a header.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::debug;

use crate::errors::ConsistencyError;
use crate::io::files::replace_contents;
use crate::io::numbered::{NumberedFile, list_numbered};

pub const LOG_STEM: &str = "transfer";
pub const LOG_EXT: &str = "out";
pub const CANONICAL_LOG: &str = "transfer.out";

/// A fragment needs more lines than this to hold at least one record.
const DATA_LINE_THRESHOLD: usize = 20;
/// Start of the last complete record in a coolant fragment.
const LAST_RECORD_MARKER: &str = "Ave Gas Temperature";
const COOLANT_HEADER: &str = " # CONVERGE Release Build 2.4.33/  Nov 13, 2020       Run Date:Fri Dec 11 13:41:27 2020\n\n Crank                  =  1.0000000000000        (DEG)\n";

static RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Crank\s*=\s*([-+0-9.eE]+)").expect("record marker pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimOutcome {
    /// No record was later than the cut time.
    Unchanged,
    Trimmed,
    /// Every record was later than the cut time; the fragment was removed.
    Deleted,
}

/// Fragments in `dir`, canonical first then ascending number.
pub fn list_fragments(dir: &Path) -> Result<Vec<NumberedFile>> {
    list_numbered(dir, LOG_STEM, LOG_EXT)
}

/// Whether a fragment holds record data (more than the header lines).
pub fn has_data(path: &Path) -> Result<bool> {
    let contents = read(path)?;
    Ok(contents.lines().count() > DATA_LINE_THRESHOLD)
}

/// Timestamp of a record marker line.
pub fn record_time(line: &str) -> Option<f64> {
    RECORD_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Timestamps of every record in a fragment, in file order.
pub fn record_times(path: &Path) -> Result<Vec<f64>> {
    Ok(read(path)?.lines().filter_map(record_time).collect())
}

/// Drop every record stamped later than `resume_time`.
pub fn trim_after(path: &Path, resume_time: f64) -> Result<TrimOutcome> {
    trim_where(path, |time| time > resume_time)
}

/// Drop every record stamped at or after `time`.
pub fn trim_from(path: &Path, time: f64) -> Result<TrimOutcome> {
    trim_where(path, |record| record >= time)
}

/// Cut the fragment at the first record matching `drop`.
///
/// The rewrite goes through a temp file, so a kill never leaves the only copy
/// of the records truncated.
fn trim_where(path: &Path, drop: impl Fn(f64) -> bool) -> Result<TrimOutcome> {
    let contents = read(path)?;
    let lines: Vec<&str> = contents.lines().collect();
    let mut first_record = None;
    let mut cut = None;
    for (index, line) in lines.iter().enumerate() {
        let Some(time) = record_time(line) else {
            continue;
        };
        first_record.get_or_insert(index);
        if drop(time) {
            cut = Some(index);
            break;
        }
    }
    let Some(cut) = cut else {
        return Ok(TrimOutcome::Unchanged);
    };
    if Some(cut) == first_record {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        debug!(path = %path.display(), "exchange log fragment emptied; removed");
        return Ok(TrimOutcome::Deleted);
    }
    let mut kept = lines[..cut].join("\n");
    kept.push('\n');
    replace_contents(path, &kept)?;
    debug!(path = %path.display(), kept_lines = cut, "exchange log fragment trimmed");
    Ok(TrimOutcome::Trimmed)
}

/// Timestamp of the first record in a fragment.
pub fn first_record_time(path: &Path) -> Result<Option<f64>> {
    Ok(read(path)?.lines().find_map(record_time))
}

/// Whether `dst` already ends with the header-stripped body of `src`.
pub fn ends_with_body_of(dst: &Path, src: &Path) -> Result<bool> {
    let source = read(src)?;
    let body = body_of(&source);
    if body.is_empty() {
        return Ok(false);
    }
    Ok(read(dst)?.ends_with(body))
}

/// Append `src` without its header line to `dst`.
pub fn append_without_header(src: &Path, dst: &Path) -> Result<()> {
    let contents = read(src)?;
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(dst)
        .with_context(|| format!("open {}", dst.display()))?;
    file.write_all(body_of(&contents).as_bytes())
        .with_context(|| format!("append to {}", dst.display()))?;
    Ok(())
}

fn body_of(contents: &str) -> &str {
    contents.split_once('\n').map_or("", |(_, rest)| rest)
}

/// Build the combustion exchange log for mapping into `out`.
///
/// At most a canonical and one numbered fragment may exist (recovery folds
/// older fragments into the canonical one); they are concatenated.
pub fn assemble_combustion(dir: &Path, out: &Path) -> Result<()> {
    let fragments = list_fragments(dir)?;
    match fragments.as_slice() {
        [] => Err(anyhow!("no exchange log found in {}", dir.display())),
        [only] => {
            if !has_data(&only.path)? {
                return Err(anyhow!("{} has no data", only.path.display()));
            }
            copy(&only.path, out)
        }
        [first, second] => {
            if !first.is_canonical() {
                return Err(ConsistencyError::NumberedFragmentsWithoutCanonical {
                    dir: dir.to_path_buf(),
                }
                .into());
            }
            match (has_data(&first.path)?, has_data(&second.path)?) {
                (false, false) => Err(anyhow!(
                    "neither exchange log fragment in {} has data",
                    dir.display()
                )),
                (true, false) => copy(&first.path, out),
                (false, true) => copy(&second.path, out),
                (true, true) => {
                    copy(&first.path, out)?;
                    append_without_header(&second.path, out)
                }
            }
        }
        more => Err(ConsistencyError::TooManyLogFragments {
            dir: dir.to_path_buf(),
            count: more.len(),
        }
        .into()),
    }
}

/// Build the coolant exchange log for mapping into `out`.
///
/// Only the last record of the newest fragment with data is used, preceded
/// by a synthetic header.
pub fn assemble_coolant(dir: &Path, out: &Path) -> Result<()> {
    let fragments = list_fragments(dir)?;
    if fragments.is_empty() {
        return Err(anyhow!("no exchange log found in {}", dir.display()));
    }
    let mut source = None;
    for fragment in fragments.iter().rev() {
        if has_data(&fragment.path)? {
            source = Some(fragment);
            break;
        }
    }
    let source =
        source.ok_or_else(|| anyhow!("no exchange log in {} contains data", dir.display()))?;

    let contents = read(&source.path)?;
    let start = contents
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(LAST_RECORD_MARKER))
        .map(|(index, _)| index)
        .last()
        .ok_or_else(|| {
            anyhow!(
                "{} has no {LAST_RECORD_MARKER:?} record",
                source.path.display()
            )
        })?;

    let mut assembled = String::from(COOLANT_HEADER);
    for line in contents.lines().skip(start) {
        assembled.push_str(line);
        assembled.push('\n');
    }
    fs::write(out, assembled).with_context(|| format!("write {}", out.display()))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn copy(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst).with_context(|| format!("copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}
