//! Append-only convergence logs (`combustionConvergence.txt`, `coolantConvergence.txt`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::core::convergence::{DiffStats, Tolerances, quantity_converged, relevant_quantities};
use crate::core::types::Phase;
use crate::io::files::replace_contents;

const HEADER_PREFIX: &str = "Convergence Data for";

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Iteration (\d+) result: (Converged|Not Converged)\s*$")
        .expect("verdict pattern is valid")
});

/// Outcome of comparing one boundary against the previous iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundaryOutcome {
    Compared { stats: DiffStats, converged: bool },
    /// No archived sample from the previous iteration.
    NoPrevious,
    /// Every row was dropped for mismatched coordinates.
    NoComparablePoints,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRecord {
    pub boundary: String,
    pub outcome: BoundaryOutcome,
}

/// One evaluation, appended once per iteration per phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceRecord {
    pub iteration: u32,
    pub boundaries: Vec<BoundaryRecord>,
    pub converged: bool,
}

fn verdict(converged: bool) -> &'static str {
    if converged { "Converged" } else { "Not Converged" }
}

fn render(phase: Phase, record: &ConvergenceRecord, tolerances: &Tolerances) -> String {
    let mut out = format!("\nIteration Number {}:\n", record.iteration);
    if record.boundaries.is_empty() {
        out.push_str("\tno previous iteration to compare against\n");
    }
    for entry in &record.boundaries {
        match &entry.outcome {
            BoundaryOutcome::NoPrevious => out.push_str(&format!(
                "\t{} Not Converged: no previous iteration data\n",
                entry.boundary
            )),
            BoundaryOutcome::NoComparablePoints => out.push_str(&format!(
                "\t{} Not Converged: no comparable points\n",
                entry.boundary
            )),
            BoundaryOutcome::Compared { stats, converged } => {
                out.push_str(&format!(
                    "\t{} {}: compared {} points, dropped {}\n",
                    entry.boundary,
                    verdict(*converged),
                    stats.compared,
                    stats.dropped
                ));
                for q in relevant_quantities(phase) {
                    let i = q.index();
                    out.push_str(&format!(
                        "\t\t{} ({}): min = {}, max = {}, avg = {}\n",
                        q.label(),
                        verdict(quantity_converged(stats, *q, tolerances)),
                        stats.min[i],
                        stats.max[i],
                        stats.avg[i]
                    ));
                }
            }
        }
    }
    out.push_str(&format!(
        "Iteration {} result: {}\n",
        record.iteration,
        verdict(record.converged)
    ));
    out
}

fn header(phase: Phase) -> String {
    format!("{HEADER_PREFIX} {phase} Simulations\n")
}

/// Append `record` to the phase's log, creating it with a header if needed.
///
/// A record torn by a kill mid-append is cut off first, so a replay leaves
/// exactly one complete copy.
pub fn append_record(
    path: &Path,
    phase: Phase,
    record: &ConvergenceRecord,
    tolerances: &Tolerances,
) -> Result<()> {
    let kept = drop_torn_tail(path)?;
    let mut buf = if kept == 0 { header(phase) } else { String::new() };
    buf.push_str(&render(phase, record, tolerances));
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(buf.as_bytes())
        .with_context(|| format!("append to {}", path.display()))?;
    file.flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

/// Cut anything after the last complete verdict line (or the header line).
/// Returns the number of bytes kept.
fn drop_torn_tail(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Ok(0);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut kept = 0;
    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        offset += line.len();
        let Some(text) = line.strip_suffix('\n') else {
            break;
        };
        if text.starts_with(HEADER_PREFIX) || VERDICT_RE.is_match(text) {
            kept = offset;
        }
    }
    if kept < contents.len() {
        warn!(path = %path.display(), dropped = contents.len() - kept, "dropping torn convergence record");
        replace_contents(path, &contents[..kept])?;
    }
    Ok(kept)
}

/// Verdict already logged for `iteration`, if any (the last one wins).
pub fn recorded_verdict(path: &Path, iteration: u32) -> Result<Option<bool>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut found = None;
    for line in contents.lines() {
        let Some(caps) = VERDICT_RE.captures(line) else {
            continue;
        };
        if caps[1].parse::<u32>().ok() == Some(iteration) {
            found = Some(&caps[2] == "Converged");
        }
    }
    Ok(found)
}
