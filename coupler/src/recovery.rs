//! Checkpoint discovery and resume preparation after a failed or killed run.
//!
//! Checkpoints are always ranked by the simulation time embedded in them,
//! never by the number in their file name: a restarted solver may write a
//! lower-numbered file that is newer than an existing higher-numbered one.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::context::JobContext;
use crate::core::types::Phase;
use crate::errors::{ConsistencyError, FatalSimError};
use crate::io::checkpoint::{CANONICAL_CHECKPOINT, CheckpointReader, list_checkpoints};
use crate::io::exchange_log::{
    CANONICAL_LOG, TrimOutcome, append_without_header, ends_with_body_of, first_record_time,
    has_data, list_fragments, trim_after, trim_from,
};
use crate::io::files::{move_path, remove_path};
use crate::io::input_deck::{InputUpdates, update_inputs};
use crate::io::numbered::NumberedFile;
use crate::state::RunState;

/// Largest tolerated distance between the combustion checkpoint and the stop
/// time when resuming the coolant phase.
const COOLANT_RESUME_TOLERANCE: f64 = 1.0;

/// Latest checkpoint in `dir` by embedded time.
///
/// A single candidate is returned without reading it. Ties prefer the
/// canonical file, then the lower number.
pub fn locate_latest_checkpoint(
    dir: &Path,
    reader: &dyn CheckpointReader,
) -> Result<Option<NumberedFile>> {
    let candidates = list_checkpoints(dir)?;
    if candidates.len() <= 1 {
        return Ok(candidates.into_iter().next());
    }
    let mut best: Option<(f64, NumberedFile)> = None;
    // Candidates arrive canonical first then ascending, so a strict
    // comparison keeps the tie-break order.
    for candidate in candidates {
        let time = reader.embedded_time(&candidate.path)?;
        debug!(file = %candidate.file_name(), time, "checkpoint candidate");
        if best.as_ref().is_none_or(|(best_time, _)| time > *best_time) {
            best = Some((time, candidate));
        }
    }
    Ok(best.map(|(_, file)| file))
}

/// Rename the latest checkpoint to `restart.rst`. Returns its path.
pub fn promote_latest_checkpoint(
    dir: &Path,
    reader: &dyn CheckpointReader,
) -> Result<Option<PathBuf>> {
    let Some(latest) = locate_latest_checkpoint(dir, reader)? else {
        return Ok(None);
    };
    let canonical = dir.join(CANONICAL_CHECKPOINT);
    move_path(&latest.path, &canonical)?;
    Ok(Some(canonical))
}

/// Prepare `phase` to resume after failed attempt number `attempt`.
pub fn prepare_resume(ctx: &JobContext, phase: Phase, attempt: u32) -> Result<()> {
    let dir = ctx.paths.phase_dir(phase);
    let canonical = promote_latest_checkpoint(dir, ctx.reader.as_ref())?.ok_or_else(|| {
        FatalSimError::NoCheckpoint {
            dir: dir.to_path_buf(),
        }
    })?;
    let restart_number = match phase {
        Phase::Combustion => attempt + 1,
        Phase::Coolant => attempt,
    };
    update_inputs(
        dir,
        InputUpdates::new()
            .set("restart_number", restart_number)
            .set("restart_flag", 1i64)
            .set("map_flag", "OFF"),
    )?;
    if phase == Phase::Combustion {
        let resume_time = ctx.reader.embedded_time(&canonical)?;
        reconcile_log(dir, resume_time)?;
        info!(%phase, attempt, resume_time, "prepared resume");
    } else {
        info!(%phase, attempt, "prepared resume");
    }
    Ok(())
}

/// Fold exchange-log fragments so that at most the canonical and one
/// numbered fragment remain and no record is later than `resume_time`.
///
/// A numbered fragment restarts from a checkpoint, so canonical records at or
/// after its first record are superseded by it. Replays are detected by
/// content: the append is skipped only when the canonical fragment already
/// ends with the numbered fragment's body.
pub fn reconcile_log(dir: &Path, resume_time: f64) -> Result<()> {
    let fragments = list_fragments(dir)?;
    match fragments.as_slice() {
        [] => Ok(()),
        [only] if only.is_canonical() => {
            trim_after(&only.path, resume_time)?;
            Ok(())
        }
        [only] => {
            if trim_after(&only.path, resume_time)? != TrimOutcome::Deleted {
                move_path(&only.path, &dir.join(CANONICAL_LOG))?;
            }
            Ok(())
        }
        [canonical, numbered] if canonical.is_canonical() => {
            let outcome = trim_after(&numbered.path, resume_time)?;
            if outcome == TrimOutcome::Deleted || !has_data(&numbered.path)? {
                remove_path(&numbered.path)?;
                trim_after(&canonical.path, resume_time)?;
                return Ok(());
            }
            if ends_with_body_of(&canonical.path, &numbered.path)? {
                debug!(fragment = %numbered.file_name(), "fragment already merged");
            } else {
                let restart = first_record_time(&numbered.path)?
                    .map_or(resume_time, |first| first.min(resume_time));
                if trim_from(&canonical.path, restart)? == TrimOutcome::Deleted {
                    move_path(&numbered.path, &dir.join(CANONICAL_LOG))?;
                    return Ok(());
                }
                append_without_header(&numbered.path, &canonical.path)?;
            }
            remove_path(&numbered.path)?;
            Ok(())
        }
        [_, _] => Err(ConsistencyError::NumberedFragmentsWithoutCanonical {
            dir: dir.to_path_buf(),
        }
        .into()),
        more => Err(ConsistencyError::TooManyLogFragments {
            dir: dir.to_path_buf(),
            count: more.len(),
        }
        .into()),
    }
}

/// Checks and preparation before re-entering a phase whose attempt was
/// interrupted by a kill.
pub fn prepare_mid_run_resume(ctx: &JobContext, state: &RunState, phase: Phase) -> Result<()> {
    let attempts = state.attempts(phase);
    if state.ignore_first_checkpoint.get(phase) {
        // The interrupted attempt started from mapped data; re-run it as is.
        ctx.log.info(&format!(
            "Re-running initial {phase} attempt from mapped checkpoint"
        ));
        return Ok(());
    }
    match phase {
        Phase::Combustion => resume_combustion(ctx, state, attempts),
        Phase::Coolant => resume_coolant(ctx, state, attempts),
    }
}

fn resume_combustion(ctx: &JobContext, state: &RunState, attempts: u32) -> Result<()> {
    let dir = ctx.paths.phase_dir(Phase::Combustion);
    let latest = locate_latest_checkpoint(dir, ctx.reader.as_ref())?.ok_or_else(|| {
        FatalSimError::NoCheckpoint {
            dir: dir.to_path_buf(),
        }
    })?;
    let time = ctx
        .reader
        .embedded_time(&latest.path)
        .with_context(|| format!("read time of {}", latest.path.display()))?;
    let stop = state.stop_time()?;
    if time > stop {
        return Err(FatalSimError::CheckpointPastStop { actual: time, stop }.into());
    }
    if stop - time > ctx.settings.phase_duration + 1.0 {
        ctx.log.warn(&format!(
            "Most recent combustion checkpoint is for t = {time}, while the run should have started at {}; it will run until t = {stop}",
            stop - ctx.settings.phase_duration
        ));
    }
    ctx.log.info(&format!(
        "Restarting combustion of iteration {} at t = {time} with end time {stop}",
        state.iteration
    ));
    prepare_resume(ctx, Phase::Combustion, attempts)
}

fn resume_coolant(ctx: &JobContext, state: &RunState, attempts: u32) -> Result<()> {
    let combustion_checkpoint = ctx.paths.canonical_checkpoint(Phase::Combustion);
    if !combustion_checkpoint.exists() {
        return Err(FatalSimError::NoCheckpoint {
            dir: ctx.paths.phase_dir(Phase::Combustion).to_path_buf(),
        }
        .into());
    }
    let time = ctx.reader.embedded_time(&combustion_checkpoint)?;
    let stop = state.stop_time()?;
    if (stop - time).abs() > COOLANT_RESUME_TOLERANCE {
        return Err(FatalSimError::TimeMismatch {
            phase: Phase::Combustion,
            expected: stop,
            actual: time,
        }
        .into());
    }

    let dir = ctx.paths.phase_dir(Phase::Coolant);
    let updates = match promote_latest_checkpoint(dir, ctx.reader.as_ref())? {
        Some(_) => InputUpdates::new()
            .set("restart_number", attempts)
            .set("restart_flag", 1i64)
            .set("map_flag", "OFF"),
        None => {
            warn!("no coolant checkpoint; restarting coolant from its initial conditions");
            InputUpdates::new()
                .set("restart_number", 1i64)
                .set("restart_flag", 0i64)
                .set("map_flag", "OFF")
        }
    };
    update_inputs(dir, updates)?;
    ctx.log.info(&format!(
        "Restarting coolant of iteration {} (attempt {attempts})",
        state.iteration
    ));
    Ok(())
}
