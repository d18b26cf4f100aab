//! Convergence evaluation of a phase's freshly mapped boundary samples.

use anyhow::Result;
use tracing::{debug, warn};

use crate::context::JobContext;
use crate::core::convergence::{boundary_converged, diff_samples};
use crate::core::types::Phase;
use crate::io::boundary_sample::load_samples;
use crate::io::convergence_log::{
    BoundaryOutcome, BoundaryRecord, ConvergenceRecord, append_record,
};

/// Compare the fresh samples of `phase` against the previous iteration's
/// archive and append the result to the phase's convergence log.
///
/// Iteration 0 has nothing to compare against and is never converged.
pub fn evaluate(ctx: &JobContext, phase: Phase, iteration: u32) -> Result<ConvergenceRecord> {
    let mut boundaries = Vec::new();
    if iteration > 0 {
        for boundary in &ctx.settings.boundaries {
            boundaries.push(BoundaryRecord {
                boundary: boundary.clone(),
                outcome: compare_boundary(ctx, phase, boundary)?,
            });
        }
    }
    let converged = !boundaries.is_empty()
        && boundaries.iter().all(|record| {
            matches!(
                record.outcome,
                BoundaryOutcome::Compared {
                    converged: true,
                    ..
                }
            )
        });
    let record = ConvergenceRecord {
        iteration,
        boundaries,
        converged,
    };
    append_record(
        &ctx.paths.convergence_log(phase),
        phase,
        &record,
        &ctx.settings.tolerances,
    )?;
    debug!(%phase, iteration, converged, "convergence evaluated");
    Ok(record)
}

fn compare_boundary(ctx: &JobContext, phase: Phase, boundary: &str) -> Result<BoundaryOutcome> {
    let archived = ctx.paths.archived_sample(phase, boundary);
    if !archived.exists() {
        ctx.log.warn(&format!(
            "No previous {phase} data for boundary {boundary}; treating as not converged"
        ));
        return Ok(BoundaryOutcome::NoPrevious);
    }
    let previous = load_samples(&archived)?;
    let current = load_samples(&ctx.paths.mapped_sample(boundary))?;
    let Some(stats) = diff_samples(&previous, &current) else {
        ctx.log.warn(&format!(
            "Boundary {boundary} has no points matching the previous iteration"
        ));
        return Ok(BoundaryOutcome::NoComparablePoints);
    };
    if stats.dropped > 0 {
        warn!(
            %phase,
            boundary,
            dropped = stats.dropped,
            "points with mismatched coordinates dropped from comparison"
        );
        ctx.log.warn(&format!(
            "{} points of boundary {boundary} do not match the previous iteration and were skipped",
            stats.dropped
        ));
    }
    let converged = boundary_converged(&stats, phase, &ctx.settings.tolerances);
    Ok(BoundaryOutcome::Compared { stats, converged })
}
