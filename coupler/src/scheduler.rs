//! Top-level iteration loop for `coupler run`.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::context::JobContext;
use crate::core::classifier::classify_restart;
use crate::core::types::{Phase, RestartPoint};
use crate::errors::{ConsistencyError, FatalSimError, is_fatal};
use crate::io::mapper::Mapper;
use crate::io::solver::Solver;
use crate::phase::PhaseExecutor;
use crate::pipeline::PostProcessPipeline;
use crate::start::apply_final_overrides;
use crate::state::{PhaseCommit, RunState};

/// What the scheduler does next, derived from the persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    RunCombustion,
    RunCoolant,
    /// The single pass after convergence; carries the phase it is in.
    FinalCycle(Phase),
    Done,
    Failed,
}

/// Reason why `run_job` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStop {
    Done,
    /// A fatal error set the sticky flag (or it was already set).
    Failed { message: String },
}

/// Summary of a `run_job` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub phases_run: u32,
    pub stop: JobStop,
}

/// One committed phase, reported through the `on_phase` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub iteration: u32,
    /// `None` when only the tail of the pipeline was replayed.
    pub attempts: Option<u32>,
    pub commit: PhaseCommit,
}

/// Derive the scheduler state from persisted fields.
pub fn derive_state(state: &RunState) -> Result<SchedulerState, ConsistencyError> {
    if state.sim_error {
        return Ok(SchedulerState::Failed);
    }
    let phase = match classify_restart(state)? {
        RestartPoint::AlreadyDone => return Ok(SchedulerState::Done),
        RestartPoint::New | RestartPoint::ResumeCombustion => Phase::Combustion,
        RestartPoint::ResumeCoolant => Phase::Coolant,
        RestartPoint::ResumePostProcess(cursor) => cursor.phase,
    };
    Ok(if state.final_cycle.running {
        SchedulerState::FinalCycle(phase)
    } else if phase == Phase::Combustion {
        SchedulerState::RunCombustion
    } else {
        SchedulerState::RunCoolant
    })
}

/// Drive an initialized job until it is done or fails.
///
/// Fatal errors (see [`is_fatal`]) set the sticky flag and end the loop with
/// [`JobStop::Failed`]; any other error is returned unchanged and leaves the
/// persisted state where it was, so the job can simply be resubmitted.
#[instrument(skip_all, fields(root = %ctx.paths.root.display()))]
pub fn run_job<S: Solver, M: Mapper, F: FnMut(&PhaseReport)>(
    ctx: &JobContext,
    state: &mut RunState,
    solver: &S,
    mapper: &M,
    mut on_phase: F,
) -> Result<JobOutcome> {
    let mut phases_run = 0u32;
    loop {
        let next = match derive_state(state) {
            Ok(next) => next,
            Err(err) => return fail(ctx, state, phases_run, err.into()),
        };
        debug!(?next, iteration = state.iteration, "scheduler turn");
        let (phase, final_cycle) = match next {
            SchedulerState::Done => {
                ctx.log.info("Coupled simulation complete");
                return Ok(JobOutcome {
                    phases_run,
                    stop: JobStop::Done,
                });
            }
            SchedulerState::Failed => {
                let message = FatalSimError::StickyError.to_string();
                ctx.log.error(&message);
                return Ok(JobOutcome {
                    phases_run,
                    stop: JobStop::Failed { message },
                });
            }
            SchedulerState::RunCombustion => (Phase::Combustion, false),
            SchedulerState::RunCoolant => (Phase::Coolant, false),
            SchedulerState::FinalCycle(phase) => (phase, true),
        };

        match advance(ctx, state, solver, mapper, phase, final_cycle) {
            Ok(report) => {
                phases_run += 1;
                log_commit(ctx, &report);
                on_phase(&report);
            }
            Err(err) if is_fatal(&err) => return fail(ctx, state, phases_run, err),
            Err(err) => return Err(err),
        }
    }
}

fn advance<S: Solver, M: Mapper>(
    ctx: &JobContext,
    state: &mut RunState,
    solver: &S,
    mapper: &M,
    phase: Phase,
    final_cycle: bool,
) -> Result<PhaseReport> {
    let iteration = state.iteration;
    let pipeline = PostProcessPipeline::new(ctx, mapper);
    if let Some(cursor) = state.post_process {
        let run = pipeline.resume_from(state, cursor)?;
        return Ok(PhaseReport {
            phase: cursor.phase,
            iteration,
            attempts: None,
            commit: run.commit,
        });
    }
    if final_cycle && phase == Phase::Combustion {
        apply_final_overrides(ctx)?;
    }
    let executed = PhaseExecutor::new(ctx, solver).run(state, phase)?;
    let run = pipeline.run(state, phase)?;
    Ok(PhaseReport {
        phase,
        iteration,
        attempts: Some(executed.attempts),
        commit: run.commit,
    })
}

fn log_commit(ctx: &JobContext, report: &PhaseReport) {
    let message = match report.commit {
        PhaseCommit::AdvanceToCoolant => return,
        PhaseCommit::NextIteration => {
            format!("Iteration {} not converged; starting next iteration", report.iteration)
        }
        PhaseCommit::FinalCycleEntered => {
            format!("Iteration {} converged; starting final cycle", report.iteration)
        }
        PhaseCommit::Done => format!("Iteration {} finished", report.iteration),
    };
    info!(iteration = report.iteration, commit = ?report.commit, "iteration committed");
    ctx.log.info(&message);
}

fn fail(
    ctx: &JobContext,
    state: &mut RunState,
    phases_run: u32,
    err: anyhow::Error,
) -> Result<JobOutcome> {
    ctx.record_fatal(state, &err)?;
    Ok(JobOutcome {
        phases_run,
        stop: JobStop::Failed {
            message: format!("{err:#}"),
        },
    })
}
