//! Bounded-retry execution of one phase's solver run.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::context::JobContext;
use crate::core::types::Phase;
use crate::errors::FatalSimError;
use crate::io::files::{ERROR_ARTIFACTS, remove_matching, remove_path};
use crate::io::solver::{Solver, SolverRequest};
use crate::recovery::{locate_latest_checkpoint, prepare_mid_run_resume, prepare_resume};
use crate::state::RunState;

/// Largest accepted distance between the combustion stop time and the time
/// of the checkpoint the run left behind.
const STOP_TIME_TOLERANCE: f64 = 0.5;

/// Result of a successful phase run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseRun {
    pub phase: Phase,
    /// Attempts it took, including attempts made before a restart.
    pub attempts: u32,
}

pub struct PhaseExecutor<'a, S: Solver> {
    ctx: &'a JobContext,
    solver: &'a S,
}

impl<'a, S: Solver> PhaseExecutor<'a, S> {
    pub fn new(ctx: &'a JobContext, solver: &'a S) -> Self {
        Self { ctx, solver }
    }

    /// Run `phase` until its solver signals completion.
    ///
    /// Each attempt is counted and persisted before the solver starts. After
    /// `max_restarts` retries the run fails with [`FatalSimError`]; the
    /// counter is left in place so the failure is visible in the state.
    #[instrument(skip_all, fields(%phase, iteration = state.iteration))]
    pub fn run(&self, state: &mut RunState, phase: Phase) -> Result<PhaseRun> {
        let ctx = self.ctx;
        let dir = ctx.paths.phase_dir(phase);
        if state.attempts(phase) > 0 {
            prepare_mid_run_resume(ctx, state, phase)?;
        }
        ctx.log.info(&format!(
            "Iteration {}: starting {phase} simulation",
            state.iteration
        ));

        loop {
            let attempt = state.attempts(phase) + 1;
            state.set_attempts(phase, attempt);
            ctx.persist(state)?;

            let sentinel = ctx.paths.sentinel(phase);
            remove_path(&sentinel)?;
            debug!(attempt, "starting solver attempt");
            self.solver
                .run(&SolverRequest {
                    phase,
                    workdir: dir.to_path_buf(),
                    log_path: ctx.paths.solver_log(phase),
                })
                .with_context(|| format!("{phase} attempt {attempt}"))?;

            if state.ignore_first_checkpoint.get(phase) {
                remove_path(&ctx.paths.canonical_checkpoint(phase))?;
                state.ignore_first_checkpoint.set(phase, false);
                ctx.persist(state)?;
            }

            if sentinel.exists() {
                break;
            }

            remove_matching(dir, ERROR_ARTIFACTS)?;
            if attempt > ctx.settings.max_restarts {
                return Err(FatalSimError::RetriesExhausted {
                    phase,
                    attempts: attempt,
                    max_restarts: ctx.settings.max_restarts,
                }
                .into());
            }
            ctx.log.warn(&format!(
                "{} simulation did not complete on attempt {attempt}; restarting from last checkpoint",
                phase.title()
            ));
            prepare_resume(ctx, phase, attempt)?;
        }

        if phase == Phase::Combustion {
            self.check_stop_time(state)?;
        }
        let attempts = state.attempts(phase);
        ctx.log.info(&format!(
            "Iteration {}: {phase} simulation completed after {attempts} attempt(s)",
            state.iteration
        ));
        Ok(PhaseRun { phase, attempts })
    }

    /// The completed combustion run must have reached its stop time.
    fn check_stop_time(&self, state: &RunState) -> Result<()> {
        let dir = self.ctx.paths.phase_dir(Phase::Combustion);
        let latest = locate_latest_checkpoint(dir, self.ctx.reader.as_ref())?.ok_or_else(|| {
            FatalSimError::NoCheckpoint {
                dir: dir.to_path_buf(),
            }
        })?;
        let actual = self.ctx.reader.embedded_time(&latest.path)?;
        let expected = state.stop_time()?;
        if (expected - actual).abs() > STOP_TIME_TOLERANCE {
            return Err(FatalSimError::TimeMismatch {
                phase: Phase::Combustion,
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::run_state::load_run_state;
    use crate::test_support::{JobFixture, ScriptedRun, ScriptedSolver};
    use std::fs;

    fn combustion_state() -> RunState {
        RunState {
            initialized: true,
            comb_stop_time: Some(845.0),
            ..RunState::default()
        }
    }

    #[test]
    fn successful_first_attempt() {
        let fixture = JobFixture::new().expect("fixture");
        let solver = ScriptedSolver::new(vec![ScriptedRun::completes_at(845.0)]);
        let mut state = combustion_state();

        let run = PhaseExecutor::new(fixture.ctx(), &solver)
            .run(&mut state, Phase::Combustion)
            .expect("run");
        assert_eq!(run.attempts, 1);
        assert_eq!(state.comb_attempts, 1);
        solver.assert_drained();
    }

    #[test]
    fn failed_attempt_retries_from_checkpoint() {
        let fixture = JobFixture::new().expect("fixture");
        let solver = ScriptedSolver::new(vec![
            ScriptedRun::crashes_at(Some(500.0)),
            ScriptedRun::completes_at(845.0),
        ]);
        let mut state = combustion_state();
        let dir = fixture.ctx().paths.phase_dir(Phase::Combustion).to_path_buf();

        let run = PhaseExecutor::new(fixture.ctx(), &solver)
            .run(&mut state, Phase::Combustion)
            .expect("run");
        assert_eq!(run.attempts, 2);
        assert!(dir.join("restart.rst").exists());
        assert!(!dir.join("abort_trace.txt").exists());
        // Prepared for the second attempt after the first failed.
        assert_eq!(fixture.input(Phase::Combustion, "restart_number"), "2");
        solver.assert_drained();
    }

    #[test]
    fn retries_are_bounded() {
        let fixture = JobFixture::new().expect("fixture");
        let max = fixture.ctx().settings.max_restarts;
        let runs = (0..=max)
            .map(|i| ScriptedRun::crashes_at(Some(200.0 + f64::from(i))))
            .collect();
        let solver = ScriptedSolver::new(runs);
        let mut state = combustion_state();

        let err = PhaseExecutor::new(fixture.ctx(), &solver)
            .run(&mut state, Phase::Combustion)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalSimError>(),
            Some(FatalSimError::RetriesExhausted { attempts, .. }) if *attempts == max + 1
        ));
        solver.assert_drained();
        let persisted = load_run_state(&fixture.ctx().paths.run_state_path).expect("load");
        assert_eq!(persisted.comb_attempts, max + 1);
    }

    #[test]
    fn stop_time_mismatch_is_fatal() {
        let fixture = JobFixture::new().expect("fixture");
        let solver = ScriptedSolver::new(vec![ScriptedRun::completes_at(800.0)]);
        let mut state = combustion_state();
        let err = PhaseExecutor::new(fixture.ctx(), &solver)
            .run(&mut state, Phase::Combustion)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalSimError>(),
            Some(FatalSimError::TimeMismatch { .. })
        ));
    }

    /// The checkpoint mapped at initialization is dropped after the first
    /// attempt so a retry cannot restart from it.
    #[test]
    fn ignored_first_checkpoint_is_removed_once() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let canonical = ctx.paths.canonical_checkpoint(Phase::Coolant);
        fs::write(&canonical, "0.0 s\n").expect("mapped checkpoint");
        let solver = ScriptedSolver::new(vec![ScriptedRun::completes_at(2.0)]);
        let mut state = RunState {
            initialized: true,
            comb_stop_time: Some(845.0),
            next_phase: Phase::Coolant,
            ..RunState::default()
        };
        state.ignore_first_checkpoint.set(Phase::Coolant, true);

        PhaseExecutor::new(ctx, &solver)
            .run(&mut state, Phase::Coolant)
            .expect("run");
        assert!(!canonical.exists());
        assert!(!state.ignore_first_checkpoint.get(Phase::Coolant));
    }
}
