//! Deterministic classification of where a (re)started job resumes.

use crate::core::types::{Phase, RestartPoint};
use crate::errors::ConsistencyError;
use crate::state::RunState;

/// Derive the restart point purely from persisted fields.
///
/// Rules apply in order:
/// 1. not initialized: `New`
/// 2. both attempt counters nonzero: consistency error
/// 3. pipeline cursor set: `ResumePostProcess`
/// 4. terminal converged state: `AlreadyDone`
/// 5. nonzero attempt counter: resume that phase
/// 6. otherwise resume `next_phase` with no attempt in flight
pub fn classify_restart(state: &RunState) -> Result<RestartPoint, ConsistencyError> {
    if !state.initialized {
        return Ok(RestartPoint::New);
    }
    if state.comb_attempts > 0 && state.cool_attempts > 0 {
        return Err(ConsistencyError::AmbiguousResumePoint {
            combustion: state.comb_attempts,
            coolant: state.cool_attempts,
        });
    }
    if let Some(cursor) = state.post_process {
        return Ok(RestartPoint::ResumePostProcess(cursor));
    }
    if state.is_done() {
        return Ok(RestartPoint::AlreadyDone);
    }
    if state.comb_attempts > 0 {
        return Ok(RestartPoint::ResumeCombustion);
    }
    if state.cool_attempts > 0 {
        return Ok(RestartPoint::ResumeCoolant);
    }
    Ok(match state.next_phase {
        Phase::Combustion => RestartPoint::ResumeCombustion,
        Phase::Coolant => RestartPoint::ResumeCoolant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PostStep, PostStepCursor};

    fn initialized() -> RunState {
        RunState {
            initialized: true,
            comb_stop_time: Some(845.0),
            ..RunState::default()
        }
    }

    #[test]
    fn uninitialized_state_is_new() {
        assert_eq!(
            classify_restart(&RunState::default()).expect("classify"),
            RestartPoint::New
        );
    }

    #[test]
    fn both_attempt_counters_is_inconsistent() {
        let state = RunState {
            comb_attempts: 1,
            cool_attempts: 2,
            ..initialized()
        };
        let err = classify_restart(&state).unwrap_err();
        assert!(matches!(
            err,
            ConsistencyError::AmbiguousResumePoint {
                combustion: 1,
                coolant: 2
            }
        ));
    }

    /// A kill during `RENAME_BOUNDARY_FILES` resumes exactly there.
    #[test]
    fn cursor_wins_over_attempts_and_convergence() {
        let cursor = PostStepCursor {
            phase: Phase::Combustion,
            step: PostStep::RenameBoundaryFiles,
        };
        let state = RunState {
            comb_attempts: 3,
            comb_converged: true,
            cool_converged: true,
            post_process: Some(cursor),
            ..initialized()
        };
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::ResumePostProcess(cursor)
        );
    }

    #[test]
    fn converged_boundary_without_final_cycle_is_done() {
        let state = RunState {
            comb_converged: true,
            cool_converged: true,
            ..initialized()
        };
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::AlreadyDone
        );
    }

    #[test]
    fn converged_boundary_with_pending_final_cycle_resumes_combustion() {
        let mut state = RunState {
            comb_converged: true,
            cool_converged: true,
            ..initialized()
        };
        state.final_cycle.has_final_step = true;
        state.final_cycle.running = true;
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::ResumeCombustion
        );
        state.final_cycle.running = false;
        state.final_cycle.completed = true;
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::AlreadyDone
        );
    }

    #[test]
    fn attempt_counters_select_phase() {
        let state = RunState {
            comb_attempts: 2,
            ..initialized()
        };
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::ResumeCombustion
        );
        let state = RunState {
            cool_attempts: 1,
            next_phase: Phase::Coolant,
            ..initialized()
        };
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::ResumeCoolant
        );
    }

    #[test]
    fn idle_state_resumes_next_phase() {
        let state = RunState {
            next_phase: Phase::Coolant,
            comb_converged: true,
            ..initialized()
        };
        assert_eq!(
            classify_restart(&state).expect("classify"),
            RestartPoint::ResumeCoolant
        );
        assert_eq!(
            classify_restart(&initialized()).expect("classify"),
            RestartPoint::ResumeCombustion
        );
    }
}
