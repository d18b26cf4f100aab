//! Persisted progress model for a coupled job.
//!
//! `RunState` is the single source of truth for where a job stands. It is
//! owned by the scheduler and passed by `&mut` to every component, which
//! persist it through [`crate::io::run_state::write_run_state`] after each
//! transition. Settings are kept separately (see [`crate::io::config`]).

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{Phase, PostStepCursor};

/// Persisted bookkeeping for the current job (`run_state.json`).
///
/// Invariant: at most one of `comb_attempts` / `cool_attempts` is nonzero at
/// any committed point. `post_process` is set only between a phase's solver
/// run completing and its pipeline committing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunState {
    /// Job initialization (checkpoint mapping, input setup) has committed.
    pub initialized: bool,
    /// Coupling iteration, starting at 0.
    pub iteration: u32,
    /// Attempts made by the in-flight combustion run (0 when idle).
    pub comb_attempts: u32,
    /// Attempts made by the in-flight coolant run (0 when idle).
    pub cool_attempts: u32,
    pub comb_converged: bool,
    pub cool_converged: bool,
    /// Target simulation time of the current combustion run.
    pub comb_stop_time: Option<f64>,
    /// Phase the current iteration runs next when nothing is in flight.
    pub next_phase: Phase,
    pub post_process: Option<PostStepCursor>,
    pub final_cycle: FinalCycleState,
    pub ignore_first_checkpoint: PhaseFlags,
    /// Sticky: blocks all progress until cleared by an operator.
    pub sim_error: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            initialized: false,
            iteration: 0,
            comb_attempts: 0,
            cool_attempts: 0,
            comb_converged: false,
            cool_converged: false,
            comb_stop_time: None,
            next_phase: Phase::Combustion,
            post_process: None,
            final_cycle: FinalCycleState::default(),
            ignore_first_checkpoint: PhaseFlags::default(),
            sim_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalCycleState {
    /// Operator supplied final-cycle overrides.
    pub has_final_step: bool,
    pub running: bool,
    pub completed: bool,
}

/// One boolean per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseFlags {
    pub combustion: bool,
    pub coolant: bool,
}

impl PhaseFlags {
    pub fn get(&self, phase: Phase) -> bool {
        match phase {
            Phase::Combustion => self.combustion,
            Phase::Coolant => self.coolant,
        }
    }

    pub fn set(&mut self, phase: Phase, value: bool) {
        match phase {
            Phase::Combustion => self.combustion = value,
            Phase::Coolant => self.coolant = value,
        }
    }
}

/// Effect of committing a phase's run-plus-pipeline cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseCommit {
    /// Combustion committed; coolant runs next in the same iteration.
    AdvanceToCoolant,
    /// Not converged; a new iteration starts with an extended stop time.
    NextIteration,
    /// Converged with a final cycle configured; the final pass starts.
    FinalCycleEntered,
    /// The job is finished.
    Done,
}

impl RunState {
    pub fn attempts(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Combustion => self.comb_attempts,
            Phase::Coolant => self.cool_attempts,
        }
    }

    pub fn set_attempts(&mut self, phase: Phase, attempts: u32) {
        match phase {
            Phase::Combustion => self.comb_attempts = attempts,
            Phase::Coolant => self.cool_attempts = attempts,
        }
    }

    pub fn converged(&self, phase: Phase) -> bool {
        match phase {
            Phase::Combustion => self.comb_converged,
            Phase::Coolant => self.cool_converged,
        }
    }

    pub fn set_converged(&mut self, phase: Phase, converged: bool) {
        match phase {
            Phase::Combustion => self.comb_converged = converged,
            Phase::Coolant => self.cool_converged = converged,
        }
    }

    /// Combustion stop time; set once the job is initialized.
    pub fn stop_time(&self) -> Result<f64> {
        self.comb_stop_time
            .ok_or_else(|| anyhow!("combustion stop time is not set (job not initialized)"))
    }

    /// Nothing is in flight and the next phase is the first of an iteration.
    pub fn at_iteration_boundary(&self) -> bool {
        self.next_phase == Phase::Combustion
            && self.comb_attempts == 0
            && self.cool_attempts == 0
            && self.post_process.is_none()
    }

    /// Whether the job has reached its terminal converged state.
    pub fn is_done(&self) -> bool {
        if self.final_cycle.completed {
            return true;
        }
        !self.final_cycle.has_final_step
            && !self.final_cycle.running
            && self.at_iteration_boundary()
            && self.comb_converged
            && self.cool_converged
    }

    /// Commit a phase: reset its attempt counter, clear the pipeline cursor,
    /// and for coolant decide how the iteration ends.
    ///
    /// All changes land in one snapshot so a single write commits them.
    pub fn complete_phase(&mut self, phase: Phase, phase_duration: f64) -> Result<PhaseCommit> {
        self.post_process = None;
        self.set_attempts(phase, 0);
        if phase == Phase::Combustion {
            self.next_phase = Phase::Coolant;
            return Ok(PhaseCommit::AdvanceToCoolant);
        }

        self.next_phase = Phase::Combustion;
        if self.final_cycle.running {
            self.final_cycle.running = false;
            self.final_cycle.completed = true;
            return Ok(PhaseCommit::Done);
        }

        let converged = self.comb_converged && self.cool_converged;
        if converged && !self.final_cycle.has_final_step {
            return Ok(PhaseCommit::Done);
        }

        let stop = self.stop_time()?;
        self.iteration += 1;
        self.comb_stop_time = Some(stop + phase_duration);
        if converged {
            self.final_cycle.running = true;
            Ok(PhaseCommit::FinalCycleEntered)
        } else {
            Ok(PhaseCommit::NextIteration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PostStep;

    fn mid_coolant_pipeline() -> RunState {
        RunState {
            initialized: true,
            iteration: 2,
            comb_stop_time: Some(1565.0),
            next_phase: Phase::Coolant,
            post_process: Some(PostStepCursor {
                phase: Phase::Coolant,
                step: PostStep::ClearTransient,
            }),
            ..RunState::default()
        }
    }

    #[test]
    fn combustion_commit_advances_to_coolant() {
        let mut state = RunState {
            initialized: true,
            comb_attempts: 2,
            comb_stop_time: Some(845.0),
            post_process: Some(PostStepCursor {
                phase: Phase::Combustion,
                step: PostStep::ClearTransient,
            }),
            ..RunState::default()
        };
        let commit = state.complete_phase(Phase::Combustion, 720.0).expect("commit");
        assert_eq!(commit, PhaseCommit::AdvanceToCoolant);
        assert_eq!(state.comb_attempts, 0);
        assert_eq!(state.post_process, None);
        assert_eq!(state.next_phase, Phase::Coolant);
        assert_eq!(state.comb_stop_time, Some(845.0));
    }

    #[test]
    fn unconverged_coolant_commit_starts_next_iteration() {
        let mut state = mid_coolant_pipeline();
        state.comb_converged = true;
        let commit = state.complete_phase(Phase::Coolant, 720.0).expect("commit");
        assert_eq!(commit, PhaseCommit::NextIteration);
        assert_eq!(state.iteration, 3);
        assert_eq!(state.comb_stop_time, Some(2285.0));
        assert_eq!(state.next_phase, Phase::Combustion);
        assert!(!state.is_done());
    }

    #[test]
    fn converged_without_final_cycle_is_done() {
        let mut state = mid_coolant_pipeline();
        state.comb_converged = true;
        state.cool_converged = true;
        let commit = state.complete_phase(Phase::Coolant, 720.0).expect("commit");
        assert_eq!(commit, PhaseCommit::Done);
        assert_eq!(state.iteration, 2);
        assert!(state.is_done());
    }

    #[test]
    fn converged_with_final_cycle_enters_it_then_finishes() {
        let mut state = mid_coolant_pipeline();
        state.comb_converged = true;
        state.cool_converged = true;
        state.final_cycle.has_final_step = true;

        let commit = state.complete_phase(Phase::Coolant, 720.0).expect("commit");
        assert_eq!(commit, PhaseCommit::FinalCycleEntered);
        assert!(state.final_cycle.running);
        assert_eq!(state.iteration, 3);
        assert!(!state.is_done());

        // The final pass commits regardless of its own convergence.
        state.cool_converged = false;
        state.complete_phase(Phase::Combustion, 720.0).expect("commit");
        let commit = state.complete_phase(Phase::Coolant, 720.0).expect("commit");
        assert_eq!(commit, PhaseCommit::Done);
        assert!(state.final_cycle.completed);
        assert!(state.is_done());
    }
}
