//! Resumable post-processing after a phase's solver run.
//!
//! Every step persists the `(phase, step)` cursor before it runs, so a killed
//! job resumes at the step it was in. Steps are idempotent on replay: moves
//! of absent sources are no-ops and the convergence verdict is read back from
//! the log instead of re-evaluated.

use anyhow::Result;
use tracing::{debug, info, instrument};

use crate::context::JobContext;
use crate::convergence::evaluate;
use crate::core::types::{Phase, PostStep, PostStepCursor};
use crate::errors::{ConsistencyError, FatalSimError};
use crate::io::boundary_deck::sync_thermal_boundaries;
use crate::io::boundary_sample::write_boundary_condition;
use crate::io::checkpoint::{
    ARCHIVED_CHECKPOINTS, CHECKPOINT_EXT, CHECKPOINT_STEM, list_checkpoints,
};
use crate::io::convergence_log::recorded_verdict;
use crate::io::exchange_log::{assemble_combustion, assemble_coolant};
use crate::io::files::{
    SOLVER_OUTPUTS, TRANSIENT_MARKERS, copy_file, matching, move_path, remove_matching,
    remove_path,
};
use crate::io::input_deck::{InputUpdates, update_inputs};
use crate::io::mapper::{MapRequest, Mapper};
use crate::io::numbered::numbered_name;
use crate::recovery::locate_latest_checkpoint;
use crate::state::{PhaseCommit, RunState};

/// Result of running the pipeline to its commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub executed: Vec<PostStep>,
    pub commit: PhaseCommit,
}

pub struct PostProcessPipeline<'a, M: Mapper> {
    ctx: &'a JobContext,
    mapper: &'a M,
}

impl<'a, M: Mapper> PostProcessPipeline<'a, M> {
    pub fn new(ctx: &'a JobContext, mapper: &'a M) -> Self {
        Self { ctx, mapper }
    }

    /// Run every step for a phase whose solver run just completed.
    pub fn run(&self, state: &mut RunState, phase: Phase) -> Result<PipelineRun> {
        self.execute(state, phase, &PostStep::ORDER)
    }

    /// Run the steps from `cursor.step` (inclusive) to the end.
    pub fn resume_from(&self, state: &mut RunState, cursor: PostStepCursor) -> Result<PipelineRun> {
        self.ctx.log.info(&format!(
            "Resuming {} post-processing at {}",
            cursor.phase, cursor.step
        ));
        self.execute(state, cursor.phase, cursor.step.suffix_from())
    }

    #[instrument(skip_all, fields(%phase, iteration = state.iteration))]
    fn execute(&self, state: &mut RunState, phase: Phase, steps: &[PostStep]) -> Result<PipelineRun> {
        let mut executed = Vec::with_capacity(steps.len());
        for &step in steps {
            state.post_process = Some(PostStepCursor { phase, step });
            self.ctx.persist(state)?;
            debug!(%step, "running post-process step");
            self.run_step(state, phase, step)?;
            executed.push(step);
        }
        let commit = state.complete_phase(phase, self.ctx.settings.phase_duration)?;
        self.ctx.persist(state)?;
        info!(?commit, "phase committed");
        Ok(PipelineRun { executed, commit })
    }

    fn run_step(&self, state: &mut RunState, phase: Phase, step: PostStep) -> Result<()> {
        match step {
            PostStep::Map => self.map(phase),
            PostStep::CheckConvergence => self.check_convergence(state, phase),
            PostStep::RenameBoundaryFiles => self.archive_samples(phase),
            PostStep::UpdateInputs => self.update_inputs(state, phase),
            PostStep::SaveResults => self.save_results(state, phase),
            PostStep::MoveCheckpoints => self.move_checkpoints(phase),
            PostStep::ClearTransient => {
                remove_matching(self.ctx.paths.phase_dir(phase), TRANSIENT_MARKERS)?;
                Ok(())
            }
        }
    }

    /// Any mapping failure other than an inconsistent log is reported as
    /// [`FatalSimError::MapFailed`].
    fn map(&self, phase: Phase) -> Result<()> {
        self.ctx
            .log
            .info(&format!("Mapping {phase} data onto {} boundaries", phase.other()));
        self.try_map(phase).map_err(|err| {
            if err.downcast_ref::<ConsistencyError>().is_some() {
                err
            } else {
                FatalSimError::MapFailed {
                    phase,
                    message: format!("{err:#}"),
                }
                .into()
            }
        })
    }

    fn try_map(&self, phase: Phase) -> Result<()> {
        let paths = &self.ctx.paths;
        let dir = paths.phase_dir(phase);
        match phase {
            Phase::Combustion => assemble_combustion(dir, &paths.exchange_tmp_path)?,
            Phase::Coolant => assemble_coolant(dir, &paths.exchange_tmp_path)?,
        }
        copy_file(&paths.mapping_config_for(phase), &paths.mapping_config_path)?;
        self.mapper.map(&MapRequest {
            phase,
            root: paths.root.clone(),
            descriptor: paths.map_surface_path.clone(),
            exchange_log: paths.exchange_tmp_path.clone(),
            log_path: paths.mapper_log(phase),
            boundaries: self.ctx.settings.boundaries.clone(),
        })?;
        let target = phase.other();
        for boundary in &self.ctx.settings.boundaries {
            let sample = paths.mapped_sample(boundary);
            if !sample.exists() {
                anyhow::bail!("mapping tool produced no sample {}", sample.display());
            }
            let rows =
                write_boundary_condition(&sample, target, &paths.boundary_condition(target, boundary))?;
            debug!(boundary, rows, "boundary condition written");
        }
        Ok(())
    }

    fn check_convergence(&self, state: &mut RunState, phase: Phase) -> Result<()> {
        let log = self.ctx.paths.convergence_log(phase);
        let converged = match recorded_verdict(&log, state.iteration)? {
            Some(verdict) => {
                debug!(verdict, "reusing recorded convergence verdict");
                verdict
            }
            None => evaluate(self.ctx, phase, state.iteration)?.converged,
        };
        state.set_converged(phase, converged);
        self.ctx.log.info(&format!(
            "Iteration {}: {phase} {}",
            state.iteration,
            if converged { "converged" } else { "not converged" }
        ));
        Ok(())
    }

    fn archive_samples(&self, phase: Phase) -> Result<()> {
        let paths = &self.ctx.paths;
        for boundary in &self.ctx.settings.boundaries {
            move_path(
                &paths.mapped_sample(boundary),
                &paths.archived_sample(phase, boundary),
            )?;
        }
        Ok(())
    }

    fn update_inputs(&self, state: &RunState, phase: Phase) -> Result<()> {
        let updates = match phase {
            Phase::Combustion => InputUpdates::new()
                .set("restart_number", 1i64)
                .set("restart_flag", 1i64)
                .set("end_time", state.stop_time()? + self.ctx.settings.phase_duration)
                .set("map_flag", "OFF"),
            Phase::Coolant => InputUpdates::new()
                .set("restart_number", 1i64)
                .set("restart_flag", 0i64)
                .set("map_flag", "MAP"),
        };
        for key in update_inputs(self.ctx.paths.phase_dir(phase), updates)? {
            self.ctx
                .log
                .warn(&format!("{phase} inputs.in has no entry {key}; value not updated"));
        }
        // MAP just wrote the other phase's spatial boundary files.
        let target = phase.other();
        for name in sync_thermal_boundaries(&self.ctx.paths, &self.ctx.settings, target)? {
            self.ctx
                .log
                .warn(&format!("{target} boundary.in has no boundary {name}; not updated"));
        }
        Ok(())
    }

    fn save_results(&self, state: &RunState, phase: Phase) -> Result<()> {
        let dir = self.ctx.paths.phase_dir(phase);
        if phase == Phase::Coolant && !self.ctx.settings.save_coolant_output {
            remove_matching(dir, SOLVER_OUTPUTS)?;
            return Ok(());
        }
        let dest = self.ctx.paths.results_dir(phase, state.stop_time()?);
        for path in matching(dir, SOLVER_OUTPUTS)? {
            let Some(name) = path.file_name() else {
                continue;
            };
            move_path(&path, &dest.join(name))?;
        }
        Ok(())
    }

    /// Keep the latest checkpoint as `restart.rst` and archive the three
    /// highest-numbered ones into slots 1..3 (highest in slot 3).
    ///
    /// Moves run lowest-first so a replay after a partial move assigns the
    /// same slots to the files left behind.
    fn move_checkpoints(&self, phase: Phase) -> Result<()> {
        let dir = self.ctx.paths.phase_dir(phase);
        let Some(latest) = locate_latest_checkpoint(dir, self.ctx.reader.as_ref())? else {
            self.ctx
                .log
                .warn(&format!("No {phase} checkpoint to archive"));
            return Ok(());
        };
        copy_file(&latest.path, &self.ctx.paths.canonical_checkpoint(phase))?;

        let numbered: Vec<_> = list_checkpoints(dir)?
            .into_iter()
            .filter(|file| !file.is_canonical())
            .collect();
        let keep_from = numbered.len().saturating_sub(ARCHIVED_CHECKPOINTS as usize);
        let (discard, keep) = numbered.split_at(keep_from);
        for file in discard {
            remove_path(&file.path)?;
        }
        let archive = self.ctx.paths.checkpoint_archive(phase);
        let first_slot = ARCHIVED_CHECKPOINTS + 1 - keep.len() as u32;
        for (slot, file) in (first_slot..).zip(keep) {
            move_path(
                &file.path,
                &archive.join(numbered_name(CHECKPOINT_STEM, CHECKPOINT_EXT, slot)),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::run_state::load_run_state;
    use crate::test_support::{JobFixture, ScriptedMapper, exchange_log_text};
    use std::fs;

    fn after_combustion_run(fixture: &JobFixture) -> RunState {
        let ctx = fixture.ctx();
        let dir = ctx.paths.phase_dir(Phase::Combustion);
        fs::write(dir.join("transfer.out"), exchange_log_text(&[800.0, 845.0])).expect("log");
        for (name, time) in [
            ("restart0001.rst", 300.0),
            ("restart0002.rst", 500.0),
            ("restart0003.rst", 700.0),
            ("restart0004.rst", 845.0),
        ] {
            fs::write(dir.join(name), format!("{time} CAD\n")).expect("checkpoint");
        }
        fs::write(dir.join("combustion.echo"), "echo").expect("echo");
        fs::write(dir.join("converge.done"), "").expect("sentinel");
        RunState {
            initialized: true,
            comb_attempts: 1,
            comb_stop_time: Some(845.0),
            ..RunState::default()
        }
    }

    #[test]
    fn full_pipeline_commits_combustion() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = after_combustion_run(&fixture);
        let mapper = ScriptedMapper::writing(400.0);

        let run = PostProcessPipeline::new(ctx, &mapper)
            .run(&mut state, Phase::Combustion)
            .expect("pipeline");
        assert_eq!(run.executed, PostStep::ORDER.to_vec());
        assert_eq!(run.commit, PhaseCommit::AdvanceToCoolant);
        assert_eq!(state.post_process, None);
        assert_eq!(state.comb_attempts, 0);
        assert!(!state.comb_converged);

        let dir = ctx.paths.phase_dir(Phase::Combustion);
        // MAP wrote coolant boundary conditions from the combustion samples.
        assert!(ctx.paths.boundary_condition(Phase::Coolant, "liner").exists());
        // RENAME archived the samples.
        assert!(ctx.paths.archived_sample(Phase::Combustion, "liner").exists());
        assert!(!ctx.paths.mapped_sample("liner").exists());
        // UPDATE_INPUTS prepared the next combustion run.
        assert_eq!(fixture.input(Phase::Combustion, "end_time"), "1565");
        assert_eq!(fixture.input(Phase::Combustion, "restart_flag"), "1");
        // ...and pointed the coolant walls at the freshly mapped files.
        let coolant_walls =
            fs::read_to_string(ctx.paths.boundary_file(Phase::Coolant)).expect("boundary.in");
        assert!(coolant_walls.contains("value: liner_spatialTemp.in"));
        assert!(coolant_walls.contains("value: head_spatialTemp.in"));
        // SAVE_RESULTS moved outputs, including the exchange log.
        assert!(dir.join("results/845/combustion.echo").exists());
        assert!(dir.join("results/845/transfer.out").exists());
        assert!(!dir.join("transfer.out").exists());
        // MOVE_CHECKPOINTS kept the latest and archived the top three.
        assert_eq!(fs::read_to_string(dir.join("restart.rst")).expect("canonical"), "845 CAD\n");
        let archive = ctx.paths.checkpoint_archive(Phase::Combustion);
        for (slot, time) in [(1, 500), (2, 700), (3, 845)] {
            let text = fs::read_to_string(archive.join(format!("restart000{slot}.rst")))
                .expect("archived checkpoint");
            assert_eq!(text, format!("{time} CAD\n"));
        }
        assert!(!dir.join("restart0001.rst").exists());
        // CLEAR_TRANSIENT removed the sentinel.
        assert!(!dir.join("converge.done").exists());

        let persisted = load_run_state(&ctx.paths.run_state_path).expect("load");
        assert_eq!(persisted, state);
        assert_eq!(mapper.calls(), vec![Phase::Combustion]);
    }

    #[test]
    fn resume_runs_only_the_suffix() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = after_combustion_run(&fixture);
        let mapper = ScriptedMapper::new(Vec::new());
        let cursor = PostStepCursor {
            phase: Phase::Combustion,
            step: PostStep::MoveCheckpoints,
        };
        state.post_process = Some(cursor);

        let run = PostProcessPipeline::new(ctx, &mapper)
            .resume_from(&mut state, cursor)
            .expect("resume");
        assert_eq!(
            run.executed,
            vec![PostStep::MoveCheckpoints, PostStep::ClearTransient]
        );
        assert!(mapper.calls().is_empty());
    }

    /// A kill after the first archive move must not shift slots on replay.
    #[test]
    fn checkpoint_archive_replay_keeps_slots() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = after_combustion_run(&fixture);
        let dir = ctx.paths.phase_dir(Phase::Combustion);
        let archive = ctx.paths.checkpoint_archive(Phase::Combustion);
        fs::remove_file(dir.join("restart0001.rst")).expect("discarded");
        fs::write(dir.join("restart.rst"), "845 CAD\n").expect("canonical");
        fs::create_dir_all(&archive).expect("archive");
        fs::rename(dir.join("restart0002.rst"), archive.join("restart0001.rst")).expect("move");

        let cursor = PostStepCursor {
            phase: Phase::Combustion,
            step: PostStep::MoveCheckpoints,
        };
        PostProcessPipeline::new(ctx, &ScriptedMapper::new(Vec::new()))
            .resume_from(&mut state, cursor)
            .expect("replay");
        for (slot, time) in [(1, 500), (2, 700), (3, 845)] {
            let text = fs::read_to_string(archive.join(format!("restart000{slot}.rst")))
                .expect("archived checkpoint");
            assert_eq!(text, format!("{time} CAD\n"));
        }
    }

    #[test]
    fn map_failure_is_fatal_and_keeps_cursor() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = after_combustion_run(&fixture);
        let mapper = ScriptedMapper::failing();

        let err = PostProcessPipeline::new(ctx, &mapper)
            .run(&mut state, Phase::Combustion)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalSimError>(),
            Some(FatalSimError::MapFailed {
                phase: Phase::Combustion,
                ..
            })
        ));
        let persisted = load_run_state(&ctx.paths.run_state_path).expect("load");
        assert_eq!(
            persisted.post_process,
            Some(PostStepCursor {
                phase: Phase::Combustion,
                step: PostStep::Map
            })
        );
    }

    /// Replaying CHECK_CONVERGENCE reuses the logged verdict.
    #[test]
    fn convergence_replay_does_not_append_twice() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = after_combustion_run(&fixture);
        let mapper = ScriptedMapper::writing(400.0);
        let pipeline = PostProcessPipeline::new(ctx, &mapper);
        pipeline.run(&mut state, Phase::Combustion).expect("pipeline");

        let mut replay = after_combustion_run(&fixture);
        fs::write(ctx.paths.mapped_sample("liner"), "").expect("stale sample");
        let cursor = PostStepCursor {
            phase: Phase::Combustion,
            step: PostStep::CheckConvergence,
        };
        pipeline.resume_from(&mut replay, cursor).expect("replay");
        let log = fs::read_to_string(ctx.paths.convergence_log(Phase::Combustion)).expect("log");
        assert_eq!(log.matches("Iteration 0 result").count(), 1);
    }
}
