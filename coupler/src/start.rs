//! Job start-up: first-time initialization and restart checks.
//!
//! A new job maps any initial checkpoints, writes the mapping configuration
//! and fixes the first stop time. A restarted job only re-verifies its
//! prerequisites and clears what a crash left behind. Both persist the state
//! before the scheduler takes over.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::context::JobContext;
use crate::core::classifier::classify_restart;
use crate::core::types::{Phase, RestartPoint};
use crate::errors::{ConsistencyError, LoadError};
use crate::io::boundary_deck::sync_thermal_boundaries;
use crate::io::files::{ERROR_ARTIFACTS, copy_file, has_entries, matching, remove_matching, remove_path};
use crate::io::input_deck::{InputUpdates, InputValue, read_entry, update_inputs};
use crate::io::mapping_config::{check_prerequisites, write_mapping_configs};
use crate::recovery::promote_latest_checkpoint;
use crate::state::RunState;

/// CFL override files looked up in the job root for the final cycle.
pub const DEFAULT_CFL_FILES: &[&str] = &["max_cfl_u", "max_cfl_nu", "max_cfl_mach"];
const FINAL_SUFFIX: &str = "final";
const TWRITE_POST_FILE: &str = "twrite_post.in";

/// Classify the persisted state and run the matching initialization.
pub fn prepare_job(ctx: &JobContext, state: &mut RunState) -> Result<RestartPoint> {
    let point = classify_restart(state)?;
    debug!(?point, "classified restart point");
    match point {
        RestartPoint::New => init_new_job(ctx, state)?,
        RestartPoint::AlreadyDone => {}
        _ => init_restart(ctx, state)?,
    }
    Ok(point)
}

fn init_new_job(ctx: &JobContext, state: &mut RunState) -> Result<()> {
    let paths = &ctx.paths;
    ctx.log.info("Starting new coupled job");
    write_mapping_configs(paths, &ctx.settings.boundaries)?;
    check_prerequisites(paths)?;
    for phase in Phase::ALL {
        refuse_existing_data(ctx, phase)?;
    }

    let start = match ctx.settings.start_time {
        Some(start) => start,
        None => read_start_time(&paths.inputs(Phase::Combustion))?,
    };
    let stop = start + ctx.settings.phase_duration;

    for phase in Phase::ALL {
        let dir = paths.phase_dir(phase);
        let mapped = promote_latest_checkpoint(dir, ctx.reader.as_ref())?.is_some();
        let mut updates = InputUpdates::new()
            .set("restart_number", 1i64)
            .set("restart_flag", 0i64)
            .set("map_flag", if mapped { "MAP" } else { "OFF" });
        if phase == Phase::Combustion {
            updates = updates.set("end_time", stop);
        }
        warn_unmatched(ctx, phase, update_inputs(dir, updates)?);
        if mapped {
            ctx.log
                .info(&format!("Initial {phase} solution is mapped from restart.rst"));
        }
        state.ignore_first_checkpoint.set(phase, mapped);
    }
    sync_boundary_decks(ctx)?;

    remove_matching(&paths.root, &["log.*"])?;
    for phase in Phase::ALL {
        remove_path(&paths.convergence_log(phase))?;
    }

    state.initialized = true;
    state.comb_stop_time = Some(stop);
    state.final_cycle.has_final_step = has_final_step(ctx);
    ctx.persist(state)?;
    info!(start, stop, "new job initialized");
    Ok(())
}

fn init_restart(ctx: &JobContext, state: &mut RunState) -> Result<()> {
    ctx.log.info(&format!(
        "Restarting coupled job at iteration {}",
        state.iteration
    ));
    check_prerequisites(&ctx.paths)?;
    for phase in Phase::ALL {
        remove_matching(ctx.paths.phase_dir(phase), ERROR_ARTIFACTS)?;
    }
    sync_boundary_decks(ctx)?;
    if !state.is_done() && !state.final_cycle.running {
        state.final_cycle.has_final_step = has_final_step(ctx);
    }
    ctx.persist(state)
}

fn refuse_existing_data(ctx: &JobContext, phase: Phase) -> Result<()> {
    let dir = ctx.paths.phase_dir(phase);
    let existing = !matching(dir, &["*.out"])?.is_empty()
        || has_entries(&ctx.paths.results_root(phase))?
        || has_entries(&ctx.paths.checkpoint_archive(phase))?;
    if existing {
        return Err(ConsistencyError::ExistingData {
            dir: dir.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

fn read_start_time(inputs: &Path) -> Result<f64> {
    let value = read_entry(inputs, "start_time")?.ok_or_else(|| LoadError::InvalidSettings {
        message: format!(
            "start_time is not set and {} has no start_time entry",
            inputs.display()
        ),
    })?;
    value
        .parse()
        .with_context(|| format!("parse start_time {value:?} in {}", inputs.display()))
}

/// Point both phases' walls at whatever spatial boundary files exist.
fn sync_boundary_decks(ctx: &JobContext) -> Result<()> {
    for phase in Phase::ALL {
        for name in sync_thermal_boundaries(&ctx.paths, &ctx.settings, phase)? {
            ctx.log
                .warn(&format!("{phase} boundary.in has no boundary {name}; not updated"));
        }
    }
    Ok(())
}

fn warn_unmatched(ctx: &JobContext, phase: Phase, unmatched: Vec<String>) {
    for key in unmatched {
        ctx.log
            .warn(&format!("{phase} inputs.in has no entry {key}; value not updated"));
    }
}

/// Names of the CFL override files present in the job root.
pub fn final_cycle_files(ctx: &JobContext) -> Vec<String> {
    let mut names: Vec<String> = DEFAULT_CFL_FILES.iter().map(|s| s.to_string()).collect();
    for name in &ctx.settings.final_cycle.cfl_files {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names.retain(|name| {
        ctx.paths
            .root
            .join(format!("{name}.{FINAL_SUFFIX}"))
            .is_file()
    });
    names
}

/// Whether any final-cycle override is configured.
pub fn has_final_step(ctx: &JobContext) -> bool {
    let config = &ctx.settings.final_cycle;
    !final_cycle_files(ctx).is_empty() || config.twrite_post.is_some() || !config.overrides.is_empty()
}

/// Install the final-cycle overrides into the combustion directory.
///
/// Replaced inputs are saved once to `OriginalFiles/`; applying twice leaves
/// the same files and inputs.
pub fn apply_final_overrides(ctx: &JobContext) -> Result<()> {
    let mut updates = InputUpdates::new();
    for name in final_cycle_files(ctx) {
        let file = format!("{name}.in");
        let source = ctx.paths.root.join(format!("{name}.{FINAL_SUFFIX}"));
        install_override(ctx, &source, &file)?;
        updates = updates.set(&name, file.as_str());
    }
    match &ctx.settings.final_cycle.twrite_post {
        Some(InputValue::Text(source)) => {
            install_override(ctx, &ctx.paths.root.join(source), TWRITE_POST_FILE)?;
            updates = updates.set("twrite_post", TWRITE_POST_FILE);
        }
        Some(value) => updates = updates.set("twrite_post", value.clone()),
        None => {}
    }
    for (key, value) in &ctx.settings.final_cycle.overrides {
        updates = updates.set(key, value.clone());
    }
    if updates.is_empty() {
        return Ok(());
    }
    ctx.log.info("Applying final cycle overrides to combustion inputs");
    let unmatched = update_inputs(ctx.paths.phase_dir(Phase::Combustion), updates)?;
    warn_unmatched(ctx, Phase::Combustion, unmatched);
    Ok(())
}

fn install_override(ctx: &JobContext, source: &Path, file_name: &str) -> Result<()> {
    let target = ctx.paths.phase_dir(Phase::Combustion).join(file_name);
    let saved = ctx.paths.original_files_dir().join(file_name);
    if target.is_file() && !saved.exists() && !same_contents(&target, source)? {
        copy_file(&target, &saved)?;
        debug!(file = file_name, "saved original input");
    }
    copy_file(source, &target)
}

fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    let left = fs::read(a).with_context(|| format!("read {}", a.display()))?;
    let right = fs::read(b).with_context(|| format!("read {}", b.display()))?;
    Ok(left == right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::run_state::load_run_state;
    use crate::test_support::JobFixture;

    #[test]
    fn new_job_initializes_inputs_and_state() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let coolant = ctx.paths.phase_dir(Phase::Coolant);
        fs::write(coolant.join("restart0002.rst"), "0.5 s\n").expect("checkpoint");
        fs::write(ctx.paths.root.join("log.htcMapCoolant"), "stale").expect("stale log");
        let mut state = RunState::default();

        let point = prepare_job(ctx, &mut state).expect("prepare");
        assert_eq!(point, RestartPoint::New);
        assert!(state.initialized);
        assert_eq!(state.comb_stop_time, Some(845.0));
        assert!(state.ignore_first_checkpoint.get(Phase::Coolant));
        assert!(!state.ignore_first_checkpoint.get(Phase::Combustion));
        assert!(!state.final_cycle.has_final_step);

        assert!(coolant.join("restart.rst").exists());
        assert_eq!(fixture.input(Phase::Coolant, "map_flag"), "MAP");
        assert_eq!(fixture.input(Phase::Combustion, "map_flag"), "OFF");
        assert_eq!(fixture.input(Phase::Combustion, "end_time"), "845");
        assert!(ctx.paths.mapping_config_for(Phase::Coolant).exists());
        assert!(!ctx.paths.root.join("log.htcMapCoolant").exists());
        assert_eq!(load_run_state(&ctx.paths.run_state_path).expect("load"), state);
    }

    #[test]
    fn stop_time_falls_back_to_inputs_start_time() {
        let mut fixture = JobFixture::new().expect("fixture");
        fixture.settings_mut().start_time = None;
        let mut state = RunState::default();
        prepare_job(fixture.ctx(), &mut state).expect("prepare");
        // inputs.in carries start_time 100.
        assert_eq!(state.comb_stop_time, Some(820.0));
    }

    #[test]
    fn new_job_refuses_existing_output() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let results = ctx.paths.results_dir(Phase::Combustion, 845.0);
        fs::create_dir_all(&results).expect("results");
        fs::write(results.join("transfer.out"), "old").expect("old output");

        let err = prepare_job(ctx, &mut RunState::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConsistencyError>(),
            Some(ConsistencyError::ExistingData { .. })
        ));
    }

    #[test]
    fn missing_mapper_is_a_load_error() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        fs::remove_file(&ctx.paths.mapper_path).expect("remove mapper");
        let err = prepare_job(ctx, &mut RunState::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::MissingPrerequisite { .. })
        ));
    }

    #[test]
    fn restart_clears_error_artifacts() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = RunState::default();
        prepare_job(ctx, &mut state).expect("new job");
        let trace = ctx.paths.phase_dir(Phase::Combustion).join("abort_trace.txt");
        fs::write(&trace, "crash").expect("trace");
        fixture.enable_final_cycle().expect("final cycle");

        let point = prepare_job(ctx, &mut state).expect("restart");
        assert_eq!(point, RestartPoint::ResumeCombustion);
        assert!(!trace.exists());
        assert!(state.final_cycle.has_final_step);
    }

    #[test]
    fn startup_points_walls_at_spatial_files() {
        let fixture = JobFixture::new().expect("fixture");
        let ctx = fixture.ctx();
        let mut state = RunState::default();
        prepare_job(ctx, &mut state).expect("new job");
        let combustion = fs::read_to_string(ctx.paths.boundary_file(Phase::Combustion))
            .expect("combustion boundary.in");
        assert!(combustion.contains("reference_temperature: 363.0"));
        assert!(combustion.contains("htc: 5000.0"));

        fs::write(ctx.paths.boundary_condition(Phase::Combustion, "liner"), "data\n")
            .expect("spatial file");
        prepare_job(ctx, &mut state).expect("restart");
        let combustion = fs::read_to_string(ctx.paths.boundary_file(Phase::Combustion))
            .expect("combustion boundary.in");
        assert!(combustion.starts_with("version: 3.0\n##!Exported by CONVERGE Studio\n---\n\n"));
        assert!(combustion.contains("reference_temperature: liner_spatialTemp.in"));
        let coolant = fs::read_to_string(ctx.paths.boundary_file(Phase::Coolant))
            .expect("coolant boundary.in");
        assert!(coolant.contains("value: 363.0"));
    }

    #[test]
    fn final_overrides_apply_idempotently() {
        let mut fixture = JobFixture::new().expect("fixture");
        fixture.enable_final_cycle().expect("final cycle");
        fs::write(fixture.root().join("twrite.final"), "0.5\n").expect("twrite");
        {
            let config = &mut fixture.settings_mut().final_cycle;
            config.twrite_post = Some(InputValue::from("twrite.final"));
            config.overrides.insert("end_time".into(), InputValue::from(9000i64));
        }
        let ctx = fixture.ctx();
        let combustion = ctx.paths.phase_dir(Phase::Combustion);
        fs::write(combustion.join("max_cfl_u.in"), "original\n").expect("original");

        apply_final_overrides(ctx).expect("apply");
        apply_final_overrides(ctx).expect("apply again");

        assert_eq!(
            fs::read_to_string(ctx.paths.original_files_dir().join("max_cfl_u.in"))
                .expect("saved"),
            "original\n"
        );
        assert_eq!(
            fs::read_to_string(combustion.join("max_cfl_u.in")).expect("installed"),
            fs::read_to_string(fixture.root().join("max_cfl_u.final")).expect("final")
        );
        assert_eq!(fixture.input(Phase::Combustion, "max_cfl_u"), "max_cfl_u.in");
        assert_eq!(fixture.input(Phase::Combustion, "twrite_post"), "twrite_post.in");
        assert_eq!(fixture.input(Phase::Combustion, "end_time"), "9000");
        assert!(has_final_step(ctx));
    }
}
