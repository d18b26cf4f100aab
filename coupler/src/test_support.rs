//! Test-only helpers: a scratch job directory and scripted stand-ins for the
//! solver and mapping tool.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::context::JobContext;
use crate::core::types::Phase;
use crate::io::checkpoint::{CHECKPOINT_EXT, CHECKPOINT_STEM, list_checkpoints};
use crate::io::config::{Settings, SolverConfig};
use crate::io::exchange_log::{CANONICAL_LOG, LOG_EXT, LOG_STEM, list_fragments};
use crate::io::input_deck::read_entry;
use crate::io::mapper::{MapRequest, Mapper};
use crate::io::mapping_config::write_mapping_configs;
use crate::io::numbered::numbered_name;
use crate::io::paths::{SENTINEL_FILE, sample_file_name};
use crate::io::solver::{Solver, SolverRequest};

const INPUTS_IN: &str = "\
start_time:          100.0                                            # start of run
end_time:            820.0                                            # end of run
restart_flag:        0                                                # restart from restart.rst
restart_number:      1
map_flag:            OFF                                              # MAP, OFF
twrite_post:         10.0                                             # post output interval
max_cfl_u:           1.0
";

const BOUNDARY_IN: &str = "\
version: 3.0
##!Exported by CONVERGE Studio
---

boundary_conditions:
   -  boundary:
         name:             liner
         id:               7
         type:             WALL
   -  boundary:
         name:             head
         id:               9
         type:             WALL
";

/// Scratch job root with both phase directories laid out.
///
/// Settings: boundaries `liner` and `head`, start time 125 (first stop time
/// 845), two restarts allowed. The mapping configuration is already written.
pub struct JobFixture {
    _temp: TempDir,
    ctx: JobContext,
}

impl JobFixture {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create job tempdir")?;
        let defaults = Settings::default();
        let settings = Settings {
            boundaries: vec!["liner".to_string(), "head".to_string()],
            start_time: Some(125.0),
            max_restarts: 2,
            solver: SolverConfig {
                command: vec!["converge".to_string()],
                nprocs: Some(1),
                ..defaults.solver.clone()
            },
            ..defaults
        };
        let ctx = JobContext::new(temp.path(), settings);
        for phase in Phase::ALL {
            let dir = ctx.paths.phase_dir(phase);
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            fs::write(ctx.paths.inputs(phase), INPUTS_IN).context("write inputs.in")?;
            fs::write(ctx.paths.boundary_file(phase), BOUNDARY_IN).context("write boundary.in")?;
        }
        fs::write(&ctx.paths.mapper_path, "#!/bin/sh\n").context("write mapper")?;
        fs::write(&ctx.paths.map_surface_path, "interface\n").context("write descriptor")?;
        write_mapping_configs(&ctx.paths, &ctx.settings.boundaries)?;
        Ok(Self { _temp: temp, ctx })
    }

    pub fn ctx(&self) -> &JobContext {
        &self.ctx
    }

    pub fn root(&self) -> &Path {
        &self.ctx.paths.root
    }

    /// Settings that do not change paths (start time, final cycle, tolerances).
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.ctx.settings
    }

    /// Current value of `key` in the phase's `inputs.in`.
    pub fn input(&self, phase: Phase, key: &str) -> String {
        read_entry(&self.ctx.paths.inputs(phase), key)
            .expect("read inputs.in")
            .unwrap_or_else(|| panic!("{phase} inputs.in has no {key}"))
    }

    /// Drop a `max_cfl_u.final` override into the job root.
    pub fn enable_final_cycle(&self) -> Result<()> {
        fs::write(self.root().join("max_cfl_u.final"), "max_cfl_u: 0.5\n")
            .context("write max_cfl_u.final")
    }
}

/// One scripted solver attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedRun {
    /// Write the completion sentinel.
    pub complete: bool,
    /// Time of the next numbered checkpoint to write.
    pub checkpoint_time: Option<f64>,
    /// Records of the exchange-log fragment to write.
    pub exchange_records: Vec<f64>,
}

impl ScriptedRun {
    pub fn completes_at(time: f64) -> Self {
        Self {
            complete: true,
            checkpoint_time: Some(time),
            exchange_records: vec![time],
        }
    }

    /// An aborted attempt; leaves an `abort_trace.txt` behind.
    pub fn crashes_at(checkpoint_time: Option<f64>) -> Self {
        Self {
            complete: false,
            checkpoint_time,
            exchange_records: checkpoint_time.into_iter().collect(),
        }
    }
}

/// Solver that writes the files a real attempt would leave behind.
///
/// Checkpoints take the next free number; exchange logs start at
/// `transfer.out` and continue with `transfer2.out`, `transfer3.out`, ...
pub struct ScriptedSolver {
    runs: RefCell<VecDeque<ScriptedRun>>,
    calls: RefCell<Vec<SolverRequest>>,
}

impl ScriptedSolver {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<SolverRequest> {
        self.calls.borrow().clone()
    }

    pub fn assert_drained(&self) {
        let left = self.runs.borrow().len();
        assert_eq!(left, 0, "{left} scripted solver runs were not used");
    }
}

impl Solver for ScriptedSolver {
    fn run(&self, request: &SolverRequest) -> Result<()> {
        self.calls.borrow_mut().push(request.clone());
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected {} solver run", request.phase))?;
        let dir = &request.workdir;

        if let Some(time) = run.checkpoint_time {
            let next = list_checkpoints(dir)?
                .iter()
                .filter_map(|file| file.number)
                .max()
                .unwrap_or(0)
                + 1;
            let name = numbered_name(CHECKPOINT_STEM, CHECKPOINT_EXT, next);
            fs::write(dir.join(name), format!("{time} CAD\n")).context("write checkpoint")?;
        }
        if !run.exchange_records.is_empty() {
            let fragments = list_fragments(dir)?;
            let name = if fragments.is_empty() {
                CANONICAL_LOG.to_string()
            } else {
                let highest = fragments.iter().filter_map(|f| f.number).max().unwrap_or(1);
                format!("{LOG_STEM}{}.{LOG_EXT}", highest + 1)
            };
            fs::write(dir.join(name), exchange_log_text(&run.exchange_records))
                .context("write exchange log")?;
        }
        fs::write(dir.join(format!("{}.echo", request.phase)), "echo\n").context("write echo")?;
        if run.complete {
            fs::write(dir.join(SENTINEL_FILE), "").context("write sentinel")?;
        } else {
            fs::write(dir.join("abort_trace.txt"), "solver aborted\n").context("write trace")?;
        }
        Ok(())
    }
}

/// Mapping tool that writes [`sample_text`] samples for every boundary.
///
/// Values are taken from the queue, then from the fallback; with neither the
/// call fails.
pub struct ScriptedMapper {
    values: RefCell<VecDeque<f64>>,
    fallback: Option<f64>,
    calls: RefCell<Vec<Phase>>,
}

impl ScriptedMapper {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values: RefCell::new(values.into()),
            fallback: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Always writes samples at `value`.
    pub fn writing(value: f64) -> Self {
        Self {
            fallback: Some(value),
            ..Self::new(Vec::new())
        }
    }

    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> Vec<Phase> {
        self.calls.borrow().clone()
    }
}

impl Mapper for ScriptedMapper {
    fn map(&self, request: &MapRequest) -> Result<()> {
        self.calls.borrow_mut().push(request.phase);
        let value = self
            .values
            .borrow_mut()
            .pop_front()
            .or(self.fallback)
            .ok_or_else(|| anyhow!("scripted mapping of {} failed", request.phase))?;
        for boundary in &request.boundaries {
            fs::write(request.root.join(sample_file_name(boundary)), sample_text(value))
                .context("write sample")?;
        }
        Ok(())
    }
}

/// Exchange log with one 20-line record per time after a 3-line header.
pub fn exchange_log_text(times: &[f64]) -> String {
    let mut text = String::from(" CONVERGE exchange log\n\n units: SI\n");
    for time in times {
        text.push_str(&format!(" Crank                  =  {time:.13}        (DEG)\n"));
        text.push_str(&format!(" Ave Gas Temperature  {time:.3}\n"));
        for i in 0..18 {
            text.push_str(&format!("  {time:.3}  {i}\n"));
        }
    }
    text
}

/// Three-point boundary sample at surface temperature `value`; flux, htc and
/// fluid temperature scale as 10x, 2x and 3x.
pub fn sample_text(value: f64) -> String {
    let mut text = String::from("# id x y z area Tw flux htc Tf\n");
    for (id, [x, y, z]) in [(1, [0.0, 0.0, 0.0]), (2, [1.0, 0.0, 0.0]), (3, [0.0, 1.0, 0.0])] {
        text.push_str(&format!(
            "{id} {x} {y} {z} 0.5 {} {} {} {}\n",
            value,
            value * 10.0,
            value * 2.0,
            value * 3.0
        ));
    }
    text
}
