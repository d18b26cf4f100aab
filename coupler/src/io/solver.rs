//! Solver abstraction for phase runs.
//!
//! The [`Solver`] trait decouples the phase executor from the MPI launch of
//! the external solver. Tests use scripted solvers that write checkpoints and
//! completion markers without spawning processes.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::Phase;
use crate::errors::LoadError;
use crate::io::config::Settings;
use crate::io::process::run_logged;

/// Parameters for one solver attempt.
#[derive(Debug, Clone)]
pub struct SolverRequest {
    pub phase: Phase,
    /// Phase directory; the solver runs with it as working directory.
    pub workdir: PathBuf,
    /// Solver stdout/stderr is appended here.
    pub log_path: PathBuf,
}

/// Abstraction over solver launch backends.
///
/// A returned `Ok` only means the process ran; completion is judged from the
/// files it left behind.
pub trait Solver {
    fn run(&self, request: &SolverRequest) -> Result<()>;
}

/// Launches the solver through an MPI launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpiSolver {
    argv: Vec<String>,
}

impl MpiSolver {
    /// Build `<mpi_exe> <mpi_options | -np N> <command...>` from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, LoadError> {
        let solver = &settings.solver;
        if solver.command.is_empty() {
            return Err(LoadError::InvalidSettings {
                message: "solver command not set (settings solver.command or CMD)".to_string(),
            });
        }
        let mut argv = vec![solver.mpi_exe.clone()];
        match (&solver.mpi_options, solver.nprocs) {
            (Some(options), _) => argv.extend(options.iter().cloned()),
            (None, Some(nprocs)) => {
                argv.push("-np".to_string());
                argv.push(nprocs.to_string());
            }
            (None, None) => {
                return Err(LoadError::InvalidSettings {
                    message: "processor count not set (settings solver.nprocs or SLURM_NTASKS)"
                        .to_string(),
                });
            }
        }
        argv.extend(solver.command.iter().cloned());
        Ok(Self { argv })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl Solver for MpiSolver {
    #[instrument(skip_all, fields(phase = %request.phase))]
    fn run(&self, request: &SolverRequest) -> Result<()> {
        info!(workdir = %request.workdir.display(), argv = ?self.argv, "starting solver");
        let (program, args) = self
            .argv
            .split_first()
            .context("solver command line is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        let status = run_logged(cmd, &request.log_path)
            .with_context(|| format!("run {} solver", request.phase))?;
        if !status.success() {
            warn!(exit_code = ?status.code(), "solver exited unsuccessfully");
        }
        Ok(())
    }
}
