//! `coupler` command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use coupler::context::JobContext;
use coupler::core::classifier::classify_restart;
use coupler::core::types::RestartPoint;
use coupler::errors::{FatalSimError, is_fatal};
use coupler::exit_codes;
use coupler::io::mapper::HtcMapper;
use coupler::io::run_state::load_run_state;
use coupler::io::solver::MpiSolver;
use coupler::logging;
use coupler::scheduler::{JobStop, PhaseReport, run_job};
use coupler::start::prepare_job;
use coupler::state::PhaseCommit;

#[derive(Parser)]
#[command(
    name = "coupler",
    version,
    about = "Restart-safe driver for coupled combustion/coolant simulations"
)]
struct Cli {
    /// Job root holding `settings.toml` and both phase directories.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the job until it is done or fails.
    Run {
        /// Solver command line, used when the settings leave it empty.
        #[arg(long, env = "CMD")]
        solver_cmd: Option<String>,
        /// Processor count, used when the settings leave it unset.
        #[arg(long, env = "SLURM_NTASKS")]
        nprocs: Option<u32>,
    },
    /// Print where the job stands and where it would resume.
    Status,
    /// Clear the sticky error flag once its cause has been fixed.
    ClearError,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { solver_cmd, nprocs } => cmd_run(&cli.root, solver_cmd.as_deref(), nprocs),
        Command::Status => cmd_status(&cli.root),
        Command::ClearError => cmd_clear_error(&cli.root),
    }
}

fn cmd_run(root: &Path, solver_cmd: Option<&str>, nprocs: Option<u32>) -> Result<i32> {
    let mut ctx = JobContext::load(root)?;
    ctx.settings.apply_solver_fallbacks(solver_cmd, nprocs);
    let mut state = load_run_state(&ctx.paths.run_state_path)?;
    if state.sim_error {
        let message = FatalSimError::StickyError.to_string();
        ctx.log.error(&message);
        eprintln!("{message}");
        return Ok(exit_codes::FAILED);
    }

    match prepare_job(&ctx, &mut state) {
        Ok(RestartPoint::AlreadyDone) => {
            println!("job already complete");
            return Ok(exit_codes::ALREADY_DONE);
        }
        Ok(point) => println!("starting at {point}"),
        Err(err) if is_fatal(&err) => {
            ctx.record_fatal(&mut state, &err)?;
            eprintln!("{:#}", err);
            return Ok(exit_codes::FAILED);
        }
        Err(err) => return Err(err),
    }

    let solver = MpiSolver::from_settings(&ctx.settings)?;
    let mapper = HtcMapper {
        executable: ctx.paths.mapper_path.clone(),
    };
    let outcome = run_job(&ctx, &mut state, &solver, &mapper, print_report)?;
    match outcome.stop {
        JobStop::Done => {
            println!("job complete after {} phase run(s)", outcome.phases_run);
            Ok(exit_codes::OK)
        }
        JobStop::Failed { message } => {
            eprintln!("{message}");
            Ok(exit_codes::FAILED)
        }
    }
}

fn print_report(report: &PhaseReport) {
    let attempts = report
        .attempts
        .map(|n| format!(", {n} attempt(s)"))
        .unwrap_or_default();
    let next = match report.commit {
        PhaseCommit::AdvanceToCoolant => "coolant next",
        PhaseCommit::NextIteration => "next iteration",
        PhaseCommit::FinalCycleEntered => "final cycle next",
        PhaseCommit::Done => "done",
    };
    println!(
        "iteration {}: {} committed{attempts}; {next}",
        report.iteration, report.phase
    );
}

fn cmd_status(root: &Path) -> Result<i32> {
    let ctx = JobContext::load(root)?;
    let state = load_run_state(&ctx.paths.run_state_path)?;
    match classify_restart(&state) {
        Ok(point) => println!("restart point: {point}"),
        Err(err) => println!("restart point: inconsistent ({err})"),
    }
    println!("iteration: {}", state.iteration);
    println!("next phase: {}", state.next_phase);
    match state.comb_stop_time {
        Some(stop) => println!("combustion stop time: {stop}"),
        None => println!("combustion stop time: unset"),
    }
    println!(
        "combustion: attempts {}, converged {}",
        state.comb_attempts, state.comb_converged
    );
    println!(
        "coolant: attempts {}, converged {}",
        state.cool_attempts, state.cool_converged
    );
    if let Some(cursor) = state.post_process {
        println!("post-process: {} at {}", cursor.phase, cursor.step);
    }
    let final_cycle = &state.final_cycle;
    println!(
        "final cycle: configured {}, running {}, completed {}",
        final_cycle.has_final_step, final_cycle.running, final_cycle.completed
    );
    println!("sticky error: {}", state.sim_error);
    Ok(exit_codes::OK)
}

fn cmd_clear_error(root: &Path) -> Result<i32> {
    let ctx = JobContext::load(root)?;
    let mut state = load_run_state(&ctx.paths.run_state_path)?;
    if !state.sim_error {
        println!("sticky error flag is not set");
        return Ok(exit_codes::OK);
    }
    state.sim_error = false;
    ctx.persist(&state).context("clear sticky error flag")?;
    ctx.log.info("Sticky error flag cleared by operator");
    println!("sticky error flag cleared");
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_fallbacks() {
        let cli = Cli::parse_from([
            "coupler",
            "--root",
            "/jobs/a",
            "run",
            "--solver-cmd",
            "converge --super",
            "--nprocs",
            "36",
        ]);
        assert_eq!(cli.root, PathBuf::from("/jobs/a"));
        match cli.command {
            Command::Run { solver_cmd, nprocs } => {
                assert_eq!(solver_cmd.as_deref(), Some("converge --super"));
                assert_eq!(nprocs, Some(36));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_clear_error_defaults_root() {
        let cli = Cli::parse_from(["coupler", "clear-error"]);
        assert_eq!(cli.root, PathBuf::from("."));
        assert!(matches!(cli.command, Command::ClearError));
    }
}
