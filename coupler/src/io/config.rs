//! Job settings stored in `settings.toml` at the job root.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::convergence::Tolerances;
use crate::errors::LoadError;
use crate::io::input_deck::InputValue;

/// File name of the settings file inside the job root.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Job settings (TOML).
///
/// Edited by operators before submitting a job and immutable for the lifetime
/// of a process. Missing fields take the defaults below; `boundaries` has no
/// useful default and must be provided.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Names of the interface boundaries mapped between the phases.
    pub boundaries: Vec<String>,

    pub combustion_dir: String,
    pub coolant_dir: String,

    /// Retries allowed after a failed solver attempt before the job is cancelled.
    pub max_restarts: u32,

    /// Simulation time covered by one combustion run (crank-angle degrees).
    pub phase_duration: f64,

    /// Start time of the first combustion run. Read from the combustion
    /// `inputs.in` (`start_time`) when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,

    /// Interface descriptor passed to the mapping tool (relative to the job root).
    pub map_surface_file: String,

    /// Keep coolant outputs under `results/`; otherwise they are deleted.
    pub save_coolant_output: bool,

    /// Wall temperature (K) written into `boundary.in` for a boundary that
    /// has no mapped spatial file yet.
    pub boundary_temp: f64,
    /// Wall heat transfer coefficient paired with `boundary_temp` in the
    /// combustion `boundary.in`.
    pub boundary_htc: f64,

    pub tolerances: Tolerances,
    pub solver: SolverConfig,
    pub mapper: MapperConfig,
    pub final_cycle: FinalCycleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Solver command line; falls back to the `CMD` environment variable.
    pub command: Vec<String>,
    /// MPI launcher.
    pub mpi_exe: String,
    /// Launcher options. Replaces the default `-np <nprocs>` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpi_options: Option<Vec<String>>,
    /// Processor count; falls back to `SLURM_NTASKS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nprocs: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapperConfig {
    /// Mapping executable, relative to the job root.
    pub executable: String,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            executable: "./htc_map_64".to_string(),
        }
    }
}

/// Operator overrides applied before the single pass run after convergence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinalCycleConfig {
    /// Extra `<name>.final` files in the job root that replace `<name>.in`.
    pub cfl_files: Vec<String>,
    /// Post-write interval: a number, or a file name in the job root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twrite_post: Option<InputValue>,
    /// Key/value pairs written into the combustion `inputs.in`.
    pub overrides: BTreeMap<String, InputValue>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            boundaries: Vec::new(),
            combustion_dir: "combustion".to_string(),
            coolant_dir: "coolant".to_string(),
            max_restarts: 5,
            phase_duration: 720.0,
            start_time: None,
            map_surface_file: "engineToCoolantInterface.dat".to_string(),
            save_coolant_output: true,
            boundary_temp: 363.0,
            boundary_htc: 5000.0,
            tolerances: Tolerances::default(),
            solver: SolverConfig {
                mpi_exe: "mpirun".to_string(),
                ..SolverConfig::default()
            },
            mapper: MapperConfig::default(),
            final_cycle: FinalCycleConfig::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |message: &str| {
            Err(LoadError::InvalidSettings {
                message: message.to_string(),
            })
        };
        if self.boundaries.is_empty() {
            return invalid("boundaries must list at least one boundary");
        }
        if self.boundaries.iter().any(|b| b.trim().is_empty()) {
            return invalid("boundaries must not contain empty names");
        }
        if self.combustion_dir.trim().is_empty() || self.coolant_dir.trim().is_empty() {
            return invalid("combustion_dir and coolant_dir must be non-empty");
        }
        if self.combustion_dir == self.coolant_dir {
            return invalid("combustion_dir and coolant_dir must differ");
        }
        if !(self.phase_duration.is_finite() && self.phase_duration > 0.0) {
            return invalid("phase_duration must be > 0");
        }
        let tol = &self.tolerances;
        if [tol.flux, tol.boundary_temp, tol.htc, tol.fluid_temp]
            .iter()
            .any(|t| !(t.is_finite() && *t > 0.0))
        {
            return invalid("tolerances must be > 0");
        }
        if [self.boundary_temp, self.boundary_htc]
            .iter()
            .any(|v| !(v.is_finite() && *v > 0.0))
        {
            return invalid("boundary_temp and boundary_htc must be > 0");
        }
        if self.map_surface_file.trim().is_empty() {
            return invalid("map_surface_file must be non-empty");
        }
        if self.mapper.executable.trim().is_empty() {
            return invalid("mapper.executable must be non-empty");
        }
        if self.solver.mpi_exe.trim().is_empty() {
            return invalid("solver.mpi_exe must be non-empty");
        }
        Ok(())
    }

    /// Fill solver command and processor count from CLI/environment values
    /// when the settings file leaves them unset.
    pub fn apply_solver_fallbacks(&mut self, command: Option<&str>, nprocs: Option<u32>) {
        if self.solver.command.is_empty()
            && let Some(command) = command
        {
            self.solver.command = command.split_whitespace().map(str::to_string).collect();
        }
        if self.solver.nprocs.is_none() {
            self.solver.nprocs = nprocs;
        }
    }
}

/// Load and validate settings.
///
/// A missing file is a [`LoadError`]: a job cannot run without its boundary list.
pub fn load_settings(path: &Path) -> Result<Settings> {
    debug!(path = %path.display(), "loading settings");
    if !path.exists() {
        return Err(LoadError::MissingSettings {
            path: path.to_path_buf(),
        }
        .into());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings = toml::from_str(&contents).map_err(|err| LoadError::InvalidSettings {
        message: format!("parse {}: {err}", path.display()),
    })?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Settings {
        Settings {
            boundaries: vec!["liner".to_string(), "head".to_string()],
            ..Settings::default()
        }
    }

    #[test]
    fn load_missing_is_load_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_settings(&temp.path().join(SETTINGS_FILE)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::MissingSettings { .. })
        ));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        let mut settings = minimal();
        settings.start_time = Some(125.0);
        settings
            .final_cycle
            .overrides
            .insert("max_cfl_u".to_string(), InputValue::Float(0.5));
        settings.final_cycle.twrite_post = Some(InputValue::Text("twrite_post.final".into()));
        write_settings(&path, &settings).expect("write");
        let loaded = load_settings(&path).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn sparse_file_takes_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(
            &path,
            "boundaries = [\"liner\"]\n\n[tolerances]\nflux = 2.5\n",
        )
        .expect("write");
        let loaded = load_settings(&path).expect("load");
        assert_eq!(loaded.max_restarts, 5);
        assert_eq!(loaded.phase_duration, 720.0);
        assert_eq!(loaded.tolerances.flux, 2.5);
        assert_eq!(loaded.tolerances.boundary_temp, 5.0);
        assert_eq!(loaded.solver.mpi_exe, "mpirun");
        assert!(loaded.save_coolant_output);
        assert_eq!(loaded.boundary_temp, 363.0);
        assert_eq!(loaded.boundary_htc, 5000.0);
    }

    #[test]
    fn wrongly_typed_value_is_load_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(SETTINGS_FILE);
        fs::write(&path, "boundaries = [\"liner\"]\nmax_restarts = \"five\"\n").expect("write");
        let err = load_settings(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::InvalidSettings { .. })
        ));
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(Settings::default().validate().is_err());

        let mut settings = minimal();
        settings.tolerances.htc = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = minimal();
        settings.coolant_dir = settings.combustion_dir.clone();
        assert!(settings.validate().is_err());

        let mut settings = minimal();
        settings.phase_duration = -720.0;
        assert!(settings.validate().is_err());

        let mut settings = minimal();
        settings.boundary_htc = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn solver_fallbacks_only_fill_unset_fields() {
        let mut settings = minimal();
        settings.apply_solver_fallbacks(Some("converge-3.0 --super"), Some(64));
        assert_eq!(settings.solver.command, vec!["converge-3.0", "--super"]);
        assert_eq!(settings.solver.nprocs, Some(64));

        settings.apply_solver_fallbacks(Some("other"), Some(8));
        assert_eq!(settings.solver.command, vec!["converge-3.0", "--super"]);
        assert_eq!(settings.solver.nprocs, Some(64));
    }
}
