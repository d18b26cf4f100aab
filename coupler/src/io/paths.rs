//! Canonical paths within a job root.

use std::path::{Path, PathBuf};

use crate::core::types::Phase;
use crate::io::checkpoint::{CANONICAL_CHECKPOINT, CHECKPOINT_ARCHIVE_DIR};
use crate::io::config::{SETTINGS_FILE, Settings};
use crate::io::input_deck::INPUTS_FILE;

pub const RUN_STATE_FILE: &str = "run_state.json";
pub const SENTINEL_FILE: &str = "converge.done";
pub const SOLVER_LOG_FILE: &str = "solver.log";
pub const RESULTS_DIR: &str = "results";
pub const BOUNDARY_FILE: &str = "boundary.in";
/// Directory (inside the combustion dir) keeping inputs replaced for the final cycle.
pub const ORIGINAL_FILES_DIR: &str = "OriginalFiles";

/// All canonical paths for a job root.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub root: PathBuf,
    pub settings_path: PathBuf,
    pub run_state_path: PathBuf,
    /// Exchange log assembled for the mapping tool.
    pub exchange_tmp_path: PathBuf,
    /// Mapping configuration read by the mapping tool.
    pub mapping_config_path: PathBuf,
    pub map_surface_path: PathBuf,
    pub mapper_path: PathBuf,
    combustion_dir: PathBuf,
    coolant_dir: PathBuf,
}

impl JobPaths {
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        let root = root.into();
        Self {
            settings_path: root.join(SETTINGS_FILE),
            run_state_path: root.join(RUN_STATE_FILE),
            exchange_tmp_path: root.join("transferTmp.out"),
            mapping_config_path: root.join("htc_inputs.in"),
            map_surface_path: root.join(&settings.map_surface_file),
            mapper_path: root.join(&settings.mapper.executable),
            combustion_dir: root.join(&settings.combustion_dir),
            coolant_dir: root.join(&settings.coolant_dir),
            root,
        }
    }

    pub fn phase_dir(&self, phase: Phase) -> &Path {
        match phase {
            Phase::Combustion => &self.combustion_dir,
            Phase::Coolant => &self.coolant_dir,
        }
    }

    pub fn inputs(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(INPUTS_FILE)
    }

    pub fn boundary_file(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(BOUNDARY_FILE)
    }

    pub fn sentinel(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(SENTINEL_FILE)
    }

    pub fn solver_log(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(SOLVER_LOG_FILE)
    }

    pub fn canonical_checkpoint(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(CANONICAL_CHECKPOINT)
    }

    pub fn checkpoint_archive(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(CHECKPOINT_ARCHIVE_DIR)
    }

    pub fn results_root(&self, phase: Phase) -> PathBuf {
        self.phase_dir(phase).join(RESULTS_DIR)
    }

    /// `results/<whole time units>/` for outputs of the run ending at `time`.
    pub fn results_dir(&self, phase: Phase, time: f64) -> PathBuf {
        self.results_root(phase).join(format!("{}", time.trunc() as i64))
    }

    /// Per-phase mapping configuration generated once per job.
    pub fn mapping_config_for(&self, phase: Phase) -> PathBuf {
        self.root.join(format!("htc_inputs_{phase}.in"))
    }

    pub fn mapper_log(&self, phase: Phase) -> PathBuf {
        self.root.join(format!("log.htcMap{}", phase.title()))
    }

    pub fn convergence_log(&self, phase: Phase) -> PathBuf {
        self.root.join(format!("{phase}Convergence.txt"))
    }

    /// Archive of the previous iteration's samples mapped out of `phase`.
    pub fn sample_archive(&self, phase: Phase) -> PathBuf {
        self.root.join(format!("prev{}Data", phase.title()))
    }

    /// Fresh mapped sample for `boundary` in the job root.
    pub fn mapped_sample(&self, boundary: &str) -> PathBuf {
        self.root.join(sample_file_name(boundary))
    }

    pub fn archived_sample(&self, phase: Phase, boundary: &str) -> PathBuf {
        self.sample_archive(phase).join(sample_file_name(boundary))
    }

    /// Boundary condition file consumed by the `target` phase.
    pub fn boundary_condition(&self, target: Phase, boundary: &str) -> PathBuf {
        self.phase_dir(target)
            .join(format!("{boundary}_spatialTemp.in"))
    }

    pub fn original_files_dir(&self) -> PathBuf {
        self.combustion_dir.join(ORIGINAL_FILES_DIR)
    }
}

pub fn sample_file_name(boundary: &str) -> String {
    format!("htc_triangles_{boundary}.map")
}
