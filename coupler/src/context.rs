//! Per-process job context shared by the orchestration modules.

use std::path::Path;

use anyhow::{Context, Result};

use crate::io::checkpoint::{CheckpointReader, SolverCheckpointReader};
use crate::io::config::{Settings, load_settings};
use crate::io::job_log::JobLog;
use crate::io::paths::JobPaths;
use crate::io::run_state::write_run_state;
use crate::state::RunState;

/// Immutable inputs of a job: paths, settings, logs and the checkpoint reader.
pub struct JobContext {
    pub paths: JobPaths,
    pub settings: Settings,
    pub log: JobLog,
    pub reader: Box<dyn CheckpointReader>,
}

impl JobContext {
    pub fn new(root: &Path, settings: Settings) -> Self {
        Self {
            paths: JobPaths::new(root, &settings),
            log: JobLog::new(root),
            settings,
            reader: Box::new(SolverCheckpointReader),
        }
    }

    /// Load `settings.toml` from `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let settings = load_settings(&root.join(crate::io::config::SETTINGS_FILE))?;
        Ok(Self::new(root, settings))
    }

    pub fn with_reader(mut self, reader: impl CheckpointReader + 'static) -> Self {
        self.reader = Box::new(reader);
        self
    }

    pub fn persist(&self, state: &RunState) -> Result<()> {
        write_run_state(&self.paths.run_state_path, state)
            .with_context(|| format!("persist {}", self.paths.run_state_path.display()))
    }

    /// Set the sticky error flag, persist it and write the diagnostic.
    pub fn record_fatal(&self, state: &mut RunState, err: &anyhow::Error) -> Result<()> {
        self.log.error(&format!("{err:#}"));
        self.log
            .error("Job cancelled; fix the cause and run `coupler clear-error` before resubmitting");
        state.sim_error = true;
        self.persist(state)
    }
}
