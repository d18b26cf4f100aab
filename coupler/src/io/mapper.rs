//! Mapping tool abstraction.
//!
//! The mapping tool reads `htc_inputs.in` and the assembled exchange log from
//! the job root and writes one `htc_triangles_<boundary>.map` sample per
//! boundary next to them.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::Phase;
use crate::io::process::run_logged;

#[derive(Debug, Clone)]
pub struct MapRequest {
    /// Phase whose exchange log is being mapped.
    pub phase: Phase,
    /// Job root; the tool runs here and writes its samples here.
    pub root: PathBuf,
    /// Interface descriptor (`engineToCoolantInterface.dat`).
    pub descriptor: PathBuf,
    /// Assembled exchange log (`transferTmp.out`).
    pub exchange_log: PathBuf,
    /// Tool output is appended here (`log.htcMap<Phase>`).
    pub log_path: PathBuf,
    pub boundaries: Vec<String>,
}

pub trait Mapper {
    fn map(&self, request: &MapRequest) -> Result<()>;
}

/// Runs the `htc_map_64` executable.
#[derive(Debug, Clone)]
pub struct HtcMapper {
    pub executable: PathBuf,
}

impl Mapper for HtcMapper {
    #[instrument(skip_all, fields(phase = %request.phase))]
    fn map(&self, request: &MapRequest) -> Result<()> {
        info!(executable = %self.executable.display(), "running mapping tool");
        let mut cmd = Command::new(&self.executable);
        cmd.arg(&request.descriptor)
            .arg(&request.exchange_log)
            .current_dir(&request.root);
        let status = run_logged(cmd, &request.log_path).context("run mapping tool")?;
        if !status.success() {
            warn!(exit_code = ?status.code(), "mapping tool failed");
            return Err(anyhow!(
                "mapping tool exited with status {:?}; see {}",
                status.code(),
                request.log_path.display()
            ));
        }
        Ok(())
    }
}
