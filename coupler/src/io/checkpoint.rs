//! Solver checkpoints (`restart.rst` and its numbered variants).

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
#[cfg(not(feature = "hdf5"))]
use anyhow::bail;
use tracing::debug;

use crate::io::numbered::{NumberedFile, list_numbered};

pub const CHECKPOINT_STEM: &str = "restart";
pub const CHECKPOINT_EXT: &str = "rst";
pub const CANONICAL_CHECKPOINT: &str = "restart.rst";
/// Directory (per phase) holding archived checkpoints.
pub const CHECKPOINT_ARCHIVE_DIR: &str = "restartFiles";
/// Number of archived checkpoints kept per phase.
pub const ARCHIVED_CHECKPOINTS: u32 = 3;

/// Reads the simulation time embedded in a checkpoint.
pub trait CheckpointReader {
    fn embedded_time(&self, path: &Path) -> Result<f64>;
}

/// Reader for text checkpoints whose first token is the simulation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCheckpointReader;

impl CheckpointReader for TextCheckpointReader {
    fn embedded_time(&self, path: &Path) -> Result<f64> {
        let file = File::open(path).with_context(|| format!("open checkpoint {}", path.display()))?;
        let mut first = Vec::new();
        BufReader::new(file)
            .read_until(b'\n', &mut first)
            .with_context(|| format!("read checkpoint {}", path.display()))?;
        let line = String::from_utf8_lossy(&first);
        let token = line
            .split_whitespace()
            .next()
            .ok_or_else(|| anyhow!("checkpoint {} has no time header", path.display()))?;
        token
            .parse::<f64>()
            .with_context(|| format!("parse time {token:?} in checkpoint {}", path.display()))
    }
}

/// Signature opening an HDF5 superblock.
const HDF5_SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";
/// The superblock sits at offset 0 or at 512 times a power of two.
const HDF5_FIRST_USER_BLOCK: u64 = 512;
/// Attribute holding the simulation time of an HDF5 checkpoint.
pub const HDF5_TIME_ATTR: &str = "TIME_STEP";

/// Whether `path` carries an HDF5 superblock signature.
pub fn is_hdf5(path: &Path) -> Result<bool> {
    let mut file = File::open(path).with_context(|| format!("open checkpoint {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat checkpoint {}", path.display()))?
        .len();
    let mut offset = 0;
    let mut signature = [0u8; 8];
    while offset + 8 <= len {
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut signature))
            .with_context(|| format!("read checkpoint {}", path.display()))?;
        if &signature == HDF5_SIGNATURE {
            return Ok(true);
        }
        offset = if offset == 0 { HDF5_FIRST_USER_BLOCK } else { offset * 2 };
    }
    Ok(false)
}

/// Reader for HDF5 checkpoints; the time is the first value of the
/// `TIME_STEP` root attribute.
#[cfg(feature = "hdf5")]
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5CheckpointReader;

#[cfg(feature = "hdf5")]
impl CheckpointReader for Hdf5CheckpointReader {
    fn embedded_time(&self, path: &Path) -> Result<f64> {
        let file = hdf5::File::open(path)
            .with_context(|| format!("open hdf5 checkpoint {}", path.display()))?;
        let values = file
            .attr(HDF5_TIME_ATTR)
            .and_then(|attr| attr.read_raw::<f64>())
            .with_context(|| format!("read {HDF5_TIME_ATTR} of {}", path.display()))?;
        values
            .first()
            .copied()
            .ok_or_else(|| anyhow!("{HDF5_TIME_ATTR} of {} is empty", path.display()))
    }
}

/// Reader wired into jobs: HDF5 checkpoints by their `TIME_STEP` attribute,
/// anything else as a text checkpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverCheckpointReader;

impl CheckpointReader for SolverCheckpointReader {
    fn embedded_time(&self, path: &Path) -> Result<f64> {
        if !is_hdf5(path)? {
            return TextCheckpointReader.embedded_time(path);
        }
        debug!(path = %path.display(), "reading hdf5 checkpoint");
        #[cfg(feature = "hdf5")]
        {
            Hdf5CheckpointReader.embedded_time(path)
        }
        #[cfg(not(feature = "hdf5"))]
        {
            bail!(
                "{} is an HDF5 checkpoint; rebuild coupler with the `hdf5` feature to read it",
                path.display()
            )
        }
    }
}

/// Checkpoints in `dir`, canonical first then ascending number.
pub fn list_checkpoints(dir: &Path) -> Result<Vec<NumberedFile>> {
    list_numbered(dir, CHECKPOINT_STEM, CHECKPOINT_EXT)
}
