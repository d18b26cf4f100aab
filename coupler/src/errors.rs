//! Typed error hierarchy for the driver.
//!
//! Three enums classify failures by how the job reacts to them:
//! - `LoadError`: settings or run state unusable; abort before any run.
//! - `FatalSimError`: the simulation cannot continue; sets the sticky flag.
//! - `ConsistencyError`: on-disk or persisted state is contradictory; never retried.
//!
//! Errors travel as `anyhow::Error` and are recovered with `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::Phase;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("settings file {path} not found")]
    MissingSettings { path: PathBuf },

    #[error("invalid settings: {message}")]
    InvalidSettings { message: String },

    #[error("run state {path} is not valid JSON: {source}")]
    MalformedRunState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("run state {path} failed schema validation: {messages}")]
    SchemaViolation { path: PathBuf, messages: String },

    #[error("missing mapping prerequisite {path}")]
    MissingPrerequisite { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum FatalSimError {
    #[error("{phase} simulation failed {attempts} consecutive attempts (max restarts {max_restarts})")]
    RetriesExhausted {
        phase: Phase,
        attempts: u32,
        max_restarts: u32,
    },

    #[error("{phase} checkpoint time {actual} does not match expected time {expected}")]
    TimeMismatch {
        phase: Phase,
        expected: f64,
        actual: f64,
    },

    #[error("no checkpoint found in {dir}; simulation cannot be restarted")]
    NoCheckpoint { dir: PathBuf },

    #[error("checkpoint time {actual} is past the combustion stop time {stop}")]
    CheckpointPastStop { actual: f64, stop: f64 },

    #[error("mapping {phase} data failed: {message}")]
    MapFailed { phase: Phase, message: String },

    #[error("sticky error flag is set; clear it with `coupler clear-error` after fixing the cause")]
    StickyError,
}

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("{count} exchange log fragments in {dir}; at most two may exist")]
    TooManyLogFragments { dir: PathBuf, count: usize },

    #[error("numbered exchange log fragments without transfer.out in {dir}")]
    NumberedFragmentsWithoutCanonical { dir: PathBuf },

    #[error("boundary {boundary} has id {combustion} in combustion but {coolant} in coolant")]
    BoundaryIdMismatch {
        boundary: String,
        combustion: i64,
        coolant: i64,
    },

    #[error("boundary {boundary} not found in {path}")]
    MissingBoundary { boundary: String, path: PathBuf },

    #[error("existing output in {dir}; remove it before starting a new job")]
    ExistingData { dir: PathBuf },

    #[error("both phase attempt counters are nonzero (combustion {combustion}, coolant {coolant})")]
    AmbiguousResumePoint { combustion: u32, coolant: u32 },
}

/// True when `err` must halt the job and set the sticky error flag.
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FatalSimError>().is_some()
        || err.downcast_ref::<ConsistencyError>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn fatal_errors_are_detected_through_context() {
        let err = Err::<(), _>(FatalSimError::StickyError)
            .context("run coolant")
            .unwrap_err();
        assert!(is_fatal(&err));

        let err = Err::<(), _>(ConsistencyError::TooManyLogFragments {
            dir: PathBuf::from("combustion"),
            count: 3,
        })
        .context("reconcile")
        .unwrap_err();
        assert!(is_fatal(&err));
    }

    #[test]
    fn load_errors_are_not_fatal() {
        let err = anyhow::Error::new(LoadError::MissingSettings {
            path: PathBuf::from("settings.toml"),
        });
        assert!(!is_fatal(&err));
        assert!(!is_fatal(&anyhow::anyhow!("disk full")));
    }
}
