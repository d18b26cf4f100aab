//! Run state storage (`run_state.json`) with schema validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::debug;

use crate::errors::LoadError;
use crate::state::RunState;

const RUN_STATE_SCHEMA: &str = include_str!("../../schemas/run_state.schema.json");

static VALIDATOR: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(RUN_STATE_SCHEMA).map_err(|err| err.to_string())?;
    validator_for(&schema).map_err(|err| err.to_string())
});

/// Load run state from disk. A missing file is a fresh job.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    if !path.exists() {
        debug!("no run state; starting fresh");
        return Ok(RunState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|source| LoadError::MalformedRunState {
            path: path.to_path_buf(),
            source,
        })?;
    validate_schema(path, &value)?;
    let state: RunState =
        serde_json::from_value(value).map_err(|source| LoadError::MalformedRunState {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(
        iteration = state.iteration,
        comb_attempts = state.comb_attempts,
        cool_attempts = state.cool_attempts,
        cursor = ?state.post_process,
        "run state loaded"
    );
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(
        path = %path.display(),
        iteration = state.iteration,
        cursor = ?state.post_process,
        "writing run state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn validate_schema(path: &Path, value: &Value) -> Result<()> {
    let validator = VALIDATOR
        .as_ref()
        .map_err(|err| anyhow!("invalid run state schema: {err}"))?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(LoadError::SchemaViolation {
        path: path.to_path_buf(),
        messages: messages.join("; "),
    }
    .into())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Phase, PostStep, PostStepCursor};

    /// Verifies write then load preserves every field, including the cursor.
    #[test]
    fn run_state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        let mut state = RunState {
            initialized: true,
            iteration: 4,
            cool_attempts: 2,
            comb_converged: true,
            comb_stop_time: Some(2285.0),
            next_phase: Phase::Coolant,
            post_process: Some(PostStepCursor {
                phase: Phase::Coolant,
                step: PostStep::SaveResults,
            }),
            ..RunState::default()
        };
        state.ignore_first_checkpoint.set(Phase::Coolant, true);
        state.final_cycle.has_final_step = true;

        write_run_state(&path, &state).expect("write");
        assert_eq!(load_run_state(&path).expect("load"), state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_fresh_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = load_run_state(&temp.path().join("run_state.json")).expect("load");
        assert_eq!(state, RunState::default());
    }

    #[test]
    fn malformed_json_is_load_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        fs::write(&path, "{\"iteration\": 3,").expect("write");
        let err = load_run_state(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LoadError>(),
            Some(LoadError::MalformedRunState { .. })
        ));
    }

    /// Unknown fields and out-of-range values are rejected by the schema
    /// rather than silently defaulted.
    #[test]
    fn schema_violations_are_load_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        for bad in [
            r#"{"iteration": -1}"#,
            r#"{"next_phase": "exhaust"}"#,
            r#"{"post_process": {"phase": "coolant", "step": "REBOOT"}}"#,
            r#"{"mystery": true}"#,
        ] {
            fs::write(&path, bad).expect("write");
            let err = load_run_state(&path).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<LoadError>(),
                    Some(LoadError::SchemaViolation { .. })
                ),
                "expected schema violation for {bad}"
            );
        }
    }

    /// Partial files from older runs take defaults for absent fields.
    #[test]
    fn sparse_state_takes_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run_state.json");
        fs::write(&path, r#"{"initialized": true, "comb_stop_time": 845.0}"#).expect("write");
        let state = load_run_state(&path).expect("load");
        assert!(state.initialized);
        assert_eq!(state.comb_stop_time, Some(845.0));
        assert_eq!(state.next_phase, Phase::Combustion);
        assert_eq!(state.post_process, None);
    }
}
