//! Editing of solver input descriptors (`inputs.in`).
//!
//! Files are line oriented `key: value  # comment`. Updates replace the value
//! on the first case-insensitive key match and keep the trailing comment
//! aligned at a fixed column. Everything else is copied through untouched.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const INPUTS_FILE: &str = "inputs.in";
pub const MAP_INPUT_FILE: &str = "map.in";

const COMMENT_COLUMN: usize = 70;
const MAP_INPUT_TEMPLATE: &str = include_str!("../templates/map.in");

/// Scalar written into an input descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputValue::Int(v) => write!(f, "{v}"),
            InputValue::Float(v) => write!(f, "{v}"),
            InputValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        InputValue::Int(value)
    }
}

impl From<u32> for InputValue {
    fn from(value: u32) -> Self {
        InputValue::Int(i64::from(value))
    }
}

impl From<f64> for InputValue {
    fn from(value: f64) -> Self {
        InputValue::Float(value)
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        InputValue::Text(value.to_string())
    }
}

/// Ordered set of key/value updates for one input descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputUpdates {
    entries: Vec<(String, InputValue)>,
}

impl InputUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry (keys compare case-insensitively).
    pub fn set(mut self, key: &str, value: impl Into<InputValue>) -> Self {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&InputValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maps_from_checkpoint(&self) -> bool {
        matches!(self.get("map_flag"), Some(InputValue::Text(v)) if v == "MAP")
    }
}

/// Apply `updates` to `<dir>/inputs.in`.
///
/// `map_flag: MAP` forces `restart_flag: 0` (a restart would take precedence
/// over mapping) and creates `<dir>/map.in` when missing. Returns the keys
/// that matched no line; they are also logged as warnings.
pub fn update_inputs(dir: &Path, updates: InputUpdates) -> Result<Vec<String>> {
    let mut updates = updates;
    if updates.maps_from_checkpoint() {
        updates = updates.set("restart_flag", 0i64);
        ensure_map_input(dir)?;
    }
    let path = dir.join(INPUTS_FILE);
    debug!(path = %path.display(), count = updates.entries.len(), "updating inputs");
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;

    let mut pending = updates.entries;
    let mut out = String::with_capacity(contents.len());
    for line in contents.lines() {
        let matched = entry_key(line).and_then(|key| {
            pending
                .iter()
                .position(|(k, _)| k.eq_ignore_ascii_case(key))
        });
        match matched {
            Some(index) => {
                let (_, value) = pending.remove(index);
                out.push_str(&replace_value(line, &value));
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    if !contents.ends_with('\n') {
        out.pop();
    }
    write_atomic(&path, &out)?;

    let unmatched: Vec<String> = pending.into_iter().map(|(k, _)| k).collect();
    for key in &unmatched {
        warn!(path = %path.display(), key = %key, "input entry not found; value not updated");
    }
    Ok(unmatched)
}

/// Value of the first entry named `key` in `path`, if any.
pub fn read_entry(path: &Path, key: &str) -> Result<Option<String>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(contents.lines().find_map(|line| {
        let k = entry_key(line)?;
        if !k.eq_ignore_ascii_case(key) {
            return None;
        }
        let body = line.split('#').next().unwrap_or_default();
        body.split_once(':').map(|(_, v)| v.trim().to_string())
    }))
}

/// Write the default `map.in` into `dir` unless one exists.
pub fn ensure_map_input(dir: &Path) -> Result<()> {
    let path = dir.join(MAP_INPUT_FILE);
    if path.exists() {
        return Ok(());
    }
    debug!(path = %path.display(), "creating map input");
    fs::write(&path, MAP_INPUT_TEMPLATE).with_context(|| format!("write {}", path.display()))
}

/// Key of a `key: value` line, ignoring comments and lines without a value.
fn entry_key(line: &str) -> Option<&str> {
    let body = line.split('#').next()?;
    let (key, value) = body.split_once(':')?;
    if value.trim().is_empty() {
        return None;
    }
    Some(key.trim())
}

fn replace_value(line: &str, value: &InputValue) -> String {
    let (body, comment) = match line.find('#') {
        Some(pos) => (&line[..pos], Some(&line[pos..])),
        None => (line, None),
    };
    // entry_key guarantees a colon in the body.
    let colon = body.find(':').unwrap_or(body.len());
    let after = &body[colon + 1..];
    let gap = after.len() - after.trim_start().len();
    let mut updated = String::from(&body[..colon + 1 + gap]);
    if gap == 0 {
        updated.push(' ');
    }
    updated.push_str(&value.to_string());

    if let Some(comment) = comment {
        if updated.len() < COMMENT_COLUMN {
            let pad = COMMENT_COLUMN - updated.len();
            updated.extend(std::iter::repeat_n(' ', pad));
        } else {
            updated.push(' ');
        }
        updated.push_str(comment);
    }
    updated
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("in.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp inputs {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
