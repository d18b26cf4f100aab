//! Thermal wall entries of the solver's `boundary.in`.
//!
//! The file is a four-line solver preamble followed by YAML. The preamble is
//! copied through verbatim; the YAML body is edited as a tree and re-emitted.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::core::types::Phase;
use crate::io::config::Settings;
use crate::io::files::replace_contents;
use crate::io::mapping_config::BOUNDARY_FILE_PREAMBLE_LINES;
use crate::io::paths::JobPaths;

/// Updates for one named boundary: dotted key paths below its `boundary`
/// entry (e.g. `temperature.value`) and the values to store there.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryUpdate {
    pub name: String,
    pub entries: Vec<(String, Value)>,
}

/// Point every mapped wall of `phase` at its `<boundary>_spatialTemp.in`, or
/// at the fixed fallback values while no spatial file exists.
///
/// Combustion walls take the file as `temperature.reference_temperature`;
/// coolant walls take it as `temperature.value`. Returns the boundary names
/// missing from `boundary.in`.
pub fn sync_thermal_boundaries(
    paths: &JobPaths,
    settings: &Settings,
    phase: Phase,
) -> Result<Vec<String>> {
    let mut updates = Vec::with_capacity(settings.boundaries.len());
    for boundary in &settings.boundaries {
        let spatial = paths.boundary_condition(phase, boundary);
        let reference = if spatial.exists() {
            let name = spatial
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("{} has no file name", spatial.display()))?;
            Some(Value::String(name))
        } else {
            None
        };
        let entries = match (phase, reference) {
            (Phase::Combustion, Some(file)) => {
                vec![("temperature.reference_temperature".to_string(), file)]
            }
            (Phase::Combustion, None) => vec![
                (
                    "temperature.reference_temperature".to_string(),
                    Value::from(settings.boundary_temp),
                ),
                ("temperature.htc".to_string(), Value::from(settings.boundary_htc)),
            ],
            (Phase::Coolant, Some(file)) => vec![("temperature.value".to_string(), file)],
            (Phase::Coolant, None) => vec![(
                "temperature.value".to_string(),
                Value::from(settings.boundary_temp),
            )],
        };
        updates.push(BoundaryUpdate {
            name: boundary.clone(),
            entries,
        });
    }
    update_boundaries(&paths.boundary_file(phase), &updates)
}

/// Apply `updates` to a `boundary.in`. Returns the names that matched no
/// boundary; they are also logged as warnings.
pub fn update_boundaries(path: &Path, updates: &[BoundaryUpdate]) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut preamble = String::new();
    let mut body = String::new();
    for (index, line) in contents.lines().enumerate() {
        let target = if index < BOUNDARY_FILE_PREAMBLE_LINES {
            &mut preamble
        } else {
            &mut body
        };
        target.push_str(line);
        target.push('\n');
    }
    let mut doc: Value =
        serde_yaml::from_str(&body).with_context(|| format!("parse {}", path.display()))?;
    let conditions = doc
        .get_mut("boundary_conditions")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| anyhow!("{} has no boundary_conditions list", path.display()))?;

    let mut unmatched = Vec::new();
    for update in updates {
        let entry = conditions.iter_mut().find_map(|item| {
            let boundary = item.get_mut("boundary")?;
            let matches = boundary.get("name").and_then(Value::as_str) == Some(update.name.as_str());
            matches.then_some(boundary)
        });
        let Some(boundary) = entry else {
            warn!(path = %path.display(), boundary = %update.name, "boundary not found; not updated");
            unmatched.push(update.name.clone());
            continue;
        };
        for (key, value) in &update.entries {
            set_dotted(boundary, key, value.clone())
                .with_context(|| format!("set {key} of {} in {}", update.name, path.display()))?;
        }
    }

    let mut rewritten = preamble;
    rewritten.push_str(
        &serde_yaml::to_string(&doc).with_context(|| format!("serialize {}", path.display()))?,
    );
    replace_contents(path, &rewritten)?;
    debug!(path = %path.display(), updated = updates.len() - unmatched.len(), "boundary file updated");
    Ok(unmatched)
}

/// Store `value` at a dotted key path, creating intermediate maps.
fn set_dotted(node: &mut Value, key: &str, value: Value) -> Result<()> {
    let mut current = node;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let map = current
            .as_mapping_mut()
            .ok_or_else(|| anyhow!("{part} is below a non-mapping value"))?;
        let slot = Value::String(part.to_string());
        if parts.peek().is_none() {
            map.insert(slot, value);
            return Ok(());
        }
        current = map
            .entry(slot)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    Ok(())
}
