//! Mapping tool configuration (`htc_inputs_<phase>.in`).
//!
//! Generated once per job from the boundary IDs declared in each phase's
//! `boundary.in`. Before every mapping run the phase's file is copied to
//! `htc_inputs.in`, which is what the tool reads.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Phase;
use crate::errors::{ConsistencyError, LoadError};
use crate::io::paths::JobPaths;

const HTC_INPUTS_TEMPLATE: &str = include_str!("../templates/htc_inputs.in.j2");
/// Lines of solver preamble preceding the YAML body of `boundary.in`.
pub(crate) const BOUNDARY_FILE_PREAMBLE_LINES: usize = 4;
const COLUMN_PAD: &str = "               ";

#[derive(Debug, Deserialize)]
struct BoundaryFile {
    #[serde(default)]
    boundary_conditions: Vec<BoundaryEntry>,
}

#[derive(Debug, Deserialize)]
struct BoundaryEntry {
    boundary: BoundaryHeader,
}

#[derive(Debug, Deserialize)]
struct BoundaryHeader {
    name: String,
    id: i64,
}

/// Boundary as listed in the mapping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappedBoundary {
    pub name: String,
    pub id: i64,
}

/// Read `name -> id` pairs from a solver `boundary.in`.
pub fn read_boundary_ids(path: &Path) -> Result<Vec<MappedBoundary>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let body = contents
        .lines()
        .skip(BOUNDARY_FILE_PREAMBLE_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    let parsed: BoundaryFile =
        serde_yaml::from_str(&body).with_context(|| format!("parse {}", path.display()))?;
    Ok(parsed
        .boundary_conditions
        .into_iter()
        .map(|entry| MappedBoundary {
            name: entry.boundary.name,
            id: entry.boundary.id,
        })
        .collect())
}

/// Resolve the IDs of `names`, which must agree between both phases.
pub fn resolve_boundaries(paths: &JobPaths, names: &[String]) -> Result<Vec<MappedBoundary>> {
    let combustion_path = paths.boundary_file(Phase::Combustion);
    let coolant_path = paths.boundary_file(Phase::Coolant);
    let combustion = read_boundary_ids(&combustion_path)?;
    let coolant = read_boundary_ids(&coolant_path)?;
    let lookup = |list: &[MappedBoundary], name: &str, path: &Path| {
        list.iter()
            .find(|b| b.name == name)
            .map(|b| b.id)
            .ok_or_else(|| ConsistencyError::MissingBoundary {
                boundary: name.to_string(),
                path: path.to_path_buf(),
            })
    };

    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        let comb_id = lookup(&combustion, name, &combustion_path)?;
        let cool_id = lookup(&coolant, name, &coolant_path)?;
        if comb_id != cool_id {
            return Err(ConsistencyError::BoundaryIdMismatch {
                boundary: name.clone(),
                combustion: comb_id,
                coolant: cool_id,
            }
            .into());
        }
        resolved.push(MappedBoundary {
            name: name.clone(),
            id: comb_id,
        });
    }
    Ok(resolved)
}

/// Render the mapping configuration for data mapped out of `phase`.
pub fn render_mapping_config(phase: Phase, boundaries: &[MappedBoundary]) -> Result<String> {
    let end_time = match phase {
        Phase::Coolant => "2",
        Phase::Combustion => "100000000",
    };
    let mut env = Environment::new();
    env.add_template("htc_inputs", HTC_INPUTS_TEMPLATE)?;
    let template = env.get_template("htc_inputs")?;
    let mut rendered = template.render(context! {
        boundaries => boundaries,
        pad => COLUMN_PAD,
        end_time => end_time,
    })?;
    rendered.push('\n');
    Ok(rendered)
}

/// Write `htc_inputs_combustion.in` and `htc_inputs_coolant.in` into the job root.
pub fn write_mapping_configs(paths: &JobPaths, names: &[String]) -> Result<()> {
    let boundaries = resolve_boundaries(paths, names)?;
    for phase in Phase::ALL {
        let path = paths.mapping_config_for(phase);
        debug!(path = %path.display(), "writing mapping config");
        fs::write(&path, render_mapping_config(phase, &boundaries)?)
            .with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

/// Files the mapping step needs in the job root.
pub fn check_prerequisites(paths: &JobPaths) -> Result<()> {
    let required = [
        paths.mapper_path.clone(),
        paths.mapping_config_for(Phase::Combustion),
        paths.mapping_config_for(Phase::Coolant),
        paths.map_surface_path.clone(),
    ];
    for path in required {
        if !path.exists() {
            return Err(LoadError::MissingPrerequisite { path }.into());
        }
    }
    Ok(())
}
