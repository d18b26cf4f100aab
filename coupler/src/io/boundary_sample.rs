//! Mapped boundary samples (`htc_triangles_<boundary>.map`) and the boundary
//! condition files generated from them.
//!
//! Sample columns: 0 element id, 1-3 coordinates, 4 unused, 5-8 surface
//! temperature, flux, heat-transfer coefficient, fluid temperature.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::convergence::SampleRow;
use crate::core::types::{Phase, Quantity};

const MIN_COLUMNS: usize = 9;

const SPATIAL_PREAMBLE: &str =
    "SPATIAL\n1.0\tscale_xyz\n0.0\ttrans_x\n0.0\ttrans_y\n0.0\ttrans_z\nx\trot_axis\n0.0\trot_angle\n\n";

/// Parse a whitespace-delimited sample table. `#` starts a comment.
pub fn parse_samples(text: &str) -> Result<Vec<SampleRow>> {
    let mut rows = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let cols = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()
            .with_context(|| format!("line {}: non-numeric column", index + 1))?;
        if cols.len() < MIN_COLUMNS {
            return Err(anyhow!(
                "line {}: expected at least {MIN_COLUMNS} columns, found {}",
                index + 1,
                cols.len()
            ));
        }
        rows.push(SampleRow {
            id: cols[0],
            coords: [cols[1], cols[2], cols[3]],
            values: [cols[5], cols[6], cols[7], cols[8]],
        });
    }
    Ok(rows)
}

pub fn load_samples(path: &Path) -> Result<Vec<SampleRow>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_samples(&text).with_context(|| format!("parse {}", path.display()))
}

/// Render the boundary condition file consumed by the `target` phase.
///
/// Coolant receives the surface temperature; combustion receives the fluid
/// reference temperature and heat-transfer coefficient.
pub fn render_boundary_condition(target: Phase, rows: &[SampleRow]) -> String {
    let (time_line, columns, quantities): (&str, &str, &[Quantity]) = match target {
        Phase::Coolant => (
            "0.0 second",
            "x\ty\tz\ttemperature",
            &[Quantity::BoundaryTemp],
        ),
        Phase::Combustion => (
            "0.0 crank",
            "x\ty\tz\tRef_Temp\tConv_HTC",
            &[Quantity::FluidTemp, Quantity::Htc],
        ),
    };
    let mut out = String::from(SPATIAL_PREAMBLE);
    out.push_str(time_line);
    out.push('\n');
    out.push_str(columns);
    out.push('\n');
    for row in rows {
        let mut fields: Vec<f64> = row.coords.to_vec();
        fields.extend(quantities.iter().map(|q| row.values[q.index()]));
        let line = fields
            .iter()
            .map(|v| format!("{v:.18e}"))
            .collect::<Vec<_>>()
            .join("\t");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Convert a mapped sample file into a boundary condition file for `target`.
pub fn write_boundary_condition(sample: &Path, target: Phase, out: &Path) -> Result<usize> {
    let rows = load_samples(sample)?;
    fs::write(out, render_boundary_condition(target, &rows))
        .with_context(|| format!("write {}", out.display()))?;
    Ok(rows.len())
}
