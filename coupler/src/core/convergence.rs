//! Pure convergence statistics over mapped boundary samples.

use serde::{Deserialize, Serialize};

use crate::core::types::{Phase, Quantity};

/// Absolute tolerances on the max per-point change between iterations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    pub flux: f64,
    pub boundary_temp: f64,
    pub htc: f64,
    pub fluid_temp: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            flux: 10.0,
            boundary_temp: 5.0,
            htc: 10.0,
            fluid_temp: 5.0,
        }
    }
}

impl Tolerances {
    pub fn for_quantity(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::BoundaryTemp => self.boundary_temp,
            Quantity::Flux => self.flux,
            Quantity::Htc => self.htc,
            Quantity::FluidTemp => self.fluid_temp,
        }
    }
}

/// One row of a mapped boundary sample file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRow {
    pub id: f64,
    pub coords: [f64; 3],
    /// Indexed by [`Quantity::index`].
    pub values: [f64; 4],
}

/// Per-quantity min/max/avg absolute differences over comparable points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffStats {
    pub min: [f64; 4],
    pub max: [f64; 4],
    pub avg: [f64; 4],
    /// Rows that were compared.
    pub compared: usize,
    /// Rows dropped for mismatched coordinates or missing counterparts.
    pub dropped: usize,
}

/// Quantities that decide convergence for data mapped out of `phase`.
pub fn relevant_quantities(phase: Phase) -> &'static [Quantity] {
    match phase {
        Phase::Combustion => &[Quantity::BoundaryTemp, Quantity::Flux],
        Phase::Coolant => &[Quantity::Flux, Quantity::Htc, Quantity::FluidTemp],
    }
}

/// Compare two sample tables row by row.
///
/// Rows whose coordinates differ, and surplus rows in the longer table, are
/// dropped from the statistics. Returns `None` when no row is comparable.
pub fn diff_samples(previous: &[SampleRow], current: &[SampleRow]) -> Option<DiffStats> {
    let mut min = [f64::INFINITY; 4];
    let mut max = [0.0_f64; 4];
    let mut sum = [0.0_f64; 4];
    let mut compared = 0usize;

    for (old, new) in previous.iter().zip(current) {
        if old.coords != new.coords {
            continue;
        }
        compared += 1;
        for q in Quantity::ALL {
            let i = q.index();
            let diff = (old.values[i] - new.values[i]).abs();
            min[i] = min[i].min(diff);
            max[i] = max[i].max(diff);
            sum[i] += diff;
        }
    }

    if compared == 0 {
        return None;
    }
    let total = previous.len().max(current.len());
    let avg = sum.map(|s| s / compared as f64);
    Some(DiffStats {
        min,
        max,
        avg,
        compared,
        dropped: total - compared,
    })
}

/// Whether one quantity's max change is within tolerance.
pub fn quantity_converged(stats: &DiffStats, quantity: Quantity, tolerances: &Tolerances) -> bool {
    stats.max[quantity.index()] <= tolerances.for_quantity(quantity)
}

/// Whether a boundary converged for data mapped out of `phase`.
pub fn boundary_converged(stats: &DiffStats, phase: Phase, tolerances: &Tolerances) -> bool {
    relevant_quantities(phase)
        .iter()
        .all(|q| quantity_converged(stats, *q, tolerances))
}
