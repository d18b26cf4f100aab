//! Shared deterministic types for the driver's core logic.
//!
//! These types are persisted in `run_state.json` and therefore form a stable
//! contract across restarts. Variant names and serde spellings must not change.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One side of the coupled simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Combustion,
    Coolant,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Combustion, Phase::Coolant];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Combustion => "combustion",
            Phase::Coolant => "coolant",
        }
    }

    /// Capitalized name used in generated file names (`log.htcMapCoolant`).
    pub fn title(self) -> &'static str {
        match self {
            Phase::Combustion => "Combustion",
            Phase::Coolant => "Coolant",
        }
    }

    /// The phase that receives boundary conditions mapped from this one.
    pub fn other(self) -> Phase {
        match self {
            Phase::Combustion => Phase::Coolant,
            Phase::Coolant => Phase::Combustion,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered bookkeeping steps run after a phase's solver run succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStep {
    Map,
    CheckConvergence,
    RenameBoundaryFiles,
    UpdateInputs,
    SaveResults,
    MoveCheckpoints,
    ClearTransient,
}

impl PostStep {
    /// Execution order of the pipeline.
    pub const ORDER: [PostStep; 7] = [
        PostStep::Map,
        PostStep::CheckConvergence,
        PostStep::RenameBoundaryFiles,
        PostStep::UpdateInputs,
        PostStep::SaveResults,
        PostStep::MoveCheckpoints,
        PostStep::ClearTransient,
    ];

    fn index(self) -> usize {
        match self {
            PostStep::Map => 0,
            PostStep::CheckConvergence => 1,
            PostStep::RenameBoundaryFiles => 2,
            PostStep::UpdateInputs => 3,
            PostStep::SaveResults => 4,
            PostStep::MoveCheckpoints => 5,
            PostStep::ClearTransient => 6,
        }
    }

    /// Steps still to run when resuming at `self` (inclusive).
    pub fn suffix_from(self) -> &'static [PostStep] {
        &Self::ORDER[self.index()..]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PostStep::Map => "MAP",
            PostStep::CheckConvergence => "CHECK_CONVERGENCE",
            PostStep::RenameBoundaryFiles => "RENAME_BOUNDARY_FILES",
            PostStep::UpdateInputs => "UPDATE_INPUTS",
            PostStep::SaveResults => "SAVE_RESULTS",
            PostStep::MoveCheckpoints => "MOVE_CHECKPOINTS",
            PostStep::ClearTransient => "CLEAR_TRANSIENT",
        }
    }
}

impl fmt::Display for PostStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted position inside the post-process pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStepCursor {
    pub phase: Phase,
    pub step: PostStep,
}

/// Where a (re)started job picks up, derived purely from persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPoint {
    New,
    ResumeCombustion,
    ResumeCoolant,
    ResumePostProcess(PostStepCursor),
    AlreadyDone,
}

impl fmt::Display for RestartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPoint::New => f.write_str("NEW"),
            RestartPoint::ResumeCombustion => f.write_str("RESUME_COMBUSTION"),
            RestartPoint::ResumeCoolant => f.write_str("RESUME_COOLANT"),
            RestartPoint::ResumePostProcess(cursor) => {
                write!(f, "RESUME_POSTPROCESS({}, {})", cursor.phase, cursor.step)
            }
            RestartPoint::AlreadyDone => f.write_str("ALREADY_DONE"),
        }
    }
}

/// Physical quantity carried by every mapped boundary sample.
///
/// The discriminant order matches the value columns of a mapped sample file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    BoundaryTemp,
    Flux,
    Htc,
    FluidTemp,
}

impl Quantity {
    pub const ALL: [Quantity; 4] = [
        Quantity::BoundaryTemp,
        Quantity::Flux,
        Quantity::Htc,
        Quantity::FluidTemp,
    ];

    /// Position within a sample's value array.
    pub fn index(self) -> usize {
        match self {
            Quantity::BoundaryTemp => 0,
            Quantity::Flux => 1,
            Quantity::Htc => 2,
            Quantity::FluidTemp => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Quantity::BoundaryTemp => "boundaryTemp",
            Quantity::Flux => "flux",
            Quantity::Htc => "htc",
            Quantity::FluidTemp => "fluidTemp",
        }
    }
}
