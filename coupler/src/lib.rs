//! Restart-safe driver for coupled combustion/coolant simulations.
//!
//! An external solver is run alternately in a combustion and a coolant phase
//! directory. After each phase the exchanged boundary data is mapped onto the
//! other phase, compared against the previous iteration, and the job iterates
//! until both sides converge. Every transition is persisted so that a killed
//! job resumes at the exact sub-step it reached.
//!
//! - **[`core`]**: Pure, deterministic logic (restart classification,
//!   convergence statistics, pipeline ordering). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, solver and mapper
//!   processes, persisted state, job logs).
//!
//! Orchestration modules ([`phase`], [`pipeline`], [`recovery`],
//! [`convergence`], [`scheduler`], [`start`]) compose core logic with I/O.

pub mod context;
pub mod convergence;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod phase;
pub mod pipeline;
pub mod recovery;
pub mod scheduler;
pub mod start;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
