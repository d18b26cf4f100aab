//! Stable exit codes for coupler CLI commands.

/// The job reached its terminal converged state (or the command succeeded).
pub const OK: i32 = 0;
/// Settings or run state could not be loaded, or an unexpected I/O error occurred.
pub const INVALID: i32 = 1;
/// `coupler run` found a job that had already completed.
pub const ALREADY_DONE: i32 = 2;
/// The job halted on a fatal error; the sticky error flag is set.
pub const FAILED: i32 = 3;
