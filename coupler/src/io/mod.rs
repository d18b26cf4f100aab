//! I/O helpers for the coupled driver.

pub mod boundary_deck;
pub mod boundary_sample;
pub mod checkpoint;
pub mod config;
pub mod convergence_log;
pub mod exchange_log;
pub mod files;
pub mod input_deck;
pub mod job_log;
pub mod mapper;
pub mod mapping_config;
pub mod numbered;
pub mod paths;
pub mod process;
pub mod run_state;
pub mod solver;
