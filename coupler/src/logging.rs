//! Developer tracing for the driver.
//!
//! Tracing output is diagnostic only: it goes to stderr, is filtered by
//! `RUST_LOG` and is never part of the job's record. The record an operator
//! reads lives in `htcJob.stdout` / `htcJob.stderr` (see [`crate::io::job_log`]).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber. Call once, before any job work.
///
/// `RUST_LOG=coupler=debug coupler run --root ./job` traces every solver
/// attempt and pipeline step.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
