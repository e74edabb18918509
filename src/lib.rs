//! # Visual Diff Engine
//!
//! Compares a tree of expected baseline images against a tree of actual
//! renders and reports, per image, whether the two differ beyond a tolerance.
//!
//! ## Core Philosophy
//! - **Crash isolation** - one broken image never takes the run down
//! - **Bounded parallelism** - a fixed number of workers, never more
//! - **Deterministic reports** - completion order never changes the result
//!
//! ## Architecture
//! The library is split into a core engine (presentation-agnostic) and thin
//! presentation layers:
//! - `core` - Discovery, diff workers, worker pools and aggregation
//! - `events` - Event stream consumed by CLIs or other front ends
//! - `error` - Error types
//! - `cli` - Command-line interface (binary only)

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{Result, VisualDiffError};

/// Initialize tracing for the library
///
/// This should be called by the application entry point. Logs go to stderr
/// so that worker processes keep stdout for protocol replies.
pub fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
