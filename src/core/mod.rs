//! # Core Module
//!
//! The presentation-agnostic diff engine.
//!
//! ## Modules
//! - `scanner` - Discovers images and pairs the expected/actual sets
//! - `hasher` - Content digests for the identical-bytes short circuit
//! - `comparator` - Pixel comparison collaborator
//! - `worker` - Per-image diff algorithm and the worker wire protocol
//! - `pool` - Bounded worker pool over OS processes
//! - `bridge` - Shared-memory thread pool over isolated contexts
//! - `aggregator` - Report model and the update protocol
//! - `report` - Sinks for the final result
//! - `config` - Thresholds, backends and defaults
//! - `engine` - Orchestrates a full run

pub mod aggregator;
pub mod bridge;
pub mod comparator;
pub mod config;
pub mod engine;
pub mod hasher;
pub mod pool;
pub mod report;
pub mod scanner;
pub mod worker;

// Re-export commonly used types
pub use aggregator::AggregateResult;
pub use config::{Backend, DiffThresholds};
pub use engine::{Engine, RunHandle, RunOutput, Verdict};
pub use scanner::{ImagePath, ImageSet};
pub use worker::{DiffOutcome, DiffTask};
