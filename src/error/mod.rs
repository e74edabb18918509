//! # Error Module
//!
//! Error types for the visual diff engine.
//!
//! ## Design Principles
//! - **Per-image failures are data** - a `DiffError` is rendered into the
//!   image's outcome and never aborts the run
//! - **Pool failures are loud** - a task without a reply is never counted
//!   as a pass or a fail
//! - **Include context** - paths, images and workers involved

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error
#[derive(Error, Debug)]
pub enum VisualDiffError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Diff error: {0}")]
    Diff(#[from] DiffError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Update error: {0}")]
    Update(#[from] UpdateError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to prepare directory {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while discovering images
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that occur while diffing a single image
#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Failed to write diff image {path}: {reason}")]
    WriteArtifact { path: PathBuf, reason: String },

    #[error("Pixel comparison failed: {reason}")]
    Compare { reason: String },

    #[error("Comparison panicked: {reason}")]
    Panicked { reason: String },
}

/// Errors raised by a worker pool backend
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Worker {worker} failed to start: {reason}")]
    Startup { worker: usize, reason: String },

    #[error("Diff of {image} timed out after {after:?}")]
    Timeout { image: String, after: Duration },

    #[error("Worker {worker} exited before replying")]
    WorkerExited { worker: usize },

    #[error("Worker protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("Task for {image} was abandoned")]
    Abandoned { image: String },

    #[error("Worker pool is closed")]
    Closed,

    #[error("Thread spawn failed: {reason}")]
    ThreadSpawn { reason: String },

    #[error("Execution context failed: {message}")]
    ContextFailed { message: String },

    #[error("Malformed result from the diff core: {reason}")]
    MalformedResult { reason: String },
}

/// Errors that occur while promoting actual images to expected
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cleanup pattern {pattern}: {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Errors raised by report sinks
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, VisualDiffError>;
