//! # Report Module
//!
//! Sinks consuming the final [`AggregateResult`]. The engine does not
//! render reports itself; it hands the result and the run's directory roots
//! to whichever sink the caller configured.

use crate::core::aggregator::AggregateResult;
use crate::error::ReportError;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory roots of the run, as shown in reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub actual_dir: PathBuf,
    pub expected_dir: PathBuf,
    pub diff_dir: PathBuf,
}

/// Consumer of a finished run
pub trait ReportSink: Send + Sync {
    fn emit(&self, result: &AggregateResult, context: &ReportContext) -> Result<(), ReportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportDocument<'a> {
    #[serde(flatten)]
    result: &'a AggregateResult,
    actual_dir: String,
    expected_dir: String,
    diff_dir: String,
}

/// Write the JSON report document to any writer
pub fn write_json<W: Write>(
    result: &AggregateResult,
    context: &ReportContext,
    mut writer: W,
) -> Result<(), ReportError> {
    let document = ReportDocument {
        result,
        actual_dir: context.actual_dir.display().to_string(),
        expected_dir: context.expected_dir.display().to_string(),
        diff_dir: context.diff_dir.display().to_string(),
    };
    serde_json::to_writer_pretty(&mut writer, &document)
        .map_err(|e| ReportError::Serialize(e.to_string()))?;
    writer
        .flush()
        .map_err(|e| ReportError::Serialize(e.to_string()))
}

/// Writes the JSON report to a file
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: PathBuf,
}

impl JsonReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for JsonReportSink {
    fn emit(&self, result: &AggregateResult, context: &ReportContext) -> Result<(), ReportError> {
        let write_error = |source: std::io::Error| ReportError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let file = File::create(&self.path).map_err(write_error)?;
        write_json(result, context, BufWriter::new(file))?;

        info!(path = %self.path.display(), "JSON report written");
        Ok(())
    }
}
