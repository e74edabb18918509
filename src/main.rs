//! # vdiff CLI
//!
//! Command-line interface for the visual diff engine.
//!
//! ## Usage
//! ```bash
//! vdiff compare ./actual ./expected ./diff --json ./reg.json
//! vdiff compare ./actual ./expected ./diff --update
//! ```

mod cli;

use std::process::ExitCode;
use visual_diff_engine::Result;

fn main() -> Result<ExitCode> {
    cli::run()
}
