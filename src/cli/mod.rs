//! # CLI Module
//!
//! Command-line front end of the visual diff engine.
//!
//! ## Usage
//! ```bash
//! # Compare two trees, writing diff images to ./diff
//! vdiff compare ./actual ./expected ./diff
//!
//! # Tolerate up to 1% differing pixels and write a JSON report
//! vdiff compare ./actual ./expected ./diff -T 0.01 -J report.json
//!
//! # Accept the current renders as the new baselines
//! vdiff compare ./actual ./expected ./diff --update
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use tracing::{debug, error};
use visual_diff_engine::core::config::{Backend, DiffFormat, ThresholdsBuilder, DEFAULT_CONCURRENCY};
use visual_diff_engine::core::engine::{Engine, RunOutput, Verdict};
use visual_diff_engine::core::report::JsonReportSink;
use visual_diff_engine::core::scanner::ImagePath;
use visual_diff_engine::core::worker::{protocol, DiffWorker};
use visual_diff_engine::error::{Result, VisualDiffError};
use visual_diff_engine::events::{Event, EventChannel, UpdateEvent};

/// vdiff - visual regression testing for image trees
#[derive(Parser, Debug)]
#[command(name = "vdiff")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compare actual images against expected baselines
    Compare {
        /// Directory of freshly rendered images
        actual: PathBuf,

        /// Directory of baseline images
        expected: PathBuf,

        /// Directory the diff images are written to
        diff: PathBuf,

        /// Promote actual images to expected after comparing
        #[arg(short = 'U', long)]
        update: bool,

        /// Write a JSON report to this path
        #[arg(short = 'J', long)]
        json: Option<PathBuf>,

        /// Per-pixel color distance tolerance (0-1)
        #[arg(short = 'M', long, default_value = "0")]
        matching_threshold: f32,

        /// Deprecated alias of --threshold-rate
        #[arg(long)]
        threshold: Option<f64>,

        /// Pass when at most this fraction of pixels differ (0-1)
        #[arg(short = 'T', long)]
        threshold_rate: Option<f64>,

        /// Pass when at most this many pixels differ; wins over the rate
        #[arg(short = 'S', long)]
        threshold_pixel: Option<u64>,

        /// Number of workers
        #[arg(short = 'C', long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Ignore anti-aliased edge pixels
        #[arg(short = 'A', long)]
        enable_antialias: bool,

        /// Fail on new and deleted images too
        #[arg(short = 'E', long)]
        extended_errors: bool,

        /// Report changes but always exit successfully
        #[arg(short = 'I', long)]
        ignore_change: bool,

        /// Execution backend
        #[arg(long, default_value = "threads")]
        backend: BackendKind,

        /// Encoding of the diff images
        #[arg(long, default_value = "png")]
        diff_format: Format,
    },

    /// Serve diff tasks on stdin/stdout (used by the process backend)
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Native threads sharing memory (default)
    Threads,
    /// One worker process per slot
    Process,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Png,
    Webp,
}

impl From<Format> for DiffFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => DiffFormat::Png,
            Format::Webp => DiffFormat::Webp,
        }
    }
}

/// Run the CLI
pub fn run() -> Result<ExitCode> {
    visual_diff_engine::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            actual,
            expected,
            diff,
            update,
            json,
            matching_threshold,
            threshold,
            threshold_rate,
            threshold_pixel,
            concurrency,
            enable_antialias,
            extended_errors,
            ignore_change,
            backend,
            diff_format,
        } => {
            let mut thresholds = ThresholdsBuilder::new()
                .matching_threshold(matching_threshold)
                .enable_antialias(enable_antialias);
            if let Some(value) = threshold {
                thresholds = thresholds.threshold(value);
            }
            if let Some(value) = threshold_rate {
                thresholds = thresholds.threshold_rate(value);
            }
            if let Some(value) = threshold_pixel {
                thresholds = thresholds.threshold_pixel(value);
            }
            let thresholds = thresholds.build().map_err(VisualDiffError::Config)?;

            let backend = match backend {
                BackendKind::Threads => Backend::Threads,
                BackendKind::Process => {
                    Backend::current_exe().map_err(|e| VisualDiffError::Config(e.to_string()))?
                }
            };

            let mut builder = Engine::builder()
                .actual_dir(actual)
                .expected_dir(expected)
                .diff_dir(diff)
                .thresholds(thresholds)
                .concurrency(concurrency)
                .backend(backend)
                .update(update)
                .extended_errors(extended_errors)
                .ignore_change(ignore_change)
                .diff_format(diff_format.into());
            if let Some(path) = json {
                builder = builder.report(Box::new(JsonReportSink::new(path)));
            }

            run_compare(builder.build()?)
        }
        Commands::Worker => run_worker(),
    }
}

fn run_compare(engine: Engine) -> Result<ExitCode> {
    let term = Term::stderr();
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );

    let (sender, receiver) = EventChannel::new();
    let progress_clone = progress.clone();
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            match event {
                Event::Start(started) => {
                    progress_clone.set_length(started.comparisons as u64);
                    progress_clone.set_message(format!("{} backend", started.backend));
                }
                Event::Compare(compare) => {
                    progress_clone.inc(1);
                    progress_clone.set_message(compare.path.to_string());
                }
                Event::Update(UpdateEvent::Started { .. }) => {
                    progress_clone.set_message("updating expected images");
                }
                Event::Complete(_) | Event::Error { .. } => {
                    progress_clone.finish_and_clear();
                }
                Event::Update(_) => {}
            }
        }
    });

    let output = engine.run_with_events(&sender);
    drop(sender);
    event_thread.join().ok();

    let output = output?;
    print_summary(&term, &output);

    Ok(match output.verdict() {
        Verdict::Passed => ExitCode::SUCCESS,
        Verdict::Failed => ExitCode::FAILURE,
    })
}

fn print_summary(term: &Term, output: &RunOutput) {
    let result = &output.result;

    term.write_line("").ok();
    print_items(term, &result.passed_items, style("✔ pass").green().to_string());
    print_items(term, &result.failed_items, style("✘ change").red().to_string());
    print_items(term, &result.new_items, style("+ append").cyan().to_string());
    print_items(term, &result.deleted_items, style("- delete").dim().to_string());
    term.write_line("").ok();

    term.write_line(&format!(
        "  {} passed, {} changed, {} new, {} deleted in {:.1}s",
        style(result.passed_items.len()).green(),
        style(result.failed_items.len()).red(),
        style(result.new_items.len()).cyan(),
        style(result.deleted_items.len()).dim(),
        output.duration_ms as f64 / 1000.0
    ))
    .ok();

    if let Some(update) = output.update {
        term.write_line(&format!(
            "  {} expected images updated ({} removed, {} copied)",
            style("✔").green().bold(),
            update.deleted,
            update.copied
        ))
        .ok();
    } else if result.has_failures(true) {
        term.write_line(&format!(
            "  {}",
            style("Inspect the diff images, or re-run with --update to accept the changes.").dim()
        ))
        .ok();
    }
}

fn print_items<'a>(term: &Term, items: impl IntoIterator<Item = &'a ImagePath>, label: String) {
    for item in items {
        term.write_line(&format!("  {label} {item}")).ok();
    }
}

fn run_worker() -> Result<ExitCode> {
    let worker = DiffWorker::default();
    let stdin = io::stdin();
    let stdout = io::stdout();

    match protocol::serve(&worker, stdin.lock(), stdout.lock()) {
        Ok(answered) => {
            debug!(answered, "input closed, worker exiting");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "worker protocol failure");
            Ok(ExitCode::FAILURE)
        }
    }
}
