//! # Engine Module
//!
//! Orchestrates one run: discover → diff → aggregate → update → report.
//!
//! ## Events
//! `Start → Compare* → Update? → Complete`, or `Error` once the run fails
//! after it started.
//!
//! ## Example
//! ```rust,ignore
//! let engine = Engine::builder()
//!     .actual_dir("screens/actual")
//!     .expected_dir("screens/expected")
//!     .diff_dir("screens/diff")
//!     .build()?;
//!
//! let handle = engine.spawn();
//! for event in handle.events().iter() {
//!     // render progress
//! }
//! let output = handle.wait()?;
//! ```

use crate::core::aggregator::{AggregateResult, ResultAggregator, UpdatePlan, UpdateProtocol, UpdateSummary};
use crate::core::bridge::{DiffCore, ThreadBridge};
use crate::core::comparator::{default_comparator, PixelComparator};
use crate::core::config::{
    effective_concurrency, Backend, DiffFormat, DiffThresholds, ExitPolicy, DEFAULT_CONCURRENCY,
    DEFAULT_TASK_TIMEOUT,
};
use crate::core::pool::{ProcessBackend, WorkerBackend, WorkerPool};
use crate::core::report::{ReportContext, ReportSink};
use crate::core::scanner::{ImageSet, ImageSetResolver, ScanConfig};
use crate::core::worker::{DiffOutcome, DiffTask, DiffWorker};
use crate::error::{PoolError, Result, VisualDiffError};
use crate::events::{
    null_sender, CompareEvent, Event, EventChannel, EventReceiver, EventSender, RunCompleted,
    RunStarted, UpdateEvent,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Resolved configuration of a run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub actual_dir: PathBuf,
    pub expected_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub thresholds: DiffThresholds,
    /// Requested worker count; small batches still run on one worker
    pub concurrency: usize,
    pub backend: Backend,
    pub policy: ExitPolicy,
    /// Per-task reply deadline of the process backend
    pub task_timeout: Duration,
    pub diff_format: DiffFormat,
    pub scan_config: ScanConfig,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    actual_dir: Option<PathBuf>,
    expected_dir: Option<PathBuf>,
    diff_dir: Option<PathBuf>,
    thresholds: DiffThresholds,
    concurrency: usize,
    backend: Backend,
    policy: ExitPolicy,
    task_timeout: Duration,
    diff_format: DiffFormat,
    scan_config: ScanConfig,
    comparator: Option<Arc<dyn PixelComparator>>,
    sinks: Vec<Box<dyn ReportSink>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            actual_dir: None,
            expected_dir: None,
            diff_dir: None,
            thresholds: DiffThresholds::default(),
            concurrency: DEFAULT_CONCURRENCY,
            backend: Backend::default(),
            policy: ExitPolicy::default(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            diff_format: DiffFormat::default(),
            scan_config: ScanConfig::default(),
            comparator: None,
            sinks: Vec::new(),
        }
    }

    /// Root of the freshly rendered images
    pub fn actual_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.actual_dir = Some(dir.into());
        self
    }

    /// Root of the baseline images
    pub fn expected_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.expected_dir = Some(dir.into());
        self
    }

    /// Root the diff artifacts are written to
    pub fn diff_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diff_dir = Some(dir.into());
        self
    }

    pub fn thresholds(mut self, thresholds: DiffThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Promote actual images to expected after diffing
    pub fn update(mut self, update: bool) -> Self {
        self.policy.update = update;
        self
    }

    pub fn extended_errors(mut self, extended_errors: bool) -> Self {
        self.policy.extended_errors = extended_errors;
        self
    }

    pub fn ignore_change(mut self, ignore_change: bool) -> Self {
        self.policy.ignore_change = ignore_change;
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn diff_format(mut self, format: DiffFormat) -> Self {
        self.diff_format = format;
        self
    }

    pub fn scan_config(mut self, config: ScanConfig) -> Self {
        self.scan_config = config;
        self
    }

    /// Pixel comparator of the threads backend. Process workers always use
    /// their own default comparator.
    pub fn comparator(mut self, comparator: Arc<dyn PixelComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Add a sink that receives the final result
    pub fn report(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let required = |dir: Option<PathBuf>, name: &str| {
            dir.ok_or_else(|| VisualDiffError::Config(format!("{name} directory is required")))
        };

        let config = EngineConfig {
            actual_dir: required(self.actual_dir, "actual")?,
            expected_dir: required(self.expected_dir, "expected")?,
            diff_dir: required(self.diff_dir, "diff")?,
            thresholds: self.thresholds,
            concurrency: self.concurrency.max(1),
            backend: self.backend,
            policy: self.policy,
            task_timeout: self.task_timeout,
            diff_format: self.diff_format,
            scan_config: self.scan_config,
        };

        Ok(Engine {
            config,
            comparator: self.comparator.unwrap_or_else(default_comparator),
            sinks: self.sinks,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a finished run counts as a success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed,
}

impl ExitPolicy {
    pub fn verdict(&self, result: &AggregateResult) -> Verdict {
        if self.update || self.ignore_change || !result.has_failures(self.extended_errors) {
            Verdict::Passed
        } else {
            Verdict::Failed
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub result: AggregateResult,
    /// Present when the run promoted images
    pub update: Option<UpdateSummary>,
    pub policy: ExitPolicy,
    pub duration_ms: u64,
}

impl RunOutput {
    pub fn verdict(&self) -> Verdict {
        self.policy.verdict(&self.result)
    }
}

/// The visual diff engine
pub struct Engine {
    config: EngineConfig,
    comparator: Arc<dyn PixelComparator>,
    sinks: Vec<Box<dyn ReportSink>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run to completion without events
    pub fn run(&self) -> Result<RunOutput> {
        self.run_with_events(&null_sender())
    }

    /// Run to completion, reporting progress to `events`
    pub fn run_with_events(&self, events: &EventSender) -> Result<RunOutput> {
        self.execute(Uuid::new_v4(), events)
    }

    /// Start the run on a background thread and return immediately
    pub fn spawn(self) -> RunHandle {
        let run_id = Uuid::new_v4();
        let (sender, events) = EventChannel::new();
        let join = thread::Builder::new()
            .name(format!("diff-run-{run_id}"))
            .spawn(move || self.execute(run_id, &sender));

        RunHandle {
            run_id,
            events,
            join,
        }
    }

    fn execute(&self, run_id: Uuid, events: &EventSender) -> Result<RunOutput> {
        let result = self.execute_phases(run_id, events);
        if let Err(error) = &result {
            error!(%run_id, %error, "run failed");
            events.send(Event::Error {
                message: error.to_string(),
            });
        }
        result
    }

    fn execute_phases(&self, run_id: Uuid, events: &EventSender) -> Result<RunOutput> {
        let started = Instant::now();
        let config = &self.config;

        let images = ImageSetResolver::new(config.scan_config.clone())
            .resolve(&config.expected_dir, &config.actual_dir);
        for dir in [&config.expected_dir, &config.diff_dir] {
            fs::create_dir_all(dir).map_err(|source| VisualDiffError::Prepare {
                path: dir.clone(),
                source,
            })?;
        }

        let tasks = self.tasks(&images);
        let concurrency = effective_concurrency(config.concurrency, tasks.len());

        events.send(Event::Start(RunStarted {
            run_id,
            expected_images: images.expected.len(),
            actual_images: images.actual.len(),
            new_images: images.new_images(),
            deleted_images: images.deleted_images(),
            comparisons: tasks.len(),
            backend: config.backend.name().to_string(),
            concurrency,
        }));
        info!(
            %run_id,
            comparisons = tasks.len(),
            backend = config.backend.name(),
            concurrency,
            "run started"
        );

        let aggregator = ResultAggregator::new(config.policy.update, config.diff_format);
        let result = if tasks.is_empty() {
            aggregator.aggregate(Vec::new(), &images)
        } else {
            match &config.backend {
                Backend::Threads => self.diff_on_threads(tasks, concurrency, &images, aggregator, events)?,
                Backend::Process { program, args } => {
                    let backend = ProcessBackend::new(program.clone(), args.clone())
                        .timeout(config.task_timeout);
                    let outcomes = diff_on_pool(backend, tasks, concurrency, events)?;
                    aggregator.aggregate(outcomes, &images)
                }
            }
        };

        let update = if config.policy.update {
            Some(self.promote(&result, events)?)
        } else {
            None
        };

        let context = ReportContext {
            actual_dir: config.actual_dir.clone(),
            expected_dir: config.expected_dir.clone(),
            diff_dir: config.diff_dir.clone(),
        };
        for sink in &self.sinks {
            sink.emit(&result, &context)?;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            %run_id,
            passed = result.passed_items.len(),
            failed = result.failed_items.len(),
            new = result.new_items.len(),
            deleted = result.deleted_items.len(),
            duration_ms,
            "run complete"
        );
        events.send(Event::Complete(RunCompleted {
            run_id,
            result: result.clone(),
            duration_ms,
        }));

        Ok(RunOutput {
            run_id,
            result,
            update,
            policy: config.policy,
            duration_ms,
        })
    }

    fn tasks(&self, images: &ImageSet) -> Vec<DiffTask> {
        images
            .common_images()
            .into_iter()
            .map(|image| DiffTask {
                image,
                actual_dir: self.config.actual_dir.clone(),
                expected_dir: self.config.expected_dir.clone(),
                diff_dir: self.config.diff_dir.clone(),
                thresholds: self.config.thresholds,
                diff_format: self.config.diff_format,
            })
            .collect()
    }

    fn diff_on_threads(
        &self,
        tasks: Vec<DiffTask>,
        concurrency: usize,
        images: &ImageSet,
        aggregator: ResultAggregator,
        events: &EventSender,
    ) -> Result<AggregateResult> {
        let core = DiffCore::new(
            tasks,
            concurrency,
            DiffWorker::new(Arc::clone(&self.comparator)),
            images.clone(),
            aggregator,
        );
        let data = ThreadBridge::new(Arc::new(core)).run()?;
        let result: AggregateResult =
            serde_json::from_str(&data).map_err(|e| PoolError::MalformedResult {
                reason: e.to_string(),
            })?;

        for outcome in result.outcomes() {
            events.send(Event::Compare(CompareEvent::from(&outcome)));
        }
        Ok(result)
    }

    fn promote(&self, result: &AggregateResult, events: &EventSender) -> Result<UpdateSummary> {
        let plan = UpdatePlan::from_result(result);
        events.send(Event::Update(UpdateEvent::Started {
            deleting: plan.delete.len(),
            copying: plan.copy.len(),
        }));

        let summary = UpdateProtocol::new(&self.config.actual_dir, &self.config.expected_dir)
            .execute(&plan)?;

        events.send(Event::Update(UpdateEvent::Completed {
            deleted: summary.deleted,
            copied: summary.copied,
        }));
        Ok(summary)
    }
}

/// Diff every task on a worker pool. Outcomes are collected in completion
/// order; any task left without an outcome fails the whole batch, but only
/// after every sibling finished.
pub fn diff_on_pool<B: WorkerBackend>(
    backend: B,
    tasks: Vec<DiffTask>,
    concurrency: usize,
    events: &EventSender,
) -> std::result::Result<Vec<DiffOutcome>, PoolError> {
    let total = tasks.len();
    let mut pool = WorkerPool::new(backend, concurrency)?;
    let mut completions = pool.schedule_batch(tasks)?;

    let mut outcomes = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for completion in completions.by_ref() {
        match completion.result {
            Ok(outcome) => {
                events.send(Event::Compare(CompareEvent::from(&outcome)));
                outcomes.push(outcome);
            }
            Err(error) => {
                warn!(image = %completion.image, %error, "task left without outcome");
                failures.push(error);
            }
        }
    }
    let unanswered = completions.remaining();
    pool.close();

    if let Some(first) = failures.into_iter().next() {
        return Err(first);
    }
    if unanswered > 0 {
        return Err(PoolError::Closed);
    }
    Ok(outcomes)
}

/// Non-blocking handle of a spawned run
pub struct RunHandle {
    run_id: Uuid,
    events: EventReceiver,
    join: std::io::Result<JoinHandle<Result<RunOutput>>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Event stream of the run; ends when the run thread finishes
    pub fn events(&self) -> &EventReceiver {
        &self.events
    }

    /// Block until the run finishes
    pub fn wait(self) -> Result<RunOutput> {
        let join = self.join.map_err(|e| PoolError::Startup {
            worker: 0,
            reason: format!("cannot start run thread: {e}"),
        })?;
        join.join().map_err(|_| {
            VisualDiffError::Pool(PoolError::ContextFailed {
                message: "run thread panicked".to_string(),
            })
        })?
    }
}

/// Convenience for callers that only have paths
pub fn compare_dirs(actual: &Path, expected: &Path, diff: &Path) -> Result<RunOutput> {
    Engine::builder()
        .actual_dir(actual)
        .expected_dir(expected)
        .diff_dir(diff)
        .build()?
        .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DiffFormat, DiffThresholds};
    use crate::core::pool::{Terminator, WorkerUnit};
    use crate::core::scanner::ImagePath;
    use crate::events::{CompareKind, EventChannel, EventReceiver};
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    struct Dirs {
        temp_dir: TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            Self {
                temp_dir: TempDir::new().unwrap(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.temp_dir.path().join(name)
        }

        fn save(&self, root: &str, image: &str, changed: bool) {
            let mut picture = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 255]));
            if changed {
                picture.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
            }
            let path = self.path(root).join(image);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            picture.save(path).unwrap();
        }

        fn builder(&self) -> EngineBuilder {
            Engine::builder()
                .actual_dir(self.path("actual"))
                .expected_dir(self.path("expected"))
                .diff_dir(self.path("diff"))
        }
    }

    #[test]
    fn build_requires_directories() {
        let result = Engine::builder().actual_dir("a").build();
        assert!(matches!(result, Err(VisualDiffError::Config(_))));
    }

    #[test]
    fn run_classifies_every_image() {
        let dirs = Dirs::new();
        dirs.save("expected", "same.png", false);
        dirs.save("actual", "same.png", false);
        dirs.save("expected", "changed.png", false);
        dirs.save("actual", "changed.png", true);
        dirs.save("expected", "gone.png", false);
        dirs.save("actual", "extra.png", false);

        let output = dirs.builder().build().unwrap().run().unwrap();

        let names = |set: &std::collections::BTreeSet<ImagePath>| {
            set.iter().map(|p| p.to_string()).collect::<Vec<_>>()
        };
        assert_eq!(names(&output.result.passed_items), vec!["same.png"]);
        assert_eq!(names(&output.result.failed_items), vec!["changed.png"]);
        assert_eq!(names(&output.result.new_items), vec!["extra.png"]);
        assert_eq!(names(&output.result.deleted_items), vec!["gone.png"]);
        assert!(dirs.path("diff/changed.png").exists());
        assert_eq!(output.verdict(), Verdict::Failed);
    }

    #[test]
    fn spawned_run_streams_events_in_order() {
        let dirs = Dirs::new();
        dirs.save("expected", "a.png", false);
        dirs.save("actual", "a.png", true);

        let handle = dirs.builder().update(true).build().unwrap().spawn();
        let events: Vec<Event> = handle.events().iter().collect();
        let output = handle.wait().unwrap();

        assert!(matches!(events.first(), Some(Event::Start(_))));
        assert!(matches!(
            &events[1],
            Event::Compare(compare) if compare.kind == CompareKind::Fail
        ));
        assert!(matches!(events[2], Event::Update(UpdateEvent::Started { .. })));
        assert!(matches!(
            events[3],
            Event::Update(UpdateEvent::Completed { deleted: 1, copied: 1 })
        ));
        assert!(matches!(events.last(), Some(Event::Complete(_))));
        assert_eq!(output.verdict(), Verdict::Passed);
    }

    #[test]
    fn verdict_follows_policy() {
        let result = AggregateResult {
            new_items: [ImagePath::new("n.png")].into_iter().collect(),
            ..Default::default()
        };

        let plain = ExitPolicy::default();
        let extended = ExitPolicy {
            extended_errors: true,
            ..Default::default()
        };
        let ignored = ExitPolicy {
            extended_errors: true,
            ignore_change: true,
            ..Default::default()
        };

        assert_eq!(plain.verdict(&result), Verdict::Passed);
        assert_eq!(extended.verdict(&result), Verdict::Failed);
        assert_eq!(ignored.verdict(&result), Verdict::Passed);
    }

    /// Answers every task as identical except `fail_image`, which fails the unit
    struct ScriptedBackend {
        fail_image: &'static str,
        failure: fn(usize, &DiffTask) -> PoolError,
    }

    struct ScriptedUnit {
        worker: usize,
        fail_image: &'static str,
        failure: fn(usize, &DiffTask) -> PoolError,
    }

    impl WorkerBackend for ScriptedBackend {
        type Unit = ScriptedUnit;

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn spawn(&self, worker: usize) -> std::result::Result<ScriptedUnit, PoolError> {
            Ok(ScriptedUnit {
                worker,
                fail_image: self.fail_image,
                failure: self.failure,
            })
        }
    }

    impl WorkerUnit for ScriptedUnit {
        fn execute(&mut self, task: &DiffTask) -> std::result::Result<DiffOutcome, PoolError> {
            if task.image.as_str() == self.fail_image {
                return Err((self.failure)(self.worker, task));
            }
            Ok(DiffOutcome::identical(task.image.clone()))
        }

        fn terminate(&mut self) {}

        fn terminator(&self) -> Terminator {
            Arc::new(|| {})
        }
    }

    fn pool_tasks(names: &[&str]) -> Vec<DiffTask> {
        names
            .iter()
            .map(|name| DiffTask {
                image: ImagePath::new(*name),
                actual_dir: PathBuf::from("actual"),
                expected_dir: PathBuf::from("expected"),
                diff_dir: PathBuf::from("diff"),
                thresholds: DiffThresholds::default(),
                diff_format: DiffFormat::Png,
            })
            .collect()
    }

    fn compared_paths(receiver: &EventReceiver) -> Vec<String> {
        let mut paths: Vec<String> = receiver
            .iter()
            .filter_map(|event| match event {
                Event::Compare(compare) => Some(compare.path.to_string()),
                _ => None,
            })
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn pool_failure_reports_siblings_before_failing() {
        let backend = ScriptedBackend {
            fail_image: "c.png",
            failure: |worker, _| PoolError::WorkerExited { worker },
        };
        let (sender, receiver) = EventChannel::new();

        let result = diff_on_pool(
            backend,
            pool_tasks(&["a.png", "b.png", "c.png", "d.png", "e.png"]),
            2,
            &sender,
        );
        drop(sender);

        assert!(matches!(result, Err(PoolError::WorkerExited { .. })));
        assert_eq!(
            compared_paths(&receiver),
            vec!["a.png", "b.png", "d.png", "e.png"]
        );
    }

    #[test]
    fn pool_timeout_fails_the_batch() {
        let backend = ScriptedBackend {
            fail_image: "slow.png",
            failure: |_, task| PoolError::Timeout {
                image: task.image.to_string(),
                after: Duration::from_millis(5),
            },
        };
        let (sender, receiver) = EventChannel::new();

        let result = diff_on_pool(backend, pool_tasks(&["fast.png", "slow.png"]), 1, &sender);
        drop(sender);

        assert!(matches!(result, Err(PoolError::Timeout { ref image, .. }) if image == "slow.png"));
        assert_eq!(compared_paths(&receiver), vec!["fast.png"]);
    }

    #[test]
    fn missing_roots_are_empty_sets() {
        let dirs = Dirs::new();
        let output = dirs.builder().build().unwrap().run().unwrap();

        assert!(output.result.passed_items.is_empty());
        assert!(dirs.path("expected").is_dir());
        assert!(dirs.path("diff").is_dir());
    }
}
