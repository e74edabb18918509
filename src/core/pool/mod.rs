//! # Pool Module
//!
//! Bounded concurrent execution of diff tasks.
//!
//! ## Structure
//! - `WorkerTable` - idle/busy state of every worker plus the task queue
//! - one driver thread per worker, owning its [`WorkerUnit`]
//! - [`WorkerBackend`] - what a unit is (an OS process for [`ProcessBackend`])
//!
//! ## Failure policy
//! A unit that times out, exits or breaks protocol fails only the task it
//! was running. It is then killed and replaced by a fresh unit so the pool
//! keeps its width. If a replacement cannot be spawned the slot is retired.
//!
//! `close()` terminates every unit. Tasks still queued are rejected with
//! `PoolError::Abandoned`; tasks in flight get whatever their unit reports
//! when it is killed.

mod backend;
mod process;
mod table;

pub use backend::{Terminator, WorkerBackend, WorkerUnit};
pub use process::{ProcessBackend, ProcessUnit};
pub use table::{Completion, WorkerState};

use crate::core::worker::{DiffOutcome, DiffTask};
use crate::error::PoolError;
use backend::is_fatal_to_unit;
use crossbeam_channel::{bounded, unbounded, Receiver};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use table::{Job, Slot, WorkerTable};
use tracing::{debug, error, info, warn};

/// Fixed-width pool of execution units
pub struct WorkerPool<B: WorkerBackend> {
    backend: Arc<B>,
    table: Arc<Mutex<WorkerTable>>,
    drivers: Vec<JoinHandle<()>>,
}

impl<B: WorkerBackend> WorkerPool<B> {
    /// Start `concurrency` units (at least one). Fails if any unit fails to
    /// start; units already started are terminated.
    pub fn new(backend: B, concurrency: usize) -> Result<Self, PoolError> {
        let concurrency = concurrency.max(1);
        let backend = Arc::new(backend);

        let mut units = Vec::with_capacity(concurrency);
        for worker in 0..concurrency {
            match backend.spawn(worker) {
                Ok(unit) => units.push(unit),
                Err(error) => {
                    for mut unit in units {
                        unit.terminate();
                    }
                    return Err(error);
                }
            }
        }

        let mut slots = Vec::with_capacity(concurrency);
        let mut inboxes = Vec::with_capacity(concurrency);
        for unit in &units {
            let (jobs, inbox) = bounded(1);
            slots.push(Slot::new(jobs, unit.terminator()));
            inboxes.push(inbox);
        }

        let mut pool = Self {
            backend,
            table: Arc::new(Mutex::new(WorkerTable::new(slots))),
            drivers: Vec::with_capacity(concurrency),
        };

        for (worker, (unit, inbox)) in units.into_iter().zip(inboxes).enumerate() {
            let driver = Driver {
                worker,
                backend: Arc::clone(&pool.backend),
                table: Arc::clone(&pool.table),
                inbox,
            };
            let spawned = thread::Builder::new()
                .name(format!("diff-worker-{worker}"))
                .spawn(move || driver.run(unit));

            match spawned {
                Ok(handle) => pool.drivers.push(handle),
                Err(e) => {
                    pool.close();
                    return Err(PoolError::Startup {
                        worker,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            backend = pool.backend.name(),
            concurrency, "worker pool started"
        );
        Ok(pool)
    }

    /// Queue one task. It runs on the first idle worker.
    pub fn schedule(&self, task: DiffTask) -> Result<TaskHandle, PoolError> {
        let (reply, receiver) = bounded(1);
        self.submit(Job::new(task, reply))?;
        Ok(TaskHandle { receiver })
    }

    /// Queue every task. Completions arrive in completion order.
    pub fn schedule_batch(&self, tasks: Vec<DiffTask>) -> Result<Completions, PoolError> {
        let (reply, receiver) = unbounded();
        let remaining = tasks.len();
        for task in tasks {
            self.submit(Job::new(task, reply.clone()))?;
        }
        Ok(Completions {
            receiver,
            remaining,
        })
    }

    fn submit(&self, job: Job) -> Result<(), PoolError> {
        self.table
            .lock()
            .submit(job)
            .map_err(|_| PoolError::Closed)
    }

    /// Terminate every unit and wait for the driver threads
    pub fn close(&mut self) {
        let (abandoned, terminators) = self.table.lock().close();
        if terminators.is_empty() && self.drivers.is_empty() {
            return;
        }

        debug!(abandoned = abandoned.len(), "closing worker pool");
        for job in abandoned {
            job.abandon();
        }
        for terminate in &terminators {
            terminate();
        }
        for driver in self.drivers.drain(..) {
            if driver.join().is_err() {
                error!("worker driver thread panicked");
            }
        }
        info!(backend = self.backend.name(), "worker pool closed");
    }

    pub fn concurrency(&self) -> usize {
        self.table.lock().states().len()
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.table.lock().states()
    }

    pub fn busy_count(&self) -> usize {
        self.count(WorkerState::Busy)
    }

    pub fn idle_count(&self) -> usize {
        self.count(WorkerState::Idle)
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.table.lock().queued()
    }

    fn count(&self, state: WorkerState) -> usize {
        self.states().into_iter().filter(|s| *s == state).count()
    }
}

impl<B: WorkerBackend> Drop for WorkerPool<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reply of a single scheduled task
pub struct TaskHandle {
    receiver: Receiver<Completion>,
}

impl TaskHandle {
    /// Block until the task is answered
    pub fn wait(self) -> Result<DiffOutcome, PoolError> {
        match self.receiver.recv() {
            Ok(completion) => completion.result,
            Err(_) => Err(PoolError::Closed),
        }
    }
}

/// Completion stream of a batch
pub struct Completions {
    receiver: Receiver<Completion>,
    remaining: usize,
}

impl Completions {
    /// Tasks not yet answered
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl Iterator for Completions {
    type Item = Completion;

    fn next(&mut self) -> Option<Completion> {
        if self.remaining == 0 {
            return None;
        }
        let completion = self.receiver.recv().ok()?;
        self.remaining -= 1;
        Some(completion)
    }
}

struct Driver<B: WorkerBackend> {
    worker: usize,
    backend: Arc<B>,
    table: Arc<Mutex<WorkerTable>>,
    inbox: Receiver<Job>,
}

impl<B: WorkerBackend> Driver<B> {
    fn run(self, mut unit: B::Unit) {
        while let Ok(job) = self.inbox.recv() {
            let result = unit.execute(&job.task);
            let broken = match &result {
                Err(error) if is_fatal_to_unit(error) => {
                    warn!(worker = self.worker, image = %job.task.image, %error, "worker failed");
                    true
                }
                _ => false,
            };
            job.finish(result);

            if broken {
                unit.terminate();
                if self.table.lock().is_closed() {
                    break;
                }
                match self.backend.spawn(self.worker) {
                    Ok(fresh) => {
                        unit = fresh;
                        self.table
                            .lock()
                            .replace_terminator(self.worker, unit.terminator());
                        info!(worker = self.worker, "worker replaced");
                    }
                    Err(error) => {
                        error!(worker = self.worker, %error, "cannot replace worker");
                        self.table.lock().retire(self.worker);
                        return;
                    }
                }
            }

            self.table.lock().complete(self.worker);
        }

        unit.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DiffFormat, DiffThresholds};
    use crate::core::scanner::ImagePath;
    use crossbeam_channel::{select, Sender};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Backend whose units hold every task until the gate releases it
    struct GatedBackend {
        gate: Receiver<()>,
        spawned: Arc<AtomicUsize>,
        terminated: Arc<AtomicUsize>,
        fail_image: Option<&'static str>,
    }

    struct GatedUnit {
        worker: usize,
        gate: Receiver<()>,
        kill: Receiver<()>,
        kill_switch: Sender<()>,
        killed: Arc<AtomicBool>,
        terminated: Arc<AtomicUsize>,
        fail_image: Option<&'static str>,
    }

    impl GatedBackend {
        fn new() -> (Self, Sender<()>) {
            let (open, gate) = unbounded();
            let backend = Self {
                gate,
                spawned: Arc::new(AtomicUsize::new(0)),
                terminated: Arc::new(AtomicUsize::new(0)),
                fail_image: None,
            };
            (backend, open)
        }
    }

    impl WorkerBackend for GatedBackend {
        type Unit = GatedUnit;

        fn name(&self) -> &'static str {
            "gated"
        }

        fn spawn(&self, worker: usize) -> Result<GatedUnit, PoolError> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            let (kill_switch, kill) = unbounded();
            Ok(GatedUnit {
                worker,
                gate: self.gate.clone(),
                kill,
                kill_switch,
                killed: Arc::new(AtomicBool::new(false)),
                terminated: Arc::clone(&self.terminated),
                fail_image: self.fail_image,
            })
        }
    }

    impl WorkerUnit for GatedUnit {
        fn execute(&mut self, task: &DiffTask) -> Result<DiffOutcome, PoolError> {
            select! {
                recv(self.gate) -> _ => {}
                recv(self.kill) -> _ => return Err(PoolError::WorkerExited { worker: self.worker }),
            }
            if self.fail_image == Some(task.image.as_str()) {
                return Err(PoolError::WorkerExited {
                    worker: self.worker,
                });
            }
            Ok(DiffOutcome::identical(task.image.clone()))
        }

        fn terminate(&mut self) {
            (self.terminator())();
        }

        fn terminator(&self) -> Terminator {
            let killed = Arc::clone(&self.killed);
            let terminated = Arc::clone(&self.terminated);
            let kill_switch = self.kill_switch.clone();
            Arc::new(move || {
                if !killed.swap(true, Ordering::SeqCst) {
                    terminated.fetch_add(1, Ordering::SeqCst);
                    let _ = kill_switch.send(());
                }
            })
        }
    }

    fn task(image: &str) -> DiffTask {
        DiffTask {
            image: ImagePath::new(image),
            actual_dir: PathBuf::from("actual"),
            expected_dir: PathBuf::from("expected"),
            diff_dir: PathBuf::from("diff"),
            thresholds: DiffThresholds::default(),
            diff_format: DiffFormat::Png,
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn three_tasks_on_four_workers_leave_one_idle() {
        let (backend, _open) = GatedBackend::new();
        let terminated = Arc::clone(&backend.terminated);
        let mut pool = WorkerPool::new(backend, 4).unwrap();

        let handles: Vec<_> = ["a.png", "b.png", "c.png"]
            .into_iter()
            .map(|image| pool.schedule(task(image)).unwrap())
            .collect();

        assert_eq!(pool.busy_count(), 3);
        assert_eq!(pool.idle_count(), 1);

        pool.close();

        assert_eq!(terminated.load(Ordering::SeqCst), 4);
        for handle in handles {
            assert!(handle.wait().is_err());
        }
    }

    #[test]
    fn queued_tasks_run_when_a_worker_frees_up() {
        let (backend, open) = GatedBackend::new();
        let pool = WorkerPool::new(backend, 2).unwrap();

        let completions = pool
            .schedule_batch(["a.png", "b.png", "c.png", "d.png", "e.png"].map(task).to_vec())
            .unwrap();
        assert_eq!(pool.queued(), 3);

        for _ in 0..5 {
            open.send(()).unwrap();
        }

        let mut images: Vec<String> = completions
            .map(|c| c.result.unwrap().image.to_string())
            .collect();
        images.sort();
        assert_eq!(images, vec!["a.png", "b.png", "c.png", "d.png", "e.png"]);

        wait_until(|| pool.idle_count() == 2);
    }

    #[test]
    fn close_abandons_queued_tasks() {
        let (backend, _open) = GatedBackend::new();
        let mut pool = WorkerPool::new(backend, 1).unwrap();

        let _running = pool.schedule(task("a.png")).unwrap();
        let queued = pool.schedule(task("b.png")).unwrap();
        pool.close();

        assert!(matches!(queued.wait(), Err(PoolError::Abandoned { .. })));
        assert!(matches!(
            pool.schedule(task("c.png")),
            Err(PoolError::Closed)
        ));
    }

    #[test]
    fn failed_unit_is_replaced_and_siblings_complete() {
        let (mut backend, open) = GatedBackend::new();
        backend.fail_image = Some("bad.png");
        let spawned = Arc::clone(&backend.spawned);
        let pool = WorkerPool::new(backend, 2).unwrap();

        let completions = pool
            .schedule_batch(["bad.png", "ok1.png", "ok2.png"].map(task).to_vec())
            .unwrap();
        for _ in 0..3 {
            open.send(()).unwrap();
        }

        let results: Vec<Completion> = completions.collect();
        assert_eq!(results.len(), 3);
        for completion in &results {
            if completion.image.as_str() == "bad.png" {
                assert!(matches!(
                    completion.result,
                    Err(PoolError::WorkerExited { .. })
                ));
            } else {
                assert!(completion.result.as_ref().unwrap().passed);
            }
        }

        wait_until(|| spawned.load(Ordering::SeqCst) == 3);
        wait_until(|| pool.idle_count() == 2);
    }

    struct FailingBackend;

    impl WorkerBackend for FailingBackend {
        type Unit = GatedUnit;

        fn name(&self) -> &'static str {
            "failing"
        }

        fn spawn(&self, worker: usize) -> Result<GatedUnit, PoolError> {
            Err(PoolError::Startup {
                worker,
                reason: "no such program".to_string(),
            })
        }
    }

    #[test]
    fn startup_failure_is_fatal() {
        let result = WorkerPool::new(FailingBackend, 2);
        assert!(matches!(result, Err(PoolError::Startup { worker: 0, .. })));
    }
}
