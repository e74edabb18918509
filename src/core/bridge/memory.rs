//! Linear memory shared by every context of one native program.
//!
//! Handing a [`SharedMemory`] to a context clones the handle, never the
//! data. Task `i` belongs to partition `i % partitions`, so partitions are
//! disjoint and each outcome cell has exactly one writer.

use crate::core::worker::{DiffOutcome, DiffTask};
use crate::error::PoolError;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

struct LinearMemory {
    tasks: Vec<DiffTask>,
    outcomes: Vec<OnceLock<DiffOutcome>>,
    partitions: usize,
    /// Partitions not yet finished
    remaining: Mutex<usize>,
    done: Condvar,
    aborted: AtomicBool,
}

#[derive(Clone)]
pub struct SharedMemory {
    inner: Arc<LinearMemory>,
}

impl SharedMemory {
    pub fn new(tasks: Vec<DiffTask>, partitions: usize) -> Self {
        let partitions = partitions.max(1);
        let outcomes = tasks.iter().map(|_| OnceLock::new()).collect();
        Self {
            inner: Arc::new(LinearMemory {
                tasks,
                outcomes,
                partitions,
                remaining: Mutex::new(partitions),
                done: Condvar::new(),
                aborted: AtomicBool::new(false),
            }),
        }
    }

    pub fn partitions(&self) -> usize {
        self.inner.partitions
    }

    pub fn task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Tasks of one partition with their index
    pub fn partition(&self, index: usize) -> impl Iterator<Item = (usize, &DiffTask)> {
        self.inner
            .tasks
            .iter()
            .enumerate()
            .skip(index)
            .step_by(self.inner.partitions)
    }

    /// Store the outcome of task `index`. Returns `false` if the cell was
    /// already written.
    pub fn record(&self, index: usize, outcome: DiffOutcome) -> bool {
        self.inner
            .outcomes
            .get(index)
            .is_some_and(|cell| cell.set(outcome).is_ok())
    }

    /// Mark one partition as finished
    pub fn finish_partition(&self) {
        let mut remaining = self.inner.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.inner.done.notify_all();
        }
    }

    /// Block until every partition finished. Returns `false` if the
    /// memory was aborted first.
    pub fn wait_all(&self) -> bool {
        let mut remaining = self.inner.remaining.lock();
        while *remaining > 0 && !self.is_aborted() {
            self.inner.done.wait(&mut remaining);
        }
        !self.is_aborted()
    }

    /// Wake every waiter and tell workers to stop taking tasks
    pub fn abort(&self) {
        let _remaining = self.inner.remaining.lock();
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.done.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// All outcomes in task order. Every task must have been answered.
    pub fn outcomes(&self) -> Result<Vec<DiffOutcome>, PoolError> {
        self.inner
            .tasks
            .iter()
            .zip(&self.inner.outcomes)
            .map(|(task, cell)| {
                cell.get().cloned().ok_or_else(|| PoolError::MalformedResult {
                    reason: format!("no outcome for {}", task.image),
                })
            })
            .collect()
    }

    /// Whether both handles refer to the same memory
    pub fn same_as(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("tasks", &self.inner.tasks.len())
            .field("partitions", &self.inner.partitions)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}
