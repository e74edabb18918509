//! Worker-state table and the dispatch step.
//!
//! The table is the only shared state of the pool. `dispatch` runs under
//! its lock both when a task is submitted and when a worker completes, so
//! a queued task is handed out as soon as any worker turns idle.

use super::backend::Terminator;
use crate::core::scanner::ImagePath;
use crate::core::worker::{DiffOutcome, DiffTask};
use crate::error::PoolError;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::collections::VecDeque;

/// Lifecycle of one worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    /// Unit died and could not be replaced
    Dead,
}

/// Reply for one scheduled task
#[derive(Debug)]
pub struct Completion {
    pub image: ImagePath,
    pub result: Result<DiffOutcome, PoolError>,
}

/// A task together with the channel its reply goes to
pub(crate) struct Job {
    pub(crate) task: DiffTask,
    reply: Sender<Completion>,
}

impl Job {
    pub(crate) fn new(task: DiffTask, reply: Sender<Completion>) -> Self {
        Self { task, reply }
    }

    pub(crate) fn finish(self, result: Result<DiffOutcome, PoolError>) {
        // Receiver gone means nobody waits for this task any more
        let _ = self.reply.send(Completion {
            image: self.task.image,
            result,
        });
    }

    pub(crate) fn abandon(self) {
        let image = self.task.image.to_string();
        self.finish(Err(PoolError::Abandoned { image }));
    }
}

pub(crate) struct Slot {
    state: WorkerState,
    jobs: Option<Sender<Job>>,
    terminator: Terminator,
}

impl Slot {
    pub(crate) fn new(jobs: Sender<Job>, terminator: Terminator) -> Self {
        Self {
            state: WorkerState::Idle,
            jobs: Some(jobs),
            terminator,
        }
    }
}

pub(crate) struct WorkerTable {
    slots: Vec<Slot>,
    queue: VecDeque<Job>,
    closed: bool,
}

impl WorkerTable {
    pub(crate) fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            queue: VecDeque::new(),
            closed: false,
        }
    }

    /// Queue a job and dispatch. Hands the job back if the pool is closed.
    pub(crate) fn submit(&mut self, job: Job) -> Result<(), Job> {
        if self.closed {
            return Err(job);
        }
        self.queue.push_back(job);
        self.dispatch();
        Ok(())
    }

    /// Worker finished its task and can take the next one
    pub(crate) fn complete(&mut self, worker: usize) {
        if let Some(slot) = self.slots.get_mut(worker) {
            if slot.state == WorkerState::Busy {
                slot.state = WorkerState::Idle;
            }
        }
        self.dispatch();
    }

    pub(crate) fn replace_terminator(&mut self, worker: usize, terminator: Terminator) {
        if let Some(slot) = self.slots.get_mut(worker) {
            slot.terminator = terminator;
        }
    }

    /// Worker is gone for good. Once no worker is left, queued jobs can
    /// never run and are abandoned.
    pub(crate) fn retire(&mut self, worker: usize) {
        if let Some(slot) = self.slots.get_mut(worker) {
            slot.state = WorkerState::Dead;
            slot.jobs = None;
        }
        if self.slots.iter().all(|slot| slot.state == WorkerState::Dead) {
            for job in self.queue.drain(..) {
                job.abandon();
            }
        }
    }

    /// Hand queued jobs to idle workers, first idle slot first
    fn dispatch(&mut self) {
        if self.closed {
            return;
        }

        while !self.queue.is_empty() {
            let Some(slot) = self
                .slots
                .iter_mut()
                .find(|slot| slot.state == WorkerState::Idle)
            else {
                break;
            };
            let Some(job) = self.queue.pop_front() else {
                break;
            };

            let sent = match &slot.jobs {
                Some(jobs) => jobs.send(job),
                None => Err(crossbeam_channel::SendError(job)),
            };
            match sent {
                Ok(()) => slot.state = WorkerState::Busy,
                Err(crossbeam_channel::SendError(job)) => {
                    // Driver thread is gone
                    slot.state = WorkerState::Dead;
                    slot.jobs = None;
                    self.queue.push_front(job);
                }
            }
        }

        if self.slots.iter().all(|slot| slot.state == WorkerState::Dead) {
            for job in self.queue.drain(..) {
                job.abandon();
            }
        }
    }

    /// Stop accepting work. Returns the jobs that never started and the
    /// terminators of every unit; dropping the job senders lets each
    /// driver thread run out.
    pub(crate) fn close(&mut self) -> (Vec<Job>, Vec<Terminator>) {
        if self.closed {
            return (Vec::new(), Vec::new());
        }
        self.closed = true;

        let abandoned = self.queue.drain(..).collect();
        let terminators = self
            .slots
            .iter_mut()
            .map(|slot| {
                slot.jobs = None;
                slot.terminator.clone()
            })
            .collect();
        (abandoned, terminators)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn states(&self) -> Vec<WorkerState> {
        self.slots.iter().map(|slot| slot.state).collect()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }
}
