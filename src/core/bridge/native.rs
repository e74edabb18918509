//! The native diff core run on top of the bridge.

use super::host::HostContext;
use super::memory::SharedMemory;
use super::DEFAULT_MAX_THREADS;
use crate::core::aggregator::ResultAggregator;
use crate::core::scanner::ImageSet;
use crate::core::worker::{DiffTask, DiffWorker};
use crate::error::PoolError;
use tracing::{debug, warn};

/// A program with a root entry point and a thread entry point
pub trait NativeProgram: Send + Sync + 'static {
    /// Root entry point. Returns the serialized result of the run.
    fn main(&self, host: &HostContext) -> Result<String, PoolError>;

    /// Entry point of a thread created through `HostContext::thread_spawn`
    fn thread_start(
        &self,
        thread_id: u32,
        start_arg: u32,
        memory: &SharedMemory,
        host: &HostContext,
    ) -> Result<(), PoolError>;
}

/// Diffs a batch across `threads` partitions and returns the serialized
/// `AggregateResult`.
///
/// Partitions are capped at [`DEFAULT_MAX_THREADS`]. A partition whose
/// thread the host refuses runs on the root context instead.
pub struct DiffCore {
    memory: SharedMemory,
    worker: DiffWorker,
    images: ImageSet,
    aggregator: ResultAggregator,
}

impl DiffCore {
    pub fn new(
        tasks: Vec<DiffTask>,
        threads: usize,
        worker: DiffWorker,
        images: ImageSet,
        aggregator: ResultAggregator,
    ) -> Self {
        let partitions = threads.clamp(1, tasks.len().max(1)).min(DEFAULT_MAX_THREADS);
        Self {
            memory: SharedMemory::new(tasks, partitions),
            worker,
            images,
            aggregator,
        }
    }

    fn run_partition(&self, partition: usize, memory: &SharedMemory, host: &HostContext) {
        for (index, task) in memory.partition(partition) {
            if memory.is_aborted() || host.is_terminated() {
                break;
            }
            memory.record(index, self.worker.run(task));
        }
        memory.finish_partition();
    }
}

impl NativeProgram for DiffCore {
    fn main(&self, host: &HostContext) -> Result<String, PoolError> {
        let partitions = self.memory.partitions();
        let mut on_root = vec![0];
        for partition in 1..partitions {
            let start_arg = u32::try_from(partition).map_err(|_| PoolError::ThreadSpawn {
                reason: format!("partition {partition} out of range"),
            })?;
            match host.thread_spawn(start_arg, &self.memory) {
                Ok(thread_id) => debug!(partition, thread_id, "partition thread started"),
                Err(error) => {
                    warn!(partition, %error, "running partition on the root context");
                    on_root.push(partition);
                }
            }
        }

        for partition in on_root {
            self.run_partition(partition, &self.memory, host);
        }

        if !self.memory.wait_all() {
            return Err(PoolError::ContextFailed {
                message: "run aborted".to_string(),
            });
        }

        let outcomes = self.memory.outcomes()?;
        let result = self.aggregator.aggregate(outcomes, &self.images);
        serde_json::to_string(&result).map_err(|e| PoolError::MalformedResult {
            reason: e.to_string(),
        })
    }

    fn thread_start(
        &self,
        thread_id: u32,
        start_arg: u32,
        memory: &SharedMemory,
        host: &HostContext,
    ) -> Result<(), PoolError> {
        debug!(thread_id, partition = start_arg, "thread entry");
        self.run_partition(start_arg as usize, memory, host);
        Ok(())
    }
}
