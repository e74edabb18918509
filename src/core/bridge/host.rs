//! What a native program sees of its host.
//!
//! Contexts talk to the orchestrator only through [`HostMessage`]s. A
//! context that wants a thread posts `ThreadSpawn` and blocks on the
//! message's [`ThreadIdSlot`] until the new context reports its id.

use super::handshake::{ThreadIdSlot, PENDING};
use super::memory::SharedMemory;
use crate::error::PoolError;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How often a blocked requester checks whether the host shut down
const HANDSHAKE_POLL: Duration = Duration::from_millis(50);

/// Messages from contexts to the orchestrator
#[derive(Debug)]
pub enum HostMessage {
    /// Create a context sharing `memory` and running the thread entry
    /// point with `start_arg`
    ThreadSpawn {
        start_arg: u32,
        thread_id: Arc<ThreadIdSlot>,
        memory: SharedMemory,
    },
    /// Context is up and about to run its entry point
    Loaded { context: u32 },
    /// Root context finished with the serialized result
    Complete { data: String },
    /// Context failed; the run is aborted
    Failed { context: u32, message: String },
}

/// Handle of one execution context
#[derive(Debug, Clone)]
pub struct HostContext {
    id: u32,
    outbox: Sender<HostMessage>,
    terminated: Arc<AtomicBool>,
}

impl HostContext {
    pub(crate) fn new(id: u32, outbox: Sender<HostMessage>, terminated: Arc<AtomicBool>) -> Self {
        Self {
            id,
            outbox,
            terminated,
        }
    }

    /// Context id; the root context is 0, threads count up from 1
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether the orchestrator asked every context to stop
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Ask the host for a new thread that shares `memory`. Blocks until the
    /// thread has its id.
    pub fn thread_spawn(&self, start_arg: u32, memory: &SharedMemory) -> Result<u32, PoolError> {
        let slot = Arc::new(ThreadIdSlot::new());
        self.post(HostMessage::ThreadSpawn {
            start_arg,
            thread_id: Arc::clone(&slot),
            memory: memory.clone(),
        })?;

        let value = loop {
            if let Some(value) = slot.wait_timeout(HANDSHAKE_POLL) {
                break value;
            }
            if self.is_terminated() {
                return Err(PoolError::ThreadSpawn {
                    reason: "host terminated during handshake".to_string(),
                });
            }
        };

        trace!(context = self.id, start_arg, thread_id = value, "thread handshake done");
        match u32::try_from(value) {
            Ok(thread_id) => Ok(thread_id),
            Err(_) => Err(PoolError::ThreadSpawn {
                reason: format!("host refused thread (code {value})"),
            }),
        }
    }

    pub(crate) fn post(&self, message: HostMessage) -> Result<(), PoolError> {
        self.outbox.send(message).map_err(|_| PoolError::ThreadSpawn {
            reason: "orchestrator is gone".to_string(),
        })
    }
}

/// Assign the id from inside the new context and wake the requester
pub(crate) fn complete_handshake(slot: &ThreadIdSlot, thread_id: u32) {
    debug_assert_eq!(slot.load(), PENDING);
    let value = i32::try_from(thread_id).unwrap_or(i32::MAX);
    slot.store_and_notify(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::handshake::SPAWN_FAILED;
    use crossbeam_channel::unbounded;
    use std::thread;

    #[test]
    fn thread_spawn_waits_for_new_context() {
        let (outbox, inbox) = unbounded();
        let host = HostContext::new(0, outbox, Arc::new(AtomicBool::new(false)));
        let memory = SharedMemory::new(Vec::new(), 1);

        let orchestrator = thread::spawn(move || match inbox.recv().unwrap() {
            HostMessage::ThreadSpawn {
                start_arg,
                thread_id,
                ..
            } => {
                assert_eq!(start_arg, 9);
                thread::spawn(move || complete_handshake(&thread_id, 1))
                    .join()
                    .unwrap();
            }
            other => panic!("unexpected message {other:?}"),
        });

        assert_eq!(host.thread_spawn(9, &memory).unwrap(), 1);
        orchestrator.join().unwrap();
    }

    #[test]
    fn negative_code_is_a_spawn_error() {
        let (outbox, inbox) = unbounded();
        let host = HostContext::new(0, outbox, Arc::new(AtomicBool::new(false)));

        let orchestrator = thread::spawn(move || {
            if let Ok(HostMessage::ThreadSpawn { thread_id, .. }) = inbox.recv() {
                thread_id.store_and_notify(SPAWN_FAILED);
            }
        });

        let result = host.thread_spawn(1, &SharedMemory::new(Vec::new(), 1));
        assert!(matches!(result, Err(PoolError::ThreadSpawn { .. })));
        orchestrator.join().unwrap();
    }

    #[test]
    fn termination_unblocks_pending_handshake() {
        let (outbox, _inbox) = unbounded();
        let terminated = Arc::new(AtomicBool::new(true));
        let host = HostContext::new(0, outbox, terminated);

        let result = host.thread_spawn(1, &SharedMemory::new(Vec::new(), 1));
        assert!(matches!(result, Err(PoolError::ThreadSpawn { .. })));
    }
}
