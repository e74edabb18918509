//! # Bridge Module
//!
//! Thread semantics rebuilt on top of isolated execution contexts.
//!
//! A [`NativeProgram`] runs as one logical program over a [`SharedMemory`].
//! Its host can only create isolated contexts and exchange messages with
//! them, so creating a thread is a message round trip:
//!
//! 1. the program calls [`HostContext::thread_spawn`] with a start argument
//! 2. a [`ThreadIdSlot`] is allocated in the `PENDING` state
//! 3. the orchestrator creates a context with the same memory handle
//! 4. the requester blocks on the slot
//! 5. the new context writes its id into the slot and wakes the requester
//! 6. the new context runs the thread entry point on the shared memory
//!
//! The root context posts `Complete` once, with the serialized result;
//! the orchestrator then terminates and joins every context. A `Failed`
//! message from any context aborts the run.
//!
//! ## Example
//! ```rust,ignore
//! let core = DiffCore::new(tasks, 4, DiffWorker::default(), images, aggregator);
//! let json = ThreadBridge::new(Arc::new(core)).run()?;
//! ```

mod handshake;
mod host;
mod memory;
mod native;

pub use handshake::{ThreadIdSlot, PENDING, SPAWN_FAILED};
pub use host::{HostContext, HostMessage};
pub use memory::SharedMemory;
pub use native::{DiffCore, NativeProgram};

use crate::core::worker::panic_reason;
use crate::error::PoolError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use host::complete_handshake;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Upper bound on contexts created for one run
pub const DEFAULT_MAX_THREADS: usize = 256;

/// How often the orchestrator checks that the root context is still alive
const ROOT_POLL: Duration = Duration::from_millis(100);

/// Runs a native program and hosts the contexts it asks for
pub struct ThreadBridge {
    program: Arc<dyn NativeProgram>,
    max_threads: usize,
}

impl ThreadBridge {
    pub fn new(program: Arc<dyn NativeProgram>) -> Self {
        Self {
            program,
            max_threads: DEFAULT_MAX_THREADS,
        }
    }

    /// Refuse thread requests beyond `max_threads`
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Run the program to completion and return its serialized result
    pub fn run(&self) -> Result<String, PoolError> {
        let (outbox, inbox) = unbounded();
        let mut orchestrator = Orchestrator {
            program: Arc::clone(&self.program),
            outbox,
            terminated: Arc::new(AtomicBool::new(false)),
            contexts: Vec::new(),
            memories: Vec::new(),
            next_thread_id: 1,
            max_threads: self.max_threads,
        };

        let result = match orchestrator.launch(0, Entry::Main) {
            Ok(root) => {
                orchestrator.contexts.push(root);
                orchestrator.pump(&inbox)
            }
            Err(e) => Err(PoolError::Startup {
                worker: 0,
                reason: e.to_string(),
            }),
        };

        orchestrator.terminate_all();
        result
    }
}

enum Entry {
    Main,
    Thread {
        start_arg: u32,
        slot: Arc<ThreadIdSlot>,
        memory: SharedMemory,
    },
}

struct Orchestrator {
    program: Arc<dyn NativeProgram>,
    outbox: Sender<HostMessage>,
    terminated: Arc<AtomicBool>,
    /// Root context first
    contexts: Vec<JoinHandle<()>>,
    /// Every memory seen in a spawn request, aborted on failure
    memories: Vec<SharedMemory>,
    next_thread_id: u32,
    max_threads: usize,
}

impl Orchestrator {
    fn pump(&mut self, inbox: &Receiver<HostMessage>) -> Result<String, PoolError> {
        loop {
            match inbox.recv_timeout(ROOT_POLL) {
                Ok(HostMessage::ThreadSpawn {
                    start_arg,
                    thread_id,
                    memory,
                }) => self.spawn_thread(start_arg, thread_id, memory),
                Ok(HostMessage::Loaded { context }) => {
                    trace!(context, "context loaded");
                }
                Ok(HostMessage::Complete { data }) => {
                    debug!(contexts = self.contexts.len(), "native program complete");
                    return Ok(data);
                }
                Ok(HostMessage::Failed { context, message }) => {
                    error!(context, %message, "context failed");
                    for memory in &self.memories {
                        memory.abort();
                    }
                    return Err(PoolError::ContextFailed { message });
                }
                Err(RecvTimeoutError::Timeout) => {
                    let root_gone = self.contexts.first().map_or(true, JoinHandle::is_finished);
                    if root_gone && inbox.is_empty() {
                        return Err(PoolError::ContextFailed {
                            message: "root context exited without a result".to_string(),
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PoolError::ContextFailed {
                        message: "message channel closed".to_string(),
                    });
                }
            }
        }
    }

    fn spawn_thread(&mut self, start_arg: u32, slot: Arc<ThreadIdSlot>, memory: SharedMemory) {
        if !self.memories.iter().any(|seen| seen.same_as(&memory)) {
            self.memories.push(memory.clone());
        }

        // Root context is not a thread
        if self.contexts.len() > self.max_threads {
            warn!(max_threads = self.max_threads, "thread limit reached");
            slot.store_and_notify(SPAWN_FAILED);
            return;
        }

        let thread_id = self.next_thread_id;
        let entry = Entry::Thread {
            start_arg,
            slot: Arc::clone(&slot),
            memory,
        };
        match self.launch(thread_id, entry) {
            Ok(handle) => {
                self.next_thread_id += 1;
                self.contexts.push(handle);
            }
            Err(e) => {
                warn!(error = %e, "cannot create context");
                slot.store_and_notify(SPAWN_FAILED);
            }
        }
    }

    fn launch(&self, id: u32, entry: Entry) -> std::io::Result<JoinHandle<()>> {
        let program = Arc::clone(&self.program);
        let host = HostContext::new(id, self.outbox.clone(), Arc::clone(&self.terminated));
        thread::Builder::new()
            .name(format!("diff-core-{id}"))
            .spawn(move || run_context(program.as_ref(), host, entry))
    }

    fn terminate_all(&mut self) {
        self.terminated.store(true, Ordering::SeqCst);
        for context in self.contexts.drain(..) {
            if context.join().is_err() {
                error!("context thread panicked outside its entry point");
            }
        }
    }
}

/// Host wrapper around an entry point
fn run_context(program: &dyn NativeProgram, host: HostContext, entry: Entry) {
    if let Entry::Thread { slot, .. } = &entry {
        complete_handshake(slot, host.id());
    }
    let _ = host.post(HostMessage::Loaded { context: host.id() });

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &entry {
        Entry::Main => program.main(&host).map(Some),
        Entry::Thread {
            start_arg, memory, ..
        } => program
            .thread_start(host.id(), *start_arg, memory, &host)
            .map(|()| None),
    }));

    let message = match outcome {
        Ok(Ok(Some(data))) => HostMessage::Complete { data },
        Ok(Ok(None)) => return,
        Ok(Err(error)) => HostMessage::Failed {
            context: host.id(),
            message: error.to_string(),
        },
        Err(payload) => HostMessage::Failed {
            context: host.id(),
            message: format!("panicked: {}", panic_reason(payload.as_ref())),
        },
    };
    let _ = host.post(message);
}
