//! Process backend: one OS process per worker.
//!
//! Each unit is a child process in worker mode. Tasks go to its stdin as
//! one JSON line, replies come back on stdout as one JSON line. Stderr is
//! inherited so the worker's logs reach the user.

use super::backend::{Terminator, WorkerBackend, WorkerUnit};
use crate::core::config::DEFAULT_TASK_TIMEOUT;
use crate::core::worker::protocol::{decode_outcome, encode_task};
use crate::core::worker::{DiffOutcome, DiffTask};
use crate::error::PoolError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

/// Spawns worker processes
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessBackend {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TASK_TIMEOUT,
        }
    }

    /// Per-task reply deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl WorkerBackend for ProcessBackend {
    type Unit = ProcessUnit;

    fn name(&self) -> &'static str {
        "process"
    }

    fn spawn(&self, worker: usize) -> Result<ProcessUnit, PoolError> {
        let startup = |reason: String| PoolError::Startup { worker, reason };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| startup(format!("{}: {e}", self.program.display())))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(startup("stdio pipes unavailable".to_string()));
        };

        // Lines are forwarded until stdout closes, i.e. the process exits
        let (lines, replies) = unbounded();
        let reader = thread::Builder::new()
            .name(format!("diff-worker-{worker}-stdout"))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if lines.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(startup(e.to_string()));
        }

        debug!(worker, pid = child.id(), "worker process started");
        Ok(ProcessUnit {
            worker,
            child: Arc::new(Mutex::new(child)),
            stdin,
            replies,
            timeout: self.timeout,
        })
    }
}

/// A running worker process
pub struct ProcessUnit {
    worker: usize,
    child: Arc<Mutex<Child>>,
    stdin: ChildStdin,
    replies: Receiver<io::Result<String>>,
    timeout: Duration,
}

impl ProcessUnit {
    fn send(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()
    }
}

impl WorkerUnit for ProcessUnit {
    fn execute(&mut self, task: &DiffTask) -> Result<DiffOutcome, PoolError> {
        let exited = PoolError::WorkerExited {
            worker: self.worker,
        };
        let line = encode_task(task)?;
        if let Err(e) = self.send(&line) {
            trace!(worker = self.worker, error = %e, "cannot write task");
            return Err(exited);
        }

        match self.replies.recv_timeout(self.timeout) {
            Ok(Ok(reply)) => {
                let outcome = decode_outcome(&reply)?;
                if outcome.image != task.image {
                    return Err(PoolError::Protocol {
                        reason: format!("reply for {} while waiting for {}", outcome.image, task.image),
                    });
                }
                Ok(outcome)
            }
            Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => Err(exited),
            Err(RecvTimeoutError::Timeout) => Err(PoolError::Timeout {
                image: task.image.to_string(),
                after: self.timeout,
            }),
        }
    }

    fn terminate(&mut self) {
        (self.terminator())();
    }

    fn terminator(&self) -> Terminator {
        let child = Arc::clone(&self.child);
        let worker = self.worker;
        Arc::new(move || {
            let mut child = child.lock();
            // Both calls are no-ops once the child has been reaped
            let _ = child.kill();
            if let Ok(status) = child.wait() {
                trace!(worker, %status, "worker process reaped");
            }
        })
    }
}

impl Drop for ProcessUnit {
    fn drop(&mut self) {
        self.terminate();
    }
}
