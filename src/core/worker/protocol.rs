//! Stdio wire protocol of the process backend.
//!
//! Newline-delimited JSON: one `DiffTask` line in, exactly one `DiffOutcome`
//! line out. Stdout carries replies only; logs and fatal failures go to
//! stderr.

use super::{DiffOutcome, DiffTask, DiffWorker};
use crate::error::PoolError;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// Serialize a task as one protocol line (without the newline)
pub fn encode_task(task: &DiffTask) -> Result<String, PoolError> {
    serde_json::to_string(task).map_err(|e| PoolError::Protocol {
        reason: format!("cannot encode task for {}: {e}", task.image),
    })
}

/// Parse one reply line
pub fn decode_outcome(line: &str) -> Result<DiffOutcome, PoolError> {
    serde_json::from_str(line.trim()).map_err(|e| PoolError::Protocol {
        reason: format!("invalid reply {:?}: {e}", line.trim()),
    })
}

/// Serve tasks from `input` until it closes. Returns the number of tasks
/// answered.
///
/// A line that is not a task is fatal: the worker cannot know which task
/// to answer, so it stops and lets the pool see it exit.
pub fn serve<R: BufRead, W: Write>(worker: &DiffWorker, input: R, mut output: W) -> io::Result<usize> {
    let mut answered = 0;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let task: DiffTask = serde_json::from_str(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let outcome = worker.run(&task);
        serde_json::to_writer(&mut output, &outcome)?;
        output.write_all(b"\n")?;
        output.flush()?;

        answered += 1;
        debug!(image = %outcome.image, passed = outcome.passed, "answered task");
    }

    Ok(answered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DiffFormat, DiffThresholds};
    use crate::core::scanner::ImagePath;
    use std::io::Cursor;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn task(dir: &TempDir, image: &str) -> DiffTask {
        DiffTask {
            image: ImagePath::new(image),
            actual_dir: dir.path().join("actual"),
            expected_dir: dir.path().join("expected"),
            diff_dir: dir.path().join("diff"),
            thresholds: DiffThresholds::default(),
            diff_format: DiffFormat::Png,
        }
    }

    #[test]
    fn answers_each_task_with_one_line() {
        let temp_dir = TempDir::new().unwrap();
        for root in ["actual", "expected"] {
            std::fs::create_dir_all(temp_dir.path().join(root)).unwrap();
            std::fs::write(temp_dir.path().join(root).join("same.png"), b"bytes").unwrap();
        }

        let input = format!(
            "{}\n\n{}\n",
            encode_task(&task(&temp_dir, "same.png")).unwrap(),
            encode_task(&task(&temp_dir, "missing.png")).unwrap()
        );
        let mut output = Vec::new();

        let answered = serve(&DiffWorker::default(), Cursor::new(input), &mut output).unwrap();

        assert_eq!(answered, 2);
        let replies: Vec<DiffOutcome> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| decode_outcome(l).unwrap())
            .collect();
        assert!(replies[0].passed);
        assert!(!replies[1].passed);
        assert!(replies[1].error.is_some());
    }

    #[test]
    fn malformed_task_is_fatal() {
        let mut output = Vec::new();
        let result = serve(&DiffWorker::default(), Cursor::new("{not json}\n"), &mut output);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
        assert!(output.is_empty());
    }

    #[test]
    fn garbage_reply_is_a_protocol_error() {
        assert!(matches!(
            decode_outcome("Segmentation fault"),
            Err(PoolError::Protocol { .. })
        ));
    }

    #[test]
    fn encode_then_decode_keeps_paths() {
        let task = DiffTask {
            image: ImagePath::new("a b/c.png"),
            actual_dir: PathBuf::from("/x"),
            expected_dir: PathBuf::from("/y"),
            diff_dir: PathBuf::from("/z"),
            thresholds: DiffThresholds::default(),
            diff_format: DiffFormat::Webp,
        };
        let line = encode_task(&task).unwrap();
        let back: DiffTask = serde_json::from_str(&line).unwrap();
        assert_eq!(back, task);
    }
}
