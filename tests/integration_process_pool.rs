//! Integration tests for the process backend.
//!
//! These spawn the real `vdiff worker` binary and verify:
//! - Tasks round-trip through the stdio worker protocol
//! - A full engine run on worker processes matches the threads backend

use assert_fs::prelude::*;
use assert_fs::TempDir;
use image::{Rgba, RgbaImage};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use visual_diff_engine::core::config::{Backend, DiffFormat, DiffThresholds};
use visual_diff_engine::core::engine::{Engine, Verdict};
use visual_diff_engine::core::pool::{ProcessBackend, WorkerPool, WorkerState};
use visual_diff_engine::core::worker::DiffTask;
use visual_diff_engine::core::ImagePath;

fn worker_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_vdiff"))
}

fn worker_args() -> Vec<String> {
    vec!["worker".to_string()]
}

fn save_png(path: &Path, dirty: u32) {
    let mut picture = RgbaImage::from_pixel(6, 6, Rgba([20, 120, 220, 255]));
    for x in 0..dirty {
        picture.put_pixel(x, 5, Rgba([250, 0, 0, 255]));
    }
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    picture.save(path).unwrap();
}

fn task(temp: &TempDir, image: &str) -> DiffTask {
    DiffTask {
        image: ImagePath::new(image),
        actual_dir: temp.child("actual").path().to_path_buf(),
        expected_dir: temp.child("expected").path().to_path_buf(),
        diff_dir: temp.child("diff").path().to_path_buf(),
        thresholds: DiffThresholds::default(),
        diff_format: DiffFormat::Png,
    }
}

#[test]
fn worker_processes_answer_scheduled_tasks() {
    let temp = TempDir::new().unwrap();
    save_png(temp.child("expected/same.png").path(), 0);
    save_png(temp.child("actual/same.png").path(), 0);
    save_png(temp.child("expected/moved.png").path(), 0);
    save_png(temp.child("actual/moved.png").path(), 2);

    let backend = ProcessBackend::new(worker_binary(), worker_args()).timeout(Duration::from_secs(20));
    let mut pool = WorkerPool::new(backend, 2).unwrap();
    assert_eq!(pool.states(), vec![WorkerState::Idle, WorkerState::Idle]);

    let same = pool.schedule(task(&temp, "same.png")).unwrap();
    let moved = pool.schedule(task(&temp, "moved.png")).unwrap();

    let same = same.wait().unwrap();
    assert!(same.passed);
    assert!(same.diff_details.is_none());

    let moved = moved.wait().unwrap();
    assert!(!moved.passed);
    assert_eq!(moved.diff_details.unwrap().diff_count, 2);
    temp.child("diff/moved.png").assert(predicate::path::exists());

    pool.close();
    assert_eq!(pool.busy_count(), 0);
}

#[test]
fn unreadable_image_is_an_outcome_not_a_pool_failure() {
    let temp = TempDir::new().unwrap();
    temp.child("expected").create_dir_all().unwrap();
    temp.child("actual").create_dir_all().unwrap();
    temp.child("expected/broken.png").write_binary(b"not an image").unwrap();
    temp.child("actual/broken.png").write_binary(b"still not an image").unwrap();

    let backend = ProcessBackend::new(worker_binary(), worker_args());
    let pool = WorkerPool::new(backend, 1).unwrap();

    let outcome = pool.schedule(task(&temp, "broken.png")).unwrap().wait().unwrap();

    assert!(!outcome.passed);
    assert!(outcome.error.is_some());
}

#[test]
fn engine_on_process_backend_matches_threads_backend() {
    let temp = TempDir::new().unwrap();
    for index in 0..24 {
        let name = format!("screens/shot_{index:02}.png");
        save_png(temp.child("expected").child(&name).path(), 0);
        save_png(temp.child("actual").child(&name).path(), u32::from(index % 6 == 0));
    }

    let run = |backend: Backend, diff: &str| {
        Engine::builder()
            .actual_dir(temp.child("actual").path())
            .expected_dir(temp.child("expected").path())
            .diff_dir(temp.child(diff).path())
            .backend(backend)
            .concurrency(3)
            .build()
            .unwrap()
            .run()
            .unwrap()
    };

    let on_processes = run(
        Backend::Process {
            program: worker_binary(),
            args: worker_args(),
        },
        "diff-process",
    );
    let on_threads = run(Backend::Threads, "diff-threads");

    assert_eq!(on_processes.result.failed_items.len(), 4);
    assert_eq!(on_processes.result.passed_items.len(), 20);
    assert_eq!(on_processes.result.failed_items, on_threads.result.failed_items);
    assert_eq!(on_processes.result.passed_items, on_threads.result.passed_items);
    assert_eq!(on_processes.verdict(), Verdict::Failed);
    temp.child("diff-process/screens/shot_00.png")
        .assert(predicate::path::exists());
}
