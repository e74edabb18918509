//! Event type definitions for run reporting.

use crate::core::aggregator::AggregateResult;
use crate::core::scanner::ImagePath;
use crate::core::worker::{DiffDetails, DiffOutcome};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// All events emitted by a diff run, in order:
/// `Start → Compare* → Update? → Complete | Error`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// The run has discovered its images and is about to diff them
    Start(RunStarted),
    /// One image finished comparing
    Compare(CompareEvent),
    /// Update (promotion) phase events
    Update(UpdateEvent),
    /// The run finished and produced a report model
    Complete(RunCompleted),
    /// The run failed
    Error { message: String },
}

/// Payload of the start event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStarted {
    /// Identifier shared by every event of this run
    pub run_id: Uuid,
    /// Number of images found under the expected root
    pub expected_images: usize,
    /// Number of images found under the actual root
    pub actual_images: usize,
    /// Images with no expected counterpart
    pub new_images: Vec<ImagePath>,
    /// Expected images with no actual counterpart
    pub deleted_images: Vec<ImagePath>,
    /// Number of images that will be diffed
    pub comparisons: usize,
    /// Backend name
    pub backend: String,
    /// Effective worker count
    pub concurrency: usize,
}

/// Verdict kind of a compare event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareKind {
    Pass,
    Fail,
}

/// One image finished comparing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareEvent {
    pub kind: CompareKind,
    pub path: ImagePath,
    pub diff_details: Option<DiffDetails>,
    pub error: Option<String>,
}

impl From<&DiffOutcome> for CompareEvent {
    fn from(outcome: &DiffOutcome) -> Self {
        Self {
            kind: if outcome.passed {
                CompareKind::Pass
            } else {
                CompareKind::Fail
            },
            path: outcome.image.clone(),
            diff_details: outcome.diff_details.clone(),
            error: outcome.error.clone(),
        }
    }
}

/// Events during the update (promotion) phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UpdateEvent {
    /// Promotion has started
    Started { deleting: usize, copying: usize },
    /// Both promotion steps finished
    Completed { deleted: usize, copied: usize },
}

/// Payload of the complete event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompleted {
    pub run_id: Uuid,
    pub result: AggregateResult,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl std::fmt::Display for CompareKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareKind::Pass => write!(f, "pass"),
            CompareKind::Fail => write!(f, "fail"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_event_follows_outcome_verdict() {
        let outcome = DiffOutcome::failed_with_error(
            ImagePath::new("broken.png"),
            "decode failed".to_string(),
        );

        let event = CompareEvent::from(&outcome);

        assert_eq!(event.kind, CompareKind::Fail);
        assert_eq!(event.path.as_str(), "broken.png");
        assert_eq!(event.error.as_deref(), Some("decode failed"));
    }

    #[test]
    fn events_are_serializable() {
        let event = Event::Update(UpdateEvent::Completed {
            deleted: 2,
            copied: 3,
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();

        match deserialized {
            Event::Update(UpdateEvent::Completed { deleted, copied }) => {
                assert_eq!(deleted, 2);
                assert_eq!(copied, 3);
            }
            _ => panic!("Wrong event type"),
        }
    }
}
