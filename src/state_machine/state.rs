use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::job::{JobProgress, TerminalOutcome};
use crate::error::JobError;
use crate::reality::ApiError;

/// Semantic state reported by a status query.
///
/// The service has used several names for the same state over time; they are
/// folded together by [`JobState::from_raw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Success,
    Cancelled,
    Failed,
}

impl JobState {
    /// Normalizes a raw status value, ignoring case and surrounding whitespace.
    pub fn from_raw(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "running" => Some(Self::Running),
            "success" | "completed" | "over" => Some(Self::Success),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl FromStr for JobState {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_raw(s).ok_or_else(|| ApiError::UnknownJobState(s.to_string()))
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Running => write!(f, "running"),
            JobState::Success => write!(f, "success"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// States of a tracked job, as seen from the poller.
///
/// SUBMITTED → RUNNING → SUCCESS | CANCELLED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    Submitted,
    Running,
    Succeeded,
    Cancelled,
    Failed,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Cancelled | Self::Failed)
    }
}

impl From<JobState> for PollState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Running => PollState::Running,
            JobState::Success => PollState::Succeeded,
            JobState::Cancelled => PollState::Cancelled,
            JobState::Failed => PollState::Failed,
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Submitted => write!(f, "SUBMITTED"),
            PollState::Running => write!(f, "RUNNING"),
            PollState::Succeeded => write!(f, "SUCCESS"),
            PollState::Cancelled => write!(f, "CANCELLED"),
            PollState::Failed => write!(f, "FAILED"),
        }
    }
}

/// What the poller must do after a status snapshot has been applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Still running: report progress, wait, query again.
    Wait(JobProgress),
    /// Finished without error (success or cancellation).
    Complete(TerminalOutcome),
    /// The job failed remotely.
    Fail(JobProgress),
}

/// Applies status snapshots of one job to its poll state.
///
/// Once a terminal state has been reached the tracker refuses further
/// snapshots, so every terminal observation is acted on exactly once.
#[derive(Debug, Clone)]
pub struct JobTracker {
    job_id: String,
    state: PollState,
    last: Option<JobProgress>,
    polls: u32,
    state_history: Vec<PollState>,
}

impl JobTracker {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: PollState::Submitted,
            last: None,
            polls: 0,
            state_history: Vec::new(),
        }
    }

    /// Compute and apply the transition for a freshly queried snapshot.
    pub fn advance(&mut self, progress: JobProgress) -> Result<Transition, JobError> {
        if self.state.is_terminal() {
            return Err(JobError::AlreadyTerminal {
                job_id: self.job_id.clone(),
                state: self.state,
            });
        }

        let next = PollState::from(progress.state);
        if next != self.state {
            self.state_history.push(self.state);
            self.state = next;
        }
        self.polls += 1;
        self.last = Some(progress.clone());

        let transition = match progress.state {
            JobState::Running => Transition::Wait(progress),
            JobState::Success => Transition::Complete(TerminalOutcome::Succeeded(progress)),
            JobState::Cancelled => Transition::Complete(TerminalOutcome::Cancelled(progress)),
            JobState::Failed => Transition::Fail(progress),
        };
        Ok(transition)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn last(&self) -> Option<&JobProgress> {
        self.last.as_ref()
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// States left behind so far, oldest first.
    pub fn state_history(&self) -> &[PollState] {
        &self.state_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: JobState, percent: u8, step: &str) -> JobProgress {
        JobProgress::new(state, percent, step)
    }

    #[test]
    fn raw_vocabulary_is_normalized() {
        for raw in ["active", "Active", "running", "Running", " RUNNING "] {
            assert_eq!(JobState::from_raw(raw), Some(JobState::Running), "{raw}");
        }
        for raw in ["success", "Success", "completed", "Completed", "over", "Over"] {
            assert_eq!(JobState::from_raw(raw), Some(JobState::Success), "{raw}");
        }
        for raw in ["cancelled", "Cancelled", "canceled"] {
            assert_eq!(JobState::from_raw(raw), Some(JobState::Cancelled), "{raw}");
        }
        assert_eq!(JobState::from_raw("Failed"), Some(JobState::Failed));
    }

    #[test]
    fn unknown_raw_state_is_rejected() {
        assert_eq!(JobState::from_raw("queued"), None);
        let err = "unsubmitted".parse::<JobState>().unwrap_err();
        assert!(matches!(err, ApiError::UnknownJobState(ref s) if s == "unsubmitted"));
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Success.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn running_then_success() {
        let mut tracker = JobTracker::new("job-1");
        assert_eq!(tracker.state(), PollState::Submitted);

        let t = tracker.advance(snapshot(JobState::Running, 10, "Init")).unwrap();
        assert!(matches!(t, Transition::Wait(ref p) if p.percent == 10));
        assert_eq!(tracker.state(), PollState::Running);

        let t = tracker.advance(snapshot(JobState::Running, 50, "Mesh")).unwrap();
        assert!(matches!(t, Transition::Wait(_)));

        let t = tracker.advance(snapshot(JobState::Success, 100, "Done")).unwrap();
        assert!(matches!(t, Transition::Complete(TerminalOutcome::Succeeded(_))));
        assert_eq!(tracker.state(), PollState::Succeeded);
        assert_eq!(tracker.polls(), 3);
        assert_eq!(
            tracker.state_history(),
            &[PollState::Submitted, PollState::Running]
        );
    }

    #[test]
    fn cancellation_completes_without_error() {
        let mut tracker = JobTracker::new("job-1");
        let t = tracker.advance(snapshot(JobState::Cancelled, 5, "")).unwrap();
        assert!(matches!(t, Transition::Complete(TerminalOutcome::Cancelled(_))));
        assert_eq!(tracker.state(), PollState::Cancelled);
    }

    #[test]
    fn failure_keeps_last_snapshot() {
        let mut tracker = JobTracker::new("job-1");
        tracker.advance(snapshot(JobState::Running, 30, "AT")).unwrap();
        let t = tracker.advance(snapshot(JobState::Failed, 37, "AT")).unwrap();

        assert_eq!(t, Transition::Fail(snapshot(JobState::Failed, 37, "AT")));
        assert_eq!(tracker.last().map(|p| p.percent), Some(37));
        assert_eq!(tracker.state(), PollState::Failed);
    }

    #[test]
    fn terminal_state_refuses_further_snapshots() {
        let mut tracker = JobTracker::new("job-1");
        tracker.advance(snapshot(JobState::Success, 100, "")).unwrap();

        let err = tracker
            .advance(snapshot(JobState::Running, 0, ""))
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::AlreadyTerminal {
                state: PollState::Succeeded,
                ..
            }
        ));
        assert_eq!(tracker.polls(), 1);
    }

    #[test]
    fn state_display() {
        assert_eq!(PollState::Submitted.to_string(), "SUBMITTED");
        assert_eq!(PollState::Succeeded.to_string(), "SUCCESS");
        assert_eq!(JobState::Cancelled.to_string(), "cancelled");
    }
}
