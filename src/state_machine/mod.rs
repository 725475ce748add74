mod job;
mod state;

pub use job::{InputRecord, JobProgress, OutputRecord, RunRecord, RunStatus, TerminalOutcome};
pub use state::{JobState, JobTracker, PollState, Transition};
