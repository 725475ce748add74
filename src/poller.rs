//! Polling a submitted job until it reaches a terminal state.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::reality::JobStatusSource;
use crate::state_machine::{JobProgress, JobTracker, TerminalOutcome, Transition};

/// Time source and wait primitive used between polls.
#[allow(async_fn_in_trait)]
pub trait Clock {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Receives every non-success snapshot of a tracked job.
pub trait ProgressObserver {
    fn on_progress(&mut self, job_id: &str, progress: &JobProgress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(&str, &JobProgress),
{
    fn on_progress(&mut self, job_id: &str, progress: &JobProgress) {
        self(job_id, progress)
    }
}

/// Observer that only writes progress to the log.
#[derive(Debug, Default)]
pub struct LogObserver;

impl ProgressObserver for LogObserver {
    fn on_progress(&mut self, job_id: &str, progress: &JobProgress) {
        info!(
            job_id,
            state = %progress.state,
            percent = progress.percent,
            step = %progress.step,
            "job progress"
        );
    }
}

pub struct JobProgressPoller<C = TokioClock> {
    clock: C,
    interval: Duration,
    max_duration: Option<Duration>,
}

impl JobProgressPoller<TokioClock> {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, TokioClock)
    }
}

impl<C: Clock> JobProgressPoller<C> {
    pub fn with_clock(interval: Duration, clock: C) -> Self {
        Self {
            clock,
            interval,
            max_duration: None,
        }
    }

    /// Give up with [`JobError::TimedOut`] once this much time has passed.
    pub fn max_duration(mut self, limit: Option<Duration>) -> Self {
        self.max_duration = limit;
        self
    }

    /// Query `source` until the job ends.
    ///
    /// Exactly one query is issued per cycle and none after a terminal state.
    /// Running and failed snapshots go to `observer`; a cancelled job is a
    /// normal outcome, a failed one is an error.
    pub async fn track<S, O>(
        &self,
        job_id: &str,
        source: &S,
        observer: &mut O,
    ) -> Result<TerminalOutcome, JobError>
    where
        S: JobStatusSource,
        O: ProgressObserver + ?Sized,
    {
        let started = self.clock.now();
        let mut tracker = JobTracker::new(job_id);

        loop {
            let progress = source
                .job_progress(job_id)
                .await
                .map_err(|source| JobError::QueryFailed {
                    job_id: job_id.to_string(),
                    source,
                })?;
            debug!(job_id, state = %progress.state, percent = progress.percent, "polled job");

            match tracker.advance(progress)? {
                Transition::Wait(progress) => {
                    observer.on_progress(job_id, &progress);
                }
                Transition::Complete(outcome) => {
                    info!(job_id, polls = tracker.polls(), state = %tracker.state(), "job finished");
                    return Ok(outcome);
                }
                Transition::Fail(progress) => {
                    observer.on_progress(job_id, &progress);
                    warn!(job_id, percent = progress.percent, step = %progress.step, "job failed");
                    return Err(JobError::JobFailed {
                        job_id: job_id.to_string(),
                        percent: progress.percent,
                        step: progress.step,
                    });
                }
            }

            if let Some(limit) = self.max_duration {
                let elapsed = self.clock.now().saturating_duration_since(started);
                if elapsed >= limit {
                    return Err(JobError::TimedOut {
                        job_id: job_id.to_string(),
                        elapsed,
                        last: tracker.last().cloned(),
                    });
                }
            }

            self.clock.sleep(self.interval).await;
        }
    }
}
