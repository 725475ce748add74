//! Byte-level progress of uploads and downloads.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Callback fed with the overall percentage (0 to 100) of a transfer.
///
/// Returning `false` stops the transfer; it then fails with
/// [`ApiError::TransferStopped`](super::ApiError::TransferStopped).
#[derive(Clone)]
pub struct ProgressHook(Arc<dyn Fn(f32) -> bool + Send + Sync>);

impl ProgressHook {
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(f32) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    fn call(&self, percent: f32) -> bool {
        (self.0)(percent)
    }
}

impl fmt::Debug for ProgressHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressHook")
    }
}

/// Shared by every file task of a single upload or download.
#[derive(Debug)]
pub(crate) struct TransferTracker {
    total: u64,
    done: Mutex<u64>,
    stopped: AtomicBool,
    hook: Option<ProgressHook>,
}

impl TransferTracker {
    pub(crate) fn new(total: u64, hook: Option<ProgressHook>) -> Self {
        Self {
            total,
            done: Mutex::new(0),
            stopped: AtomicBool::new(false),
            hook,
        }
    }

    /// Counts `bytes` as transferred and reports the new percentage.
    ///
    /// Returns `false` once the hook has asked to stop.
    pub(crate) fn advance(&self, bytes: u64) -> bool {
        if self.is_stopped() {
            return false;
        }
        let Some(hook) = &self.hook else {
            return true;
        };

        // Held across the call so the hook sees percentages in order.
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done += bytes;
        let percent = if self.total == 0 {
            100.0
        } else {
            (*done as f64 / self.total as f64 * 100.0).min(100.0) as f32
        };
        if !hook.call(percent) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        !self.is_stopped()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
