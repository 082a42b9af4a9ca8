//! Expired-token sweeper hook.
//!
//! Deleting expired token documents is owned by a background job outside
//! this crate. The service only decides *when* to submit it: at most once
//! per configured delete interval, and only while the security index is
//! available.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A submit-only handle to the expired-token removal job.
pub trait ExpiredTokenSweeper: Send + Sync {
    /// Asks the job to run, with an optional request timeout.
    ///
    /// Submissions may be dropped if a run is already in flight; the
    /// service does not observe completion.
    fn submit(&self, timeout: Option<Duration>);
}

/// A sweeper that does nothing. Default for deployments that schedule
/// deletion elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSweeper;

impl ExpiredTokenSweeper for NoopSweeper {
    fn submit(&self, _timeout: Option<Duration>) {}
}

/// Counts submissions. Test use.
#[derive(Debug, Default)]
pub struct CountingSweeper {
    submissions: AtomicUsize,
}

impl CountingSweeper {
    /// Creates a new counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of submissions observed so far.
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }
}

impl ExpiredTokenSweeper for CountingSweeper {
    fn submit(&self, _timeout: Option<Duration>) {
        self.submissions.fetch_add(1, Ordering::SeqCst);
    }
}
