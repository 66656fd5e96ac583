//! Timeout and polling configuration.
//!
//! Every wait in the engine is bounded: each request has a deadline, and
//! readiness polling gives up after a fixed number of attempts.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Default deadline for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default interval between readiness probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default number of readiness probes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
/// Default pause between a response and reading the query log.
pub const DEFAULT_LOG_SETTLE: Duration = Duration::from_millis(100);

/// Timeouts applied by the client and the fuzz loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Deadline for one request, including the response body
    pub request_timeout: Duration,
    /// Interval between readiness probes
    pub poll_interval: Duration,
    /// Readiness probes before giving up
    pub max_attempts: u32,
    /// Pause after a response so the database can flush its log
    pub log_settle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            log_settle: DEFAULT_LOG_SETTLE,
        }
    }
}

impl TimeoutConfig {
    /// Longest readiness polling can take.
    pub fn readiness_budget(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_attempts)
    }
}

/// Outcome of [`bounded`].
#[derive(Debug, PartialEq, Eq)]
pub enum Bounded<T> {
    /// The future completed
    Done(T),
    /// The deadline passed first
    TimedOut,
    /// The token was cancelled first
    Cancelled,
}

/// Run `fut` until it completes, `limit` elapses, or `cancel` fires.
pub async fn bounded<F: Future>(
    fut: F,
    limit: Duration,
    cancel: &CancellationToken,
) -> Bounded<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Bounded::Cancelled,
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(v) => Bounded::Done(v),
            Err(_) => Bounded::TimedOut,
        },
    }
}
