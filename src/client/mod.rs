//! HTTP transport to the target application.
//!
//! [`FuzzClient`] wraps a cookie-jar `reqwest` client so session cookies set
//! by a replayed login carry over to every fuzzed request. Each send is
//! bounded by the request timeout and races the run's cancellation token.

pub mod rate_limiter;

use std::collections::BTreeMap;

use bytes::Bytes;
use dashmap::DashMap;
use http::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ClientError;
use crate::har::Har;
use crate::metrics::Metrics;
use crate::request::HttpRequest;
use crate::timeout::{Bounded, TimeoutConfig, bounded};

pub use rate_limiter::RateLimiter;

/// A received response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Client bound to one target base URL.
#[derive(Debug)]
pub struct FuzzClient {
    http: reqwest::Client,
    base: Url,
    timeouts: TimeoutConfig,
    limiter: Option<RateLimiter>,
    statuses: DashMap<u16, u64>,
    metrics: Metrics,
}

impl FuzzClient {
    pub fn new(base: Url, timeouts: TimeoutConfig, metrics: Metrics) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self {
            http,
            base,
            timeouts,
            limiter: None,
            statuses: DashMap::new(),
            metrics,
        })
    }

    /// Throttle sends to `per_second` requests per second.
    pub fn with_rate_limit(mut self, per_second: f64) -> Self {
        self.limiter = Some(RateLimiter::new(per_second));
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Send a request against the base URL and read the whole response.
    pub async fn send(
        &self,
        req: &HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<Response, ClientError> {
        if let Some(limiter) = &self.limiter {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = limiter.acquire() => {}
            }
        }

        let url = req.url(&self.base);
        let mut builder = self
            .http
            .request(req.method.clone(), url.clone())
            .headers(req.headers.clone());
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let resp = builder.send().await?;
            let status = resp.status();
            let body = resp.bytes().await?;
            Ok::<_, reqwest::Error>(Response { status, body })
        };

        let response = match bounded(exchange, self.timeouts.request_timeout, cancel).await {
            Bounded::Done(Ok(response)) => response,
            Bounded::Done(Err(source)) => {
                return Err(ClientError::Send {
                    method: req.method.to_string(),
                    url: url.to_string(),
                    source,
                });
            }
            Bounded::TimedOut => {
                return Err(ClientError::Timeout {
                    method: req.method.to_string(),
                    url: url.to_string(),
                    timeout: self.timeouts.request_timeout,
                });
            }
            Bounded::Cancelled => return Err(ClientError::Cancelled),
        };

        let code = response.status.as_u16();
        *self.statuses.entry(code).or_insert(0) += 1;
        self.metrics.observe_status(code);
        debug!(method = %req.method, url = %url, status = code, "Response");
        Ok(response)
    }

    /// Replay every request of a recording in order, e.g. to log in.
    ///
    /// Entries that cannot be converted are skipped; a send failure aborts.
    pub async fn replay(&self, har: &Har, cancel: &CancellationToken) -> Result<usize, ClientError> {
        let mut sent = 0;
        for item in har.requests() {
            let captured = match item {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Skipping unreplayable entry");
                    continue;
                }
            };
            let req = HttpRequest::from(&captured);
            let resp = self.send(&req, cancel).await?;
            debug!(index = captured.index, status = resp.status.as_u16(), "Replayed");
            sent += 1;
        }
        info!(sent, "Session replay complete");
        Ok(sent)
    }

    /// Poll `path` until the target answers with a status below 500.
    ///
    /// Returns the number of attempts it took.
    pub async fn wait_ready(&self, path: &str, cancel: &CancellationToken) -> Result<u32, ClientError> {
        let probe = HttpRequest::new(Method::GET, path);
        let url = probe.url(&self.base);

        for attempt in 1..=self.timeouts.max_attempts {
            match self.send(&probe, cancel).await {
                Ok(resp) if !resp.status.is_server_error() => {
                    info!(url = %url, attempt, "Target is ready");
                    return Ok(attempt);
                }
                Ok(resp) => debug!(attempt, status = resp.status.as_u16(), "Target not ready"),
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(e) => debug!(attempt, error = %e, "Target not ready"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.timeouts.poll_interval) => {}
            }
        }

        Err(ClientError::NotReady {
            url: url.to_string(),
            attempts: self.timeouts.max_attempts,
        })
    }

    /// Responses received so far, by status code.
    pub fn status_counts(&self) -> BTreeMap<u16, u64> {
        self.statuses.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    pub fn total_requests(&self) -> u64 {
        self.statuses.iter().map(|e| *e.value()).sum()
    }

    /// Fraction of responses with a 2xx status.
    pub fn success_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        let ok: u64 = self
            .statuses
            .iter()
            .filter(|e| (200..300).contains(e.key()))
            .map(|e| *e.value())
            .sum();
        ok as f64 / total as f64
    }
}
