//! Batch execution with chunked concurrency and bounded retry rounds.
//!
//! The executor processes a registry chunk by chunk. Each chunk is driven through one
//! [`Session`], then failed members are retried in rounds, each round driving only the failing
//! subset through a fresh transient session:
//!
//! ```text
//! registry ──partition──> [chunk 0] [chunk 1] ... [chunk n]      (strictly sequential)
//!
//! chunk:  drive(all) ──> round 1: all ok? ──yes──> store bodies
//!                                  │no
//!                                  sleep(retry_delay)
//!                                  retry_failed(chunk) ──> round 2 ... round max_retries
//! ```
//!
//! Every failure is retried the same way: an HTTP status outside the success set and a
//! transport-level failure are both just "not successful".

use std::ops::Range;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::registry::BatchRegistry;
use super::session::Session;
use crate::http::Transport;
use crate::request::Request;

/// Configuration for batch execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of requests in flight at once. `None` or 0 runs everything in one chunk.
    pub max_concurrency: Option<usize>,

    /// Number of retry rounds after the first pass. 0 disables retries.
    pub max_retries: u32,

    /// How long to sleep before each retry round in milliseconds
    pub retry_delay_ms: u64,

    /// Longest a session waits for transfer activity before advancing again in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            max_retries: 0,
            retry_delay_ms: 0,
            poll_interval_ms: 1000,
        }
    }
}

/// Summary of one [`BatchExecutor::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Number of chunks driven
    pub chunks: usize,
    /// Number of requests in the registry
    pub requests: usize,
    /// Requests successful at the end of the run
    pub succeeded: usize,
    /// Requests still unsuccessful at the end of the run
    pub failed: usize,
    /// Retry attempts made across all requests
    pub retries: u64,
}

/// Split `len` requests into consecutive chunks of at most `max_concurrency`.
///
/// `None` or 0 yields a single chunk covering everything. No chunks are produced for an empty
/// registry.
pub fn chunk_ranges(len: usize, max_concurrency: Option<usize>) -> Vec<Range<usize>> {
    let size = match max_concurrency {
        Some(size) if size > 0 => size,
        _ => len,
    };
    if len == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Executes the requests of a [`BatchRegistry`].
///
/// Runs never fail as a whole: individual failures are recorded on each request and summarised
/// in the returned [`BatchReport`].
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    config: BatchConfig,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.retry_delay_ms)
    }

    /// Execute every request in the registry, chunk by chunk, with retries.
    #[tracing::instrument(skip(self, registry), fields(
        requests = registry.len(),
        max_concurrency = ?self.config.max_concurrency,
        max_retries = self.config.max_retries,
    ))]
    pub async fn run<T: Transport>(&self, registry: &mut BatchRegistry<T>) -> BatchReport {
        let mut requests: Vec<&mut Request<T>> = registry.requests_mut().collect();
        let ranges = chunk_ranges(requests.len(), self.config.max_concurrency);

        tracing::info!(chunks = ranges.len(), "Starting batch");

        let mut report = BatchReport {
            requests: requests.len(),
            ..Default::default()
        };

        for (index, range) in ranges.into_iter().enumerate() {
            tracing::debug!(chunk = index, start = range.start, size = range.len(), "Running chunk");
            report.retries += self.run_chunk(&mut requests[range]).await;
            report.chunks += 1;
        }

        report.succeeded = requests.iter().filter(|r| r.is_successful()).count();
        report.failed = report.requests - report.succeeded;

        tracing::info!(
            chunks = report.chunks,
            succeeded = report.succeeded,
            failed = report.failed,
            retries = report.retries,
            "Batch completed"
        );

        report
    }

    /// Drive one chunk to completion, then run its retry rounds.
    ///
    /// Returns the number of retry attempts made.
    pub async fn run_chunk<T: Transport>(&self, chunk: &mut [&mut Request<T>]) -> u64 {
        let all: Vec<usize> = (0..chunk.len()).collect();
        let mut buffered: Vec<Option<String>> = vec![None; chunk.len()];

        for (slot, content) in self.drive(chunk, &all).await {
            buffered[slot] = content;
        }

        let mut retries = 0;
        for round in 1..=self.config.max_retries {
            let failing = chunk.iter().filter(|r| !r.is_successful()).count();
            if failing == 0 {
                tracing::debug!(round, "All requests in chunk succeeded, no retry needed");
                break;
            }

            tracing::info!(
                round,
                failing,
                delay_ms = self.config.retry_delay_ms,
                "Retrying failed requests"
            );
            let delay = self.retry_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let (enrolled, contents) = self.retry_failed_slots(chunk).await;
            for (slot, content) in contents {
                buffered[slot] = content;
            }
            retries += enrolled as u64;
        }

        // Bodies are stored only once every round of the chunk is over
        for (request, content) in chunk.iter_mut().zip(buffered) {
            request.set_content(content);
        }

        retries
    }

    /// Retry every unsuccessful request once, concurrently.
    ///
    /// Successful requests are skipped. Each failing request has its retry counter incremented
    /// and is driven through one transient session together with the others.
    ///
    /// Returns the number of requests that were retried, not the number that succeeded: check
    /// [`Request::is_successful`] on each request for that.
    pub async fn retry_failed<'r, T, I>(&self, requests: I) -> usize
    where
        T: Transport + 'r,
        I: IntoIterator<Item = &'r mut Request<T>>,
    {
        let mut requests: Vec<&mut Request<T>> = requests.into_iter().collect();
        let (enrolled, contents) = self.retry_failed_slots(&mut requests).await;
        for (slot, content) in contents {
            requests[slot].set_content(content);
        }
        enrolled
    }

    async fn retry_failed_slots<T: Transport>(
        &self,
        requests: &mut [&mut Request<T>],
    ) -> (usize, Vec<(usize, Option<String>)>) {
        let mut slots = Vec::new();
        for (slot, request) in requests.iter_mut().enumerate() {
            if request.is_successful() {
                continue;
            }
            request.increment_retry_count();
            tracing::debug!(
                url = %request.url(),
                retry_count = request.retry_count(),
                status = ?request.status(),
                error = %request.error_message(),
                "Retrying request"
            );
            slots.push(slot);
        }

        if slots.is_empty() {
            return (0, Vec::new());
        }

        let contents = self.drive(requests, &slots).await;
        (slots.len(), contents)
    }

    /// Drive the requests at `slots` through a fresh session and record their outcomes.
    ///
    /// Returns the body each request should keep, by slot.
    async fn drive<T: Transport>(
        &self,
        requests: &mut [&mut Request<T>],
        slots: &[usize],
    ) -> Vec<(usize, Option<String>)> {
        let outcomes = {
            let mut session = Session::new(self.poll_interval());
            for &slot in slots {
                session.attach(slot, &*requests[slot]);
            }
            session.perform().await;
            session.close()
        };

        outcomes
            .into_iter()
            .map(|(slot, outcome)| (slot, requests[slot].record(outcome)))
            .collect()
    }
}
