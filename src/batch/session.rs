//! Multiplexed transfer sessions.
//!
//! A [`Session`] drives many transfers cooperatively on the calling task. Transfers are attached
//! by borrowing a request, then repeatedly advanced until none are left running:
//!
//! ```text
//! attach(slot, &request) ...
//! loop {
//!     advance()            -- collect every transfer that already finished
//!     if running == 0 break
//!     wait_for_activity()  -- park until one finishes or the poll interval elapses
//! }
//! close()                  -- outcomes by slot, borrows released
//! ```
//!
//! No task is spawned: every transfer future lives inside the session and is only polled while
//! the owner is inside `advance` or `wait_for_activity`.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};

use crate::http::{TransferOutcome, Transport};
use crate::request::Request;

/// Shortest wait between two advances, so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A set of in-flight transfers driven together on one task.
///
/// The session borrows every attached request for its whole lifetime, so requests cannot be
/// mutated until it is closed or dropped.
pub struct Session<'a> {
    in_flight: FuturesUnordered<BoxFuture<'a, (usize, TransferOutcome)>>,
    finished: HashMap<usize, TransferOutcome>,
    poll_interval: Duration,
}

impl<'a> Session<'a> {
    /// Create an empty session that waits at most `poll_interval` between advances.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            in_flight: FuturesUnordered::new(),
            finished: HashMap::new(),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// Attach a request's transfer under `slot`.
    ///
    /// The transfer does not start until the session is advanced. Attaching the same slot twice
    /// keeps only the outcome of whichever transfer finishes last.
    pub fn attach<T: Transport + 'a>(&mut self, slot: usize, request: &'a Request<T>) {
        let transfer = async move {
            let outcome = request.transport().perform(request.handle()).await;
            (slot, outcome)
        };
        self.in_flight.push(transfer.boxed());
    }

    /// Number of transfers still running.
    pub fn running(&self) -> usize {
        self.in_flight.len()
    }

    /// Poll every transfer once without blocking, collecting the finished ones.
    ///
    /// Returns the number of transfers still running.
    pub fn advance(&mut self) -> usize {
        while let Some(Some((slot, outcome))) = self.in_flight.next().now_or_never() {
            self.finished.insert(slot, outcome);
        }
        self.in_flight.len()
    }

    /// Block until at least one transfer finishes or `timeout` elapses.
    ///
    /// Returns whether a transfer finished.
    pub async fn wait_for_activity(&mut self, timeout: Duration) -> bool {
        if self.in_flight.is_empty() {
            return false;
        }

        match tokio::time::timeout(timeout, self.in_flight.next()).await {
            Ok(Some((slot, outcome))) => {
                self.finished.insert(slot, outcome);
                true
            }
            Ok(None) | Err(_) => false,
        }
    }

    /// Drive every attached transfer to completion.
    pub async fn perform(&mut self) {
        loop {
            let running = self.advance();
            if running == 0 {
                break;
            }
            tracing::trace!(running, finished = self.finished.len(), "Waiting for transfer activity");
            self.wait_for_activity(self.poll_interval).await;
        }
    }

    /// Body buffered for a finished transfer.
    pub fn buffered_content(&self, slot: usize) -> Option<&str> {
        self.finished
            .get(&slot)
            .and_then(|outcome| outcome.body.as_deref())
    }

    /// Take the outcome of a finished transfer out of the session.
    pub fn detach(&mut self, slot: usize) -> Option<TransferOutcome> {
        self.finished.remove(&slot)
    }

    /// Tear the session down, returning every outcome not yet detached.
    ///
    /// Transfers still running are dropped, which cancels them.
    pub fn close(self) -> HashMap<usize, TransferOutcome> {
        if !self.in_flight.is_empty() {
            tracing::warn!(
                running = self.in_flight.len(),
                "Closing session with transfers still running"
            );
        }
        self.finished
    }
}
