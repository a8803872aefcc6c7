//! Mock transport for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{TransferErrorCode, TransferOutcome, Transport};
use crate::request::{TransferHandle, TransferOption};

/// Mock transport for testing.
///
/// Allows configuring predetermined outcomes per URL without making network calls. URLs with
/// nothing configured fail the way an unknown host does, with
/// [`TransferErrorCode::CouldntResolveHost`].
///
/// # Example
/// ```ignore
/// let mock = MockTransport::new();
/// mock.add_response("http://api.test/flaky", TransferOutcome::response(503, "busy"));
/// mock.set_default("http://api.test/flaky", TransferOutcome::response(200, "ok"));
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    defaults: Arc<Mutex<HashMap<String, MockResponse>>>,
    rejected_options: Arc<Mutex<HashSet<&'static str>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    events: Arc<Mutex<Vec<MockEvent>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct MockResponse {
    outcome: TransferOutcome,
    delay: Duration,
}

/// Record of a call made to the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

/// Start and end of each transfer, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Started(String),
    Finished(String),
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for a URL.
    ///
    /// Multiple outcomes can be queued for the same URL - they are returned in FIFO order.
    pub fn add_response(&self, url: &str, outcome: TransferOutcome) {
        self.add_delayed_response(url, outcome, Duration::ZERO);
    }

    /// Queue an outcome that completes only after `delay` has elapsed.
    pub fn add_delayed_response(&self, url: &str, outcome: TransferOutcome, delay: Duration) {
        self.responses
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(MockResponse { outcome, delay });
    }

    /// Outcome returned for a URL whenever its queue is empty.
    pub fn set_default(&self, url: &str, outcome: TransferOutcome) {
        self.set_delayed_default(url, outcome, Duration::ZERO);
    }

    /// Like [`set_default`](Self::set_default), completing after `delay`.
    pub fn set_delayed_default(&self, url: &str, outcome: TransferOutcome, delay: Duration) {
        self.defaults
            .lock()
            .insert(url.to_string(), MockResponse { outcome, delay });
    }

    /// Make `configure` reject every option with this name (see [`TransferOption::name`]).
    pub fn reject_option(&self, name: &'static str) {
        self.rejected_options.lock().insert(name);
    }

    /// Get all calls that have been made to this mock transport.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Get the start/finish log of every transfer.
    pub fn get_events(&self) -> Vec<MockEvent> {
        self.events.lock().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Get the number of calls made for one URL.
    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.url == url).count()
    }

    /// Clear recorded calls, events and the peak in-flight counter.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
        self.events.lock().clear();
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }

    /// Get the number of transfers currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Get the highest number of transfers that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> Option<MockResponse> {
        let queued = self
            .responses
            .lock()
            .get_mut(url)
            .and_then(|queue| queue.pop_front());
        queued.or_else(|| self.defaults.lock().get(url).cloned())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn configure(&self, handle: &mut TransferHandle, option: TransferOption) -> bool {
        if self.rejected_options.lock().contains(option.name()) {
            return false;
        }
        handle.options_mut().set(option)
    }

    async fn perform(&self, handle: &TransferHandle) -> TransferOutcome {
        let url = handle.url().to_string();
        let options = handle.options();

        // Increment in-flight counter
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        // Guard to ensure we decrement even if the session drops this transfer
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            url: url.clone(),
            method: options.method.clone(),
            body: options.body.clone(),
            headers: options.headers.clone(),
        });
        self.events.lock().push(MockEvent::Started(url.clone()));

        handle.emit_trace(&format!("> {} {}", options.method, url));

        let mut outcome = match self.next_response(&url) {
            Some(response) => {
                if !response.delay.is_zero() {
                    tokio::time::sleep(response.delay).await;
                }
                response.outcome
            }
            None => {
                let host = url
                    .split("://")
                    .nth(1)
                    .and_then(|rest| rest.split(['/', ':', '?']).next())
                    .unwrap_or(&url);
                TransferOutcome::failure(
                    TransferErrorCode::CouldntResolveHost,
                    format!("Could not resolve host: {}", host),
                )
            }
        };

        match (&outcome.error, outcome.info.status) {
            (Some(error), _) => handle.emit_trace(&format!("* {}", error.message)),
            (None, Some(status)) => {
                let status_line = format!("HTTP/1.1 {}", status);
                handle.emit_header(&status_line);
                handle.emit_trace(&format!("< {}", status_line));
                if let Some(length) = outcome.info.content_length {
                    handle.emit_header(&format!("content-length: {}", length));
                }
            }
            (None, None) => {}
        }

        if outcome.info.effective_url.is_none() {
            outcome.info.effective_url = Some(url.clone());
        }

        self.events.lock().push(MockEvent::Finished(url));
        outcome
    }
}

/// Guard that decrements the in-flight counter when dropped.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
