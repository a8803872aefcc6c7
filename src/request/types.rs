//! The request type: one transfer description plus its latest outcome.

use metrics::counter;
use serde::Serialize;

use super::capture::CaptureSink;
use super::handle::{TransferHandle, TransferOption, TransferOptions};
use crate::error::{BarrageError, Result};
use crate::http::{InfoField, TransferError, TransferInfo, TransferOutcome, Transport};
use crate::policy::SuccessPolicy;

/// Snapshot of the latest transfer of a request.
///
/// Each execution overwrites the whole snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Post-transfer metadata (status code, effective URL, timings)
    pub info: TransferInfo,
    /// Response body, only kept when the `ReturnBody` option is set
    pub content: Option<String>,
    /// Transport-level failure of the latest transfer
    pub error: Option<TransferError>,
}

/// What [`Request::execute`] hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// The transfer completed and the body was captured (`ReturnBody(true)`)
    Body(String),
    /// The transfer completed; the body was not captured
    Completed,
    /// The transfer failed at transport level; see [`Request::error_message`]
    Failed,
}

/// A single HTTP request and the outcome of its latest execution.
///
/// A request owns its transport handle and capture sinks, which are released when the request is
/// dropped. HTTP error statuses and transport failures are never returned as errors: they are
/// recorded on the request and classified by its [`SuccessPolicy`].
///
/// # Example
/// ```ignore
/// let mut request = Request::new("https://example.com", transport);
/// request.configure(TransferOption::ReturnBody(true));
/// if let Output::Body(body) = request.execute().await {
///     println!("{} bytes", body.len());
/// }
/// ```
pub struct Request<T: Transport> {
    transport: T,
    handle: TransferHandle,
    response: Response,
    retry_count: u32,
    success_codes: SuccessPolicy,
}

impl<T: Transport> Request<T> {
    /// Create a request for `url` performed through `transport`.
    pub fn new(url: impl Into<String>, transport: T) -> Self {
        Self {
            transport,
            handle: TransferHandle::new(url),
            response: Response::default(),
            retry_count: 0,
            success_codes: SuccessPolicy::default(),
        }
    }

    /// The URL passed to [`Request::new`], regardless of any redirects followed since.
    pub fn url(&self) -> &str {
        self.handle.url()
    }

    /// Apply one transfer option, returning whether the transport accepted it.
    pub fn configure(&mut self, option: TransferOption) -> bool {
        let name = option.name();
        let accepted = self.transport.configure(&mut self.handle, option);
        if !accepted {
            tracing::debug!(url = %self.url(), option = name, "Transfer option rejected");
        }
        accepted
    }

    /// Apply options in order, stopping at the first one the transport rejects.
    ///
    /// Returns `true` only if every option was accepted. Options after a rejected one are left
    /// unapplied.
    pub fn configure_all<I>(&mut self, options: I) -> bool
    where
        I: IntoIterator<Item = TransferOption>,
    {
        options.into_iter().all(|option| self.configure(option))
    }

    pub fn options(&self) -> &TransferOptions {
        self.handle.options()
    }

    /// Perform the transfer now and record the outcome.
    pub async fn execute(&mut self) -> Output {
        let outcome = self.transport.perform(&self.handle).await;
        let content = self.record(outcome);
        self.response.content = content;

        match (&self.response.error, &self.response.content) {
            (Some(_), _) => Output::Failed,
            (None, Some(body)) => Output::Body(body.clone()),
            (None, None) => Output::Completed,
        }
    }

    /// Store the metadata of a finished transfer and return the body to keep, if any.
    ///
    /// The returned body is not stored: single executions store it at once, the batch executor
    /// stores it once all retry rounds of a chunk are over.
    pub(crate) fn record(&mut self, outcome: TransferOutcome) -> Option<String> {
        let TransferOutcome { info, body, error } = outcome;

        let label = match (&error, info.status) {
            (Some(_), _) => "transport_failure",
            (None, status) if self.success_codes.accepts_status(status) => "success",
            (None, _) => "http_failure",
        };
        counter!("barrage_transfers_total", "outcome" => label).increment(1);

        if let Some(error) = &error {
            tracing::debug!(
                url = %self.url(),
                code = error.code.as_u32(),
                error = %error.message,
                "Transfer failed at transport level"
            );
        }

        let keep_body = error.is_none() && self.handle.options().return_body;
        self.response.info = info;
        self.response.error = error;
        if keep_body { body } else { None }
    }

    pub(crate) fn set_content(&mut self, content: Option<String>) {
        self.response.content = content;
    }

    /// Whether the latest status code is in the success set.
    pub fn is_successful(&self) -> bool {
        self.success_codes.accepts_status(self.response.info.status)
    }

    /// Execute again if the latest transfer was not successful.
    ///
    /// Returns `false` without doing anything if the request already succeeded. Otherwise the
    /// request is executed, the retry counter is incremented and `true` is returned, whatever the
    /// outcome of the new attempt.
    pub async fn retry_if_failed(&mut self) -> bool {
        if self.is_successful() {
            return false;
        }

        self.execute().await;
        self.increment_retry_count();
        true
    }

    pub(crate) fn increment_retry_count(&mut self) {
        self.retry_count += 1;
        counter!("barrage_retries_total").increment(1);
    }

    /// Number of retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Capture response header lines into a scratch sink.
    ///
    /// Calling this again replaces the sink, discarding anything captured so far.
    pub fn enable_header_capture(&mut self) -> Result<()> {
        self.handle.set_header_sink(CaptureSink::new()?);
        Ok(())
    }

    /// Capture the protocol trace into a scratch sink and turn on the `Verbose` option.
    ///
    /// Calling this again replaces the sink, discarding anything captured so far.
    ///
    /// # Errors
    /// Returns [`BarrageError::OptionRejected`] if the transport refuses `Verbose`, in which case
    /// no sink is installed.
    pub fn enable_verbose_capture(&mut self) -> Result<()> {
        let option = TransferOption::Verbose(true);
        let name = option.name();
        if !self.configure(option) {
            return Err(BarrageError::OptionRejected(name));
        }
        self.handle.set_verbose_sink(CaptureSink::new()?);
        Ok(())
    }

    /// Captured header lines, or `None` if header capture was never enabled.
    pub fn header_lines(&self) -> Result<Option<Vec<String>>> {
        self.handle
            .header_sink()
            .map(CaptureSink::read_lines)
            .transpose()
    }

    /// Captured verbose lines, or `None` if verbose capture was never enabled.
    pub fn verbose_lines(&self) -> Result<Option<Vec<String>>> {
        self.handle
            .verbose_sink()
            .map(CaptureSink::read_lines)
            .transpose()
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Status code of the latest transfer, `None` if no response was received.
    pub fn status(&self) -> Option<u16> {
        self.response.info.status
    }

    /// Body of the latest transfer, if captured.
    pub fn content(&self) -> Option<&str> {
        self.response.content.as_deref()
    }

    /// Transport error code of the latest transfer, 0 if there was none.
    pub fn error_code(&self) -> u32 {
        self.response
            .error
            .as_ref()
            .map_or(0, |error| error.code.as_u32())
    }

    /// Transport error message of the latest transfer, empty if there was none.
    pub fn error_message(&self) -> &str {
        self.response
            .error
            .as_ref()
            .map_or("", |error| error.message.as_str())
    }

    pub fn error(&self) -> Option<&TransferError> {
        self.response.error.as_ref()
    }

    /// All metadata of the latest transfer.
    pub fn info(&self) -> &TransferInfo {
        &self.response.info
    }

    /// One metadata field of the latest transfer.
    pub fn info_field(&self, field: InfoField) -> serde_json::Value {
        self.response.info.field(field)
    }

    pub fn success_codes(&self) -> &SuccessPolicy {
        &self.success_codes
    }

    pub fn set_success_codes(&mut self, success_codes: SuccessPolicy) {
        self.success_codes = success_codes;
    }

    pub fn handle(&self) -> &TransferHandle {
        &self.handle
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url())
            .field("status", &self.status())
            .field("error", &self.response.error)
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}
