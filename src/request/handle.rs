//! Transfer descriptors: the URL, options and capture sinks of one request.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};

use super::capture::CaptureSink;

/// Default upper bound on redirects followed when `FollowRedirects(true)` is set.
pub const DEFAULT_MAX_REDIRECTS: u32 = 30;

/// A single transfer option.
///
/// Options are validated when applied; see [`TransferOptions::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOption {
    /// Keep the response body on the request after the transfer
    ReturnBody(bool),
    /// HTTP method (e.g., "GET", "POST")
    Method(String),
    /// Extra request header, appended to any already set
    Header(String, String),
    /// Request body
    Body(String),
    /// Value of the User-Agent header
    UserAgent(String),
    /// Whole-transfer timeout. `Duration::ZERO` removes the timeout.
    Timeout(Duration),
    /// Follow `Location` headers on 3xx responses
    FollowRedirects(bool),
    /// Maximum number of redirects to follow
    MaxRedirects(u32),
    /// Emit a protocol trace for each transfer
    Verbose(bool),
}

impl TransferOption {
    /// Stable name of the option, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TransferOption::ReturnBody(_) => "return_body",
            TransferOption::Method(_) => "method",
            TransferOption::Header(_, _) => "header",
            TransferOption::Body(_) => "body",
            TransferOption::UserAgent(_) => "user_agent",
            TransferOption::Timeout(_) => "timeout",
            TransferOption::FollowRedirects(_) => "follow_redirects",
            TransferOption::MaxRedirects(_) => "max_redirects",
            TransferOption::Verbose(_) => "verbose",
        }
    }
}

/// The accumulated options of a transfer handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub return_body: bool,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub user_agent: Option<String>,
    pub timeout: Option<Duration>,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verbose: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            return_body: false,
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            user_agent: None,
            timeout: None,
            follow_redirects: false,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            verbose: false,
        }
    }
}

impl TransferOptions {
    /// Apply one option, returning whether it was accepted.
    ///
    /// A rejected option leaves the options unchanged. Methods, header names and header values
    /// must be valid HTTP tokens.
    pub fn set(&mut self, option: TransferOption) -> bool {
        match option {
            TransferOption::ReturnBody(enabled) => self.return_body = enabled,
            TransferOption::Method(method) => {
                if method.is_empty() || reqwest::Method::from_bytes(method.as_bytes()).is_err() {
                    return false;
                }
                self.method = method;
            }
            TransferOption::Header(name, value) => {
                if HeaderName::from_bytes(name.as_bytes()).is_err()
                    || HeaderValue::from_str(&value).is_err()
                {
                    return false;
                }
                self.headers.push((name, value));
            }
            TransferOption::Body(body) => self.body = Some(body),
            TransferOption::UserAgent(agent) => {
                if HeaderValue::from_str(&agent).is_err() {
                    return false;
                }
                self.user_agent = Some(agent);
            }
            TransferOption::Timeout(timeout) => {
                self.timeout = (!timeout.is_zero()).then_some(timeout);
            }
            TransferOption::FollowRedirects(enabled) => self.follow_redirects = enabled,
            TransferOption::MaxRedirects(max) => self.max_redirects = max,
            TransferOption::Verbose(enabled) => self.verbose = enabled,
        }
        true
    }
}

/// A transfer descriptor bound to a URL.
///
/// Each [`Request`](crate::Request) owns exactly one handle. Sessions borrow it while the transfer
/// is in flight; the sinks are released when the handle is dropped.
#[derive(Debug)]
pub struct TransferHandle {
    url: String,
    options: TransferOptions,
    header_sink: Option<CaptureSink>,
    verbose_sink: Option<CaptureSink>,
}

impl TransferHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: TransferOptions::default(),
            header_sink: None,
            verbose_sink: None,
        }
    }

    /// The URL the handle was created with.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut TransferOptions {
        &mut self.options
    }

    pub fn header_sink(&self) -> Option<&CaptureSink> {
        self.header_sink.as_ref()
    }

    pub fn verbose_sink(&self) -> Option<&CaptureSink> {
        self.verbose_sink.as_ref()
    }

    pub(crate) fn set_header_sink(&mut self, sink: CaptureSink) {
        self.header_sink = Some(sink);
    }

    pub(crate) fn set_verbose_sink(&mut self, sink: CaptureSink) {
        self.verbose_sink = Some(sink);
    }

    /// Record a response header line. Dropped unless header capture is enabled.
    pub fn emit_header(&self, line: &str) {
        if let Some(sink) = &self.header_sink
            && let Err(e) = sink.write_line(line)
        {
            tracing::warn!(url = %self.url, error = %e, "Failed to write header capture");
        }
    }

    /// Record a protocol trace line. Dropped unless the `Verbose` option is set.
    ///
    /// Without a verbose sink the line goes to the `barrage::verbose` tracing target instead.
    pub fn emit_trace(&self, line: &str) {
        if !self.options.verbose {
            return;
        }
        match &self.verbose_sink {
            Some(sink) => {
                if let Err(e) = sink.write_line(line) {
                    tracing::warn!(url = %self.url, error = %e, "Failed to write verbose capture");
                }
            }
            None => tracing::debug!(target: "barrage::verbose", url = %self.url, "{}", line),
        }
    }
}
