//! Production transport using reqwest.

use std::error::Error as StdError;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{Method, StatusCode, Url};

use super::{TransferError, TransferErrorCode, TransferInfo, TransferOutcome, Transport};
use crate::error::Result;
use crate::request::TransferHandle;

/// Production transport using reqwest.
///
/// The underlying client never follows redirects by itself. When a handle sets
/// `FollowRedirects(true)` the transport follows `Location` headers hop by hop, which lets it
/// record the redirect count and effective URL and trace every hop.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with a fresh client.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    ///
    /// The client should be built with `redirect::Policy::none()`; otherwise reqwest follows
    /// redirects itself and `FollowRedirects(false)` has no effect.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// State of a transfer that has not produced a final response yet.
struct Hop {
    url: Url,
    method: Method,
    body: Option<String>,
    redirects: u32,
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, handle), fields(url = %handle.url()))]
    async fn perform(&self, handle: &TransferHandle) -> TransferOutcome {
        let started = Instant::now();
        let options = handle.options();

        let url = match Url::parse(handle.url()) {
            Ok(url) => url,
            Err(e) => {
                return fail(
                    handle,
                    TransferError::new(
                        TransferErrorCode::MalformedUrl,
                        format!("URL rejected: {}", e),
                    ),
                );
            }
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return fail(
                handle,
                TransferError::new(
                    TransferErrorCode::UnsupportedProtocol,
                    format!("Protocol \"{}\" not supported", url.scheme()),
                ),
            );
        }
        let method = match Method::from_bytes(options.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                return fail(
                    handle,
                    TransferError::new(
                        TransferErrorCode::MalformedUrl,
                        format!("Invalid HTTP method '{}': {}", options.method, e),
                    ),
                );
            }
        };

        let mut hop = Hop {
            url,
            method,
            body: options.body.clone(),
            redirects: 0,
        };

        loop {
            handle.emit_trace(&format!("> {} {}", hop.method, hop.url));

            let mut request = self.client.request(hop.method.clone(), hop.url.clone());
            for (name, value) in &options.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(agent) = &options.user_agent {
                request = request.header(USER_AGENT, agent.as_str());
            }
            if let Some(timeout) = options.timeout {
                let remaining = timeout.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return fail_after(
                        handle,
                        &hop,
                        started,
                        TransferError::new(
                            TransferErrorCode::TimedOut,
                            format!(
                                "Operation timed out after {} milliseconds",
                                timeout.as_millis()
                            ),
                        ),
                    );
                }
                request = request.timeout(remaining);
            }
            if let Some(body) = &hop.body {
                request = request.body(body.clone());
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(url = %hop.url, error = %e, "Transfer failed");
                    return fail_after(handle, &hop, started, classify(&e));
                }
            };

            let status = response.status();
            let status_line = format!("{:?} {}", response.version(), status);
            handle.emit_header(&status_line);
            handle.emit_trace(&format!("< {}", status_line));
            for (name, value) in response.headers() {
                let line = format!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
                handle.emit_header(&line);
                handle.emit_trace(&format!("< {}", line));
            }

            if options.follow_redirects && status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);

                if let Some(location) = location {
                    if hop.redirects >= options.max_redirects {
                        return fail_after(
                            handle,
                            &hop,
                            started,
                            TransferError::new(
                                TransferErrorCode::TooManyRedirects,
                                format!(
                                    "Maximum ({}) redirects followed",
                                    options.max_redirects
                                ),
                            ),
                        );
                    }

                    match hop.url.join(&location) {
                        Ok(next) => {
                            tracing::trace!(from = %hop.url, to = %next, status = status.as_u16(), "Following redirect");
                            if status == StatusCode::SEE_OTHER
                                || (hop.method == Method::POST
                                    && (status == StatusCode::MOVED_PERMANENTLY
                                        || status == StatusCode::FOUND))
                            {
                                hop.method = Method::GET;
                                hop.body = None;
                            }
                            hop.url = next;
                            hop.redirects += 1;
                            continue;
                        }
                        Err(e) => {
                            return fail_after(
                                handle,
                                &hop,
                                started,
                                TransferError::new(
                                    TransferErrorCode::MalformedUrl,
                                    format!("Invalid redirect location '{}': {}", location, e),
                                ),
                            );
                        }
                    }
                }
            }

            let content_length = response.content_length();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    // No status on a failed transfer, even if the status line arrived
                    tracing::debug!(
                        url = %hop.url,
                        status = status.as_u16(),
                        error = %e,
                        "Reading body failed"
                    );
                    return fail_after(handle, &hop, started, classify(&e));
                }
            };

            tracing::debug!(
                status = status.as_u16(),
                redirects = hop.redirects,
                response_len = body.len(),
                "Transfer completed"
            );

            return TransferOutcome {
                info: TransferInfo {
                    status: Some(status.as_u16()),
                    effective_url: Some(hop.url.to_string()),
                    redirect_count: hop.redirects,
                    total_time_ms: elapsed_ms(started),
                    content_length,
                    content_type,
                },
                body: Some(body),
                error: None,
            };
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn fail(handle: &TransferHandle, error: TransferError) -> TransferOutcome {
    handle.emit_trace(&format!("* {}", error.message));
    TransferOutcome {
        info: TransferInfo::default(),
        body: None,
        error: Some(error),
    }
}

fn fail_after(
    handle: &TransferHandle,
    hop: &Hop,
    started: Instant,
    error: TransferError,
) -> TransferOutcome {
    let mut outcome = fail(handle, error);
    outcome.info.effective_url = Some(hop.url.to_string());
    outcome.info.redirect_count = hop.redirects;
    outcome.info.total_time_ms = elapsed_ms(started);
    outcome
}

/// Map a reqwest error onto a transfer error code, keeping the full source chain as message.
fn classify(error: &reqwest::Error) -> TransferError {
    let chain: Vec<String> =
        std::iter::successors(Some(error as &dyn StdError), |&e| e.source())
            .map(|e| e.to_string())
            .collect();
    let message = chain.join(": ");

    let code = if error.is_timeout() {
        TransferErrorCode::TimedOut
    } else if error.is_builder() {
        TransferErrorCode::MalformedUrl
    } else if error.is_redirect() {
        TransferErrorCode::TooManyRedirects
    } else if error.is_connect() {
        let lowered = message.to_lowercase();
        if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
            TransferErrorCode::CouldntResolveHost
        } else {
            TransferErrorCode::CouldntConnect
        }
    } else if error.is_request() {
        TransferErrorCode::SendError
    } else {
        TransferErrorCode::RecvError
    };

    TransferError::new(code, message)
}
