//! Transport abstraction for performing transfers.
//!
//! This module defines the `Transport` trait that the batch engine drives, enabling testability
//! with [`MockTransport`] and production use with [`ReqwestTransport`].
//!
//! A transport never returns `Err` for a failed transfer. DNS failures, refused connections and
//! timeouts are reported inside the [`TransferOutcome`] as a [`TransferError`], and HTTP error
//! statuses are ordinary outcomes classified later by a [`SuccessPolicy`](crate::SuccessPolicy).

mod client;
mod mock;

pub use client::ReqwestTransport;
pub use mock::{MockCall, MockEvent, MockTransport};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::request::{TransferHandle, TransferOption};

/// Numeric classification of a transport-level failure.
///
/// The numeric values follow libcurl's error codes so they are recognisable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorCode {
    /// The URL scheme is not supported
    UnsupportedProtocol,
    /// The URL could not be parsed
    MalformedUrl,
    /// Name resolution failed
    CouldntResolveHost,
    /// The connection could not be established
    CouldntConnect,
    /// The transfer exceeded its timeout
    TimedOut,
    /// More redirects than allowed by `MaxRedirects`
    TooManyRedirects,
    /// Sending the request failed
    SendError,
    /// Receiving the response failed
    RecvError,
}

impl TransferErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            TransferErrorCode::UnsupportedProtocol => 1,
            TransferErrorCode::MalformedUrl => 3,
            TransferErrorCode::CouldntResolveHost => 6,
            TransferErrorCode::CouldntConnect => 7,
            TransferErrorCode::TimedOut => 28,
            TransferErrorCode::TooManyRedirects => 47,
            TransferErrorCode::SendError => 55,
            TransferErrorCode::RecvError => 56,
        }
    }
}

impl std::fmt::Display for TransferErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// A transport-level failure recorded on a request.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message} (code {code})")]
pub struct TransferError {
    pub code: TransferErrorCode,
    pub message: String,
}

impl TransferError {
    pub fn new(code: TransferErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Post-transfer metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferInfo {
    /// Final HTTP status code, `None` if no response was received
    pub status: Option<u16>,
    /// URL of the last hop, after any redirects
    pub effective_url: Option<String>,
    /// Number of redirects followed
    pub redirect_count: u32,
    /// Wall-clock duration of the whole transfer in milliseconds
    pub total_time_ms: u64,
    /// Value of the Content-Length header of the final response
    pub content_length: Option<u64>,
    /// Value of the Content-Type header of the final response
    pub content_type: Option<String>,
}

/// A single field of [`TransferInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoField {
    Status,
    EffectiveUrl,
    RedirectCount,
    TotalTimeMs,
    ContentLength,
    ContentType,
}

impl TransferInfo {
    /// Look up one field as a JSON value (`null` when absent).
    pub fn field(&self, field: InfoField) -> serde_json::Value {
        match field {
            InfoField::Status => serde_json::json!(self.status),
            InfoField::EffectiveUrl => serde_json::json!(self.effective_url),
            InfoField::RedirectCount => serde_json::json!(self.redirect_count),
            InfoField::TotalTimeMs => serde_json::json!(self.total_time_ms),
            InfoField::ContentLength => serde_json::json!(self.content_length),
            InfoField::ContentType => serde_json::json!(self.content_type),
        }
    }
}

/// Everything a transport reports about one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    pub info: TransferInfo,
    /// Response body, present whenever a response was fully received
    pub body: Option<String>,
    /// Transport-level failure, if any
    pub error: Option<TransferError>,
}

impl TransferOutcome {
    /// A received response.
    pub fn response(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            info: TransferInfo {
                status: Some(status),
                content_length: Some(body.len() as u64),
                ..Default::default()
            },
            body: Some(body),
            error: None,
        }
    }

    /// A transport-level failure with no response.
    pub fn failure(code: TransferErrorCode, message: impl Into<String>) -> Self {
        Self {
            info: TransferInfo::default(),
            body: None,
            error: Some(TransferError::new(code, message)),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Trait for performing transfers.
///
/// Implementations must be cheap to clone: every [`Request`](crate::Request) holds its own copy.
#[async_trait]
pub trait Transport: Send + Sync + Clone {
    /// Apply an option to a handle, returning whether it was accepted.
    fn configure(&self, handle: &mut TransferHandle, option: TransferOption) -> bool {
        handle.options_mut().set(option)
    }

    /// Perform one transfer described by `handle`.
    ///
    /// Header lines and protocol trace lines are streamed into the handle's sinks via
    /// [`TransferHandle::emit_header`] and [`TransferHandle::emit_trace`] as a side effect.
    async fn perform(&self, handle: &TransferHandle) -> TransferOutcome;
}
