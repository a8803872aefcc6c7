//! Requests: transfer descriptors, capture sinks and recorded outcomes.

mod capture;
mod handle;
mod types;

pub use capture::CaptureSink;
pub use handle::{DEFAULT_MAX_REDIRECTS, TransferHandle, TransferOption, TransferOptions};
pub use types::{Output, Request, Response};
