//! Batched HTTP request execution with bounded concurrency and retries.
//!
//! This crate issues a collection of independent HTTP requests concurrently, waits for all of
//! them to complete, classifies each one against a configurable success policy, and retries the
//! failures a bounded number of times with a delay between rounds.
//!
//! Requests are collected in a [`BatchRegistry`] and driven by a [`BatchExecutor`]. The executor
//! splits the registry into chunks bounded by a concurrency limit and drives each chunk through a
//! multiplexed [`Session`] on the calling task: no worker tasks are spawned.
//!
//! ```ignore
//! let transport = ReqwestTransport::new()?;
//! let mut registry = BatchRegistry::new();
//! registry.add(Request::new("https://example.com/a", transport.clone()), None)?;
//! registry.add(Request::new("https://example.com/b", transport.clone()), Some("b"))?;
//! registry.configure(TransferOption::ReturnBody(true));
//!
//! let executor = BatchExecutor::new(BatchConfig {
//!     max_concurrency: Some(8),
//!     max_retries: 3,
//!     retry_delay_ms: 500,
//!     ..Default::default()
//! });
//! let report = executor.run(&mut registry).await;
//! ```

pub mod batch;
pub mod error;
pub mod http;
pub mod policy;
pub mod request;

// Re-export commonly used types
pub use batch::{
    BatchConfig, BatchExecutor, BatchRegistry, BatchReport, RequestKey, Session, chunk_ranges,
};
pub use error::{BarrageError, Result};
pub use http::{
    InfoField, MockTransport, ReqwestTransport, TransferError, TransferErrorCode, TransferInfo,
    TransferOutcome, Transport,
};
pub use policy::SuccessPolicy;
pub use request::{
    CaptureSink, Output, Request, Response, TransferHandle, TransferOption, TransferOptions,
};
