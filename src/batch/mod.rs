//! Batches: keyed request registries and their concurrent execution.
//!
//! A [`BatchRegistry`] holds requests in insertion order. A [`BatchExecutor`] runs them in
//! chunks of at most `max_concurrency`, driving each chunk through a [`Session`] and retrying
//! failures for a bounded number of rounds.

mod executor;
mod registry;
mod session;

pub use executor::{BatchConfig, BatchExecutor, BatchReport, chunk_ranges};
pub use registry::{BatchRegistry, RequestKey};
pub use session::Session;
