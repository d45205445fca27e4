//! Blobs: independently executing partitions of a stream graph.
//!
//! A blob owns a set of workers and exposes them to the rest of the system
//! only through its boundary channels (input and output buffers keyed by
//! [`Token`]), a number of cores of runnable code, and a drain entry point.
//! How a blob computes is up to the [`BlobFactory`] that built it; the drain
//! machinery only relies on the [`Blob`] trait.
//!
//! # Contents
//!
//! - [`Token`] / [`WorkerId`] - stable edge and worker identity
//! - [`Item`] - opaque stream element
//! - [`Buffer`] and [`QueueBuffer`] - FIFO handoff on edges
//! - [`DrainData`] - residual items and worker state at a drain point

pub mod buffer;
pub mod drain_data;
pub mod item;
pub mod queue_buffer;
pub mod token;

pub use buffer::{Buffer, ReadOnlyBuffer, SharedBuffer, WriteOnlyBuffer, WriteOutcome};
pub use drain_data::{DrainData, WorkerState};
pub use item::Item;
pub use queue_buffer::{BlockingPolicy, QueueBuffer};
pub use token::{Token, WorkerId};

use crate::error::{DrainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Runnable code for one core of a blob; called repeatedly by its thread.
pub type CoreCode = Arc<dyn Fn() + Send + Sync>;

/// Invoked exactly once when a blob has finished draining.
pub type DrainCallback = Box<dyn FnOnce() + Send>;

/// Unit of independent execution owning a partition of the stream graph.
pub trait Blob: Send + Sync {
    /// Workers owned by this blob.
    fn workers(&self) -> &BTreeSet<WorkerId>;

    /// Buffers this blob reads from, keyed by boundary token.
    fn input_channels(&self) -> &BTreeMap<Token, SharedBuffer<Item>>;

    /// Buffers this blob writes to, keyed by boundary token.
    fn output_channels(&self) -> &BTreeMap<Token, SharedBuffer<Item>>;

    /// Boundary input tokens.
    fn inputs(&self) -> BTreeSet<Token> {
        self.input_channels().keys().copied().collect()
    }

    /// Boundary output tokens.
    fn outputs(&self) -> BTreeSet<Token> {
        self.output_channels().keys().copied().collect()
    }

    /// Smallest buffer capacity this blob needs on `token` to make progress.
    fn minimum_buffer_capacity(&self, _token: Token) -> usize {
        1
    }

    /// Number of parallel execution contexts.
    fn core_count(&self) -> usize;

    /// Code for core `core`, `0 <= core < core_count()`.
    fn core_code(&self, core: usize) -> CoreCode;

    /// Ask the blob to drain; `callback` runs once the blob has finished.
    fn drain(&self, callback: DrainCallback);

    /// Internal state captured by the last drain, if any.
    fn drain_data(&self) -> Option<DrainData>;

    /// Items produced after draining that could not be written to an output
    /// buffer, keyed by output token.
    fn undelivered_output(&self) -> BTreeMap<Token, Vec<Item>> {
        BTreeMap::new()
    }
}

/// Identifier of a blob: its smallest input token.
///
/// Derived from worker identifiers only, so it is stable across
/// re-partitioning as long as the blob keeps the same first input.
pub fn blob_id(blob: &dyn Blob) -> Option<Token> {
    blob.input_channels().keys().next().copied()
}

/// Check that every boundary buffer of `blob` is at least as large as the
/// blob's [`Blob::minimum_buffer_capacity`] for that token.
pub fn check_buffer_capacities(blob: &dyn Blob) -> Result<()> {
    let channels = blob.input_channels().iter().chain(blob.output_channels());
    for (token, buffer) in channels {
        let required = blob.minimum_buffer_capacity(*token);
        if buffer.capacity() < required {
            let err = DrainError::CapacityExceeded {
                requested: required,
                capacity: buffer.capacity(),
            };
            return Err(err.with_context(format!("Buffer on {} is too small", token)));
        }
    }
    Ok(())
}

/// String-keyed blob parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub parameters: BTreeMap<String, Item>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Item>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Item> {
        self.parameters.get(name)
    }
}

/// Builds concrete blobs for a partition of workers.
pub trait BlobFactory: Send + Sync {
    /// Build a blob for `workers`, resuming from `initial_state` when given.
    fn make_blob(
        &self,
        workers: &BTreeSet<WorkerId>,
        config: &Configuration,
        initial_state: Option<&DrainData>,
    ) -> Result<Arc<dyn Blob>>;

    /// Configuration to use when the caller has none.
    fn default_configuration(&self, workers: &BTreeSet<WorkerId>) -> Configuration;
}
