//! Error handling for blobdrain
//!
//! This module defines the crate-wide error type and a Result alias.
//! Variants fall into four families:
//!
//! - **Configuration** errors are fatal at [`BlobGraph`](crate::drainer::BlobGraph)
//!   construction; the caller must not proceed with the graph.
//! - **Protocol misuse** errors flag programming mistakes in the drain protocol
//!   (double drain, duplicate drain data, starting a pass mid-pass).
//! - **Buffer capability** errors come from read-only / write-only buffers and
//!   from bulk reads that could never succeed.
//! - **Operational** errors cover timeouts, I/O and serialization.

use crate::blob::{Token, WorkerId};
use crate::drainer::DrainState;
use thiserror::Error;

/// Main error type for drain operations
#[derive(Error, Debug)]
pub enum DrainError {
    /// The blob graph contains a cycle between partitions
    #[error("Cycles found among blobs")]
    CycleDetected,

    /// No blob without predecessors exists
    #[error("No source blob found: every blob has at least one predecessor")]
    NoSourceBlob,

    /// More than one blob without predecessors exists
    #[error("Multiple independent blobs found: {0:?}")]
    MultipleSourceBlobs(Vec<Token>),

    /// A worker edge leaves the partitioning
    #[error("Dangling token {0}: not connected to exactly one blob on each side")]
    DanglingToken(Token),

    /// A partition group has no workers
    #[error("Partition {0} is empty")]
    EmptyPartition(usize),

    /// A worker appears in more than one partition group
    #[error("Worker {0} is assigned to more than one partition")]
    OverlappingPartitions(WorkerId),

    /// A partition names a worker the topology does not know
    #[error("Worker {0} is not part of the stream topology")]
    UnknownWorker(WorkerId),

    /// A drain state transition was attempted from the wrong state
    #[error("Blob {blob}: expected drain state {expected}, found {actual}")]
    IllegalDrainState {
        blob: Token,
        expected: DrainState,
        actual: DrainState,
    },

    /// Residual data was delivered twice for the same blob in one pass
    #[error("Multiple drain data has been received for blob {0}")]
    DuplicateDrainData(Token),

    /// A predecessor notification came from a blob that is not a predecessor
    #[error("Blob {predecessor} is not a predecessor of blob {blob}")]
    IllegalPredecessor { blob: Token, predecessor: Token },

    /// A drain pass was requested while another pass is active
    #[error("Drainer is in draining mode")]
    AlreadyDraining,

    /// `stop()` was called in the middle of an intermediate drain
    #[error("Cannot stop the pipeline during an intermediate drain")]
    StopDuringIntermediateDrain,

    /// The token does not identify a blob of this graph
    #[error("Unknown blob {0}")]
    UnknownBlob(Token),

    /// Two drain data snapshots both carry state for the same worker
    #[error("Bad merge: state of worker {0} split across DrainData")]
    BadMerge(WorkerId),

    /// The buffer does not support this direction
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A bulk read asked for more items than the buffer can ever hold
    #[error("Requested {requested} items from a buffer of capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    /// The strategy's preparation hook failed; no drain was started
    #[error("Prepare draining failed: {0}")]
    PrepareFailed(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal channel was closed
    #[error("Channel closed")]
    ChannelClosed,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DrainError>,
    },
}

impl DrainError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DrainError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means the blob graph itself is unusable
    pub fn is_configuration_error(&self) -> bool {
        match self {
            DrainError::CycleDetected
            | DrainError::NoSourceBlob
            | DrainError::MultipleSourceBlobs(_)
            | DrainError::DanglingToken(_)
            | DrainError::EmptyPartition(_)
            | DrainError::OverlappingPartitions(_)
            | DrainError::UnknownWorker(_) => true,
            DrainError::WithContext { source, .. } => source.is_configuration_error(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DrainError {
    fn from(err: serde_json::Error) -> Self {
        DrainError::Serialization(err.to_string())
    }
}

/// Result type alias for drain operations
pub type Result<T> = std::result::Result<T, DrainError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
