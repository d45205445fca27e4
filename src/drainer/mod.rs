//! Draining: bringing a running blob graph to a consistent stop.
//!
//! A drain pass starts at the unique source blob and spreads downstream. A
//! blob is asked to drain only after every one of its predecessors has
//! finished, so no new items ever enter a blob that has already drained.
//! Once every blob has finished, residual data (unconsumed items and worker
//! state) is collected and aggregated into one [`DrainData`](crate::blob::DrainData)
//! from which the graph can later be resumed, possibly under a different
//! partitioning.
//!
//! # Architecture
//!
//! - [`BlobGraph`] - partition validation, cycle check, source detection
//! - [`BlobNode`] - per-blob atomic state machine
//! - [`Drainer`] - pass lifecycle, milestones and aggregation
//! - [`DrainStrategy`] - how a blob is actually reached (local threads, messages)
//! - watchdog - forces stuck blobs forward after a timeout
//!
//! ```text
//!  start_draining ──► source.drain ──► blob completes ──► successors' counters
//!                                                             │ reach 0
//!                                                             ▼
//!                                                     successor.drain ...
//! ```

pub mod blob_graph;
pub mod blob_node;
pub(crate) mod events;
pub mod latch;
pub mod messages;
pub mod orchestrator;
pub mod statistics;
pub mod strategy;
pub(crate) mod watchdog;

pub use blob_graph::{BlobBoundary, BlobGraph, StreamTopology};
pub use blob_node::{BlobNode, Completion, DrainState, NodeIndex, NodeStatus};
pub use latch::Latch;
pub use messages::{
    BlobDrainedData, ControllerDrainMessage, DrainType, MessageDrainStrategy, NodeDrainMessage,
};
pub use orchestrator::{DrainHandle, DrainMode, Drainer, DrainerState};
pub use statistics::{DrainStatistics, StatisticsDump};
pub use strategy::DrainStrategy;
