//! # blobdrain: drain orchestration for partitioned stream graphs
//!
//! A stream graph is split into *blobs*, partitions of workers that execute
//! independently and hand items to each other through FIFO [`Buffer`]s. To
//! reconfigure or shut down such a graph without losing data, the blobs are
//! *drained* in dependency order, starting at the blob that owns the overall
//! input. Whatever is left over (unconsumed items, worker state) is
//! collected as [`DrainData`] from which the graph can be resumed.
//!
//! ## Architecture
//!
//! - **blob**: tokens, items, buffers, drain data and the [`Blob`] trait
//! - **drainer**: [`BlobGraph`] validation, per-blob state machines and the
//!   [`Drainer`] orchestrator with its watchdog
//! - **concurrent**: a local-thread backend ([`ConcurrentDrainStrategy`])
//! - **config**: [`DrainerConfig`], loadable from TOML or JSON
//!
//! ## Example
//!
//! ```ignore
//! use blobdrain::{BlobGraph, DrainerConfig, Drainer, StreamTopology};
//!
//! blobdrain::logging::init(None);
//!
//! let topology = StreamTopology::pipeline(0..3);
//! let graph = BlobGraph::new(&topology, &partitions)?;
//! let drainer = Drainer::new(graph, strategy, DrainerConfig::load_or_default("drainer.toml"))?;
//!
//! drainer.drain_intermediate()?;
//! let state = drainer.drain_data();
//! ```

pub mod blob;
pub mod concurrent;
pub mod config;
pub mod drainer;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use blob::{
    Blob, BlobFactory, Buffer, Configuration, DrainData, Item, QueueBuffer, SharedBuffer, Token,
    WorkerId,
};
pub use concurrent::{ConcurrentDrainStrategy, SingleThreadedBlob, SingleThreadedBlobFactory};
pub use config::DrainerConfig;
pub use drainer::{
    BlobDrainedData, BlobGraph, DrainHandle, DrainMode, DrainState, DrainStrategy, DrainType,
    Drainer, DrainerState, StreamTopology,
};
pub use error::{DrainError, Result, ResultExt};
