//! Local-thread backend.
//!
//! Blobs run on plain OS threads in the same process:
//!
//! - [`BlobThread`] - loops one core of a blob until asked to stop
//! - [`ConcurrentDrainStrategy`] - a [`DrainStrategy`](crate::drainer::DrainStrategy)
//!   that drains such blobs directly and stops their threads once drained
//! - [`SingleThreadedBlob`] / [`SingleThreadedBlobFactory`] - a simple
//!   interpreted blob and its factory
//!
//! # Example
//!
//! ```ignore
//! let factory = SingleThreadedBlobFactory::new(topology.clone(), work);
//! let blobs = partitions
//!     .iter()
//!     .map(|p| factory.make_blob(p, &factory.default_configuration(p), None))
//!     .collect::<Result<Vec<_>>>()?;
//! let graph = BlobGraph::from_blobs(&blobs)?;
//! let strategy = Arc::new(ConcurrentDrainStrategy::new(&graph, blobs)?);
//! strategy.start()?;
//! let drainer = Drainer::new(graph, strategy, DrainerConfig::default())?;
//! drainer.drain_final(false)?;
//! ```

pub mod blob_thread;
pub mod single_threaded;
pub mod strategy;

pub use blob_thread::BlobThread;
pub use single_threaded::{SingleThreadedBlob, SingleThreadedBlobFactory, WorkFn};
pub use strategy::ConcurrentDrainStrategy;
