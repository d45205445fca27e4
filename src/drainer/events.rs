//! Events consumed by the drainer's event loop.

use crate::drainer::blob_node::{Completion, NodeIndex};

/// Work item for the drainer event loop.
///
/// State transitions happen where the event originates; the event loop
/// applies their consequences (successor notification, milestone counting)
/// one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DrainEvent {
    /// A blob finished draining.
    Completed {
        node: NodeIndex,
        completion: Completion,
    },
    /// A watchdog timer expired.
    WatchdogFired { node: NodeIndex, generation: u64 },
    /// A blob's residual data has been stored on its node.
    DrainDataReceived { node: NodeIndex, generation: u64 },
    /// Stop the event loop.
    Shutdown,
}
