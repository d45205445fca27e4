//! Graph and partition builders

use blobdrain::{BlobGraph, StreamTopology, WorkerId};
use std::collections::BTreeSet;

pub fn group(ids: &[i32]) -> BTreeSet<WorkerId> {
    ids.iter().copied().map(WorkerId).collect()
}

/// One partition per worker.
pub fn singleton_partitions(workers: impl IntoIterator<Item = i32>) -> Vec<BTreeSet<WorkerId>> {
    workers.into_iter().map(|w| group(&[w])).collect()
}

/// `0 -> 1 -> 2`, one blob per worker
pub fn line_graph() -> BlobGraph {
    BlobGraph::new(&StreamTopology::pipeline(0..3), &singleton_partitions(0..3)).unwrap()
}

/// `0 -> {1, 2} -> 3`
pub fn diamond_topology() -> StreamTopology {
    let mut topology = StreamTopology::new();
    topology
        .connect(WorkerId(0), WorkerId(1))
        .connect(WorkerId(0), WorkerId(2))
        .connect(WorkerId(1), WorkerId(3))
        .connect(WorkerId(2), WorkerId(3));
    topology
}

pub fn diamond_graph() -> BlobGraph {
    BlobGraph::new(&diamond_topology(), &singleton_partitions(0..4)).unwrap()
}
