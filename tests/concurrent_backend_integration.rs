//! Integration tests for the local-thread backend
//!
//! These tests validate the complete backend workflow:
//! - Blobs built by the factory process items on their own threads
//! - A final drain delivers every item and stops all threads
//! - Drain data captured by an intermediate drain resumes a new set of blobs

mod common;

use blobdrain::{
    Blob, BlobFactory, BlobGraph, ConcurrentDrainStrategy, DrainData, Drainer,
    DrainerConfig, Item, SingleThreadedBlobFactory, StreamTopology, Token, WorkerId,
};
use common::builders::singleton_partitions;
use common::drain_ints;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

const INPUT: Token = Token::new(-1, 0);
const OUTPUT: Token = Token::new(2, -1);

fn plus_one_factory() -> SingleThreadedBlobFactory {
    SingleThreadedBlobFactory::new(
        StreamTopology::pipeline(0..3),
        Arc::new(|item: Item| Item::Int(item.as_int().unwrap_or(0) + 1)),
    )
    .with_buffer_capacity(16)
}

fn make_blobs(
    factory: &SingleThreadedBlobFactory,
    partitions: &[BTreeSet<WorkerId>],
    state: Option<&DrainData>,
) -> Vec<Arc<dyn Blob>> {
    partitions
        .iter()
        .map(|p| {
            factory
                .make_blob(p, &factory.default_configuration(p), state)
                .unwrap()
        })
        .collect()
}

fn feed(factory: &SingleThreadedBlobFactory, values: impl IntoIterator<Item = i64>) {
    let mut items: VecDeque<Item> = values.into_iter().map(Item::Int).collect();
    let expected = items.len();
    assert_eq!(factory.buffer(INPUT).unwrap().write_from(&mut items).unwrap(), expected);
}

fn fired(data: &DrainData, worker: i32) -> Option<i64> {
    data.worker_state_field(WorkerId(worker), "fired")
        .and_then(Item::as_int)
}

fn collecting_config() -> DrainerConfig {
    DrainerConfig::new().with_drain_data(true)
}

#[test]
fn test_final_drain_delivers_everything() {
    let factory = plus_one_factory();
    let partitions = singleton_partitions(0..3);
    feed(&factory, 0..200);

    let blobs = make_blobs(&factory, &partitions, None);
    let graph = BlobGraph::from_blobs(&blobs).unwrap();
    let strategy = Arc::new(ConcurrentDrainStrategy::new(&graph, blobs).unwrap());
    strategy.start().unwrap();

    let drainer = Drainer::new(graph, strategy.clone(), collecting_config()).unwrap();
    assert!(drainer.drain_final(false).unwrap());
    assert!(drainer.is_drained());

    let output = drain_ints(&factory.buffer(OUTPUT).unwrap());
    assert_eq!(output, (3..203).collect::<Vec<_>>());

    let data = drainer.drain_data().expect("drain data aggregated");
    assert_eq!(data.item_count(), 0);
    for worker in 0..3 {
        assert_eq!(fired(&data, worker), Some(200));
    }
}

#[test]
fn test_resume_from_intermediate_drain() {
    let factory = plus_one_factory();
    let partitions = singleton_partitions(0..3);
    feed(&factory, 0..100);

    let first = make_blobs(&factory, &partitions, None);
    let graph = BlobGraph::from_blobs(&first).unwrap();
    let strategy = Arc::new(ConcurrentDrainStrategy::new(&graph, first).unwrap());
    strategy.start().unwrap();
    let drainer = Drainer::new(graph, strategy, collecting_config()).unwrap();
    assert!(drainer.drain_intermediate().unwrap());
    let snapshot = drainer.drain_data().expect("drain data aggregated");
    drop(drainer);

    // Fresh blobs over the same buffers pick up the captured counters.
    feed(&factory, 100..150);
    let second = make_blobs(&factory, &partitions, Some(&snapshot));
    let graph = BlobGraph::from_blobs(&second).unwrap();
    let strategy = Arc::new(ConcurrentDrainStrategy::new(&graph, second).unwrap());
    strategy.start().unwrap();
    let drainer = Drainer::new(graph, strategy, collecting_config()).unwrap();
    assert!(drainer.drain_final(false).unwrap());

    let output = drain_ints(&factory.buffer(OUTPUT).unwrap());
    assert_eq!(output, (3..153).collect::<Vec<_>>());
    let data = drainer.drain_data().unwrap();
    for worker in 0..3 {
        assert_eq!(fired(&data, worker), Some(150));
    }
}

#[test]
fn test_discarding_drain_skips_residual_data() {
    let factory = plus_one_factory();
    let partitions = singleton_partitions(0..3);
    feed(&factory, 0..10);

    let blobs = make_blobs(&factory, &partitions, None);
    let graph = BlobGraph::from_blobs(&blobs).unwrap();
    let strategy = Arc::new(ConcurrentDrainStrategy::new(&graph, blobs).unwrap());
    strategy.start().unwrap();
    let drainer = Drainer::new(graph, strategy, DrainerConfig::new().with_drain_data(false))
        .unwrap();

    assert!(drainer.drain_final(false).unwrap());
    assert!(drainer.drain_data().is_none());
    assert_eq!(drain_ints(&factory.buffer(OUTPUT).unwrap()), (3..13).collect::<Vec<_>>());
}

#[test]
fn test_strategy_rejects_mismatched_blobs() {
    let factory = plus_one_factory();
    let partitions = singleton_partitions(0..3);
    let blobs = make_blobs(&factory, &partitions, None);
    let graph = BlobGraph::from_blobs(&blobs).unwrap();

    assert!(ConcurrentDrainStrategy::new(&graph, blobs[..2].to_vec()).is_err());
}
