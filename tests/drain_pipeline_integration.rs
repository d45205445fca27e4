//! Integration tests for the drain protocol
//!
//! These tests validate drainer behavior over whole graphs:
//! - Drain order follows the blob dependencies
//! - Residual data is aggregated in FIFO order per token
//! - Sequential passes and the final pass
//! - Watchdog release of a stuck blob
//! - Message-based backends and statistics dumps

mod common;

use blobdrain::blob::WorkerState;
use blobdrain::drainer::{ControllerDrainMessage, MessageDrainStrategy, NodeDrainMessage, StatisticsDump};
use blobdrain::{
    BlobDrainedData, DrainData, DrainError, DrainMode, DrainState, DrainType, Drainer,
    DrainerState, Item, Token, WorkerId,
};
use common::builders::{diamond_graph, line_graph};
use common::strategies::ScriptedStrategy;
use common::{ints, quiet_config, test_timeout, wait_until};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const A: Token = Token::new(-1, 0);
const B: Token = Token::new(0, 1);
const C: Token = Token::new(1, 2);

#[test]
fn test_line_drains_source_first() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let drainer = Drainer::new(line_graph(), strategy.clone(), quiet_config()).unwrap();

    assert!(drainer.drain_intermediate().unwrap());

    assert_eq!(strategy.drained_blobs(), vec![A, B, C]);
    assert_eq!(*strategy.completions.lock().unwrap(), vec![A, B, C]);
    assert!(strategy
        .drain_types()
        .iter()
        .all(|t| *t == DrainType::Intermediate));
    assert_eq!(drainer.state(), DrainerState::NoDrain);
    assert!(drainer
        .status()
        .iter()
        .all(|s| s.state == DrainState::DrainDataReceived));
}

#[test]
fn test_residual_data_keeps_fifo_order() {
    // On t1, B had not consumed [1, 2] and A still held [3] for it.
    // On t2, C had not consumed [4, 5] and B still held [6] for it.
    let mut upstream = BlobDrainedData::empty(A);
    upstream.output_data.insert(B, ints([3]));
    let mut row = WorkerState::new();
    row.insert("fired".to_string(), Item::Int(5));
    upstream.drain_data = DrainData::new(BTreeMap::new(), BTreeMap::from([(WorkerId(0), row)]));

    let mut middle = BlobDrainedData::empty(B);
    middle.input_data.insert(B, ints([1, 2]));
    middle.output_data.insert(C, ints([6]));

    let mut downstream = BlobDrainedData::empty(C);
    downstream.input_data.insert(C, ints([4, 5]));

    let strategy = Arc::new(
        ScriptedStrategy::new()
            .with_residual(upstream)
            .with_residual(middle)
            .with_residual(downstream),
    );
    let drainer = Drainer::new(line_graph(), strategy, quiet_config()).unwrap();
    assert!(drainer.drain_intermediate().unwrap());

    let data = drainer.drain_data().expect("drain data aggregated");
    assert_eq!(data.data_for(B), Some(ints([1, 2, 3]).as_slice()));
    assert_eq!(data.data_for(C), Some(ints([4, 5, 6]).as_slice()));
    assert_eq!(
        data.worker_state_field(WorkerId(0), "fired"),
        Some(&Item::Int(5))
    );
    assert_eq!(data.item_count(), 6);
}

#[test]
fn test_diamond_sink_waits_for_both_branches() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let drainer = Drainer::new(diamond_graph(), strategy.clone(), quiet_config()).unwrap();

    assert!(drainer.drain_final(false).unwrap());

    let order = strategy.drained_blobs();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], Token::new(-1, 0));
    assert_eq!(order[3], Token::new(1, 3));
    assert!(drainer.is_drained());
}

#[test]
fn test_sequential_passes_then_final() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let drainer = Drainer::new(line_graph(), strategy.clone(), quiet_config()).unwrap();

    assert!(drainer.drain_intermediate().unwrap());
    assert!(drainer.drain_intermediate().unwrap());
    assert!(!drainer.is_drained());
    assert!(drainer.drain_final(false).unwrap());

    // Once final, further passes are refused quietly.
    assert!(!drainer.drain_final(false).unwrap());
    assert!(!drainer.drain_intermediate().unwrap());

    assert_eq!(*strategy.prepared.lock().unwrap(), vec![false, false, true]);
    assert_eq!(
        *strategy.finished.lock().unwrap(),
        vec![false, false, false, true]
    );
    let types = strategy.drain_types();
    assert_eq!(types.len(), 9);
    assert!(types[..6].iter().all(|t| *t == DrainType::Intermediate));
    assert!(types[6..].iter().all(|t| *t == DrainType::Final));
    assert_eq!(drainer.statistics().passes, 3);
    assert!(drainer.is_drained());
    assert_eq!(drainer.state(), DrainerState::Final);
}

#[test]
fn test_semi_final_prepares_as_non_final() {
    let strategy = Arc::new(ScriptedStrategy::new());
    let drainer = Drainer::new(line_graph(), strategy.clone(), quiet_config()).unwrap();

    assert!(drainer.drain_final(true).unwrap());
    assert_eq!(*strategy.prepared.lock().unwrap(), vec![false]);
    assert!(strategy
        .drain_types()
        .iter()
        .all(|t| *t == DrainType::Final));
    assert!(drainer.is_drained());
}

#[test]
fn test_overlapping_intermediate_pass_is_rejected() {
    let strategy = Arc::new(ScriptedStrategy::new().stall(C));
    let drainer = Drainer::new(line_graph(), strategy, quiet_config()).unwrap();

    assert!(drainer.start_draining(DrainMode::Intermediate).unwrap());
    assert!(matches!(
        drainer.start_draining(DrainMode::Intermediate),
        Err(DrainError::AlreadyDraining)
    ));
    assert!(matches!(
        drainer.stop(),
        Err(DrainError::StopDuringIntermediateDrain)
    ));
    assert!(drainer
        .await_drained_intermediate_timeout(Duration::from_millis(20))
        .is_err());

    drainer.handle().drained(C).unwrap();
    drainer
        .await_drained_intermediate_timeout(test_timeout())
        .unwrap();
    assert!(drainer.await_drain_data_timeout(test_timeout()).unwrap().is_some());
    assert_eq!(drainer.state(), DrainerState::NoDrain);
}

#[test]
fn test_watchdog_unblocks_diamond() {
    let stuck = Token::new(0, 1);
    let sink = Token::new(1, 3);
    let strategy = Arc::new(ScriptedStrategy::new().stall(stuck));
    let config = quiet_config()
        .with_deadlock_handler(true)
        .with_deadlock_timeout(Duration::from_millis(50));
    let drainer = Drainer::new(diamond_graph(), strategy.clone(), config).unwrap();

    assert!(drainer.start_draining(DrainMode::Intermediate).unwrap());
    assert!(wait_until(|| strategy.drained_blobs().contains(&sink)));
    assert_eq!(
        drainer.graph().node(stuck).unwrap().state(),
        DrainState::DeadlockHandled
    );

    // The stuck blob finishing late must not release the sink twice.
    drainer.handle().drained(stuck).unwrap();
    drainer
        .await_drained_intermediate_timeout(test_timeout())
        .unwrap();
    drainer.await_drain_data_timeout(test_timeout()).unwrap();
    assert_eq!(strategy.drained_blobs().len(), 4);
}

#[test]
fn test_message_backend_round_trip() {
    let (strategy, outbox) = MessageDrainStrategy::channel();
    let drainer = Drainer::new(line_graph(), Arc::new(strategy), quiet_config()).unwrap();
    let handle = drainer.handle();

    // Stands in for remote blob hosts; every message crosses a JSON wire.
    let host = std::thread::spawn(move || {
        let mut seen = Vec::new();
        for message in outbox.iter() {
            let wire = serde_json::to_string(&message).unwrap();
            let reply = match serde_json::from_str::<ControllerDrainMessage>(&wire).unwrap() {
                ControllerDrainMessage::DoDrain { blob, .. } => {
                    seen.push(blob);
                    vec![NodeDrainMessage::Drained { blob }]
                }
                ControllerDrainMessage::DrainDataRequest { blobs } => blobs
                    .into_iter()
                    .map(|blob| {
                        let mut data = BlobDrainedData::empty(blob);
                        data.input_data
                            .insert(blob, vec![Item::Int(blob.downstream().0 as i64)]);
                        NodeDrainMessage::DrainedData(data)
                    })
                    .collect(),
            };
            for message in reply {
                let wire = serde_json::to_string(&message).unwrap();
                handle.process(serde_json::from_str(&wire).unwrap()).unwrap();
            }
        }
        seen
    });

    assert!(drainer.drain_final(false).unwrap());
    let data = drainer.drain_data().unwrap();
    assert_eq!(data.data_for(A), Some(ints([0]).as_slice()));
    assert_eq!(data.data_for(C), Some(ints([2]).as_slice()));

    drop(drainer);
    assert_eq!(host.join().unwrap(), vec![A, B, C]);
}

#[test]
fn test_statistics_dump_after_passes() {
    let dir = tempfile::tempdir().unwrap();
    let mut residual = BlobDrainedData::empty(B);
    residual.input_data.insert(B, ints([7, 8]));
    let strategy = Arc::new(ScriptedStrategy::new().with_residual(residual));
    let mut config = quiet_config().with_statistics_dir(dir.path());
    config.app_name = "pipeline".to_string();
    let drainer = Drainer::new(line_graph(), strategy, config).unwrap();

    assert!(drainer.drain_intermediate().unwrap());
    assert!(drainer.drain_final(false).unwrap());

    let path = drainer.dump_statistics().expect("statistics written");
    assert_eq!(path, dir.path().join("pipeline_drain_statistics.json"));
    let dump: StatisticsDump =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(dump.app_name, "pipeline");
    assert_eq!(dump.statistics.passes, 2);
    assert_eq!(dump.statistics.history(B), Some(&[2, 2][..]));
}
