//! Per-blob drain state machine.
//!
//! ```text
//!   NoDrain(0) ──drain──► DrainRequested(1) ──drained──────────────► Completed(3)
//!                                │                                      ▲
//!                                └──watchdog──► DeadlockHandled(2) ──drained
//!
//!   Completed(3) ──residual data──► DrainDataReceived(4)
//! ```
//!
//! A [`BlobNode`] only performs the atomic transitions. The drainer decides
//! what each transition means (calling the backend, notifying successors,
//! counting milestones), so no node ever calls back into the orchestrator.
//! All mutation goes through compare-and-set on the state and an atomic
//! dependency counter; predecessor and successor lists are fixed when the
//! graph is built.

use crate::blob::{Token, WorkerId};
use crate::drainer::messages::BlobDrainedData;
use crate::error::{DrainError, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Index into `BlobGraph::nodes`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIndex({})", self.0)
    }
}

/// Drain progress of a single blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DrainState {
    NoDrain = 0,
    DrainRequested = 1,
    DeadlockHandled = 2,
    Completed = 3,
    DrainDataReceived = 4,
}

impl DrainState {
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DrainState::NoDrain),
            1 => Some(DrainState::DrainRequested),
            2 => Some(DrainState::DeadlockHandled),
            3 => Some(DrainState::Completed),
            4 => Some(DrainState::DrainDataReceived),
            _ => None,
        }
    }

    /// Whether the blob has finished draining in this pass.
    pub fn is_finished(self) -> bool {
        matches!(self, DrainState::Completed | DrainState::DrainDataReceived)
    }
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrainState::NoDrain => "NoDrain",
            DrainState::DrainRequested => "DrainRequested",
            DrainState::DeadlockHandled => "DeadlockHandled",
            DrainState::Completed => "Completed",
            DrainState::DrainDataReceived => "DrainDataReceived",
        };
        f.write_str(name)
    }
}

/// What a successful `drained()` transition requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// DrainRequested → Completed: successors still have to be notified.
    Propagate,
    /// DeadlockHandled → Completed: the watchdog already notified successors.
    AlreadyPropagated,
}

/// Diagnostic view of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub blob: Token,
    pub state: DrainState,
    pub pending_predecessors: usize,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self.state {
            DrainState::NoDrain => "No drain call",
            DrainState::DrainRequested => "Drain requested",
            DrainState::DeadlockHandled => {
                "Deadlock detected, successors released by the watchdog"
            }
            DrainState::Completed => "Drain completed",
            DrainState::DrainDataReceived => "Drain data received",
        };
        write!(f, "{} - {}", self.blob, description)
    }
}

/// Drain bookkeeping for one blob of the graph.
pub struct BlobNode {
    id: Token,
    index: NodeIndex,
    workers: BTreeSet<WorkerId>,
    inputs: BTreeSet<Token>,
    outputs: BTreeSet<Token>,
    predecessors: Vec<NodeIndex>,
    successors: Vec<NodeIndex>,
    /// Predecessors that have not finished draining in the current pass.
    dependency_count: AtomicUsize,
    state: AtomicU8,
    drain_data: Mutex<Option<BlobDrainedData>>,
}

impl BlobNode {
    pub(crate) fn new(
        id: Token,
        index: NodeIndex,
        workers: BTreeSet<WorkerId>,
        inputs: BTreeSet<Token>,
        outputs: BTreeSet<Token>,
    ) -> Self {
        Self {
            id,
            index,
            workers,
            inputs,
            outputs,
            predecessors: Vec::new(),
            successors: Vec::new(),
            dependency_count: AtomicUsize::new(0),
            state: AtomicU8::new(DrainState::NoDrain.as_u8()),
            drain_data: Mutex::new(None),
        }
    }

    pub(crate) fn add_predecessor(&mut self, pred: NodeIndex) {
        debug_assert!(
            !self.predecessors.contains(&pred),
            "{:?} has already been set as a predecessor of {}",
            pred,
            self.id
        );
        self.predecessors.push(pred);
        *self.dependency_count.get_mut() += 1;
    }

    pub(crate) fn add_successor(&mut self, succ: NodeIndex) {
        debug_assert!(
            !self.successors.contains(&succ),
            "{:?} has already been set as a successor of {}",
            succ,
            self.id
        );
        self.successors.push(succ);
    }

    pub fn id(&self) -> Token {
        self.id
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn workers(&self) -> &BTreeSet<WorkerId> {
        &self.workers
    }

    pub fn inputs(&self) -> &BTreeSet<Token> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeSet<Token> {
        &self.outputs
    }

    pub fn predecessors(&self) -> &[NodeIndex] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[NodeIndex] {
        &self.successors
    }

    pub fn dependency_count(&self) -> usize {
        self.dependency_count.load(Ordering::Acquire)
    }

    pub fn state(&self) -> DrainState {
        // Only `DrainState` discriminants are ever stored.
        DrainState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(DrainState::NoDrain)
    }

    fn transition(&self, from: DrainState, to: DrainState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// NoDrain → DrainRequested. Valid once per pass.
    pub fn request_drain(&self) -> Result<()> {
        if self.transition(DrainState::NoDrain, DrainState::DrainRequested) {
            Ok(())
        } else {
            Err(DrainError::IllegalDrainState {
                blob: self.id,
                expected: DrainState::NoDrain,
                actual: self.state(),
            })
        }
    }

    /// The blob's runtime reports that it has truly finished.
    ///
    /// Races harmlessly with [`force_deadlock_handled`](Self::force_deadlock_handled):
    /// whichever compare-and-set wins decides whether successors still need
    /// notifying.
    pub fn mark_drained(&self) -> Result<Completion> {
        if self.transition(DrainState::DrainRequested, DrainState::Completed) {
            Ok(Completion::Propagate)
        } else if self.transition(DrainState::DeadlockHandled, DrainState::Completed) {
            Ok(Completion::AlreadyPropagated)
        } else {
            Err(DrainError::IllegalDrainState {
                blob: self.id,
                expected: DrainState::DrainRequested,
                actual: self.state(),
            })
        }
    }

    /// Watchdog: DrainRequested → DeadlockHandled. Returns whether it fired.
    pub fn force_deadlock_handled(&self) -> bool {
        self.transition(DrainState::DrainRequested, DrainState::DeadlockHandled)
    }

    /// Record that `pred` finished. Returns `true` when this was the last
    /// outstanding predecessor, i.e. this node must now drain.
    pub fn predecessor_drained(&self, pred: NodeIndex, pred_id: Token) -> Result<bool> {
        if !self.predecessors.contains(&pred) {
            return Err(DrainError::IllegalPredecessor {
                blob: self.id,
                predecessor: pred_id,
            });
        }
        let previous = self
            .dependency_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| DrainError::IllegalPredecessor {
                blob: self.id,
                predecessor: pred_id,
            })?;
        Ok(previous == 1)
    }

    /// Store this pass's residual data. Valid only once the node has completed;
    /// a second delivery is a protocol error.
    pub fn set_drain_data(&self, data: BlobDrainedData) -> Result<()> {
        let mut slot = self.drain_data.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(DrainError::DuplicateDrainData(self.id));
        }
        let actual = self.state();
        if actual != DrainState::Completed {
            return Err(DrainError::IllegalDrainState {
                blob: self.id,
                expected: DrainState::Completed,
                actual,
            });
        }
        *slot = Some(data);
        self.state
            .store(DrainState::DrainDataReceived.as_u8(), Ordering::Release);
        Ok(())
    }

    /// Residual data received in this pass, if any.
    pub fn drain_data(&self) -> Option<BlobDrainedData> {
        self.drain_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return to the start-of-pass state.
    pub(crate) fn reset(&self) {
        self.state
            .store(DrainState::NoDrain.as_u8(), Ordering::Release);
        self.dependency_count
            .store(self.predecessors.len(), Ordering::Release);
        *self.drain_data.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn snapshot(&self) -> NodeStatus {
        NodeStatus {
            blob: self.id,
            state: self.state(),
            pending_predecessors: self.dependency_count(),
        }
    }
}

impl fmt::Debug for BlobNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobNode")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("state", &self.state())
            .field("predecessors", &self.predecessors)
            .field("successors", &self.successors)
            .finish()
    }
}
