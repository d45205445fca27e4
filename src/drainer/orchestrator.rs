//! Drain pass orchestration.
//!
//! A [`Drainer`] owns the blob graph and runs one event loop thread. Blob
//! completions, watchdog expirations and residual data all arrive there as
//! [`DrainEvent`]s, so successor notification and milestone counting happen
//! on a single thread and no backend callback ever re-enters the drainer.
//!
//! Milestones of a pass:
//!
//! 1. every blob has completed (`await_drained_intermediate`)
//! 2. residual data has been aggregated (`await_drain_data`)
//! 3. the drainer has been stopped (`await_drained`, final passes only)

use crate::blob::{DrainData, Item, Token};
use crate::config::DrainerConfig;
use crate::drainer::blob_graph::BlobGraph;
use crate::drainer::blob_node::{Completion, NodeIndex, NodeStatus};
use crate::drainer::events::DrainEvent;
use crate::drainer::latch::Latch;
use crate::drainer::messages::{BlobDrainedData, DrainType, NodeDrainMessage};
use crate::drainer::statistics::DrainStatistics;
use crate::drainer::strategy::DrainStrategy;
use crate::drainer::watchdog::Watchdog;
use crate::error::{DrainError, Result, ResultExt};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Kind of drain pass to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrainMode {
    /// Drain, collect residual data, then let the graph resume
    Intermediate,
    /// Final drain whose backend preparation treats the pass as non-final
    SemiFinal,
    /// Final drain; the graph shuts down afterwards
    Final,
}

impl DrainMode {
    /// Drainer state for the pass and the `is_final` flag given to
    /// `prepare_draining`.
    fn target(self) -> (DrainerState, bool) {
        match self {
            DrainMode::Intermediate => (DrainerState::Intermediate, false),
            DrainMode::SemiFinal => (DrainerState::Final, false),
            DrainMode::Final => (DrainerState::Final, true),
        }
    }
}

/// Drainer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrainerState {
    /// No pass in progress
    NoDrain,
    /// An intermediate pass is in progress
    Intermediate,
    /// A final pass has been started; no further passes are accepted
    Final,
}

/// Bookkeeping for one drain pass.
struct Pass {
    generation: u64,
    drain_type: DrainType,
    /// Opens when every blob has completed
    drained: Latch,
    /// Opens when residual data has been aggregated
    drain_data: Latch,
    completed: AtomicUsize,
    received: AtomicUsize,
}

impl Pass {
    /// Placeholder before the first pass; every milestone is reached.
    fn idle() -> Self {
        Self {
            generation: 0,
            drain_type: DrainType::Discard,
            drained: Latch::open(),
            drain_data: Latch::open(),
            completed: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        }
    }

    fn new(generation: u64, drain_type: DrainType, collect_drain_data: bool) -> Self {
        Self {
            generation,
            drain_type,
            drained: Latch::new(1),
            drain_data: if collect_drain_data {
                Latch::new(1)
            } else {
                Latch::open()
            },
            completed: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
        }
    }
}

/// State shared by the drainer, its event loop and every handle.
struct Core {
    graph: BlobGraph,
    config: DrainerConfig,
    state: Mutex<DrainerState>,
    pass: Mutex<Arc<Pass>>,
    final_latch: Latch,
    drain_data: Mutex<Option<DrainData>>,
    statistics: Mutex<DrainStatistics>,
    events: Sender<DrainEvent>,
    watchdog: Option<Watchdog>,
}

impl Core {
    fn lock_state(&self) -> MutexGuard<'_, DrainerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_pass(&self) -> Arc<Pass> {
        self.pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_pass(&self, pass: Arc<Pass>) {
        *self.pass.lock().unwrap_or_else(PoisonError::into_inner) = pass;
    }

    /// Move `idx` to `DrainRequested`, arm its watchdog and ask the backend
    /// to drain it.
    fn drain_node(
        &self,
        idx: NodeIndex,
        pass: &Pass,
        strategy: &dyn DrainStrategy,
        handle: &DrainHandle,
    ) {
        let node = self.graph.node_at(idx);
        if let Err(e) = node.request_drain() {
            tracing::error!("Cannot drain blob: {}", e);
            return;
        }
        tracing::debug!("Draining blob {} ({:?})", node.id(), pass.drain_type);

        if let Some(watchdog) = &self.watchdog {
            if let Err(e) =
                watchdog.schedule(idx, pass.generation, self.config.deadlock_timeout())
            {
                tracing::warn!("Failed to arm watchdog for blob {}: {}", node.id(), e);
            }
        }
        strategy.drain(node.id(), pass.drain_type, handle);
    }

    /// Combine every blob's residual data into one snapshot.
    ///
    /// Internal data of all blobs first; then, per boundary token, the
    /// unconsumed input items followed by the undelivered output items.
    fn aggregate_drain_data(&self) -> Result<DrainData> {
        let mut internal = DrainData::empty();
        let mut input_data: BTreeMap<Token, Vec<Item>> = BTreeMap::new();
        let mut output_data: BTreeMap<Token, Vec<Item>> = BTreeMap::new();

        for node in self.graph.nodes() {
            let Some(data) = node.drain_data() else {
                tracing::error!("Blob {} reported no drain data", node.id());
                continue;
            };
            internal = internal.merge(&data.drain_data)?;
            input_data.extend(data.input_data);
            output_data.extend(data.output_data);
        }

        let mut boundary = input_data;
        for (token, items) in output_data {
            boundary.entry(token).or_default().extend(items);
        }
        internal.merge(&DrainData::from_data(boundary))
    }
}

/// Cheap, cloneable entry point for backends reporting drain progress.
#[derive(Clone)]
pub struct DrainHandle {
    core: Arc<Core>,
}

impl DrainHandle {
    /// Report that `blob` has finished draining.
    pub fn drained(&self, blob: Token) -> Result<()> {
        let node = self
            .core
            .graph
            .node(blob)
            .ok_or(DrainError::UnknownBlob(blob))?;
        let completion = node.mark_drained()?;
        tracing::debug!("Blob {} drained", blob);
        self.core
            .events
            .send(DrainEvent::Completed {
                node: node.index(),
                completion,
            })
            .map_err(|_| DrainError::ChannelClosed)
    }

    /// Deliver a blob's residual data for the current pass.
    ///
    /// Ignored when the drainer does not collect drain data.
    pub fn submit_drain_data(&self, data: BlobDrainedData) -> Result<()> {
        let blob = data.blob;
        let node = self
            .core
            .graph
            .node(blob)
            .ok_or(DrainError::UnknownBlob(blob))?;
        if !self.core.config.collect_drain_data {
            tracing::debug!("Ignoring drain data of blob {}: collection disabled", blob);
            return Ok(());
        }

        let generation = self.core.current_pass().generation;
        node.set_drain_data(data)?;
        self.core
            .events
            .send(DrainEvent::DrainDataReceived {
                node: node.index(),
                generation,
            })
            .map_err(|_| DrainError::ChannelClosed)
    }

    /// Dispatch a message received from a blob host.
    pub fn process(&self, message: NodeDrainMessage) -> Result<()> {
        match message {
            NodeDrainMessage::Drained { blob } => self.drained(blob),
            NodeDrainMessage::DrainedData(data) => self.submit_drain_data(data),
        }
    }

    pub fn graph(&self) -> &BlobGraph {
        &self.core.graph
    }
}

/// Single consumer of [`DrainEvent`]s.
struct EventLoop {
    core: Arc<Core>,
    strategy: Arc<dyn DrainStrategy>,
    handle: DrainHandle,
    events: Receiver<DrainEvent>,
}

impl EventLoop {
    fn run(self) {
        tracing::debug!("Drainer event loop started");
        for event in self.events.iter() {
            match event {
                DrainEvent::Completed { node, completion } => self.on_completed(node, completion),
                DrainEvent::WatchdogFired { node, generation } => {
                    self.on_watchdog(node, generation)
                }
                DrainEvent::DrainDataReceived { node, generation } => {
                    self.on_drain_data(node, generation)
                }
                DrainEvent::Shutdown => break,
            }
        }
        tracing::debug!("Drainer event loop stopped");
    }

    fn on_completed(&self, idx: NodeIndex, completion: Completion) {
        let pass = self.core.current_pass();
        if completion == Completion::Propagate {
            self.release_successors(idx, &pass);
        }

        let blob = self.core.graph.node_at(idx).id();
        self.strategy
            .blob_drained(blob, pass.drain_type, &self.handle);

        let completed = pass.completed.fetch_add(1, Ordering::AcqRel) + 1;
        if completed == self.core.graph.len() {
            self.all_completed(&pass);
        }
    }

    fn on_watchdog(&self, idx: NodeIndex, generation: u64) {
        let pass = self.core.current_pass();
        if pass.generation != generation {
            return;
        }
        let node = self.core.graph.node_at(idx);
        if node.force_deadlock_handled() {
            tracing::warn!(
                "Blob {} did not drain within {:?}; releasing its successors",
                node.id(),
                self.core.config.deadlock_timeout()
            );
            self.release_successors(idx, &pass);
        }
    }

    fn release_successors(&self, idx: NodeIndex, pass: &Pass) {
        let node = self.core.graph.node_at(idx);
        for &succ in node.successors() {
            match self
                .core
                .graph
                .node_at(succ)
                .predecessor_drained(idx, node.id())
            {
                Ok(true) => {
                    self.core
                        .drain_node(succ, pass, self.strategy.as_ref(), &self.handle)
                }
                Ok(false) => {}
                Err(e) => tracing::error!("Drain protocol violation: {}", e),
            }
        }
    }

    fn all_completed(&self, pass: &Pass) {
        tracing::info!(
            "All {} blobs drained (pass {})",
            self.core.graph.len(),
            pass.generation
        );
        if let Some(watchdog) = &self.core.watchdog {
            watchdog.cancel_pass(pass.generation);
        }
        {
            let mut state = self.core.lock_state();
            if *state == DrainerState::Intermediate {
                *state = DrainerState::NoDrain;
            }
        }
        pass.drained.count_down();
    }

    fn on_drain_data(&self, _idx: NodeIndex, generation: u64) {
        let pass = self.core.current_pass();
        if pass.generation != generation {
            tracing::warn!("Dropping drain data from pass {}", generation);
            return;
        }
        let received = pass.received.fetch_add(1, Ordering::AcqRel) + 1;
        if received < self.core.graph.len() {
            return;
        }

        let aggregate = match self.core.aggregate_drain_data() {
            Ok(data) => {
                tracing::info!(
                    "Drain data aggregated: {} items on {} tokens",
                    data.item_count(),
                    data.data().len()
                );
                let mut statistics = self
                    .core
                    .statistics
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                statistics.record(&data);
                for (token, size) in statistics.last_nonempty() {
                    tracing::debug!("Residual data on {}: {}", token, size);
                }
                Some(data)
            }
            Err(e) => {
                tracing::error!("Failed to aggregate drain data: {}", e);
                None
            }
        };
        *self
            .core
            .drain_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = aggregate;
        pass.drain_data.count_down();
    }
}

/// Coordinates draining of a blob graph.
pub struct Drainer {
    core: Arc<Core>,
    strategy: Arc<dyn DrainStrategy>,
    handle: DrainHandle,
    event_loop: Option<JoinHandle<()>>,
}

impl Drainer {
    /// Create a drainer and start its event loop (and watchdog, if enabled).
    pub fn new(
        graph: BlobGraph,
        strategy: Arc<dyn DrainStrategy>,
        config: DrainerConfig,
    ) -> Result<Self> {
        config.validate().context("Drainer config rejected")?;
        let (tx, rx) = unbounded();
        let watchdog = if config.deadlock_handler {
            Some(Watchdog::spawn(tx.clone())?)
        } else {
            None
        };

        let core = Arc::new(Core {
            graph,
            config,
            state: Mutex::new(DrainerState::NoDrain),
            pass: Mutex::new(Arc::new(Pass::idle())),
            final_latch: Latch::new(1),
            drain_data: Mutex::new(None),
            statistics: Mutex::new(DrainStatistics::new()),
            events: tx,
            watchdog,
        });
        let handle = DrainHandle { core: core.clone() };

        let event_loop = EventLoop {
            core: core.clone(),
            strategy: strategy.clone(),
            handle: handle.clone(),
            events: rx,
        };
        let thread = std::thread::Builder::new()
            .name("drainer-events".to_string())
            .spawn(move || event_loop.run())?;

        Ok(Self {
            core,
            strategy,
            handle,
            event_loop: Some(thread),
        })
    }

    /// Start a drain pass.
    ///
    /// Returns `Ok(false)` once a final pass has been started, and
    /// [`DrainError::AlreadyDraining`] while an intermediate pass is still
    /// draining or collecting residual data.
    pub fn start_draining(&self, mode: DrainMode) -> Result<bool> {
        let mut state = self.core.lock_state();
        match *state {
            DrainerState::NoDrain => {}
            DrainerState::Final => {
                tracing::debug!("Final drain already started; ignoring {:?}", mode);
                return Ok(false);
            }
            DrainerState::Intermediate => return Err(DrainError::AlreadyDraining),
        }
        let previous = self.core.current_pass();
        if !previous.drain_data.is_open() {
            return Err(DrainError::AlreadyDraining);
        }

        let (target, is_final) = mode.target();
        let collect = self.core.config.collect_drain_data;
        let drain_type = match (collect, target) {
            (false, _) => DrainType::Discard,
            (true, DrainerState::Final) => DrainType::Final,
            (true, _) => DrainType::Intermediate,
        };

        self.core.graph.reset();
        let pass = Arc::new(Pass::new(previous.generation + 1, drain_type, collect));
        self.core.set_pass(pass.clone());
        *state = target;

        if let Err(e) = self.strategy.prepare_draining(is_final, &self.handle) {
            tracing::error!("No drain started: prepare_draining failed: {}", e);
            *state = DrainerState::NoDrain;
            self.core.set_pass(previous);
            return Err(e);
        }

        tracing::info!(
            "Draining started: {:?} (pass {}, {:?})",
            mode,
            pass.generation,
            drain_type
        );
        let source = self.core.graph.source().index();
        self.core
            .drain_node(source, &pass, self.strategy.as_ref(), &self.handle);
        Ok(true)
    }

    /// Run one intermediate pass to completion, residual data included.
    ///
    /// Returns `Ok(false)` if a final drain has already been started.
    pub fn drain_intermediate(&self) -> Result<bool> {
        if !self.start_draining(DrainMode::Intermediate)? {
            tracing::warn!("Final drain has already been called; no more intermediate draining");
            return Ok(false);
        }
        self.await_drained_intermediate();
        self.strategy.draining_done(false);
        self.await_drain_data();
        Ok(true)
    }

    /// Run the final pass to completion and stop the drainer.
    pub fn drain_final(&self, semi_final: bool) -> Result<bool> {
        let mode = if semi_final {
            DrainMode::SemiFinal
        } else {
            DrainMode::Final
        };
        if !self.start_draining(mode)? {
            return Ok(false);
        }
        self.await_drained_intermediate();
        self.strategy.draining_done(false);
        self.await_drain_data();
        self.strategy.draining_done(true);
        self.stop()?;
        Ok(true)
    }

    /// Block until every blob of the current pass has completed.
    pub fn await_drained_intermediate(&self) {
        self.core.current_pass().drained.wait();
    }

    pub fn await_drained_intermediate_timeout(&self, timeout: Duration) -> Result<()> {
        if self.core.current_pass().drained.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(DrainError::Timeout(format!(
                "blobs still draining after {:?}",
                timeout
            )))
        }
    }

    /// Block until the current pass's residual data is aggregated and return it.
    ///
    /// `None` when drain data is not collected or aggregation failed.
    pub fn await_drain_data(&self) -> Option<DrainData> {
        self.core.current_pass().drain_data.wait();
        self.drain_data()
    }

    pub fn await_drain_data_timeout(&self, timeout: Duration) -> Result<Option<DrainData>> {
        if self.core.current_pass().drain_data.wait_timeout(timeout) {
            Ok(self.drain_data())
        } else {
            Err(DrainError::Timeout(format!(
                "drain data incomplete after {:?}",
                timeout
            )))
        }
    }

    /// Block until [`stop`](Self::stop) has been called.
    pub fn await_drained(&self) {
        self.core.final_latch.wait();
    }

    pub fn await_drained_timeout(&self, timeout: Duration) -> Result<()> {
        if self.core.final_latch.wait_timeout(timeout) {
            Ok(())
        } else {
            Err(DrainError::Timeout(format!(
                "drainer not stopped after {:?}",
                timeout
            )))
        }
    }

    pub fn is_drained(&self) -> bool {
        self.core.final_latch.is_open()
    }

    /// Release everyone waiting in [`await_drained`](Self::await_drained).
    pub fn stop(&self) -> Result<()> {
        if *self.core.lock_state() == DrainerState::Intermediate {
            return Err(DrainError::StopDuringIntermediateDrain);
        }
        self.core.final_latch.count_down();
        tracing::info!("Drainer stopped");
        Ok(())
    }

    pub fn state(&self) -> DrainerState {
        *self.core.lock_state()
    }

    /// Most recent aggregated residual data.
    pub fn drain_data(&self) -> Option<DrainData> {
        self.core
            .drain_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain state of every blob, in blob id order.
    pub fn status(&self) -> Vec<NodeStatus> {
        self.core.graph.nodes().iter().map(|n| n.snapshot()).collect()
    }

    pub fn handle(&self) -> DrainHandle {
        self.handle.clone()
    }

    pub fn graph(&self) -> &BlobGraph {
        &self.core.graph
    }

    pub fn config(&self) -> &DrainerConfig {
        &self.core.config
    }

    pub fn statistics(&self) -> DrainStatistics {
        self.core
            .statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write statistics to the configured directory. Failures are logged,
    /// never returned.
    pub fn dump_statistics(&self) -> Option<PathBuf> {
        let dir = self.core.config.statistics_dir.as_ref()?;
        match self.statistics().dump(dir, &self.core.config.app_name) {
            Ok(path) => {
                tracing::info!("Drain statistics written to {:?}", path);
                Some(path)
            }
            Err(e) => {
                tracing::error!("Failed to write drain statistics: {}", e);
                None
            }
        }
    }
}

impl Drop for Drainer {
    fn drop(&mut self) {
        let _ = self.core.events.send(DrainEvent::Shutdown);
        if let Some(thread) = self.event_loop.take() {
            if thread.join().is_err() {
                tracing::error!("Drainer event loop panicked");
            }
        }
        if let Some(watchdog) = &self.core.watchdog {
            watchdog.shutdown();
        }
    }
}
