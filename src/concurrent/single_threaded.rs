//! A one-core interpreted blob.
//!
//! [`SingleThreadedBlob`] applies a per-item function to everything arriving
//! on its input buffers and writes each result to every output buffer. It is
//! the simplest blob that honours the drain contract, and is what
//! [`SingleThreadedBlobFactory`] builds for each partition.

use crate::blob::{
    check_buffer_capacities, Blob, BlobFactory, Configuration, CoreCode, DrainCallback,
    DrainData, Item, QueueBuffer, SharedBuffer, Token, WorkerId, WorkerState,
};
use crate::drainer::StreamTopology;
use crate::error::{DrainError, Result, ResultExt};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Per-item transformation applied by a blob.
pub type WorkFn = Arc<dyn Fn(Item) -> Item + Send + Sync>;

/// Default sleep when a core iteration made no progress
pub const DEFAULT_IDLE_BACKOFF_US: u64 = 200;

/// Configuration key for the idle backoff, in microseconds
pub const IDLE_BACKOFF_KEY: &str = "idle_backoff_us";

/// State field holding the number of items processed
pub const FIRED_FIELD: &str = "fired";

/// Items taken from one input per iteration
const BATCH: usize = 64;

/// Idle iterations tolerated while flushing output during a drain
const DRAIN_FLUSH_RETRIES: usize = 1000;

const RUNNING: u8 = 0;
const DRAIN_REQUESTED: u8 = 1;
const DRAINED: u8 = 2;

struct BlobCore {
    state_worker: WorkerId,
    inputs: BTreeMap<Token, SharedBuffer<Item>>,
    outputs: BTreeMap<Token, SharedBuffer<Item>>,
    work: WorkFn,
    idle_backoff: Duration,
    /// Results not yet accepted by their output buffer
    pending: Mutex<BTreeMap<Token, VecDeque<Item>>>,
    fired: AtomicU64,
    phase: AtomicU8,
    /// Guards `phase` transitions together with the callback
    callback: Mutex<Option<DrainCallback>>,
}

impl BlobCore {
    fn lock_pending(&self) -> MutexGuard<'_, BTreeMap<Token, VecDeque<Item>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn inputs_empty(&self) -> bool {
        self.inputs.values().all(|buffer| buffer.size() == 0)
    }

    fn flush(&self, pending: &mut BTreeMap<Token, VecDeque<Item>>) -> Result<bool> {
        let mut progressed = false;
        for (token, queue) in pending.iter_mut() {
            if queue.is_empty() {
                continue;
            }
            if let Some(buffer) = self.outputs.get(token) {
                progressed |= buffer.write_from(queue)? > 0;
            }
        }
        Ok(progressed)
    }

    /// One round of work; returns whether anything moved.
    fn interpret(&self) -> Result<bool> {
        let mut pending = self.lock_pending();
        let mut progressed = self.flush(&mut pending)?;
        if pending.values().any(|queue| !queue.is_empty()) {
            // Output is backed up; leave input where it is.
            return Ok(progressed);
        }

        for buffer in self.inputs.values() {
            // `read_all` never blocks, whatever the buffer's policy.
            let available = buffer.size().min(BATCH);
            if available == 0 {
                continue;
            }
            let Some(items) = buffer.read_all(available)? else {
                continue;
            };
            for item in items {
                let result = (self.work)(item);
                self.fired.fetch_add(1, Ordering::Relaxed);
                for queue in pending.values_mut() {
                    queue.push_back(result.clone());
                }
            }
            progressed = true;
        }

        progressed |= self.flush(&mut pending)?;
        Ok(progressed)
    }

    /// Process remaining input, then mark the blob drained and run the callback.
    fn finish_draining(&self) {
        let mut idle = 0;
        loop {
            match self.interpret() {
                Ok(true) => idle = 0,
                Ok(false) => idle += 1,
                Err(e) => {
                    tracing::error!("Blob {} failed while draining: {}", self.state_worker, e);
                    break;
                }
            }
            let pending_empty = self.lock_pending().values().all(VecDeque::is_empty);
            if self.inputs_empty() && pending_empty {
                break;
            }
            if idle >= DRAIN_FLUSH_RETRIES {
                tracing::warn!(
                    "Blob {} could not deliver all output while draining",
                    self.state_worker
                );
                break;
            }
            if idle > 0 {
                std::thread::sleep(self.idle_backoff);
            }
        }

        let callback = {
            let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
            self.phase.store(DRAINED, Ordering::SeqCst);
            slot.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    fn run_core(&self) {
        match self.phase.load(Ordering::SeqCst) {
            RUNNING => match self.interpret() {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(self.idle_backoff),
                Err(e) => {
                    tracing::error!("Blob {} failed: {}", self.state_worker, e);
                    std::thread::sleep(self.idle_backoff);
                }
            },
            DRAIN_REQUESTED => self.finish_draining(),
            _ => std::thread::sleep(self.idle_backoff),
        }
    }
}

/// Blob with one core that maps every input item through a [`WorkFn`].
pub struct SingleThreadedBlob {
    workers: BTreeSet<WorkerId>,
    core: Arc<BlobCore>,
}

impl SingleThreadedBlob {
    pub fn new(
        workers: BTreeSet<WorkerId>,
        inputs: BTreeMap<Token, SharedBuffer<Item>>,
        outputs: BTreeMap<Token, SharedBuffer<Item>>,
        work: WorkFn,
    ) -> Result<Self> {
        let state_worker = *workers.iter().next().ok_or(DrainError::EmptyPartition(0))?;
        if inputs.is_empty() {
            return Err(DrainError::Config(format!(
                "blob with workers {:?} has no input channels",
                workers
            )));
        }
        let pending = outputs.keys().map(|t| (*t, VecDeque::new())).collect();

        Ok(Self {
            workers,
            core: Arc::new(BlobCore {
                state_worker,
                inputs,
                outputs,
                work,
                idle_backoff: Duration::from_micros(DEFAULT_IDLE_BACKOFF_US),
                pending: Mutex::new(pending),
                fired: AtomicU64::new(0),
                phase: AtomicU8::new(RUNNING),
                callback: Mutex::new(None),
            }),
        })
    }

    /// Set the sleep used when an iteration makes no progress.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.idle_backoff = backoff;
        }
        self
    }

    /// Resume the processed-item counter from captured state.
    pub fn with_fired(self, fired: u64) -> Self {
        self.core.fired.store(fired, Ordering::Relaxed);
        self
    }

    /// Number of items processed so far.
    pub fn fired(&self) -> u64 {
        self.core.fired.load(Ordering::Relaxed)
    }

    pub fn is_drained(&self) -> bool {
        self.core.phase.load(Ordering::SeqCst) == DRAINED
    }
}

impl Blob for SingleThreadedBlob {
    fn workers(&self) -> &BTreeSet<WorkerId> {
        &self.workers
    }

    fn input_channels(&self) -> &BTreeMap<Token, SharedBuffer<Item>> {
        &self.core.inputs
    }

    fn output_channels(&self) -> &BTreeMap<Token, SharedBuffer<Item>> {
        &self.core.outputs
    }

    fn core_count(&self) -> usize {
        1
    }

    fn core_code(&self, core: usize) -> CoreCode {
        debug_assert_eq!(core, 0, "SingleThreadedBlob has exactly one core");
        let inner = self.core.clone();
        Arc::new(move || inner.run_core())
    }

    fn drain(&self, callback: DrainCallback) {
        let mut slot = self
            .core
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.core.phase.load(Ordering::SeqCst) {
            RUNNING => {
                *slot = Some(callback);
                self.core.phase.store(DRAIN_REQUESTED, Ordering::SeqCst);
            }
            DRAINED => {
                // Nothing runs any more; finish right away.
                drop(slot);
                callback();
            }
            _ => tracing::error!("drain() called twice on blob {}", self.core.state_worker),
        }
    }

    fn drain_data(&self) -> Option<DrainData> {
        let mut row = WorkerState::new();
        row.insert(
            FIRED_FIELD.to_string(),
            Item::Int(self.fired() as i64),
        );
        Some(DrainData::new(
            BTreeMap::new(),
            BTreeMap::from([(self.core.state_worker, row)]),
        ))
    }

    fn undelivered_output(&self) -> BTreeMap<Token, Vec<Item>> {
        self.core
            .lock_pending()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(token, queue)| (*token, queue.iter().cloned().collect()))
            .collect()
    }
}

/// Builds [`SingleThreadedBlob`]s for partitions of a [`StreamTopology`].
///
/// Buffers are created on first use and shared between the blob writing a
/// token and the blob reading it.
pub struct SingleThreadedBlobFactory {
    topology: StreamTopology,
    work: WorkFn,
    /// Capacity of inter-blob buffers; overall input and output are unbounded
    buffer_capacity: Option<usize>,
    buffers: Mutex<BTreeMap<Token, SharedBuffer<Item>>>,
}

impl SingleThreadedBlobFactory {
    pub fn new(topology: StreamTopology, work: WorkFn) -> Self {
        Self {
            topology,
            work,
            buffer_capacity: None,
            buffers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    pub fn topology(&self) -> &StreamTopology {
        &self.topology
    }

    /// Buffer carrying `token`, created on first request.
    pub fn buffer(&self, token: Token) -> Result<SharedBuffer<Item>> {
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(buffer) = buffers.get(&token) {
            return Ok(buffer.clone());
        }
        let boundary = token.is_overall_input() || token.is_overall_output();
        let buffer: SharedBuffer<Item> = match self.buffer_capacity {
            Some(capacity) if !boundary => Arc::new(
                QueueBuffer::bounded(capacity)
                    .with_context(|| format!("Failed to create buffer for {}", token))?,
            ),
            _ => Arc::new(QueueBuffer::unbounded()),
        };
        buffers.insert(token, buffer.clone());
        Ok(buffer)
    }
}

impl BlobFactory for SingleThreadedBlobFactory {
    fn make_blob(
        &self,
        workers: &BTreeSet<WorkerId>,
        config: &Configuration,
        initial_state: Option<&DrainData>,
    ) -> Result<Arc<dyn Blob>> {
        if let Some(worker) = workers.iter().find(|w| !self.topology.contains(**w)) {
            return Err(DrainError::UnknownWorker(*worker));
        }
        let (inputs, outputs) = self.topology.external_edges(workers);
        let input_channels = inputs
            .iter()
            .map(|t| Ok((*t, self.buffer(*t)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let output_channels = outputs
            .iter()
            .map(|t| Ok((*t, self.buffer(*t)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mut fired = 0;
        if let Some(state) = initial_state {
            for (token, buffer) in &input_channels {
                let Some(items) = state.data_for(*token) else {
                    continue;
                };
                let mut queue: VecDeque<Item> = items.iter().cloned().collect();
                buffer
                    .write_from(&mut queue)
                    .with_context(|| format!("Failed to restore residual data on {}", token))?;
                if !queue.is_empty() {
                    return Err(DrainError::CapacityExceeded {
                        requested: items.len(),
                        capacity: buffer.capacity(),
                    });
                }
            }
            if let Some(first) = workers.iter().next() {
                fired = state
                    .worker_state_field(*first, FIRED_FIELD)
                    .and_then(Item::as_int)
                    .unwrap_or(0)
                    .max(0) as u64;
            }
        }

        let backoff_us = config
            .get(IDLE_BACKOFF_KEY)
            .and_then(Item::as_int)
            .map(|us| us.max(0) as u64)
            .unwrap_or(DEFAULT_IDLE_BACKOFF_US);

        let blob = SingleThreadedBlob::new(
            workers.clone(),
            input_channels,
            output_channels,
            self.work.clone(),
        )?
        .with_idle_backoff(Duration::from_micros(backoff_us))
        .with_fired(fired);
        check_buffer_capacities(&blob)?;
        Ok(Arc::new(blob))
    }

    fn default_configuration(&self, _workers: &BTreeSet<WorkerId>) -> Configuration {
        Configuration::new().with(IDLE_BACKOFF_KEY, DEFAULT_IDLE_BACKOFF_US as i64)
    }
}
