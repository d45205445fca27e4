use crate::blob::{blob_id, Blob, Item, Token};
use crate::concurrent::blob_thread::BlobThread;
use crate::drainer::{BlobDrainedData, BlobGraph, DrainHandle, DrainStrategy, DrainType};
use crate::error::{DrainError, Result, ResultExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Drains blobs that run on local threads.
///
/// Each blob is told to drain through [`Blob::drain`]; its callback reports
/// completion to the drainer. Once a blob has completed, its threads are
/// stopped and joined and, unless the pass discards residual data, the unread
/// contents of its input buffers are submitted together with the blob's own
/// drain data.
pub struct ConcurrentDrainStrategy {
    blobs: BTreeMap<Token, Arc<dyn Blob>>,
    threads: Mutex<BTreeMap<Token, Vec<BlobThread>>>,
}

impl ConcurrentDrainStrategy {
    /// Match `blobs` to the nodes of `graph`; every node needs exactly one blob.
    pub fn new(graph: &BlobGraph, blobs: impl IntoIterator<Item = Arc<dyn Blob>>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for blob in blobs {
            let id = blob_id(blob.as_ref()).ok_or_else(|| {
                DrainError::Config(format!(
                    "blob with workers {:?} has no input channels",
                    blob.workers()
                ))
            })?;
            if graph.index_of(id).is_none() || by_id.insert(id, blob).is_some() {
                return Err(DrainError::UnknownBlob(id));
            }
        }
        if let Some(missing) = graph.blob_ids().into_iter().find(|id| !by_id.contains_key(id)) {
            return Err(DrainError::UnknownBlob(missing));
        }

        Ok(Self {
            blobs: by_id,
            threads: Mutex::new(BTreeMap::new()),
        })
    }

    fn lock_threads(&self) -> MutexGuard<'_, BTreeMap<Token, Vec<BlobThread>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn one thread per core of every blob not already running.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.lock_threads();
        for (id, blob) in &self.blobs {
            if threads.contains_key(id) {
                continue;
            }
            let mut cores = Vec::with_capacity(blob.core_count());
            for core in 0..blob.core_count() {
                let name = format!("blob-{}-{}-core{}", id.upstream(), id.downstream(), core);
                cores.push(BlobThread::spawn(name, blob.core_code(core))?);
            }
            threads.insert(*id, cores);
        }
        tracing::info!("Started {} blobs", threads.len());
        Ok(())
    }

    pub fn blob(&self, id: Token) -> Option<&Arc<dyn Blob>> {
        self.blobs.get(&id)
    }

    pub fn blobs(&self) -> impl Iterator<Item = (&Token, &Arc<dyn Blob>)> {
        self.blobs.iter()
    }

    /// Stop and join the threads of `id`, releasing any blocked buffer waits.
    fn stop_blob(&self, id: Token) {
        let cores = self.lock_threads().remove(&id);
        let Some(mut cores) = cores else {
            return;
        };
        for thread in &cores {
            thread.request_stop();
        }
        if let Some(blob) = self.blobs.get(&id) {
            for buffer in blob.input_channels().values().chain(blob.output_channels().values()) {
                buffer.interrupt();
            }
        }
        for thread in &mut cores {
            thread.join();
        }
    }

    /// Stop every blob thread.
    pub fn stop_all(&self) {
        let ids: Vec<Token> = self.lock_threads().keys().copied().collect();
        for id in ids {
            self.stop_blob(id);
        }
    }

    fn residual_data(&self, id: Token, blob: &dyn Blob) -> Result<BlobDrainedData> {
        let mut input_data: BTreeMap<Token, Vec<Item>> = BTreeMap::new();
        for (token, buffer) in blob.input_channels() {
            let items = buffer
                .read_all(buffer.size())
                .with_context(|| format!("Failed to read residual input on {}", token))?
                .unwrap_or_default();
            input_data.insert(*token, items);
        }
        Ok(BlobDrainedData {
            blob: id,
            drain_data: blob.drain_data().unwrap_or_default(),
            input_data,
            output_data: blob.undelivered_output(),
        })
    }
}

impl DrainStrategy for ConcurrentDrainStrategy {
    fn drain(&self, blob: Token, _drain_type: DrainType, handle: &DrainHandle) {
        let Some(target) = self.blobs.get(&blob) else {
            tracing::error!("No blob registered for {}", blob);
            return;
        };
        let handle = handle.clone();
        target.drain(Box::new(move || {
            if let Err(e) = handle.drained(blob) {
                tracing::error!("Failed to report blob {} drained: {}", blob, e);
            }
        }));
    }

    fn blob_drained(&self, blob: Token, drain_type: DrainType, handle: &DrainHandle) {
        self.stop_blob(blob);
        if !drain_type.collects_data() {
            return;
        }
        let Some(target) = self.blobs.get(&blob) else {
            return;
        };
        let submitted = self
            .residual_data(blob, target.as_ref())
            .and_then(|data| handle.submit_drain_data(data));
        if let Err(e) = submitted {
            tracing::error!("Failed to collect drain data of blob {}: {}", blob, e);
        }
    }

    fn draining_done(&self, is_final: bool) {
        tracing::info!("Draining finished (final: {})", is_final);
    }
}

impl Drop for ConcurrentDrainStrategy {
    fn drop(&mut self) {
        self.stop_all();
    }
}
