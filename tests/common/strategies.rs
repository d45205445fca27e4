//! Drain strategies driven entirely by the test

use blobdrain::{BlobDrainedData, DrainHandle, DrainStrategy, DrainType, Token};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

/// Completes drain requests immediately, except for `stalled` blobs, and
/// submits pre-arranged residual data.
#[derive(Default)]
pub struct ScriptedStrategy {
    stalled: BTreeSet<Token>,
    residual: BTreeMap<Token, BlobDrainedData>,
    /// Every `drain` call, in order
    pub drains: Mutex<Vec<(Token, DrainType)>>,
    /// Every `blob_drained` call, in order
    pub completions: Mutex<Vec<Token>>,
    /// Flags passed to `prepare_draining`
    pub prepared: Mutex<Vec<bool>>,
    /// Flags passed to `draining_done`
    pub finished: Mutex<Vec<bool>>,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never report `blob` drained on its own.
    pub fn stall(mut self, blob: Token) -> Self {
        self.stalled.insert(blob);
        self
    }

    /// Residual data submitted for `data.blob` once it has drained.
    pub fn with_residual(mut self, data: BlobDrainedData) -> Self {
        self.residual.insert(data.blob, data);
        self
    }

    pub fn drained_blobs(&self) -> Vec<Token> {
        self.drains.lock().unwrap().iter().map(|(blob, _)| *blob).collect()
    }

    pub fn drain_types(&self) -> Vec<DrainType> {
        self.drains.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl DrainStrategy for ScriptedStrategy {
    fn prepare_draining(&self, is_final: bool, _handle: &DrainHandle) -> blobdrain::Result<()> {
        self.prepared.lock().unwrap().push(is_final);
        Ok(())
    }

    fn drain(&self, blob: Token, drain_type: DrainType, handle: &DrainHandle) {
        self.drains.lock().unwrap().push((blob, drain_type));
        if !self.stalled.contains(&blob) {
            handle.drained(blob).unwrap();
        }
    }

    fn blob_drained(&self, blob: Token, drain_type: DrainType, handle: &DrainHandle) {
        self.completions.lock().unwrap().push(blob);
        if drain_type.collects_data() {
            let data = self
                .residual
                .get(&blob)
                .cloned()
                .unwrap_or_else(|| BlobDrainedData::empty(blob));
            handle.submit_drain_data(data).unwrap();
        }
    }

    fn draining_done(&self, is_final: bool) {
        self.finished.lock().unwrap().push(is_final);
    }
}
