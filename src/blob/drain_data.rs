//! Residual data captured at a drain point.
//!
//! [`DrainData`] is an immutable snapshot of everything a drain pass left
//! behind: the unconsumed items on each edge, in FIFO order, and the captured
//! field values of stateful workers. Snapshots from different blobs are
//! combined with [`DrainData::merge`]; a resumed graph takes back only its
//! share with [`DrainData::subset`].

use crate::blob::item::Item;
use crate::blob::token::{Token, WorkerId};
use crate::error::{DrainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-worker captured state: field name to value.
pub type WorkerState = BTreeMap<String, Item>;

/// Immutable snapshot of residual items and worker state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DrainData {
    #[serde(with = "crate::blob::token::token_map")]
    data: BTreeMap<Token, Vec<Item>>,
    state: BTreeMap<WorkerId, WorkerState>,
}

impl DrainData {
    pub fn new(data: BTreeMap<Token, Vec<Item>>, state: BTreeMap<WorkerId, WorkerState>) -> Self {
        Self { data, state }
    }

    /// Snapshot with no items and no state.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot holding only edge data.
    pub fn from_data(data: BTreeMap<Token, Vec<Item>>) -> Self {
        Self {
            data,
            state: BTreeMap::new(),
        }
    }

    pub fn data(&self) -> &BTreeMap<Token, Vec<Item>> {
        &self.data
    }

    /// Items left on `token`, if the snapshot mentions it.
    pub fn data_for(&self, token: Token) -> Option<&[Item]> {
        self.data.get(&token).map(Vec::as_slice)
    }

    pub fn state(&self) -> &BTreeMap<WorkerId, WorkerState> {
        &self.state
    }

    pub fn worker_state(&self, worker: WorkerId) -> Option<&WorkerState> {
        self.state.get(&worker)
    }

    pub fn worker_state_field(&self, worker: WorkerId, field: &str) -> Option<&Item> {
        self.state.get(&worker).and_then(|row| row.get(field))
    }

    /// Whether the snapshot holds no items and no state.
    pub fn is_empty(&self) -> bool {
        self.data.values().all(Vec::is_empty) && self.state.is_empty()
    }

    /// Total number of residual items across all tokens.
    pub fn item_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }

    /// Combine two snapshots.
    ///
    /// Per token, `self`'s items come before `other`'s. The two snapshots must
    /// not both carry state for the same worker; one worker's state is never
    /// split across snapshots.
    pub fn merge(&self, other: &DrainData) -> Result<DrainData> {
        if let Some(worker) = self
            .state
            .keys()
            .find(|worker| other.state.contains_key(worker))
        {
            return Err(DrainError::BadMerge(*worker));
        }

        let mut data = self.data.clone();
        for (token, items) in &other.data {
            data.entry(*token)
                .or_default()
                .extend(items.iter().cloned());
        }

        let mut state = self.state.clone();
        state.extend(other.state.iter().map(|(k, v)| (*k, v.clone())));

        Ok(DrainData { data, state })
    }

    /// Restrict the snapshot to the given workers.
    ///
    /// Keeps the tokens read by `workers` and the state rows of those workers.
    /// Items on a token belong to its reader, so subsets of disjoint worker
    /// sets never share an item.
    pub fn subset(&self, workers: &BTreeSet<WorkerId>) -> DrainData {
        let data = self
            .data
            .iter()
            .filter(|(token, _)| workers.contains(&token.downstream()))
            .map(|(token, items)| (*token, items.clone()))
            .collect();
        let state = self
            .state
            .iter()
            .filter(|(worker, _)| workers.contains(worker))
            .map(|(worker, row)| (*worker, row.clone()))
            .collect();
        DrainData { data, state }
    }
}
