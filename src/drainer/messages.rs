//! Drain protocol messages exchanged with remote blob hosts.
//!
//! The controller sends [`ControllerDrainMessage`]s; hosts answer with
//! [`NodeDrainMessage`]s which are fed back through
//! [`DrainHandle::process`](crate::drainer::DrainHandle::process).

use crate::blob::{DrainData, Item, Token};
use crate::drainer::{DrainHandle, DrainStrategy};
use crate::error::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a blob should do with its residual data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrainType {
    /// Throw residual data away
    Discard,
    /// Keep residual data; the graph will be resumed
    Intermediate,
    /// Keep residual data; the graph is shutting down
    Final,
}

impl DrainType {
    /// Whether the blob has to report residual data.
    pub fn collects_data(self) -> bool {
        !matches!(self, DrainType::Discard)
    }
}

/// Residual data reported by one blob after it drained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDrainedData {
    /// Blob that produced the data
    pub blob: Token,
    /// Internal edge items and worker state
    pub drain_data: DrainData,
    /// Unconsumed items left in boundary input buffers
    #[serde(with = "crate::blob::token::token_map")]
    pub input_data: BTreeMap<Token, Vec<Item>>,
    /// Produced items not yet delivered downstream
    #[serde(with = "crate::blob::token::token_map")]
    pub output_data: BTreeMap<Token, Vec<Item>>,
}

impl BlobDrainedData {
    /// Data for a blob that left nothing behind.
    pub fn empty(blob: Token) -> Self {
        Self {
            blob,
            drain_data: DrainData::empty(),
            input_data: BTreeMap::new(),
            output_data: BTreeMap::new(),
        }
    }
}

/// Controller to blob host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControllerDrainMessage {
    /// Start draining `blob`
    DoDrain { blob: Token, drain_type: DrainType },
    /// Send residual data of the listed blobs
    DrainDataRequest { blobs: Vec<Token> },
}

/// Blob host to controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeDrainMessage {
    /// `blob` has finished draining
    Drained { blob: Token },
    /// Residual data of a drained blob
    DrainedData(BlobDrainedData),
}

/// Strategy that forwards drain requests as [`ControllerDrainMessage`]s.
///
/// Replies are expected back through [`DrainHandle::process`].
pub struct MessageDrainStrategy {
    outbox: Sender<ControllerDrainMessage>,
}

impl MessageDrainStrategy {
    pub fn new(outbox: Sender<ControllerDrainMessage>) -> Self {
        Self { outbox }
    }

    /// Strategy plus the receiving end of its outbox.
    pub fn channel() -> (Self, Receiver<ControllerDrainMessage>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    fn send(&self, message: ControllerDrainMessage) {
        if let Err(e) = self.outbox.send(message) {
            tracing::error!("Failed to send drain message {:?}: receiver gone", e.0);
        }
    }
}

impl DrainStrategy for MessageDrainStrategy {
    fn prepare_draining(&self, is_final: bool, _handle: &DrainHandle) -> Result<()> {
        tracing::debug!("Remote draining started (final: {})", is_final);
        Ok(())
    }

    fn drain(&self, blob: Token, drain_type: DrainType, _handle: &DrainHandle) {
        self.send(ControllerDrainMessage::DoDrain { blob, drain_type });
    }

    fn blob_drained(&self, blob: Token, drain_type: DrainType, _handle: &DrainHandle) {
        if drain_type.collects_data() {
            self.send(ControllerDrainMessage::DrainDataRequest { blobs: vec![blob] });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drained_data_json() {
        let data = BlobDrainedData {
            blob: Token::new(0, 1),
            drain_data: DrainData::empty(),
            input_data: BTreeMap::from([(Token::new(0, 1), vec![Item::Int(7)])]),
            output_data: BTreeMap::new(),
        };
        let message = NodeDrainMessage::DrainedData(data);
        let json = serde_json::to_string(&message).unwrap();
        let back: NodeDrainMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_empty_drained_data_carries_only_the_blob() {
        let data = BlobDrainedData::empty(Token::new(2, 3));
        assert_eq!(data.blob, Token::new(2, 3));
        assert!(data.drain_data.is_empty());
        assert!(data.input_data.is_empty());
        assert!(data.output_data.is_empty());
    }

    #[test]
    fn test_drain_type_collects() {
        assert!(!DrainType::Discard.collects_data());
        assert!(DrainType::Intermediate.collects_data());
        assert!(DrainType::Final.collects_data());
    }
}
