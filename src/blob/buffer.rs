//! The buffer contract used on every inter-blob edge.
//!
//! A [`Buffer`] is a FIFO handoff of opaque items across a concurrent or
//! networked boundary. Reads and writes never fail because the buffer is
//! momentarily empty or full; they report "no data" / "not written" and the
//! caller retries. Blocking variants (see [`BlockingPolicy`](super::BlockingPolicy))
//! follow the same contract: an interrupted wait returns exactly like a
//! nonblocking miss, so callers retry the same way in every configuration.
//!
//! `size()` and `capacity()` may be stale under concurrency. A lone reader may
//! treat `size()` as a lower bound on readable items; a lone writer may treat
//! it as an upper bound on occupied slots.

use crate::error::{DrainError, Result};
use std::collections::VecDeque;
use std::sync::Arc;

/// Result of a single-item write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// The item is now in the buffer.
    Written,
    /// The buffer had no room; the item is handed back to the caller.
    Rejected(T),
}

impl<T> WriteOutcome<T> {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written)
    }

    /// The rejected item, if any.
    pub fn into_rejected(self) -> Option<T> {
        match self {
            WriteOutcome::Written => None,
            WriteOutcome::Rejected(item) => Some(item),
        }
    }
}

/// FIFO handoff between blobs.
pub trait Buffer<T>: Send + Sync {
    /// Read one item, or `None` if none is available.
    fn read(&self) -> Result<Option<T>>;

    /// Read up to `max` items into `dst`, returning how many were read.
    ///
    /// Partial reads are allowed.
    fn read_into(&self, dst: &mut Vec<T>, max: usize) -> Result<usize> {
        let mut read = 0;
        while read < max {
            match self.read()? {
                Some(item) => {
                    dst.push(item);
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }

    /// Read exactly `count` items, or nothing at all.
    ///
    /// Returns `Ok(None)` and leaves the buffer unchanged when fewer than
    /// `count` items are available. Asking for more than `capacity()` items is
    /// a contract violation (the call could never succeed) and fails with
    /// [`DrainError::CapacityExceeded`].
    fn read_all(&self, count: usize) -> Result<Option<Vec<T>>>;

    /// Write one item.
    fn write(&self, item: T) -> Result<WriteOutcome<T>>;

    /// Write items from the front of `src` until it is empty or the buffer is
    /// full. Written items are removed from `src`; returns how many were written.
    fn write_from(&self, src: &mut VecDeque<T>) -> Result<usize> {
        let mut written = 0;
        while let Some(item) = src.pop_front() {
            match self.write(item)? {
                WriteOutcome::Written => written += 1,
                WriteOutcome::Rejected(item) => {
                    src.push_front(item);
                    break;
                }
            }
        }
        Ok(written)
    }

    /// Number of items currently buffered (possibly stale).
    fn size(&self) -> usize;

    /// Maximum number of items the buffer can hold (possibly stale).
    fn capacity(&self) -> usize;

    /// Release every reader or writer currently blocked on this buffer.
    ///
    /// Released calls return as if the buffer had been empty (reads) or full
    /// (writes). Nonblocking buffers ignore this.
    fn interrupt(&self) {}
}

/// Shared handle to a buffer of opaque items, as installed on blob channels.
pub type SharedBuffer<T> = Arc<dyn Buffer<T>>;

/// View of a buffer that only permits reading.
pub struct ReadOnlyBuffer<T> {
    inner: SharedBuffer<T>,
}

impl<T> ReadOnlyBuffer<T> {
    pub fn new(inner: SharedBuffer<T>) -> Self {
        Self { inner }
    }
}

impl<T: Send + 'static> Buffer<T> for ReadOnlyBuffer<T> {
    fn read(&self) -> Result<Option<T>> {
        self.inner.read()
    }

    fn read_into(&self, dst: &mut Vec<T>, max: usize) -> Result<usize> {
        self.inner.read_into(dst, max)
    }

    fn read_all(&self, count: usize) -> Result<Option<Vec<T>>> {
        self.inner.read_all(count)
    }

    fn write(&self, _item: T) -> Result<WriteOutcome<T>> {
        Err(DrainError::Unsupported("read-only buffer"))
    }

    fn write_from(&self, _src: &mut VecDeque<T>) -> Result<usize> {
        Err(DrainError::Unsupported("read-only buffer"))
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn interrupt(&self) {
        self.inner.interrupt()
    }
}

/// View of a buffer that only permits writing.
pub struct WriteOnlyBuffer<T> {
    inner: SharedBuffer<T>,
}

impl<T> WriteOnlyBuffer<T> {
    pub fn new(inner: SharedBuffer<T>) -> Self {
        Self { inner }
    }
}

impl<T: Send + 'static> Buffer<T> for WriteOnlyBuffer<T> {
    fn read(&self) -> Result<Option<T>> {
        Err(DrainError::Unsupported("write-only buffer"))
    }

    fn read_into(&self, _dst: &mut Vec<T>, _max: usize) -> Result<usize> {
        Err(DrainError::Unsupported("write-only buffer"))
    }

    fn read_all(&self, _count: usize) -> Result<Option<Vec<T>>> {
        Err(DrainError::Unsupported("write-only buffer"))
    }

    fn write(&self, item: T) -> Result<WriteOutcome<T>> {
        self.inner.write(item)
    }

    fn write_from(&self, src: &mut VecDeque<T>) -> Result<usize> {
        self.inner.write_from(src)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn interrupt(&self) {
        self.inner.interrupt()
    }
}
