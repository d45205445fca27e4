//! Lock-protected FIFO buffers.
//!
//! [`QueueBuffer`] backs every in-process edge. It comes in three flavours:
//!
//! - [`QueueBuffer::unbounded`] - grows without limit, never blocks.
//! - [`QueueBuffer::bounded`] - fixed capacity, never blocks.
//! - [`QueueBuffer::blocking`] - fixed capacity; readers and/or writers wait
//!   according to a [`BlockingPolicy`].
//!
//! Every operation runs under one mutex, which is what makes
//! [`Buffer::read_all`] atomic with respect to concurrent single reads.

use crate::blob::buffer::{Buffer, WriteOutcome};
use crate::error::{DrainError, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Which side of a buffer waits instead of returning immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockingPolicy {
    pub reader_blocks: bool,
    pub writer_blocks: bool,
}

impl BlockingPolicy {
    pub const NONBLOCKING: BlockingPolicy = BlockingPolicy {
        reader_blocks: false,
        writer_blocks: false,
    };

    pub const BOTH: BlockingPolicy = BlockingPolicy {
        reader_blocks: true,
        writer_blocks: true,
    };

    pub fn reader() -> Self {
        Self {
            reader_blocks: true,
            writer_blocks: false,
        }
    }

    pub fn writer() -> Self {
        Self {
            reader_blocks: false,
            writer_blocks: true,
        }
    }
}

struct Queue<T> {
    items: VecDeque<T>,
    /// Bumped by `interrupt()`; a waiter that sees it change gives up.
    interrupt_epoch: u64,
}

/// FIFO buffer over a mutex-protected deque.
pub struct QueueBuffer<T> {
    queue: Mutex<Queue<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: BlockingPolicy,
}

impl<T> QueueBuffer<T> {
    /// Unbounded, nonblocking buffer.
    pub fn unbounded() -> Self {
        Self::with_policy(usize::MAX, BlockingPolicy::NONBLOCKING)
    }

    /// Bounded, nonblocking buffer. A zero capacity is a configuration error.
    pub fn bounded(capacity: usize) -> Result<Self> {
        Self::checked(capacity, BlockingPolicy::NONBLOCKING)
    }

    /// Bounded buffer whose readers and/or writers block.
    pub fn blocking(capacity: usize, policy: BlockingPolicy) -> Result<Self> {
        Self::checked(capacity, policy)
    }

    /// Unbounded buffer pre-filled with `items`, e.g. to replay drain data.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let buffer = Self::unbounded();
        buffer.lock().items.extend(items);
        buffer
    }

    fn checked(capacity: usize, policy: BlockingPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(DrainError::Config(
                "buffer capacity must be positive".to_string(),
            ));
        }
        Ok(Self::with_policy(capacity, policy))
    }

    fn with_policy(capacity: usize, policy: BlockingPolicy) -> Self {
        let initial = if capacity == usize::MAX { 0 } else { capacity };
        Self {
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(initial.min(4096)),
                interrupt_epoch: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        }
    }

    pub fn policy(&self) -> BlockingPolicy {
        self.policy
    }

    /// Remove and return everything currently buffered.
    pub fn take_all(&self) -> Vec<T> {
        let items: Vec<T> = self.lock().items.drain(..).collect();
        self.not_full.notify_all();
        items
    }

    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until at least one item is present, unless interrupted.
    fn wait_not_empty<'a>(&self, mut guard: MutexGuard<'a, Queue<T>>) -> MutexGuard<'a, Queue<T>> {
        let epoch = guard.interrupt_epoch;
        while guard.items.is_empty() && guard.interrupt_epoch == epoch {
            guard = self
                .not_empty
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        guard
    }

    /// Wait until there is room for one more item, unless interrupted.
    fn wait_not_full<'a>(&self, mut guard: MutexGuard<'a, Queue<T>>) -> MutexGuard<'a, Queue<T>> {
        let epoch = guard.interrupt_epoch;
        while guard.items.len() >= self.capacity && guard.interrupt_epoch == epoch {
            guard = self
                .not_full
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        guard
    }
}

impl<T: Send> Buffer<T> for QueueBuffer<T> {
    fn read(&self) -> Result<Option<T>> {
        let mut guard = self.lock();
        if self.policy.reader_blocks {
            guard = self.wait_not_empty(guard);
        }
        let item = guard.items.pop_front();
        drop(guard);
        if item.is_some() {
            self.not_full.notify_one();
        }
        Ok(item)
    }

    fn read_into(&self, dst: &mut Vec<T>, max: usize) -> Result<usize> {
        if max == 0 {
            return Ok(0);
        }
        let mut guard = self.lock();
        if self.policy.reader_blocks {
            guard = self.wait_not_empty(guard);
        }
        let n = max.min(guard.items.len());
        dst.extend(guard.items.drain(..n));
        drop(guard);
        if n > 0 {
            self.not_full.notify_all();
        }
        Ok(n)
    }

    fn read_all(&self, count: usize) -> Result<Option<Vec<T>>> {
        if count > self.capacity {
            return Err(DrainError::CapacityExceeded {
                requested: count,
                capacity: self.capacity,
            });
        }
        // Never waits, even for blocking readers: once committed to an atomic
        // bulk read there is nothing to interrupt.
        let mut guard = self.lock();
        if guard.items.len() < count {
            return Ok(None);
        }
        let items: Vec<T> = guard.items.drain(..count).collect();
        drop(guard);
        if count > 0 {
            self.not_full.notify_all();
        }
        Ok(Some(items))
    }

    fn write(&self, item: T) -> Result<WriteOutcome<T>> {
        let mut guard = self.lock();
        if self.policy.writer_blocks {
            guard = self.wait_not_full(guard);
        }
        if guard.items.len() >= self.capacity {
            return Ok(WriteOutcome::Rejected(item));
        }
        guard.items.push_back(item);
        drop(guard);
        self.not_empty.notify_one();
        Ok(WriteOutcome::Written)
    }

    fn write_from(&self, src: &mut VecDeque<T>) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let mut guard = self.lock();
        if self.policy.writer_blocks {
            guard = self.wait_not_full(guard);
        }
        let room = self.capacity.saturating_sub(guard.items.len());
        let n = room.min(src.len());
        guard.items.extend(src.drain(..n));
        drop(guard);
        if n > 0 {
            self.not_empty.notify_all();
        }
        Ok(n)
    }

    fn size(&self) -> usize {
        self.lock().items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn interrupt(&self) {
        self.lock().interrupt_epoch += 1;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
