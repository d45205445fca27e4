//! Deadlock watchdog for drain passes.
//!
//! Every drained node gets a timer. When it expires while the node is still
//! in `DrainRequested`, the event loop forces the node to `DeadlockHandled`
//! and releases its successors, so a blob waiting on data that will never
//! arrive cannot stall the whole pass.
//!
//! All timers live on one thread. Timers are tagged with the pass generation
//! and dropped in bulk once that pass completes.

use crate::drainer::blob_node::NodeIndex;
use crate::drainer::events::DrainEvent;
use crate::error::{DrainError, Result};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug)]
enum WatchdogCommand {
    Schedule {
        node: NodeIndex,
        generation: u64,
        deadline: Instant,
    },
    CancelPass(u64),
    Shutdown,
}

/// Pending timer; ordered by deadline first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Timer {
    deadline: Instant,
    generation: u64,
    node: NodeIndex,
}

/// Handle to the watchdog timer thread.
pub(crate) struct Watchdog {
    commands: Sender<WatchdogCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Spawn the timer thread; expirations are sent to `events`.
    pub(crate) fn spawn(events: Sender<DrainEvent>) -> Result<Self> {
        let (tx, rx) = unbounded::<WatchdogCommand>();
        let thread = std::thread::Builder::new()
            .name("drain-watchdog".to_string())
            .spawn(move || {
                let mut timers: BinaryHeap<Reverse<Timer>> = BinaryHeap::new();
                loop {
                    let command = match timers.peek() {
                        Some(Reverse(next)) => rx.recv_deadline(next.deadline),
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };
                    match command {
                        Ok(WatchdogCommand::Schedule {
                            node,
                            generation,
                            deadline,
                        }) => timers.push(Reverse(Timer {
                            deadline,
                            generation,
                            node,
                        })),
                        Ok(WatchdogCommand::CancelPass(generation)) => {
                            timers.retain(|Reverse(timer)| timer.generation != generation);
                        }
                        Ok(WatchdogCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            break
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    let now = Instant::now();
                    while let Some(Reverse(timer)) = timers.peek().copied() {
                        if timer.deadline > now {
                            break;
                        }
                        timers.pop();
                        let event = DrainEvent::WatchdogFired {
                            node: timer.node,
                            generation: timer.generation,
                        };
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
                tracing::debug!("Drain watchdog stopped");
            })?;

        Ok(Self {
            commands: tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Arm a timer for `node` in pass `generation`.
    pub(crate) fn schedule(&self, node: NodeIndex, generation: u64, delay: Duration) -> Result<()> {
        self.commands
            .send(WatchdogCommand::Schedule {
                node,
                generation,
                deadline: Instant::now() + delay,
            })
            .map_err(|_| DrainError::ChannelClosed)
    }

    /// Drop every pending timer of pass `generation`.
    pub(crate) fn cancel_pass(&self, generation: u64) {
        let _ = self.commands.send(WatchdogCommand::CancelPass(generation));
    }

    /// Stop and join the timer thread. Idempotent.
    pub(crate) fn shutdown(&self) {
        let _ = self.commands.send(WatchdogCommand::Shutdown);
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Drain watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
