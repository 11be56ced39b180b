//! Blocking bridge over the asynchronous debug port.
//!
//! A transaction is submitted to the hart together with a listener, and the
//! submitting thread then waits on a [`CompletionSignal`] until the hart hands
//! the transaction back through that listener. Only one transaction is in
//! flight per bridge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::dport::{CompletionListener, DebugPort, DebugPortTransaction};
use crate::Error;

/// Single slot rendezvous between the waiting caller and the hart's thread.
///
/// The slot is cleared before every submission and set by
/// [`CompletionListener::on_transaction_complete`].
#[derive(Debug, Default)]
pub struct CompletionSignal {
    slot: Mutex<Slot>,
    condvar: Condvar,
}

#[derive(Debug, Default)]
struct Slot {
    /// Sequence number of the transaction currently awaited.
    expected: u64,
    completed: Option<DebugPortTransaction>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the signal and arm it for the transaction tagged `sequence`.
    pub fn clear(&self, sequence: u64) {
        let mut slot = self.slot.lock();
        slot.expected = sequence;
        slot.completed = None;
    }

    /// Whether the awaited transaction has completed.
    pub fn is_set(&self) -> bool {
        self.slot.lock().completed.is_some()
    }

    /// Store a completed transaction and wake the waiter.
    ///
    /// Completions for anything but the armed sequence are stale (their
    /// caller already gave up) and are dropped.
    pub fn set(&self, transaction: DebugPortTransaction) {
        let mut slot = self.slot.lock();
        if transaction.sequence != slot.expected {
            tracing::warn!(
                "Dropping stale completion for {:#06x} (sequence {}, expected {})",
                transaction.address,
                transaction.sequence,
                slot.expected
            );
            return;
        }
        slot.completed = Some(transaction);
        self.condvar.notify_all();
    }

    /// Wait until the signal is set, or until `timeout` elapsed.
    ///
    /// Returns `None` on timeout. Without a timeout this waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<DebugPortTransaction> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slot = self.slot.lock();

        loop {
            if let Some(transaction) = slot.completed.take() {
                return Some(transaction);
            }

            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut slot, deadline).timed_out() {
                        return slot.completed.take();
                    }
                }
                None => self.condvar.wait(&mut slot),
            }
        }
    }
}

/// Issues transactions against harts and blocks until they complete.
pub struct TransactionBridge {
    signal: Arc<CompletionSignal>,
    listener: Arc<dyn CompletionListener>,
    sequence: u64,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for TransactionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBridge")
            .field("sequence", &self.sequence)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TransactionBridge {
    /// Create a bridge waiting on `signal`.
    ///
    /// `listener` is registered with the hart on every submission and must
    /// end up setting `signal`. `timeout` bounds every wait, `None` waits
    /// forever.
    pub fn new(
        signal: Arc<CompletionSignal>,
        listener: Arc<dyn CompletionListener>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            signal,
            listener,
            sequence: 0,
            timeout,
        }
    }

    /// Execute `transaction` on `hart` and wait for its completion.
    ///
    /// `index` is only used for reporting. On success the transaction returned
    /// by the hart is written back, so reads carry their result in `rdata`.
    pub fn execute(
        &mut self,
        index: usize,
        hart: Option<&Arc<dyn DebugPort>>,
        transaction: &mut DebugPortTransaction,
    ) -> Result<(), Error> {
        let Some(hart) = hart else {
            tracing::error!("Debug access target {index} not found");
            return Err(Error::TargetNotFound(index));
        };

        self.sequence = self.sequence.wrapping_add(1);
        transaction.sequence = self.sequence;

        self.signal.clear(self.sequence);
        tracing::trace!(
            "Issue {} of {:#06x} on hart {index}",
            if transaction.write { "write" } else { "read" },
            transaction.address
        );
        hart.submit(*transaction, self.listener.clone());

        match self.signal.wait(self.timeout) {
            Some(completed) => {
                *transaction = completed;
                Ok(())
            }
            None => {
                let timeout = self.timeout.unwrap_or_default();
                tracing::error!(
                    "Hart {index} did not complete access to {:#06x} within {timeout:?}",
                    transaction.address
                );
                Err(Error::TransactionTimeout {
                    address: transaction.address,
                    timeout,
                })
            }
        }
    }
}
