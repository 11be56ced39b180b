//! Debug port capability
//!
//! Every hart exposes a [`DebugPort`]. Register access is issued as a
//! [`DebugPortTransaction`] through [`DebugPort::submit`] and completes
//! asynchronously: the hart calls back into the [`CompletionListener`] it was
//! given, from its own execution context.

use std::sync::Arc;

/// A single register access issued against a debug port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugPortTransaction {
    /// Register number in the debug port's address space.
    pub address: u16,
    /// Data to write. Ignored for reads.
    pub wdata: u64,
    /// Data read back. Filled in by the port on completion of a read.
    pub rdata: u64,
    /// Direction of the access.
    pub write: bool,
    /// Access width in bytes.
    pub bytes: usize,
    /// Tag identifying the submission this transaction belongs to.
    pub(crate) sequence: u64,
}

impl DebugPortTransaction {
    /// An 8 byte read of `address`.
    pub fn read(address: u16) -> Self {
        Self {
            address,
            wdata: 0,
            rdata: 0,
            write: false,
            bytes: 8,
            sequence: 0,
        }
    }

    /// An 8 byte write of `value` to `address`.
    pub fn write(address: u16, value: u64) -> Self {
        Self {
            address,
            wdata: value,
            rdata: 0,
            write: true,
            bytes: 8,
            sequence: 0,
        }
    }

    /// Change the access width.
    pub fn with_width(mut self, bytes: usize) -> Self {
        self.bytes = bytes;
        self
    }

    /// Value masked to the access width.
    pub(crate) fn width_mask(&self) -> u64 {
        match self.bytes {
            0 => 0,
            n if n >= 8 => u64::MAX,
            n => (1u64 << (8 * n)) - 1,
        }
    }
}

/// Receives completed transactions.
///
/// Implementations must tolerate being called from any thread, in particular
/// from the hart's simulation thread while another thread is blocked waiting
/// for the completion.
pub trait CompletionListener: Send + Sync {
    /// Called exactly once per submitted transaction.
    fn on_transaction_complete(&self, transaction: DebugPortTransaction);
}

/// Run-control and register access of one hart.
pub trait DebugPort: Send + Sync {
    /// Request the hart to resume execution.
    fn resume_request(&self);

    /// Request the hart to halt.
    fn halt_request(&self);

    /// Check if the hart is halted.
    fn is_halted(&self) -> bool;

    /// Read a debug register directly.
    fn read_debug_register(&self, regno: u32) -> u64;

    /// Write a debug register directly.
    fn write_debug_register(&self, regno: u32, value: u64);

    /// Load and run a program buffer. Returns `false` if the hart refused it.
    fn execute_program_buffer(&self, words: &[u32]) -> bool;

    /// Check if a previously started program buffer is still running.
    fn is_executing_program_buffer(&self) -> bool;

    /// Drive the hart's reset pin.
    fn set_reset_pin(&self, asserted: bool);

    /// Submit a transaction without waiting for it.
    ///
    /// The port must eventually hand the transaction back to `listener`, with
    /// `rdata` filled in for reads.
    fn submit(&self, transaction: DebugPortTransaction, listener: Arc<dyn CompletionListener>);
}

/// Anything that can be put through a reset cycle.
pub trait ResetListener: Send + Sync {
    /// Reset the device.
    fn reset(&self);
}

/// Resolves configured hart names to their capabilities.
pub trait HartLookup: Send + Sync {
    /// The debug port of the hart called `name`, if it exists.
    fn debug_port(&self, name: &str) -> Option<Arc<dyn DebugPort>>;

    /// The reset listener of the hart called `name`, if it has one.
    fn reset_listener(&self, name: &str) -> Option<Arc<dyn ResetListener>>;
}
