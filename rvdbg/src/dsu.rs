//! Debug Session Unit
//!
//! The control plane shared by all client sessions: run-control of every hart,
//! reset, access counters, and register access through the
//! [`TransactionBridge`].
//!
//! All transactions go through a single lock, so accesses from different
//! sessions are serialized in the order they acquire it. Each session keeps
//! its own [`HartSelection`] inside a [`DebugContext`].

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::bridge::{CompletionSignal, TransactionBridge};
use crate::config::DsuConfig;
use crate::counters::{AccessCounters, AccessDirection};
use crate::dport::{CompletionListener, DebugPortTransaction, HartLookup};
use crate::registers::{DebugRegister, Dmcontrol};
use crate::registry::{HartRegistry, HartSelection};
use crate::Error;

/// Hart receiving the `dmcontrol` writes for all run-control requests.
pub const COMMAND_SINK_HART: usize = 0;

pub struct DebugSessionUnit {
    registry: HartRegistry,
    bridge: Mutex<TransactionBridge>,
    signal: Arc<CompletionSignal>,
    counters: AccessCounters,
    bus_master_id: u32,
}

impl std::fmt::Debug for DebugSessionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSessionUnit")
            .field("registry", &self.registry)
            .field("bus_master_id", &self.bus_master_id)
            .finish_non_exhaustive()
    }
}

/// Registered with the harts on every submission, completes into the unit.
struct UnitListener(Weak<DebugSessionUnit>);

impl CompletionListener for UnitListener {
    fn on_transaction_complete(&self, transaction: DebugPortTransaction) {
        match self.0.upgrade() {
            Some(dsu) => dsu.on_transaction_complete(transaction),
            None => tracing::debug!("Completion after the debug session unit was dropped"),
        }
    }
}

impl DebugSessionUnit {
    pub fn new(registry: HartRegistry, config: &DsuConfig) -> Arc<Self> {
        Arc::new_cyclic(|unit| {
            let signal = Arc::new(CompletionSignal::new());
            let listener = Arc::new(UnitListener(unit.clone()));
            let bridge = TransactionBridge::new(signal.clone(), listener, config.deadline());

            Self {
                registry,
                bridge: Mutex::new(bridge),
                signal,
                counters: AccessCounters::new(),
                bus_master_id: config.bus_master_id,
            }
        })
    }

    /// Resolve the harts named in `config` through `lookup`.
    pub fn from_config(lookup: Arc<dyn HartLookup>, config: &DsuConfig) -> Arc<Self> {
        let registry = HartRegistry::build(lookup, &config.harts);
        tracing::info!(
            "Debug session unit with {} of {} configured harts",
            registry.len(),
            config.harts.len()
        );
        Self::new(registry, config)
    }

    /// A fresh per-client context, selecting hart 0.
    pub fn context(self: &Arc<Self>) -> DebugContext {
        DebugContext {
            dsu: self.clone(),
            selection: HartSelection::new(),
        }
    }

    pub fn registry(&self) -> &HartRegistry {
        &self.registry
    }

    pub fn hart_count(&self) -> usize {
        self.registry.len()
    }

    /// Check if hart `index` is halted. Unknown harts read as running.
    pub fn is_halted(&self, index: usize) -> bool {
        self.registry.is_halted(index)
    }

    /// Request hart `index` to resume.
    pub fn resume_hart(&self, index: usize) -> Result<(), Error> {
        let mut control = Dmcontrol::select(index);
        control.set_resumereq(true);
        self.run_control(index, control)
    }

    /// Request hart `index` to halt.
    pub fn halt_hart(&self, index: usize) -> Result<(), Error> {
        let mut control = Dmcontrol::select(index);
        control.set_haltreq(true);
        self.run_control(index, control)
    }

    /// Write a run-control request to the command sink.
    fn run_control(&self, index: usize, control: Dmcontrol) -> Result<(), Error> {
        if index >= self.registry.len() {
            tracing::error!("Debug Access index out of range {index}");
            return Err(Error::TargetNotFound(index));
        }

        tracing::debug!("Run-control request for hart {index}: {control:?}");

        let mut transaction =
            DebugPortTransaction::write(Dmcontrol::ADDRESS, u32::from(control) as u64);
        self.execute(COMMAND_SINK_HART, &mut transaction)
    }

    /// Put every configured hart through reset.
    ///
    /// Harts without a reset listener are logged and skipped.
    pub fn reset_all(&self) {
        for name in self.registry.configured_names() {
            match self.registry.lookup().reset_listener(name) {
                Some(listener) => {
                    tracing::debug!("Resetting {name}");
                    listener.reset();
                }
                None => tracing::error!("Can't find reset listener of hart {name}"),
            }
        }
    }

    /// Change `selection` to hart `index`.
    pub fn select(&self, selection: &mut HartSelection, index: usize) -> Result<(), Error> {
        let _bridge = self.bridge.lock();
        selection.select(&self.registry, index)
    }

    /// Read register `address` of the selected hart.
    pub fn try_read_register(&self, selection: &HartSelection, address: u16) -> Result<u64, Error> {
        let mut transaction = DebugPortTransaction::read(address);
        self.execute(selection.current(), &mut transaction)?;
        Ok(transaction.rdata & transaction.width_mask())
    }

    /// Read register `address` of the selected hart, 0 if that fails.
    pub fn read_register(&self, selection: &HartSelection, address: u16) -> u64 {
        self.try_read_register(selection, address).unwrap_or(0)
    }

    /// Write register `address` of the selected hart.
    pub fn try_write_register(
        &self,
        selection: &HartSelection,
        address: u16,
        value: u64,
    ) -> Result<(), Error> {
        let mut transaction = DebugPortTransaction::write(address, value);
        self.execute(selection.current(), &mut transaction)
    }

    /// Write register `address` of the selected hart. Failures are only logged.
    pub fn write_register(&self, selection: &HartSelection, address: u16, value: u64) {
        let _ = self.try_write_register(selection, address, value);
    }

    /// Run a program buffer on the selected hart.
    pub fn execute_program_buffer(&self, selection: &HartSelection, words: &[u32]) -> bool {
        let _bridge = self.bridge.lock();
        match selection.resolve(&self.registry) {
            Some(hart) => hart.port().execute_program_buffer(words),
            None => {
                tracing::error!("Program buffer target {} not found", selection.current());
                false
            }
        }
    }

    /// Check if the selected hart is still running a program buffer.
    pub fn is_executing_program_buffer(&self, selection: &HartSelection) -> bool {
        selection
            .resolve(&self.registry)
            .map(|hart| hart.port().is_executing_program_buffer())
            .unwrap_or(false)
    }

    pub fn increment_read_access(&self, master: u32) {
        self.counters.increment(master, AccessDirection::Read);
    }

    pub fn increment_write_access(&self, master: u32) {
        self.counters.increment(master, AccessDirection::Write);
    }

    pub fn counters(&self) -> &AccessCounters {
        &self.counters
    }

    /// The bus master id the unit's own accesses are counted under.
    pub fn bus_master_id(&self) -> u32 {
        self.bus_master_id
    }

    /// Execute `transaction` on hart `index` while holding the bridge.
    fn execute(&self, index: usize, transaction: &mut DebugPortTransaction) -> Result<(), Error> {
        let mut bridge = self.bridge.lock();
        let hart = self.registry.get(index).map(|hart| hart.port());

        bridge.execute(index, hart, transaction)?;

        if transaction.write {
            self.increment_write_access(self.bus_master_id);
        } else {
            self.increment_read_access(self.bus_master_id);
        }
        Ok(())
    }
}

impl CompletionListener for DebugSessionUnit {
    fn on_transaction_complete(&self, transaction: DebugPortTransaction) {
        self.signal.set(transaction);
    }
}

/// A client's view of the debug session unit, with its own hart selection.
#[derive(Debug, Clone)]
pub struct DebugContext {
    dsu: Arc<DebugSessionUnit>,
    selection: HartSelection,
}

impl DebugContext {
    pub fn dsu(&self) -> &Arc<DebugSessionUnit> {
        &self.dsu
    }

    pub fn selection(&self) -> HartSelection {
        self.selection
    }

    /// Select hart `index` for the following register accesses.
    pub fn select(&mut self, index: usize) -> Result<(), Error> {
        self.dsu.select(&mut self.selection, index)
    }

    /// Check if the selected hart is halted.
    pub fn is_halted(&self) -> bool {
        self.dsu.is_halted(self.selection.current())
    }

    pub fn read_register(&self, address: u16) -> u64 {
        self.dsu.read_register(&self.selection, address)
    }

    pub fn try_read_register(&self, address: u16) -> Result<u64, Error> {
        self.dsu.try_read_register(&self.selection, address)
    }

    pub fn write_register(&self, address: u16, value: u64) {
        self.dsu.write_register(&self.selection, address, value)
    }

    pub fn try_write_register(&self, address: u16, value: u64) -> Result<(), Error> {
        self.dsu.try_write_register(&self.selection, address, value)
    }

    pub fn execute_program_buffer(&self, words: &[u32]) -> bool {
        self.dsu.execute_program_buffer(&self.selection, words)
    }

    pub fn is_executing_program_buffer(&self) -> bool {
        self.dsu.is_executing_program_buffer(&self.selection)
    }
}
