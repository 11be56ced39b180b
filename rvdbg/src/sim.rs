//! Behavioural model of a multi-hart platform.
//!
//! Every [`SimulatedHart`] executes submitted transactions on its own worker
//! thread and reports completion from there, like the hardware model would
//! from its simulation thread. All harts share one debug module, so a
//! `dmcontrol` write received by any hart acts on the hart selected in it.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::dport::{
    CompletionListener, DebugPort, DebugPortTransaction, HartLookup, ResetListener,
};
use crate::registers::{DebugRegister, Dmcontrol, Dmstatus};

#[derive(Debug, Default)]
struct HartState {
    halted: bool,
    reset_asserted: bool,
    have_reset: bool,
    resume_ack: bool,
    registers: HashMap<u32, u64>,
    progbuf: Vec<u32>,
    /// End of the running program buffer, if one was started.
    progbuf_done: Option<Instant>,
}

/// Time a simulated hart spends on each program buffer word.
const PROGRAM_BUFFER_WORD_TIME: Duration = Duration::from_millis(1);

/// State shared by all harts of a platform.
#[derive(Debug)]
struct DebugModule {
    harts: Mutex<Vec<HartState>>,
    /// Last `dmcontrol` written, without the request bits.
    dmcontrol: Mutex<Dmcontrol>,
}

impl DebugModule {
    fn with_hart<R>(&self, index: usize, f: impl FnOnce(&mut HartState) -> R) -> Option<R> {
        self.harts.lock().get_mut(index).map(f)
    }

    fn write_dmcontrol(&self, value: u32) {
        let mut control = Dmcontrol::from(value);
        let target = control.hartsel();

        let applied = self.with_hart(target, |hart| {
            if control.haltreq() {
                hart.halted = true;
            }
            if control.resumereq() && hart.halted {
                hart.halted = false;
                hart.resume_ack = true;
            }
            if control.ackhavereset() {
                hart.have_reset = false;
            }
        });
        if applied.is_none() {
            tracing::warn!("dmcontrol selects nonexistent hart {target}");
        }

        control.set_haltreq(false);
        control.set_resumereq(false);
        control.set_ackhavereset(false);
        *self.dmcontrol.lock() = control;
    }

    fn read_dmstatus(&self) -> u32 {
        let target = self.dmcontrol.lock().hartsel();
        let mut status = Dmstatus::from(0);
        status.set_version(2);
        status.set_authenticated(true);

        let present = self.with_hart(target, |hart| {
            status.set_allhalted(hart.halted);
            status.set_anyhalted(hart.halted);
            status.set_allrunning(!hart.halted);
            status.set_anyrunning(!hart.halted);
            status.set_allresumeack(hart.resume_ack);
            status.set_anyresumeack(hart.resume_ack);
            status.set_allhavereset(hart.have_reset);
            status.set_anyhavereset(hart.have_reset);
        });
        if present.is_none() {
            status.set_allnonexistent(true);
            status.set_anynonexistent(true);
        }

        status.into()
    }
}

enum Request {
    Transaction(DebugPortTransaction, Arc<dyn CompletionListener>),
    Stop,
}

/// One hart of a [`SimulatedPlatform`].
pub struct SimulatedHart {
    index: usize,
    module: Arc<DebugModule>,
    requests: Mutex<Sender<Request>>,
}

impl std::fmt::Debug for SimulatedHart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedHart")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl SimulatedHart {
    pub fn index(&self) -> usize {
        self.index
    }

    fn access(module: &DebugModule, index: usize, transaction: &mut DebugPortTransaction) {
        let mask = transaction.width_mask();

        match (transaction.address, transaction.write) {
            (Dmcontrol::ADDRESS, true) => module.write_dmcontrol(transaction.wdata as u32),
            (Dmcontrol::ADDRESS, false) => {
                transaction.rdata = u32::from(*module.dmcontrol.lock()) as u64;
            }
            (Dmstatus::ADDRESS, false) => transaction.rdata = module.read_dmstatus() as u64,
            (Dmstatus::ADDRESS, true) => {
                tracing::debug!("Ignoring write to read only {}", Dmstatus::NAME);
            }
            (address, true) => {
                module.with_hart(index, |hart| {
                    hart.registers
                        .insert(address as u32, transaction.wdata & mask);
                });
            }
            (address, false) => {
                transaction.rdata = module
                    .with_hart(index, |hart| {
                        hart.registers.get(&(address as u32)).copied().unwrap_or(0)
                    })
                    .unwrap_or(0)
                    & mask;
            }
        }
    }

    fn worker(module: Arc<DebugModule>, index: usize, requests: Receiver<Request>) {
        while let Ok(request) = requests.recv() {
            match request {
                Request::Transaction(mut transaction, listener) => {
                    Self::access(&module, index, &mut transaction);
                    listener.on_transaction_complete(transaction);
                }
                Request::Stop => break,
            }
        }
        tracing::trace!("Hart {index} worker stopped");
    }
}

impl DebugPort for SimulatedHart {
    fn resume_request(&self) {
        self.module.with_hart(self.index, |hart| {
            hart.halted = false;
            hart.resume_ack = true;
        });
    }

    fn halt_request(&self) {
        self.module.with_hart(self.index, |hart| hart.halted = true);
    }

    fn is_halted(&self) -> bool {
        self.module
            .with_hart(self.index, |hart| hart.halted)
            .unwrap_or(false)
    }

    fn read_debug_register(&self, regno: u32) -> u64 {
        self.module
            .with_hart(self.index, |hart| hart.registers.get(&regno).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn write_debug_register(&self, regno: u32, value: u64) {
        self.module.with_hart(self.index, |hart| {
            hart.registers.insert(regno, value);
        });
    }

    fn execute_program_buffer(&self, words: &[u32]) -> bool {
        self.module
            .with_hart(self.index, |hart| {
                if !hart.halted {
                    return false;
                }
                hart.progbuf = words.to_vec();
                hart.progbuf_done =
                    Some(Instant::now() + PROGRAM_BUFFER_WORD_TIME * words.len() as u32);
                true
            })
            .unwrap_or(false)
    }

    fn is_executing_program_buffer(&self) -> bool {
        self.module
            .with_hart(self.index, |hart| {
                hart.progbuf_done
                    .is_some_and(|done| Instant::now() < done)
            })
            .unwrap_or(false)
    }

    fn set_reset_pin(&self, asserted: bool) {
        self.module.with_hart(self.index, |hart| {
            if asserted && !hart.reset_asserted {
                hart.registers.clear();
                hart.progbuf.clear();
                hart.progbuf_done = None;
                hart.halted = false;
                hart.resume_ack = false;
            }
            if !asserted && hart.reset_asserted {
                hart.have_reset = true;
            }
            hart.reset_asserted = asserted;
        });
    }

    fn submit(&self, transaction: DebugPortTransaction, listener: Arc<dyn CompletionListener>) {
        let sent = self
            .requests
            .lock()
            .send(Request::Transaction(transaction, listener));
        if sent.is_err() {
            tracing::error!("Hart {} worker is gone, transaction dropped", self.index);
        }
    }
}

impl ResetListener for SimulatedHart {
    fn reset(&self) {
        self.set_reset_pin(true);
        self.set_reset_pin(false);
    }
}

/// A set of simulated harts, addressable by name.
///
/// The worker threads are stopped when the platform is dropped.
pub struct SimulatedPlatform {
    harts: Vec<(String, Arc<SimulatedHart>)>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SimulatedPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.harts.iter().map(|(name, _)| name))
            .finish()
    }
}

impl SimulatedPlatform {
    /// Create one hart per name, each with its own worker thread.
    pub fn new<S: AsRef<str>>(names: &[S]) -> std::io::Result<Self> {
        let module = Arc::new(DebugModule {
            harts: Mutex::new(names.iter().map(|_| HartState::default()).collect()),
            dmcontrol: Mutex::new(Dmcontrol::from(0)),
        });

        let mut harts = Vec::with_capacity(names.len());
        let mut workers = Vec::with_capacity(names.len());

        for (index, name) in names.iter().enumerate() {
            let (sender, receiver) = mpsc::channel();
            let worker_module = module.clone();
            let worker = thread::Builder::new()
                .name(format!("{}-sim", name.as_ref()))
                .spawn(move || SimulatedHart::worker(worker_module, index, receiver))?;

            harts.push((
                name.as_ref().to_string(),
                Arc::new(SimulatedHart {
                    index,
                    module: module.clone(),
                    requests: Mutex::new(sender),
                }),
            ));
            workers.push(worker);
        }

        Ok(Self { harts, workers })
    }

    pub fn hart(&self, name: &str) -> Option<&Arc<SimulatedHart>> {
        self.harts
            .iter()
            .find(|(hart_name, _)| hart_name == name)
            .map(|(_, hart)| hart)
    }

    pub fn len(&self) -> usize {
        self.harts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harts.is_empty()
    }

    /// Stop all worker threads.
    ///
    /// Transactions submitted before the call are still completed. Later
    /// submissions are dropped.
    pub fn shutdown(mut self) {
        self.stop_workers();
    }

    fn stop_workers(&mut self) {
        for (_, hart) in &self.harts {
            let _ = hart.requests.lock().send(Request::Stop);
        }
        for worker in self.workers.drain(..) {
            // The last reference may go away inside a completion callback.
            if worker.thread().id() == thread::current().id() {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Hart worker panicked");
            }
        }
    }
}

impl Drop for SimulatedPlatform {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

impl HartLookup for SimulatedPlatform {
    fn debug_port(&self, name: &str) -> Option<Arc<dyn DebugPort>> {
        self.hart(name)
            .map(|hart| hart.clone() as Arc<dyn DebugPort>)
    }

    fn reset_listener(&self, name: &str) -> Option<Arc<dyn ResetListener>> {
        self.hart(name)
            .map(|hart| hart.clone() as Arc<dyn ResetListener>)
    }
}
