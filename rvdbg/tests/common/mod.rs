#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rvdbg::config::DsuConfig;
use rvdbg::dport::{
    CompletionListener, DebugPort, DebugPortTransaction, HartLookup, ResetListener,
};
use rvdbg::DebugSessionUnit;

/// What a [`Bus`] saw, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Submit(u16),
    Complete(u16),
}

/// Shared by the harts of a platform to observe overlapping transactions.
#[derive(Debug, Default)]
pub struct Bus {
    in_flight: AtomicBool,
    overlaps: AtomicUsize,
    events: Mutex<Vec<BusEvent>>,
}

impl Bus {
    /// Submissions made while another transaction was still in flight.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().clone()
    }

    fn submit(&self, address: u16) {
        self.events.lock().push(BusEvent::Submit(address));
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn complete(&self, address: u16) {
        self.events.lock().push(BusEvent::Complete(address));
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// A hart that records every submitted transaction and completes it from
/// another thread, after an optional delay.
#[derive(Debug, Default)]
pub struct MockHart {
    halted: AtomicBool,
    resets: AtomicUsize,
    delay: Duration,
    bus: Arc<Bus>,
    registers: Arc<Mutex<HashMap<u16, u64>>>,
    transactions: Mutex<Vec<DebugPortTransaction>>,
}

impl MockHart {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// A hart completing after `delay`, reporting to `bus`.
    pub fn on_bus(bus: &Arc<Bus>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            bus: bus.clone(),
            ..Self::default()
        })
    }

    pub fn set_halted(&self, halted: bool) {
        self.halted.store(halted, Ordering::SeqCst);
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn transactions(&self) -> Vec<DebugPortTransaction> {
        self.transactions.lock().clone()
    }
}

impl DebugPort for MockHart {
    fn resume_request(&self) {
        self.set_halted(false);
    }

    fn halt_request(&self) {
        self.set_halted(true);
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    fn read_debug_register(&self, regno: u32) -> u64 {
        self.registers
            .lock()
            .get(&(regno as u16))
            .copied()
            .unwrap_or(0)
    }

    fn write_debug_register(&self, regno: u32, value: u64) {
        self.registers.lock().insert(regno as u16, value);
    }

    fn execute_program_buffer(&self, _words: &[u32]) -> bool {
        self.is_halted()
    }

    fn is_executing_program_buffer(&self) -> bool {
        false
    }

    fn set_reset_pin(&self, asserted: bool) {
        if asserted {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn submit(&self, mut transaction: DebugPortTransaction, listener: Arc<dyn CompletionListener>) {
        self.transactions.lock().push(transaction);
        self.bus.submit(transaction.address);

        let registers = self.registers.clone();
        let bus = self.bus.clone();
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            let mut registers = registers.lock();
            if transaction.write {
                registers.insert(transaction.address, transaction.wdata);
            } else {
                transaction.rdata = registers.get(&transaction.address).copied().unwrap_or(0);
            }
            drop(registers);
            bus.complete(transaction.address);
            listener.on_transaction_complete(transaction);
        });
    }
}

impl ResetListener for MockHart {
    fn reset(&self) {
        self.set_reset_pin(true);
        self.set_reset_pin(false);
    }
}

/// Named mock harts. Harts listed in `without_reset` have no reset listener.
#[derive(Debug, Default)]
pub struct MockPlatform {
    pub harts: Vec<(String, Arc<MockHart>)>,
    pub without_reset: Vec<String>,
}

impl MockPlatform {
    pub fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            harts: (0..count)
                .map(|index| (format!("core{index}"), MockHart::new()))
                .collect(),
            without_reset: Vec::new(),
        })
    }

    /// `count` harts sharing `bus`, each completing after `delay`.
    pub fn on_bus(count: usize, bus: &Arc<Bus>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            harts: (0..count)
                .map(|index| (format!("core{index}"), MockHart::on_bus(bus, delay)))
                .collect(),
            without_reset: Vec::new(),
        })
    }

    pub fn hart(&self, index: usize) -> &Arc<MockHart> {
        &self.harts[index].1
    }

    pub fn names(&self) -> Vec<String> {
        self.harts.iter().map(|(name, _)| name.clone()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<MockHart>> {
        self.harts
            .iter()
            .find(|(hart_name, _)| hart_name == name)
            .map(|(_, hart)| hart)
    }
}

impl HartLookup for MockPlatform {
    fn debug_port(&self, name: &str) -> Option<Arc<dyn DebugPort>> {
        self.find(name).map(|hart| hart.clone() as Arc<dyn DebugPort>)
    }

    fn reset_listener(&self, name: &str) -> Option<Arc<dyn ResetListener>> {
        if self.without_reset.iter().any(|skipped| skipped == name) {
            return None;
        }
        self.find(name)
            .map(|hart| hart.clone() as Arc<dyn ResetListener>)
    }
}

/// A debug session unit over all harts of `platform`.
pub fn dsu(platform: &Arc<MockPlatform>) -> Arc<DebugSessionUnit> {
    let config = DsuConfig {
        harts: platform.names(),
        ..DsuConfig::default()
    };
    DebugSessionUnit::from_config(platform.clone(), &config)
}

/// Install a test subscriber so failures come with the library's logs.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` and collect the error lines it logs on this thread.
pub fn capture_errors<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::ERROR)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let result = tracing::subscriber::with_default(subscriber, f);

    let output = String::from_utf8_lossy(&logs.0.lock()).into_owned();
    let lines = output
        .lines()
        .filter(|line| line.contains("ERROR"))
        .map(str::to_string)
        .collect();
    (result, lines)
}
