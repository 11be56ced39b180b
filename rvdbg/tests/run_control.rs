mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use rvdbg::config::DsuConfig;
use rvdbg::registers::{DebugRegister, Dmcontrol};
use rvdbg::{AccessDirection, DebugSessionUnit, Error, COMMAND_SINK_HART};

use common::{dsu, init_logging, Bus, BusEvent, MockHart, MockPlatform};

#[test]
fn selection_follows_halted_state() {
    init_logging();
    let platform = MockPlatform::new(3);
    platform.hart(1).set_halted(true);
    let dsu = dsu(&platform);

    let mut context = dsu.context();
    assert!(!context.is_halted());

    context.select(1).unwrap();
    assert!(context.is_halted());

    context.select(2).unwrap();
    assert!(!context.is_halted());
}

#[test]
fn out_of_range_selection_degrades() {
    init_logging();
    let platform = MockPlatform::new(3);
    let dsu = dsu(&platform);

    let mut context = dsu.context();
    assert!(matches!(context.select(5), Err(Error::TargetNotFound(5))));

    assert_eq!(context.selection().current(), 3);
    assert!(!context.is_halted());
    assert_eq!(context.read_register(0x7b0), 0);
    context.write_register(0x7b0, 1);
    assert!(platform.harts.iter().all(|(_, hart)| hart.transactions().is_empty()));
}

#[test]
fn register_round_trip() {
    init_logging();
    let platform = MockPlatform::new(2);
    let dsu = dsu(&platform);

    let mut context = dsu.context();
    context.select(1).unwrap();
    context.write_register(0x7b1, 0x8000_1234);

    assert_eq!(context.read_register(0x7b1), 0x8000_1234);
    assert_eq!(platform.hart(1).transactions().len(), 2);
    assert!(platform.hart(0).transactions().is_empty());
    assert_eq!(dsu.counters().get(0, AccessDirection::Write), 1);
    assert_eq!(dsu.counters().get(0, AccessDirection::Read), 1);
}

#[test]
fn halt_request_encodes_hart_select() {
    init_logging();
    let platform = Arc::new(MockPlatform {
        harts: (0..4)
            .map(|index| {
                (
                    format!("core{index}"),
                    MockHart::with_delay(Duration::from_millis(50)),
                )
            })
            .collect(),
        without_reset: Vec::new(),
    });
    let dsu = dsu(&platform);

    let start = Instant::now();
    dsu.halt_hart(2).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));

    let sink = platform.hart(COMMAND_SINK_HART).transactions();
    assert_eq!(sink.len(), 1);
    assert_eq!(sink[0].address, Dmcontrol::ADDRESS);
    assert!(sink[0].write);

    let control = Dmcontrol::from(sink[0].wdata as u32);
    assert!(control.haltreq());
    assert!(!control.resumereq());
    assert!(control.dmactive());
    assert_eq!(control.hartsello(), 2);
    assert_eq!(control.hartsel(), 2);
}

#[test]
fn resume_out_of_range_issues_nothing() {
    init_logging();
    let platform = MockPlatform::new(2);
    let dsu = dsu(&platform);

    assert!(matches!(dsu.resume_hart(2), Err(Error::TargetNotFound(2))));
    assert!(platform.hart(COMMAND_SINK_HART).transactions().is_empty());
}

#[test]
fn reset_all_is_repeatable_and_skips_missing_listeners() {
    init_logging();
    let platform = Arc::new(MockPlatform {
        harts: (0..3)
            .map(|index| (format!("core{index}"), MockHart::new()))
            .collect(),
        without_reset: vec!["core1".to_string()],
    });
    let dsu = dsu(&platform);

    dsu.reset_all();
    dsu.reset_all();

    assert_eq!(platform.hart(0).resets(), 2);
    assert_eq!(platform.hart(1).resets(), 0);
    assert_eq!(platform.hart(2).resets(), 2);
}

/// Every completion is followed by at most one submission, never two in a row.
fn assert_one_at_a_time(bus: &Bus) {
    let events = bus.events();
    assert_eq!(bus.overlaps(), 0);
    assert_eq!(events.len() % 2, 0);
    for pair in events.chunks(2) {
        match pair {
            [BusEvent::Submit(issued), BusEvent::Complete(done)] => assert_eq!(issued, done),
            other => panic!("transactions overlap: {other:?}"),
        }
    }
}

#[test]
fn back_to_back_accesses_wait_for_completion() {
    init_logging();
    let bus = Arc::new(Bus::default());
    let platform = MockPlatform::on_bus(2, &bus, Duration::from_millis(10));
    let dsu = dsu(&platform);
    let mut context = dsu.context();

    context.write_register(0x7b0, 1);
    context.write_register(0x7b1, 2);
    assert_eq!(context.read_register(0x7b0), 1);
    dsu.halt_hart(1).unwrap();
    context.select(1).unwrap();
    assert_eq!(context.read_register(0x7b1), 0);

    assert_eq!(bus.events().len(), 10);
    assert_one_at_a_time(&bus);
}

#[test]
fn concurrent_sessions_are_serialized() {
    init_logging();
    let bus = Arc::new(Bus::default());
    let platform = MockPlatform::on_bus(2, &bus, Duration::from_millis(2));
    let dsu = dsu(&platform);

    let workers = (0..4u64)
        .map(|worker| {
            let mut context = dsu.context();
            thread::spawn(move || {
                context.select(worker as usize % 2).unwrap();
                for step in 0..10u64 {
                    let address = 0x100 + worker as u16;
                    context.write_register(address, step);
                    assert_eq!(context.read_register(address), step);
                }
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_one_at_a_time(&bus);
    assert_eq!(platform.hart(0).transactions().len(), 40);
    assert_eq!(platform.hart(1).transactions().len(), 40);
    assert_eq!(dsu.counters().get(0, AccessDirection::Write), 40);
    assert_eq!(dsu.counters().get(0, AccessDirection::Read), 40);
}

#[test]
fn out_of_range_selection_logs_one_error() {
    let platform = MockPlatform::new(3);
    let dsu = dsu(&platform);
    let mut context = dsu.context();

    let (result, errors) = common::capture_errors(|| context.select(5));

    assert!(matches!(result, Err(Error::TargetNotFound(5))));
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].contains("out of range 5"), "{}", errors[0]);
}

#[test]
fn program_buffer_needs_halted_hart() {
    init_logging();
    let platform = MockPlatform::new(1);
    let dsu = dsu(&platform);
    let context = dsu.context();

    assert!(!context.execute_program_buffer(&[0x0010_0073]));
    platform.hart(0).set_halted(true);
    assert!(context.execute_program_buffer(&[0x0010_0073]));
    assert!(!context.is_executing_program_buffer());
}

#[test]
fn late_completion_reaches_unit_or_is_dropped() {
    init_logging();
    let bus = Arc::new(Bus::default());
    let platform = MockPlatform::on_bus(1, &bus, Duration::from_millis(60));
    let config = DsuConfig {
        harts: platform.names(),
        transaction_timeout: Duration::from_millis(10),
        ..DsuConfig::default()
    };
    let dsu = DebugSessionUnit::from_config(platform.clone(), &config);
    let context = dsu.context();

    assert!(matches!(
        context.try_write_register(0x7b0, 1),
        Err(Error::TransactionTimeout { address: 0x7b0, .. })
    ));
    drop(context);
    drop(dsu);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        bus.events(),
        vec![BusEvent::Submit(0x7b0), BusEvent::Complete(0x7b0)]
    );
}
