use chrono::Utc;
use gpx2::sim::{SimBus, SimChip, SimParams};
use gpx2::{BusTransport, Gpx2, Gpx2Error, TransportError, SPIOPC_WRITE_CONFIG};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tdcstream::processor::CorrelationEngine;
use tdcstream::queue::Queues;
use tdcstream::readout::Readout;
use tdcstream::save::{SaveHandle, SaveMessage};
use tdcstream::stats::Stats;
use tdctools::cfg::RunConfig;
use tdctools::pat::CorrelatedEvent;
use tdctools::{Meas, StopChannel};

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Vec<u8>>>);

impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Shared {
    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().clone())
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }
}

fn meas(ch: StopChannel, ref_index: u32, stop_result: u32) -> Meas {
    Meas::new(ch, ref_index, stop_result, 1., 5e6, Utc::now())
}

fn engine(max_queue_size: usize) -> (CorrelationEngine, Arc<Queues>, Arc<Stats>, flume::Receiver<SaveMessage>) {
    let queues = Queues::new();
    let stats = Arc::new(Stats::new());
    let (tx, rx) = flume::unbounded();
    let e = CorrelationEngine::new(queues.clone(), stats.clone(), tx, 1e-7, max_queue_size);
    (e, queues, stats, rx)
}

fn events(rx: &flume::Receiver<SaveMessage>) -> Vec<CorrelatedEvent> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let SaveMessage::Events(mut ev) = msg {
            out.append(&mut ev);
        }
    }
    out
}

#[test]
fn single_pair_empties_queues() {
    let (e, queues, stats, rx) = engine(1);
    queues.route(meas(StopChannel::Stop0, 5, 100));
    queues.route(meas(StopChannel::Stop1, 5, 102));
    assert!(e.poll());
    let ev = events(&rx);
    assert_eq!(ev.len(), 1);
    assert!((ev[0].diff - 2e-12).abs() < 1e-18);
    assert!(queues.is_empty());
    assert_eq!(stats.summary().events, 1);
}

#[test]
fn no_drain_below_high_water_mark() {
    let (e, queues, stats, rx) = engine(4);
    for i in 0..3 {
        queues.route(meas(StopChannel::Stop0, i, 0));
        queues.route(meas(StopChannel::Stop1, i, 10));
    }
    assert!(!e.due());
    assert!(!e.poll());
    assert!(events(&rx).is_empty());
    assert_eq!(queues.a.len(), 3);
    assert_eq!(queues.b.len(), 3);
    assert_eq!(stats.summary().drains, 0);

    queues.route(meas(StopChannel::Stop2, 3, 0));
    assert!(e.poll());
    assert!(!e.poll());
    assert_eq!(stats.summary().drains, 1);
    assert_eq!(events(&rx).len(), 3);
    // The lone stop at index 3 went with the drain
    assert_eq!(stats.summary().dropped, 1);
    assert!(queues.is_empty());
}

#[test]
fn final_drain_ignores_high_water_mark() {
    let (e, queues, stats, rx) = engine(1000);
    queues.route(meas(StopChannel::Stop0, 7, 50));
    queues.route(meas(StopChannel::Stop0, 7, 50));
    queues.route(meas(StopChannel::Stop3, 7, 60));
    queues.route(meas(StopChannel::Stop1, 8, 0));

    let finish = Arc::new(AtomicBool::new(false));
    let handle = {
        let finish = finish.clone();
        thread::spawn(move || e.run(Duration::from_millis(10), finish))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(stats.summary().drains, 0);
    assert_eq!(queues.a.len() + queues.b.len(), 4);

    finish.store(true, Ordering::Release);
    queues.notifier.notify();
    handle.join().unwrap().unwrap();

    assert!(queues.is_empty());
    let ev = events(&rx);
    assert_eq!(ev.len(), 1);
    assert!((ev[0].diff - 10e-12).abs() < 1e-18);
    let s = stats.summary();
    assert_eq!(s.drains, 1);
    assert_eq!(s.duplicates, 1);
    assert_eq!(s.dropped, 1);
}

fn run_config(max_queue_size: usize) -> RunConfig {
    RunConfig {
        max_queue_size,
        tick: Duration::from_millis(10),
        edge_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

fn sim(params: SimParams) -> (Gpx2<SimBus>, gpx2::sim::SimLine) {
    let (bus, line) = SimChip::new(params);
    (Gpx2::new(bus), line)
}

/// Run until `events` correlated events have been counted or a deadline passes
fn wait_for_events(readout: &Readout, events: u64) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while readout.stats().events < events && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn simulated_readout() {
    let out = Shared::default();
    let save = SaveHandle::with_writers(Box::new(out.clone()), None, false);
    let (chip, line) = sim(SimParams { period: Duration::from_micros(200), ..Default::default() });
    let readout = Readout::start(chip, line, &run_config(8), save).unwrap();
    wait_for_events(&readout, 50);
    let summary = readout.stop().unwrap();

    assert!(summary.events >= 50);
    assert_eq!(summary.read_errors, 0);
    let lines = out.lines();
    assert_eq!(lines.len() as u64, summary.events);
    for line in lines.iter() {
        let d: f64 = line.parse().unwrap();
        assert!((d - 2e-9).abs() <= 51e-12, "{}", d);
    }
    assert_eq!(
        summary.measurements,
        2 * summary.events + summary.dropped + summary.duplicates + 2 * summary.rejected
    );
}

#[test]
fn failed_reads_are_skipped() {
    let out = Shared::default();
    let save = SaveHandle::with_writers(Box::new(out.clone()), None, true);
    let (chip, line) = sim(SimParams {
        period: Duration::from_micros(200),
        read_error_every: Some(4),
        ..Default::default()
    });
    let readout = Readout::start(chip, line, &run_config(4), save).unwrap();
    wait_for_events(&readout, 20);
    let summary = readout.stop().unwrap();

    assert!(summary.events >= 20);
    assert!(summary.read_errors > 0);
    for line in out.lines().iter() {
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 2);
        assert!(fields[0].parse::<i64>().unwrap() > 0);
    }
}

/// Loses the top bit of register 7 on every configuration write
struct Forgetful(SimBus);

impl BusTransport for Forgetful {
    fn transfer(&mut self, command: u8, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
        if command == SPIOPC_WRITE_CONFIG && tx.len() > 7 {
            let mut tx = tx.to_vec();
            tx[7] &= 0x7F;
            return self.0.transfer(command, &tx);
        }
        self.0.transfer(command, tx)
    }
}

#[test]
fn verify_mismatch_is_fatal() {
    let (bus, line) = SimChip::new(SimParams::default());
    let save = SaveHandle::with_writers(Box::new(Shared::default()), None, false);
    let err = match Readout::start(Gpx2::new(Forgetful(bus)), line, &RunConfig::default(), save) {
        Ok(_) => panic!("readout started with a bad configuration"),
        Err(e) => e,
    };
    match err.downcast_ref::<Gpx2Error>() {
        Some(Gpx2Error::VerifyMismatch { written, read }) => {
            assert_eq!(written[7] & 0x7F, read[7]);
            assert_ne!(written[7], read[7]);
        }
        other => panic!("expected a verify mismatch, got {:?}", other),
    }
}
