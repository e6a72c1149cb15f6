use anyhow::Result;
use chrono::Utc;
use gpx2::irq::wait_data_ready;
use gpx2::{BusTransport, Gpx2, InterruptLine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::queue::Queues;
use crate::stats::Stats;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Longest single wait on the interrupt line between stop flag checks
pub const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Read the chip whenever it reports data, routing the measurements to
/// the stream queues, until `stop` is set.
///
/// A failed results read loses that cycle only. The chip is reset on
/// exit so it stops measuring; queued measurements are left for the
/// correlation thread.
pub fn main<B: BusTransport, L: InterruptLine>(
    mut chip: Gpx2<B>,
    mut line: L,
    queues: Arc<Queues>,
    stats: Arc<Stats>,
    stop: Arc<AtomicBool>,
    edge_timeout: Duration,
) -> Result<()> {
    let slice = WAIT_SLICE.min(edge_timeout);
    let mut silent = Duration::ZERO;
    while !stop.load(Ordering::Acquire) {
        match wait_data_ready(&mut line, slice) {
            Ok(true) => silent = Duration::ZERO,
            Ok(false) => {
                silent += slice;
                if silent >= edge_timeout {
                    debug!("no data from chip for {:?}", silent);
                    silent = Duration::ZERO;
                }
                continue;
            }
            Err(e) => {
                warn!("interrupt line: {}", e);
                std::thread::sleep(slice);
                continue;
            }
        }

        Stats::add(&stats.reads, 1);
        let meas = match chip.read_results(Utc::now()) {
            Ok(m) => m,
            Err(e) => {
                Stats::add(&stats.read_errors, 1);
                warn!("results read failed: {}", e);
                continue;
            }
        };

        for m in meas.iter() {
            if m.is_valid() {
                Stats::add(&stats.measurements, 1);
                queues.route(*m);
            } else {
                Stats::add(&stats.invalid, 1);
            }
        }
    }

    if let Err(e) = chip.power_on_reset() {
        warn!("could not stop chip: {}", e);
    }
    info!("acquisition stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpx2::sim::{SimBus, SimChip, SimLine, SimParams};
    use gpx2::Config;
    use std::thread;
    use tdctools::Stream;

    fn running(params: SimParams) -> (Gpx2<SimBus>, SimLine, SimChip) {
        let (bus, line) = SimChip::new(params);
        let sim = bus.chip();
        let mut chip = Gpx2::new(bus);
        chip.write_and_verify(Config::recommended()).unwrap();
        chip.init_reset().unwrap();
        (chip, line, sim)
    }

    #[test]
    fn routes_until_stopped() {
        let (chip, line, sim) = running(SimParams {
            period: Duration::ZERO,
            max_events: Some(10),
            ..Default::default()
        });
        let queues = Queues::new();
        let stats = Arc::new(Stats::new());
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let (queues, stats, stop) = (queues.clone(), stats.clone(), stop.clone());
            thread::spawn(move || main(chip, line, queues, stats, stop, Duration::from_secs(1)))
        };
        while queues.a.len() + queues.b.len() < 20 {
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Release);
        handle.join().unwrap().unwrap();

        assert_eq!(sim.events(), 10);
        let s = stats.summary();
        assert_eq!(s.measurements, 20);
        assert_eq!(s.reads, 10);
        assert_eq!(s.invalid, 20);
        assert!(queues.a.drain_all().iter().all(|m| m.stop_channel.stream() == Stream::A));
        assert!(queues.b.drain_all().iter().all(|m| m.stop_channel.stream() == Stream::B));
    }
}
