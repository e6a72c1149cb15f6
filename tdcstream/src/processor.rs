use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tdctools::pat;

use crate::queue::Queues;
use crate::save::SaveMessage;
use crate::stats::Stats;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Queue depth, in multiples of the high-water mark, that counts as starving
pub const STARVATION_FACTOR: usize = 5;

/// What one drain cycle took and produced
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Drain {
    /// Entries taken from the stream A and stream B queues
    pub drained: (usize, usize),
    /// Entries removed before matching
    pub removed: usize,
    pub events: usize,
    pub dropped: u64,
    pub rejected: u64,
}

/// Consumer side of the stream queues.
///
/// Drains both queues once either reaches `max_queue_size`, matches
/// their contents and hands the correlated events to the writer.
/// Measurements without a partner in the same drain are discarded.
pub struct CorrelationEngine {
    queues: Arc<Queues>,
    stats: Arc<Stats>,
    sender: flume::Sender<SaveMessage>,
    max_interval: f64,
    max_queue_size: usize,
    dump: bool,
}

impl CorrelationEngine {
    pub fn new(
        queues: Arc<Queues>,
        stats: Arc<Stats>,
        sender: flume::Sender<SaveMessage>,
        max_interval: f64,
        max_queue_size: usize,
    ) -> Self {
        CorrelationEngine { queues, stats, sender, max_interval, max_queue_size, dump: false }
    }

    /// Also send every drained measurement to the writer
    pub fn with_dump(mut self, dump: bool) -> Self {
        self.dump = dump;
        self
    }

    /// Whether either queue has reached the high-water mark
    pub fn due(&self) -> bool {
        self.queues.a.len() >= self.max_queue_size || self.queues.b.len() >= self.max_queue_size
    }

    fn check_starvation(&self) {
        let limit = STARVATION_FACTOR * self.max_queue_size;
        for q in [&self.queues.a, &self.queues.b] {
            let n = q.len();
            if n > limit {
                warn!("stream {:?} queue at {} entries, high-water mark {}", q.stream(), n, self.max_queue_size);
            }
        }
    }

    /// Run one drain cycle regardless of queue depth
    pub fn drain(&self) -> Drain {
        let mut a = self.queues.a.drain_all();
        let mut b = self.queues.b.drain_all();
        let drained = (a.len(), b.len());
        if self.dump && !(a.is_empty() && b.is_empty()) {
            let mut all = Vec::with_capacity(a.len() + b.len());
            all.extend_from_slice(&a);
            all.extend_from_slice(&b);
            all.sort_by_key(|m| m.timestamp);
            self.send(SaveMessage::Measurements(all));
        }

        let removed = pat::prepare(&mut a) + pat::prepare(&mut b);
        let c = pat::coincidences(&a, &b, self.max_interval);
        let report = Drain {
            drained,
            removed,
            events: c.events.len(),
            dropped: c.dropped,
            rejected: c.rejected,
        };

        Stats::add(&self.stats.drains, 1);
        Stats::add(&self.stats.duplicates, removed as u64);
        Stats::add(&self.stats.dropped, c.dropped);
        Stats::add(&self.stats.rejected, c.rejected);
        Stats::add(&self.stats.events, report.events as u64);
        debug!(
            "drained {}+{}: {} removed, {} events, {} unpaired, {} outside window",
            drained.0,
            drained.1,
            removed,
            report.events,
            c.dropped,
            c.rejected,
        );

        if report.events > 0 {
            self.send(SaveMessage::Events(c.events));
        }
        report
    }

    fn send(&self, msg: SaveMessage) {
        if self.sender.send(msg).is_err() {
            warn!("writer has gone away, output lost");
        }
    }

    /// Drain if due. Returns whether a drain ran.
    pub fn poll(&self) -> bool {
        self.check_starvation();
        if self.due() {
            self.drain();
            true
        } else {
            false
        }
    }

    /// Drain until both queues are empty, whatever their depth
    pub fn finish(&self) {
        while !self.queues.is_empty() {
            self.drain();
        }
    }

    /// Poll on every push and at least every `tick` until `finish` is
    /// set, then run the final drain.
    pub fn run(self, tick: Duration, finish: Arc<AtomicBool>) -> Result<()> {
        loop {
            if finish.load(Ordering::Acquire) {
                self.finish();
                break;
            }
            self.poll();
            self.queues.notifier.wait_for(tick);
        }
        info!("correlation stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tdctools::{Meas, StopChannel};

    fn engine(max_queue_size: usize) -> (CorrelationEngine, flume::Receiver<SaveMessage>) {
        let (tx, rx) = flume::unbounded();
        let e = CorrelationEngine::new(Queues::new(), Arc::new(Stats::new()), tx, 1e-7, max_queue_size);
        (e, rx)
    }

    fn push(e: &CorrelationEngine, ch: StopChannel, ref_index: u32, stop_result: u32) {
        e.queues.route(Meas::new(ch, ref_index, stop_result, 1., 5e6, Utc::now()));
    }

    #[test]
    fn dump_sees_everything() {
        let (e, rx) = engine(1);
        let e = e.with_dump(true);
        push(&e, StopChannel::Stop0, 5, 100);
        push(&e, StopChannel::Stop1, 5, 102);
        push(&e, StopChannel::Stop3, 9, 0);
        assert_eq!(e.drain().events, 1);
        match rx.try_recv() {
            Ok(SaveMessage::Measurements(m)) => assert_eq!(m.len(), 3),
            _ => panic!("expected measurements first"),
        }
        match rx.try_recv() {
            Ok(SaveMessage::Events(ev)) => assert_eq!(ev.len(), 1),
            _ => panic!("expected events"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_drain_sends_nothing() {
        let (e, rx) = engine(1);
        let e = e.with_dump(true);
        assert_eq!(e.drain(), Drain::default());
        assert!(rx.try_recv().is_err());
        assert_eq!(e.stats.summary().drains, 1);
    }

    #[test]
    fn drain_reports_sizes_before_dedup() {
        let (e, _rx) = engine(1);
        for _ in 0..3 {
            push(&e, StopChannel::Stop0, 7, 50);
        }
        push(&e, StopChannel::Stop2, 8, 0);
        push(&e, StopChannel::Stop1, 7, 60);
        push(&e, StopChannel::Stop3, 7, 60);
        let d = e.drain();
        assert_eq!(d.drained, (4, 2));
        assert_eq!(d.removed, 3);
        assert_eq!(d.events, 1);
        assert_eq!(d.dropped, 1);
        assert_eq!(d.rejected, 0);
        assert_eq!(e.stats.summary().duplicates, 3);
    }
}
