//! Run counters shared by the readout threads

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default, Debug)]
pub struct Stats {
    /// Results reads issued
    pub reads: AtomicU64,
    /// Results reads that failed on the bus
    pub read_errors: AtomicU64,
    /// Valid measurements queued
    pub measurements: AtomicU64,
    /// Empty result slots dropped at routing
    pub invalid: AtomicU64,
    /// Repeated measurements collapsed before matching
    pub duplicates: AtomicU64,
    /// Measurements discarded without a partner
    pub dropped: AtomicU64,
    /// Same-index pairs outside the window
    pub rejected: AtomicU64,
    /// Correlated events emitted
    pub events: AtomicU64,
    /// Drain cycles run
    pub drains: AtomicU64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Summary {
    pub reads: u64,
    pub read_errors: u64,
    pub measurements: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub events: u64,
    pub drains: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn summary(&self) -> Summary {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Summary {
            reads: get(&self.reads),
            read_errors: get(&self.read_errors),
            measurements: get(&self.measurements),
            invalid: get(&self.invalid),
            duplicates: get(&self.duplicates),
            dropped: get(&self.dropped),
            rejected: get(&self.rejected),
            events: get(&self.events),
            drains: get(&self.drains),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} events from {} measurements in {} drains; \
             {} unpaired, {} outside window, {} duplicates, {} empty slots; \
             {} reads, {} failed",
            self.events,
            self.measurements,
            self.drains,
            self.dropped,
            self.rejected,
            self.duplicates,
            self.invalid,
            self.reads,
            self.read_errors,
        )
    }
}
