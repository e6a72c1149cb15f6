//! Coincidence matching between the two stop streams

use crate::{diff, ref_diff, Meas};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A matched pair of stops, one from each stream, within the window
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct CorrelatedEvent {
    /// Capture time of the stream A stop
    pub timestamp: DateTime<Utc>,
    /// Time from the stream A stop to the stream B stop, in seconds
    pub diff: f64,
}

/// Outcome of one matching pass
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Correlation {
    pub events: Vec<CorrelatedEvent>,
    /// Stops discarded without a partner in the other stream
    pub dropped: u64,
    /// Same-index pairs whose time difference fell outside the window
    pub rejected: u64,
}

/// Order a drained buffer for matching: remove invalid stops, sort by
/// `(ref_index, stop_result)` and collapse exact duplicates.
///
/// Returns the number of entries removed.
pub fn prepare(buf: &mut Vec<Meas>) -> usize {
    let n = buf.len();
    buf.retain(|m| m.is_valid());
    buf.sort_unstable_by_key(|m| m.key());
    buf.dedup_by_key(|m| m.key());
    n - buf.len()
}

/// Walk two prepared buffers in lockstep by reference index.
///
/// A stop whose reference index has no counterpart in the other stream
/// is discarded. Stops sharing a reference index are consumed together
/// whether or not they fall within `max_interval` seconds of each
/// other. Whatever remains once either buffer runs out is discarded
/// too: nothing is carried over to a later pass.
pub fn coincidences(a: &[Meas], b: &[Meas], max_interval: f64) -> Correlation {
    let mut c = Correlation::default();
    let mut ia = a.iter().peekable();
    let mut ib = b.iter().peekable();

    loop {
        let (ma, mb) = match (ia.peek(), ib.peek()) {
            (Some(&ma), Some(&mb)) => (ma, mb),
            _ => break,
        };
        match ref_diff(ma, mb).cmp(&0) {
            // A is behind: it can no longer be matched
            Ordering::Greater => {
                ia.next();
                c.dropped += 1;
            }
            // B is behind
            Ordering::Less => {
                ib.next();
                c.dropped += 1;
            }
            Ordering::Equal => {
                let interval = diff(ma, mb);
                if interval.is_finite() && interval.abs() < max_interval {
                    c.events.push(CorrelatedEvent {
                        timestamp: ma.timestamp,
                        diff: interval,
                    });
                } else {
                    c.rejected += 1;
                }
                ia.next();
                ib.next();
            }
        }
    }
    c.dropped += (ia.count() + ib.count()) as u64;
    c
}
