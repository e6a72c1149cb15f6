//! Serialization of correlated events and measurement dumps as text

use crate::pat::CorrelatedEvent;
use crate::Meas;
use anyhow::Result;
use std::io::Write;

/// Nanoseconds since the Unix epoch, saturating outside the representable range
pub fn timestamp_ns(event: &CorrelatedEvent) -> i64 {
    event.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Format one correlated event as a line of output (without the newline):
/// the time difference in seconds, optionally after a nanosecond timestamp
/// and a tab.
pub fn event_line(event: &CorrelatedEvent, with_timestamp: bool) -> String {
    let mut buf = ryu::Buffer::new();
    let d = buf.format(event.diff);
    if with_timestamp {
        format!("{}\t{}", timestamp_ns(event), d)
    } else {
        d.to_string()
    }
}

/// Write events to tab-separated values, one event per record.
pub fn events_tsv(
    wtr: &mut csv::Writer<impl Write>,
    events: &[CorrelatedEvent],
    with_timestamp: bool,
) -> Result<()> {
    let mut buf = ryu::Buffer::new();
    for event in events.iter() {
        let d = buf.format(event.diff);
        if with_timestamp {
            wtr.write_record(&[timestamp_ns(event).to_string().as_str(), d])?;
        } else {
            wtr.write_record(&[d])?;
        }
    }
    Ok(())
}

/// Dump measurements to tab-separated values
/// (timestamp ns, stop channel, ref_index, stop_result, lsb_ps, refclk_freq).
/// Invalid measurements are skipped.
pub fn measurements_tsv(wtr: &mut csv::Writer<impl Write>, meas: &[Meas]) -> Result<()> {
    for m in meas.iter().filter(|m| m.is_valid()) {
        wtr.write_record(&[
            m.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX).to_string(),
            m.stop_channel.index().to_string(),
            m.ref_index.to_string(),
            m.stop_result.to_string(),
            m.lsb_ps.to_string(),
            m.refclk_freq.to_string(),
        ])?;
    }
    Ok(())
}
