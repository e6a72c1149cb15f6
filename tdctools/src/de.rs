//! Deserialization of measurement dumps written by [`crate::ser`]

use crate::{Meas, StopChannel};
use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use std::io::Read;

/// Read measurements from tab-separated values
/// (timestamp ns, stop channel, ref_index, stop_result, lsb_ps, refclk_freq).
pub fn measurements_tsv(rdr: &mut csv::Reader<impl Read>) -> Result<Vec<Meas>> {
    let mut meas = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() < 6 {
            return Err(anyhow!("expected 6 fields, found {}: {:?}", record.len(), record));
        }
        let ch = record[1].parse::<u8>()?;
        let stop_channel = StopChannel::from_index(ch)
            .ok_or_else(|| anyhow!("no stop channel {}", ch))?;
        meas.push(Meas::new(
            stop_channel,
            record[2].parse::<u32>()?,
            record[3].parse::<u32>()?,
            record[4].parse::<f64>()?,
            record[5].parse::<f64>()?,
            Utc.timestamp_nanos(record[0].parse::<i64>()?),
        ));
    }
    Ok(meas)
}
