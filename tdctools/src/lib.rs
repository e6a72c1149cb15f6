//! Shared types and analysis tools for TDC stop measurements.
//!
//! A [`Meas`] is one stop event decoded from a TDC result register: a
//! coarse, wrapping count of reference clock periods (`ref_index`) and
//! a fine counter locating the stop within that period
//! (`stop_result`). Two measurements taken against the same reference
//! clock can be fused into one physical time difference with [`diff`],
//! which is the only primitive the correlation in [`pat`] uses to
//! decide whether two stops belong to the same physical event.

pub mod bit;
pub mod cfg;
pub mod de;
pub mod pat;
pub mod ser;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All-ones value reported by an empty 24-bit result register
pub const EMPTY_RESULT: u32 = 0xFF_FFFF;

/// Picoseconds to seconds
pub const PICO: f64 = 1e-12;

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum Status {
    Invalid,
    Valid,
}

/// Physical stop input of the chip (0-indexed)
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum StopChannel {
    Stop0,
    Stop1,
    Stop2,
    Stop3,
}

/// Logical stream fed by a pair of stop inputs.
///
/// The pairing follows the board wiring: stops 0 and 2 feed stream A,
/// stops 1 and 3 feed stream B.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum Stream {
    A,
    B,
}

impl StopChannel {
    pub const ALL: [StopChannel; 4] = [
        StopChannel::Stop0,
        StopChannel::Stop1,
        StopChannel::Stop2,
        StopChannel::Stop3,
    ];

    pub fn from_index(i: u8) -> Option<StopChannel> {
        StopChannel::ALL.get(i as usize).copied()
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn stream(self) -> Stream {
        match self.index() % 2 {
            0 => Stream::A,
            _ => Stream::B,
        }
    }
}

/// One decoded stop event. Ordering for dedup and sorting is by [`Meas::key`].
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Meas {
    pub status: Status,
    pub stop_channel: StopChannel,
    /// Reference clock periods since chip reset, 24-bit wrapping
    pub ref_index: u32,
    /// Fine counter within one reference period, 24-bit
    pub stop_result: u32,
    /// Picoseconds per `stop_result` unit
    pub lsb_ps: f64,
    /// Reference clock frequency (Hz) at capture time
    pub refclk_freq: f64,
    /// Wall-clock capture instant of the readout
    pub timestamp: DateTime<Utc>,
}

impl Meas {
    /// Build a measurement from raw register values, marking the
    /// all-ones readout as `Invalid`.
    pub fn new(
        stop_channel: StopChannel,
        ref_index: u32,
        stop_result: u32,
        lsb_ps: f64,
        refclk_freq: f64,
        timestamp: DateTime<Utc>,
    ) -> Meas {
        let status = if ref_index == EMPTY_RESULT && stop_result == EMPTY_RESULT {
            Status::Invalid
        } else {
            Status::Valid
        };
        Meas {
            status,
            stop_channel,
            ref_index,
            stop_result,
            lsb_ps,
            refclk_freq,
            timestamp,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.status == Status::Valid
    }

    #[inline]
    pub fn key(&self) -> (u32, u32) {
        (self.ref_index, self.stop_result)
    }
}

/// Signed difference of reference indices, `b - a`, in the 32-bit domain
/// so that counter wraparound yields a negative value.
#[inline]
pub fn ref_diff(a: &Meas, b: &Meas) -> i32 {
    (b.ref_index as i32).wrapping_sub(a.ref_index as i32)
}

/// Time from stop `a` to stop `b` in seconds.
///
/// Returns NaN if either measurement is invalid or the two were not
/// taken with the same nonzero reference clock. Check the result with
/// `is_nan`/`is_finite`, never by comparison.
pub fn diff(a: &Meas, b: &Meas) -> f64 {
    if !a.is_valid() || !b.is_valid() || a.refclk_freq != b.refclk_freq || a.refclk_freq == 0. {
        return f64::NAN;
    }
    let period = 1. / b.refclk_freq;
    let coarse = period * ref_diff(a, b) as f64;
    let fine = (b.stop_result as f64 - a.stop_result as f64) * b.lsb_ps * PICO;
    coarse + fine
}
