#![allow(dead_code)]

use chrono::Utc;
use tdctools::{Meas, StopChannel};

/// Two streams of `n` stops each, where every third reference period
/// on stream B has no partner on stream A.
pub fn synthetic_streams(n: u32) -> (Vec<Meas>, Vec<Meas>) {
    let now = Utc::now();
    let mut a = Vec::with_capacity(n as usize);
    let mut b = Vec::with_capacity(n as usize);
    for i in 0..n {
        let ch_a = if i % 2 == 0 { StopChannel::Stop0 } else { StopChannel::Stop2 };
        let ch_b = if i % 2 == 0 { StopChannel::Stop1 } else { StopChannel::Stop3 };
        let ref_a = if i % 3 == 0 { 2 * i + 1 } else { 2 * i };
        a.push(Meas::new(ch_a, ref_a, i.wrapping_mul(7919) % 200_000, 1., 5e6, now));
        b.push(Meas::new(ch_b, 2 * i, i.wrapping_mul(104_729) % 200_000, 1., 5e6, now));
    }
    (a, b)
}
