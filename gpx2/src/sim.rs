//! A simulated GPX2 for running without hardware.
//!
//! [`SimChip::new`] returns a bus and an interrupt line sharing one
//! chip state. Once initialized, the chip produces a physical event
//! every `period`: a stop on stream A (input 0 or 2, alternating) and a
//! stop on stream B (input 1 or 3) `offset_ps` later, with optional
//! uniform jitter. Each event is presented as one results frame
//! and the interrupt line is held low while frames are pending.
//!
//! Faults can be injected to exercise the readout: lone stops without a
//! partner, frames delivered twice, and failing results reads.

use crate::bus::{BusRegistry, BusTransport, DeviceHandle, TransportError};
use crate::config::{CONFIG_LEN, MAX_REG_ADDR};
use crate::irq::InterruptLine;
use crate::{
    encode_results, RESULTS_ADDR, RESULTS_LEN, SPIOPC_INIT, SPIOPC_POWER, SPIOPC_READ_CONFIG,
    SPIOPC_READ_RESULTS, SPIOPC_WRITE_CONFIG,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct SimParams {
    /// Time between physical events; zero means a new event whenever asked
    pub period: Duration,
    /// Delay of the stream B stop after the stream A stop
    pub offset_ps: f64,
    /// Half-width of the uniform jitter added to `offset_ps`
    pub jitter_ps: f64,
    /// Reference clock fed to the chip, Hz
    pub refclk_freq: f64,
    /// Every nth event has no stream B stop
    pub single_every: Option<u64>,
    /// Every nth frame is delivered twice
    pub duplicate_every: Option<u64>,
    /// Every nth results read fails
    pub read_error_every: Option<u64>,
    /// Stop producing events after this many
    pub max_events: Option<u64>,
    pub seed: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            period: Duration::from_millis(1),
            offset_ps: 2_000.,
            jitter_ps: 50.,
            refclk_freq: 5e6,
            single_every: None,
            duplicate_every: None,
            read_error_every: None,
            max_events: None,
            seed: 0x6770_7832,
        }
    }
}

struct SimState {
    params: SimParams,
    rng: StdRng,
    registers: [u8; CONFIG_LEN],
    running: bool,
    ref_index: u32,
    events: u64,
    reads: u64,
    last_event: Instant,
    pending: VecDeque<[u8; RESULTS_LEN]>,
}

impl SimState {
    fn divisions(&self) -> u32 {
        let d = self.registers[3] as u32
            | (self.registers[4] as u32) << 8
            | (self.registers[5] as u32 & 0x0F) << 16;
        if d == 0 { 200_000 } else { d }
    }

    fn power_on_reset(&mut self) {
        self.running = false;
        self.ref_index = 0;
        self.pending.clear();
    }

    /// Queue a frame for the next physical event, if one is due
    fn tick(&mut self) {
        if !self.running || !self.pending.is_empty() {
            return;
        }
        if let Some(max) = self.params.max_events {
            if self.events >= max {
                return;
            }
        }
        if self.last_event.elapsed() < self.params.period {
            return;
        }
        self.last_event = Instant::now();
        self.events += 1;

        let divisions = self.divisions();
        let lsb_ps = 1e12 / (divisions as f64 * self.params.refclk_freq);
        self.ref_index = (self.ref_index + self.rng.gen_range(1..=3)) & 0xFF_FFFF;
        let jitter = if self.params.jitter_ps > 0. {
            self.rng.gen_range(-self.params.jitter_ps..self.params.jitter_ps)
        } else {
            0.
        };
        let offset = ((self.params.offset_ps + jitter) / lsb_ps).round() as i64;
        // Keep both stops in one reference period when the offset allows
        let lo = (-offset).max(0);
        let hi = (divisions as i64 - offset).min(divisions as i64);
        let stop_a = if lo < hi {
            self.rng.gen_range(lo..hi)
        } else {
            self.rng.gen_range(0..divisions as i64)
        };
        let b_total = stop_a + offset;
        let ref_b = (self.ref_index as i64 + b_total.div_euclid(divisions as i64)) as u32 & 0xFF_FFFF;
        let stop_b = b_total.rem_euclid(divisions as i64) as u32;

        let mut slots = [None; 4];
        let odd = (self.events % 2) as usize * 2;
        slots[odd] = Some((self.ref_index, stop_a as u32));
        let single = matches!(self.params.single_every, Some(n) if n > 0 && self.events % n == 0);
        if !single {
            slots[odd + 1] = Some((ref_b, stop_b));
        }
        let frame = encode_results(slots);
        self.pending.push_back(frame);
        if matches!(self.params.duplicate_every, Some(n) if n > 0 && self.events % n == 0) {
            self.pending.push_back(frame);
        }
    }

    fn read_results(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        self.reads += 1;
        if matches!(self.params.read_error_every, Some(k) if k > 0 && self.reads % k == 0) {
            return Err(TransportError::TransferFailed(String::from("simulated bus fault")));
        }
        let frame = self.pending.pop_front().unwrap_or([0xFF; RESULTS_LEN]);
        let mut rx = frame.to_vec();
        rx.resize(n, 0xFF);
        Ok(rx)
    }
}

/// Shared handle to a simulated chip
#[derive(Clone)]
pub struct SimChip {
    state: Arc<Mutex<SimState>>,
}

impl SimChip {
    pub fn new(params: SimParams) -> (SimBus, SimLine) {
        let chip = SimChip {
            state: Arc::new(Mutex::new(SimState {
                rng: StdRng::seed_from_u64(params.seed),
                params,
                registers: [0; CONFIG_LEN],
                running: false,
                ref_index: 0,
                events: 0,
                reads: 0,
                last_event: Instant::now(),
                pending: VecDeque::new(),
            })),
        };
        (
            SimBus { chip: chip.clone(), device: None },
            SimLine { chip },
        )
    }

    /// Physical events generated so far
    pub fn events(&self) -> u64 {
        self.state.lock().events
    }

    /// Overwrite one register as if the chip had lost it
    pub fn corrupt_register(&self, addr: usize, byte: u8) {
        self.state.lock().registers[addr] = byte;
    }
}

/// Bus side of a [`SimChip`]
pub struct SimBus {
    chip: SimChip,
    device: Option<DeviceHandle>,
}

impl SimBus {
    /// Account traffic in `registry`
    pub fn register(&mut self, registry: &BusRegistry) {
        self.device = Some(registry.register("gpx2-sim"));
    }

    pub fn chip(&self) -> SimChip {
        self.chip.clone()
    }
}

impl BusTransport for SimBus {
    fn transfer(&mut self, command: u8, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut s = self.chip.state.lock();
        let rx = match command {
            SPIOPC_POWER => {
                s.power_on_reset();
                vec![0; tx.len()]
            }
            SPIOPC_INIT => {
                s.running = true;
                s.last_event = Instant::now();
                vec![0; tx.len()]
            }
            c if c == SPIOPC_READ_RESULTS | RESULTS_ADDR => s.read_results(tx.len())?,
            c if c & 0xE0 == SPIOPC_WRITE_CONFIG => {
                let addr = (c & 0x1F) as usize;
                if addr > MAX_REG_ADDR as usize || addr + tx.len() > CONFIG_LEN {
                    return Err(TransportError::TransferFailed(format!(
                        "config write of {} bytes at register {}",
                        tx.len(),
                        addr
                    )));
                }
                s.registers[addr..addr + tx.len()].copy_from_slice(tx);
                vec![0; tx.len()]
            }
            c if c & 0xE0 == SPIOPC_READ_CONFIG => {
                let addr = (c & 0x1F) as usize;
                if addr > MAX_REG_ADDR as usize || addr + tx.len() > CONFIG_LEN {
                    return Err(TransportError::TransferFailed(format!(
                        "config read of {} bytes at register {}",
                        tx.len(),
                        addr
                    )));
                }
                s.registers[addr..addr + tx.len()].to_vec()
            }
            c => {
                return Err(TransportError::TransferFailed(format!("unknown opcode {:#04x}", c)));
            }
        };
        if let Some(d) = &self.device {
            d.record(tx.len() + 1, rx.len());
        }
        Ok(rx)
    }
}

/// Interrupt side of a [`SimChip`]: low while results are pending
pub struct SimLine {
    chip: SimChip,
}

impl InterruptLine for SimLine {
    fn read_level(&mut self) -> Result<u8, TransportError> {
        let mut s = self.chip.state.lock();
        s.tick();
        Ok(if s.pending.is_empty() { 1 } else { 0 })
    }
}
