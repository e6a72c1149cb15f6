//! Interrupt line contract. The GPX2 pulls its interrupt low while
//! results are waiting in its FIFO.

use crate::bus::TransportError;
use std::time::{Duration, Instant};

/// Polling period of the default edge wait
pub const POLL_PERIOD: Duration = Duration::from_micros(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Edge {
    Rising,
    Falling,
}

pub trait InterruptLine {
    /// Current logic level of the line
    fn read_level(&mut self) -> Result<u8, TransportError>;

    /// Block until the level changes or `timeout` elapses.
    ///
    /// The default polls [`InterruptLine::read_level`].
    fn wait_edge(&mut self, timeout: Duration) -> Result<Option<Edge>, TransportError> {
        let start = Instant::now();
        let initial = self.read_level()?;
        loop {
            let level = self.read_level()?;
            if level != initial {
                return Ok(Some(if level == 0 { Edge::Falling } else { Edge::Rising }));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
            std::thread::sleep(POLL_PERIOD);
        }
    }
}

impl<T: InterruptLine + ?Sized> InterruptLine for Box<T> {
    fn read_level(&mut self) -> Result<u8, TransportError> {
        (**self).read_level()
    }

    fn wait_edge(&mut self, timeout: Duration) -> Result<Option<Edge>, TransportError> {
        (**self).wait_edge(timeout)
    }
}

/// Wait until the chip reports data, i.e. the line reads low.
///
/// Returns immediately if data is already pending, and `false` if the
/// line stayed high for `timeout`.
pub fn wait_data_ready(
    line: &mut impl InterruptLine,
    timeout: Duration,
) -> Result<bool, TransportError> {
    let start = Instant::now();
    loop {
        if line.read_level()? == 0 {
            return Ok(true);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(false);
        }
        match line.wait_edge(timeout - elapsed)? {
            Some(Edge::Falling) => return Ok(true),
            Some(Edge::Rising) | None => {}
        }
    }
}
