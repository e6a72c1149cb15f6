//! Serial bus transport contract and byte accounting

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("bad device handle: {0}")]
    BadHandle(String),
    #[error("transfer failed: {0}")]
    TransferFailed(String),
    #[error("transfer length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// A register-oriented, full-duplex serial bus.
///
/// One transaction clocks out the command byte followed by `tx`, and
/// returns the bytes clocked in while `tx` was sent, so the response is
/// as long as `tx`. A read of `n` bytes sends `n` zeros. Implementations
/// must bound each transaction themselves and report a hang as an
/// error.
pub trait BusTransport {
    fn transfer(&mut self, command: u8, tx: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn transfer(&mut self, command: u8, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
        (**self).transfer(command, tx)
    }
}

/// Traffic of one open device
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceStats {
    pub name: String,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    devices: BTreeMap<u64, DeviceStats>,
}

/// Shared record of the open bus devices and their traffic.
///
/// A transport registers itself when opened and holds the returned
/// [`DeviceHandle`]; dropping the handle removes the device.
#[derive(Clone, Default)]
pub struct BusRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl BusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str) -> DeviceHandle {
        let mut r = self.inner.lock();
        let id = r.next_id;
        r.next_id += 1;
        r.devices.insert(
            id,
            DeviceStats { name: name.to_string(), ..Default::default() },
        );
        DeviceHandle { id, registry: self.clone() }
    }

    /// Number of currently open devices
    pub fn devices(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn stats(&self) -> Vec<DeviceStats> {
        self.inner.lock().devices.values().cloned().collect()
    }

    /// Total (written, read) bytes over all open devices
    pub fn totals(&self) -> (u64, u64) {
        self.inner
            .lock()
            .devices
            .values()
            .fold((0, 0), |(w, r), d| (w + d.bytes_written, r + d.bytes_read))
    }
}

/// Registration of one device in a [`BusRegistry`]
pub struct DeviceHandle {
    id: u64,
    registry: BusRegistry,
}

impl DeviceHandle {
    pub fn record(&self, written: usize, read: usize) {
        if let Some(d) = self.registry.inner.lock().devices.get_mut(&self.id) {
            d.bytes_written += written as u64;
            d.bytes_read += read as u64;
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.registry.inner.lock().devices.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lifecycle() {
        let reg = BusRegistry::new();
        let a = reg.register("spi0");
        let b = reg.register("spi1");
        assert_eq!(reg.devices(), 2);
        a.record(18, 18);
        b.record(25, 25);
        a.record(1, 1);
        assert_eq!(reg.totals(), (44, 44));
        drop(a);
        assert_eq!(reg.devices(), 1);
        assert_eq!(reg.stats()[0].name, "spi1");
        assert_eq!(reg.totals(), (25, 25));
    }
}
