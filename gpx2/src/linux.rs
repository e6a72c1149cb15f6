//! Linux spidev bus and GPIO character device interrupt line

use crate::bus::{BusRegistry, BusTransport, DeviceHandle, TransportError};
use crate::irq::InterruptLine;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::path::Path;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

const CONSUMER: &str = "gpx2";

/// The GPX2 clocks data on the falling edge with an idle-high clock
pub const SPI_MODE: SpiModeFlags = SpiModeFlags::SPI_MODE_2;

pub struct SpidevBus {
    spi: Spidev,
    device: Option<DeviceHandle>,
}

impl SpidevBus {
    pub fn open(
        path: impl AsRef<Path>,
        speed_hz: u32,
        registry: Option<&BusRegistry>,
    ) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let mut spi = Spidev::open(path)
            .map_err(|e| TransportError::BadHandle(format!("{}: {}", path.display(), e)))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(speed_hz)
            .mode(SPI_MODE)
            .build();
        spi.configure(&options)
            .map_err(|e| TransportError::BadHandle(format!("{}: {}", path.display(), e)))?;
        info!("opened {} at {} Hz", path.display(), speed_hz);
        Ok(SpidevBus {
            spi,
            device: registry.map(|r| r.register(&path.display().to_string())),
        })
    }
}

impl BusTransport for SpidevBus {
    fn transfer(&mut self, command: u8, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut txbuf = Vec::with_capacity(tx.len() + 1);
        txbuf.push(command);
        txbuf.extend_from_slice(tx);
        let mut rxbuf = vec![0u8; txbuf.len()];
        {
            let mut transfer = SpidevTransfer::read_write(&txbuf, &mut rxbuf);
            self.spi
                .transfer(&mut transfer)
                .map_err(|e| TransportError::TransferFailed(e.to_string()))?;
        }
        if let Some(d) = &self.device {
            d.record(txbuf.len(), tx.len());
        }
        // The first byte clocked in is sent while the opcode goes out
        Ok(rxbuf.split_off(1))
    }
}

pub struct GpioLine {
    handle: LineHandle,
}

impl GpioLine {
    pub fn open(chip: impl AsRef<Path>, pin: u32) -> Result<Self, TransportError> {
        let chip = chip.as_ref();
        let bad = |e: gpio_cdev::Error| TransportError::BadHandle(format!("{} line {}: {}", chip.display(), pin, e));
        let handle = Chip::new(chip)
            .and_then(|mut c| c.get_line(pin))
            .and_then(|line| line.request(LineRequestFlags::INPUT, 0, CONSUMER))
            .map_err(bad)?;
        info!("watching {} line {}", chip.display(), pin);
        Ok(GpioLine { handle })
    }
}

impl InterruptLine for GpioLine {
    fn read_level(&mut self) -> Result<u8, TransportError> {
        self.handle
            .get_value()
            .map_err(|e| TransportError::TransferFailed(e.to_string()))
    }
}
