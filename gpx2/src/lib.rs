//! Driver for the ScioSense GPX2 time-to-digital converter.
//!
//! The chip is controlled over a serial bus with one opcode byte per
//! transaction, optionally followed by register data:
//!
//! ```text
//! Opcode           Payload                  Meaning
//! 0x30             -                        power-on reset, stop measuring
//! 0x18             -                        initialize, start measuring
//! 0x80 | addr      1..=17 config bytes      write config from register addr
//! 0x40 | addr      1..=17 bytes read        read config from register addr
//! 0x68             24 bytes read            read the four result registers
//! ```
//!
//! Each result slot holds a 24-bit big-endian reference index followed
//! by a 24-bit big-endian stop result. A slot with nothing in it reads
//! as all ones and decodes to an `Invalid` measurement.
//!
//! The transport and interrupt line are collaborators behind the
//! [`BusTransport`] and [`InterruptLine`] traits. The [`sim`] module
//! provides a simulated chip; with the `hardware` feature, [`linux`]
//! provides spidev and GPIO character device implementations.

pub mod bus;
pub mod config;
pub mod irq;
#[cfg(feature = "hardware")]
pub mod linux;
pub mod sim;

pub use bus::{BusRegistry, BusTransport, TransportError};
pub use config::{Config, ConfigError, CONFIG_LEN};
pub use irq::{Edge, InterruptLine};

use chrono::{DateTime, Utc};
use tdctools::{Meas, StopChannel};
use thiserror::Error;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Power-on reset and stop measurement
pub const SPIOPC_POWER: u8 = 0x30;
/// Initialize chip and start measurement
pub const SPIOPC_INIT: u8 = 0x18;
/// Write configuration register, OR'd with the start address
pub const SPIOPC_WRITE_CONFIG: u8 = 0x80;
/// Read configuration register, OR'd with the start address
pub const SPIOPC_READ_CONFIG: u8 = 0x40;
/// Read result register, OR'd with the start address
pub const SPIOPC_READ_RESULTS: u8 = 0x60;
/// First result register: reference index of stop 1
pub const RESULTS_ADDR: u8 = 0x08;

/// Bytes per result slot (reference index, stop result)
pub const SLOT_LEN: usize = 6;
/// Length of one results read
pub const RESULTS_LEN: usize = 4 * SLOT_LEN;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Gpx2Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("configuration read back {read:02x?} does not match written {written:02x?}")]
    VerifyMismatch { written: Vec<u8>, read: Vec<u8> },
}

#[inline]
fn be24(b: &[u8]) -> u32 {
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

/// Decode one results read into four measurements, one per stop input.
///
/// Every record is stamped with `timestamp` and the clock parameters of
/// `config`. Returns `None` only if `raw` is too short, which means the
/// transfer itself went wrong; an empty slot is an `Invalid` record.
pub fn decode_results(raw: &[u8], config: &Config, timestamp: DateTime<Utc>) -> Option<[Meas; 4]> {
    if raw.len() < RESULTS_LEN {
        return None;
    }
    let lsb_ps = config.lsb_ps();
    let mut out = [Meas::new(StopChannel::Stop0, 0, 0, lsb_ps, config.refclk_freq, timestamp); 4];
    for (i, ch) in StopChannel::ALL.iter().enumerate() {
        let slot = &raw[i * SLOT_LEN..(i + 1) * SLOT_LEN];
        out[i] = Meas::new(
            *ch,
            be24(&slot[0..3]),
            be24(&slot[3..6]),
            lsb_ps,
            config.refclk_freq,
            timestamp,
        );
    }
    Some(out)
}

/// Pack result slots as the chip presents them; `None` is an empty slot.
pub fn encode_results(slots: [Option<(u32, u32)>; 4]) -> [u8; RESULTS_LEN] {
    let mut raw = [0xFFu8; RESULTS_LEN];
    for (i, slot) in slots.iter().enumerate() {
        if let Some((ref_index, stop_result)) = slot {
            let s = &mut raw[i * SLOT_LEN..(i + 1) * SLOT_LEN];
            s[0..3].copy_from_slice(&ref_index.to_be_bytes()[1..]);
            s[3..6].copy_from_slice(&stop_result.to_be_bytes()[1..]);
        }
    }
    raw
}

/// A GPX2 on a bus.
///
/// Owns the active configuration, which is used to decode results; it
/// changes only through [`Gpx2::write_config`].
pub struct Gpx2<B: BusTransport> {
    bus: B,
    config: Config,
}

impl<B: BusTransport> Gpx2<B> {
    pub fn new(bus: B) -> Self {
        Gpx2 { bus, config: Config::recommended() }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    fn read(&mut self, command: u8, n: usize) -> Result<Vec<u8>, TransportError> {
        let rx = self.bus.transfer(command, &vec![0; n])?;
        if rx.len() != n {
            return Err(TransportError::LengthMismatch { expected: n, actual: rx.len() });
        }
        Ok(rx)
    }

    pub fn power_on_reset(&mut self) -> Result<(), Gpx2Error> {
        self.bus.transfer(SPIOPC_POWER, &[])?;
        Ok(())
    }

    pub fn init_reset(&mut self) -> Result<(), Gpx2Error> {
        self.bus.transfer(SPIOPC_INIT, &[])?;
        Ok(())
    }

    /// Make `config` active and write its full image
    pub fn write_config(&mut self, config: Config) -> Result<(), Gpx2Error> {
        self.config = config;
        self.write_image(&config.encode())
    }

    /// Write a raw 17-byte image, leaving the active configuration alone
    pub fn write_image(&mut self, img: &[u8]) -> Result<(), Gpx2Error> {
        if img.len() != CONFIG_LEN {
            return Err(ConfigError::ImageLength(img.len()).into());
        }
        self.bus.transfer(SPIOPC_WRITE_CONFIG, img)?;
        Ok(())
    }

    pub fn write_register(&mut self, addr: u8, byte: u8) -> Result<(), Gpx2Error> {
        config::check_address(addr)?;
        self.bus.transfer(SPIOPC_WRITE_CONFIG | addr, &[byte])?;
        Ok(())
    }

    pub fn read_config(&mut self) -> Result<Vec<u8>, Gpx2Error> {
        Ok(self.read(SPIOPC_READ_CONFIG, CONFIG_LEN)?)
    }

    pub fn read_register(&mut self, addr: u8) -> Result<u8, Gpx2Error> {
        config::check_address(addr)?;
        Ok(self.read(SPIOPC_READ_CONFIG | addr, 1)?[0])
    }

    /// Write `config` and read it back, failing unless the chip holds
    /// exactly the image written.
    pub fn write_and_verify(&mut self, config: Config) -> Result<(), Gpx2Error> {
        self.write_config(config)?;
        let written = config.encode().to_vec();
        let read = self.read_config()?;
        if read != written {
            return Err(Gpx2Error::VerifyMismatch { written, read });
        }
        debug!("config verified {:02x?}", written);
        Ok(())
    }

    /// One results read, decoded with the active configuration
    pub fn read_results(&mut self, timestamp: DateTime<Utc>) -> Result<[Meas; 4], Gpx2Error> {
        let raw = self.read(SPIOPC_READ_RESULTS | RESULTS_ADDR, RESULTS_LEN)?;
        decode_results(&raw, &self.config, timestamp).ok_or_else(|| {
            TransportError::LengthMismatch { expected: RESULTS_LEN, actual: raw.len() }.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdctools::{Status, EMPTY_RESULT};

    /// Records every transaction and answers reads from a script
    #[derive(Default)]
    struct Script {
        sent: Vec<(u8, Vec<u8>)>,
        replies: Vec<Vec<u8>>,
    }

    impl BusTransport for Script {
        fn transfer(&mut self, command: u8, tx: &[u8]) -> Result<Vec<u8>, TransportError> {
            self.sent.push((command, tx.to_vec()));
            if self.replies.is_empty() {
                Ok(vec![0; tx.len()])
            } else {
                Ok(self.replies.remove(0))
            }
        }
    }

    #[test]
    fn decode_all_slots() {
        let raw = encode_results([
            Some((0x00_0001, 0x00_0002)),
            Some((0xAB_CDEF, 0x12_3456)),
            None,
            Some((0xFF_FFFE, 0xFF_FFFF)),
        ]);
        let config = Config::recommended();
        let now = Utc::now();
        let m = decode_results(&raw, &config, now).unwrap();
        assert_eq!(m[0].key(), (1, 2));
        assert_eq!(m[1].key(), (0xAB_CDEF, 0x12_3456));
        assert_eq!(m[2].key(), (EMPTY_RESULT, EMPTY_RESULT));
        assert_eq!(m[2].status, Status::Invalid);
        assert_eq!(m[3].key(), (0xFF_FFFE, 0xFF_FFFF));
        assert_eq!(m[3].status, Status::Valid);
        for (i, meas) in m.iter().enumerate() {
            assert_eq!(meas.stop_channel.index() as usize, i);
            assert_eq!(meas.timestamp, now);
            assert_eq!(meas.refclk_freq, 5e6);
            assert!((meas.lsb_ps - 1.).abs() < 1e-12);
        }
    }

    #[test]
    fn decode_short_read() {
        let raw = encode_results([None; 4]);
        assert!(decode_results(&raw[..23], &Config::recommended(), Utc::now()).is_none());
        assert!(decode_results(&[], &Config::recommended(), Utc::now()).is_none());
    }

    #[test]
    fn opcodes() {
        let mut chip = Gpx2::new(Script::default());
        chip.power_on_reset().unwrap();
        chip.init_reset().unwrap();
        chip.write_register(7, 0x53).unwrap();
        chip.read_register(16).unwrap();
        chip.read_results(Utc::now()).unwrap();
        let sent: Vec<(u8, usize)> =
            chip.bus_mut().sent.iter().map(|(c, tx)| (*c, tx.len())).collect();
        assert_eq!(sent, vec![(0x30, 0), (0x18, 0), (0x87, 1), (0x50, 1), (0x68, 24)]);
    }

    #[test]
    fn bad_address_never_reaches_bus() {
        let mut chip = Gpx2::new(Script::default());
        assert_eq!(
            chip.write_register(17, 0),
            Err(Gpx2Error::Config(ConfigError::RegisterAddress(17)))
        );
        assert!(chip.read_register(0xFF).is_err());
        assert!(chip.write_image(&[0; 16]).is_err());
        assert!(chip.bus_mut().sent.is_empty());
    }

    #[test]
    fn verify_mismatch() {
        let mut bus = Script::default();
        bus.replies.push(vec![]); // write
        bus.replies.push(vec![0; CONFIG_LEN]); // read back
        let mut chip = Gpx2::new(bus);
        match chip.write_and_verify(Config::recommended()) {
            Err(Gpx2Error::VerifyMismatch { written, read }) => {
                assert_eq!(written, Config::recommended().encode().to_vec());
                assert_eq!(read, vec![0; CONFIG_LEN]);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn short_results_read() {
        let mut bus = Script::default();
        bus.replies.push(vec![0xFF; 10]);
        let mut chip = Gpx2::new(bus);
        assert_eq!(
            chip.read_results(Utc::now()),
            Err(Gpx2Error::Transport(TransportError::LengthMismatch { expected: 24, actual: 10 }))
        );
    }
}
