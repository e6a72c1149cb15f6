//! Configuration tools: run files for the readout daemon

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of one readout run, read from a JSON run file.
///
/// Every field is optional in the file; missing fields take the values
/// of [`RunConfig::default`]. Durations are parsed as in
/// [humantime](https://docs.rs/humantime/), e.g. `250ms` or `1h 30min`.
///
/// ## Correlation
///
/// `max_interval` (seconds) is the coincidence window. The correlation
/// engine only drains the stop queues once either holds
/// `max_queue_size` entries, checking every `tick` or whenever a new
/// stop is queued. With a `limit` set, the run stops by itself after
/// that long; otherwise it runs until stdin closes.
///
/// ## Output
///
/// Correlated events go to `output`, or stdout if unset. With `dump`
/// set, every valid measurement drained is also recorded there in the
/// format read back by the `correlate` tool.
///
/// ## Chip
///
/// `chip` overrides selected registers of the chip's operating
/// configuration. Everything else on the chip is fixed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub name:               String,
    pub spi_device:         PathBuf,
    pub spi_speed_hz:       u32,
    pub gpio_chip:          PathBuf,
    pub interrupt_pin:      u32,
    pub max_interval:       f64,
    pub max_queue_size:     usize,
    #[serde(with = "humantime_serde")]
    pub tick:               Duration,
    #[serde(with = "humantime_serde")]
    pub edge_timeout:       Duration,
    #[serde(with = "humantime_serde")]
    pub limit:              Option<Duration>,
    pub print_timestamps:   bool,
    pub output:             Option<PathBuf>,
    pub dump:               Option<PathBuf>,
    pub chip:               Option<ChipSettings>,
}

/// Register overrides applied on top of the operating configuration
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ChipSettings {
    pub blockwise_fifo_read:    Option<bool>,
    pub common_fifo_read:       Option<bool>,
    pub high_resolution:        Option<u8>,
    pub refclk_divisions:       Option<u32>,
    pub refclk_freq:            Option<f64>,
    /// Enable mask of stop inputs, bit 0 is stop 0
    pub stops:                  Option<u8>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            name:               String::new(),
            spi_device:         PathBuf::from("/dev/spidev0.0"),
            spi_speed_hz:       61_035,
            gpio_chip:          PathBuf::from("/dev/gpiochip0"),
            interrupt_pin:      20,
            max_interval:       1e-7,
            max_queue_size:     200,
            tick:               Duration::from_secs(1),
            edge_timeout:       Duration::from_secs(10),
            limit:              None,
            print_timestamps:   false,
            output:             None,
            dump:               None,
            chip:               Some(ChipSettings {
                blockwise_fifo_read: Some(false),
                common_fifo_read: Some(false),
                ..Default::default()
            }),
        }
    }
}

/// Largest reference clock divider the chip's 20-bit field holds
pub const REFCLK_DIVISIONS_MAX: u32 = 0xF_FFFF;

impl ChipSettings {
    /// Reject overrides the chip registers cannot represent
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(d) = self.refclk_divisions {
            if d == 0 || d > REFCLK_DIVISIONS_MAX {
                anyhow::bail!("chip.refclk_divisions must be in 1..={}, got {}", REFCLK_DIVISIONS_MAX, d);
            }
        }
        if let Some(f) = self.refclk_freq {
            if !(f.is_finite() && f > 0.) {
                anyhow::bail!("chip.refclk_freq must be a positive frequency in Hz, got {}", f);
            }
        }
        if let Some(h) = self.high_resolution {
            if h > 3 {
                anyhow::bail!("chip.high_resolution must be in 0..=3, got {}", h);
            }
        }
        Ok(())
    }
}

impl RunConfig {
    /// Reject settings the readout cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.max_interval.is_finite() && self.max_interval > 0.) {
            anyhow::bail!("max_interval must be a positive number of seconds, got {}", self.max_interval);
        }
        if self.max_queue_size == 0 {
            anyhow::bail!("max_queue_size must be at least 1");
        }
        if self.tick.is_zero() {
            anyhow::bail!("tick must be nonzero");
        }
        if let Some(chip) = &self.chip {
            chip.validate()?;
        }
        Ok(())
    }
}
