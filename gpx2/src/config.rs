//! Configuration register image of the GPX2
//!
//! The chip has 17 configuration registers (addresses 0..=16), always
//! written and read back as one 17-byte image. Fields wider than their
//! register bits are masked on encode, so the image length contract
//! cannot be broken by a bad value.

use tdctools::bit::{self, BitOps};
use tdctools::cfg::ChipSettings;
use tdctools::StopChannel;
use thiserror::Error;

/// Length of the configuration image in bytes
pub const CONFIG_LEN: usize = 17;

/// Highest writable configuration register address
pub const MAX_REG_ADDR: u8 = 16;

/// Reserved registers 8..=15, fixed by the chip
const REG_DEFAULTS_08_15: [u8; 8] = [
    0b1010_0001,
    0b0001_0011,
    0b0000_0000,
    0b0000_1010,
    0b1100_1100,
    0b1100_1100,
    0b1111_0001,
    0b0111_1101,
];

/// Fixed bits of register 6 (7:5)
const REG_06_FIXED: u8 = 0b110;
/// Fixed bits of register 7 (6 and 3:0). REFCLK_BY_XOSC sits at bit 7 as in
/// the datasheet, so the operating image has 0xD3 here rather than 0x93.
const REG_07_FIXED: u8 = 0b0100_0011;

/// Width of the reference clock divider field (registers 3..=5)
pub const REFCLK_DIVISIONS_BITS: usize = 20;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("configuration image must be 17 bytes, got {0}")]
    ImageLength(usize),
    #[error("register address {0} out of range 0..=16")]
    RegisterAddress(u8),
}

/// Check a register address before it reaches the bus
pub fn check_address(addr: u8) -> Result<(), ConfigError> {
    if addr > MAX_REG_ADDR {
        return Err(ConfigError::RegisterAddress(addr));
    }
    Ok(())
}

/// Register fields of the GPX2, plus the reference clock frequency
/// that the chip is fed with (not a register, but needed to turn
/// stop results into time).
///
/// Stop-indexed arrays are 0-indexed: `pin_ena_stop[0]` is STOP1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    // reg 0
    pub pin_ena_rstidx:         bool,
    pub pin_ena_disable:        bool,
    pub pin_ena_lvds_out:       bool,
    pub pin_ena_refclk:         bool,
    pub pin_ena_stop:           [bool; 4],
    // reg 1
    pub high_resolution:        u8,
    pub channel_combine:        u8,
    pub hit_ena_stop:           [bool; 4],
    // reg 2
    pub blockwise_fifo_read:    bool,
    pub common_fifo_read:       bool,
    pub lvds_double_data_rate:  bool,
    pub stop_data_bitwidth:     u8,
    pub ref_index_bitwidth:     u8,
    // regs 3..=5, 20 bits
    pub refclk_divisions:       u32,
    // reg 6
    pub lvds_test_pattern:      bool,
    // reg 7
    pub refclk_by_xosc:         bool,
    pub lvds_data_valid_adjust: u8,
    // reg 16
    pub cmos_input:             bool,

    /// Reference clock frequency in Hz
    pub refclk_freq:            f64,
}

/// All register fields zero; reserved bits still hold their fixed values
/// in the encoded image.
impl Default for Config {
    fn default() -> Self {
        Config {
            pin_ena_rstidx:         false,
            pin_ena_disable:        false,
            pin_ena_lvds_out:       false,
            pin_ena_refclk:         false,
            pin_ena_stop:           [false; 4],
            high_resolution:        0,
            channel_combine:        0,
            hit_ena_stop:           [false; 4],
            blockwise_fifo_read:    false,
            common_fifo_read:       false,
            lvds_double_data_rate:  false,
            stop_data_bitwidth:     0,
            ref_index_bitwidth:     0,
            refclk_divisions:       0,
            lvds_test_pattern:      false,
            refclk_by_xosc:         false,
            lvds_data_valid_adjust: 0,
            cmos_input:             false,
            refclk_freq:            0.,
        }
    }
}

impl Config {
    /// Operating configuration: all stops enabled, CMOS inputs, 5 MHz
    /// quartz reference divided into 200,000 steps for a 1 ps LSB.
    pub fn recommended() -> Self {
        Config {
            pin_ena_stop:           [true; 4],
            high_resolution:        2,
            hit_ena_stop:           [true; 4],
            blockwise_fifo_read:    true,
            common_fifo_read:       true,
            stop_data_bitwidth:     0b11,
            ref_index_bitwidth:     0b010,
            refclk_divisions:       200_000, // 0x03_0D40
            refclk_by_xosc:         true,
            lvds_data_valid_adjust: 1,
            cmos_input:             true,
            refclk_freq:            5e6,
            ..Default::default()
        }
    }

    /// Apply run-file overrides
    pub fn apply(&mut self, s: &ChipSettings) {
        if let Some(x) = s.blockwise_fifo_read {
            self.blockwise_fifo_read = x;
        }
        if let Some(x) = s.common_fifo_read {
            self.common_fifo_read = x;
        }
        if let Some(x) = s.high_resolution {
            self.high_resolution = x;
        }
        if let Some(x) = s.refclk_divisions {
            self.refclk_divisions = x;
        }
        if let Some(x) = s.refclk_freq {
            self.refclk_freq = x;
        }
        if let Some(m) = s.stops {
            for i in 0..4 {
                self.pin_ena_stop[i] = m.check(i);
                self.hit_ena_stop[i] = m.check(i);
            }
        }
    }

    /// Picoseconds per stop result unit, for the divider the chip
    /// actually holds once the field is masked to its register width
    pub fn lsb_ps(&self) -> f64 {
        let divisions = self.refclk_divisions.field(0, REFCLK_DIVISIONS_BITS);
        1e12 / (divisions as f64 * self.refclk_freq)
    }

    /// Stop inputs that are both pin- and hit-enabled
    pub fn enabled_stops(&self) -> Vec<StopChannel> {
        let mut m = 0u8;
        for i in 0..4 {
            m.change(i, self.pin_ena_stop[i] && self.hit_ena_stop[i]);
        }
        bit::mask_to_stops(m)
            .into_iter()
            .filter_map(StopChannel::from_index)
            .collect()
    }

    /// Pack into the 17-byte register image
    pub fn encode(&self) -> [u8; CONFIG_LEN] {
        let mut img = [0u8; CONFIG_LEN];

        let r = &mut img[0];
        r.change(7, self.pin_ena_rstidx);
        r.change(6, self.pin_ena_disable);
        r.change(5, self.pin_ena_lvds_out);
        r.change(4, self.pin_ena_refclk);
        for (i, &ena) in self.pin_ena_stop.iter().enumerate() {
            r.change(i, ena);
        }

        let r = &mut img[1];
        r.put(6, 2, self.high_resolution);
        r.put(4, 2, self.channel_combine);
        for (i, &ena) in self.hit_ena_stop.iter().enumerate() {
            r.change(i, ena);
        }

        let r = &mut img[2];
        r.change(7, self.blockwise_fifo_read);
        r.change(6, self.common_fifo_read);
        r.change(5, self.lvds_double_data_rate);
        r.put(3, 2, self.stop_data_bitwidth);
        r.put(0, 3, self.ref_index_bitwidth);

        img[3] = self.refclk_divisions.field(0, 8) as u8;
        img[4] = self.refclk_divisions.field(8, 8) as u8;
        img[5] = self.refclk_divisions.field(16, 4) as u8;

        let r = &mut img[6];
        r.put(5, 3, REG_06_FIXED);
        r.change(4, self.lvds_test_pattern);

        let r = &mut img[7];
        *r = REG_07_FIXED;
        r.change(7, self.refclk_by_xosc);
        r.put(4, 2, self.lvds_data_valid_adjust);

        img[8..16].copy_from_slice(&REG_DEFAULTS_08_15);

        img[16].change(2, self.cmos_input);

        img
    }

    /// Unpack a register image, e.g. one read back from the chip.
    /// The reference clock frequency is not part of the image.
    pub fn decode(img: &[u8], refclk_freq: f64) -> Result<Config, ConfigError> {
        if img.len() != CONFIG_LEN {
            return Err(ConfigError::ImageLength(img.len()));
        }
        let mut pin_ena_stop = [false; 4];
        let mut hit_ena_stop = [false; 4];
        for i in 0..4 {
            pin_ena_stop[i] = img[0].check(i);
            hit_ena_stop[i] = img[1].check(i);
        }
        Ok(Config {
            pin_ena_rstidx:         img[0].check(7),
            pin_ena_disable:        img[0].check(6),
            pin_ena_lvds_out:       img[0].check(5),
            pin_ena_refclk:         img[0].check(4),
            pin_ena_stop,
            high_resolution:        img[1].field(6, 2),
            channel_combine:        img[1].field(4, 2),
            hit_ena_stop,
            blockwise_fifo_read:    img[2].check(7),
            common_fifo_read:       img[2].check(6),
            lvds_double_data_rate:  img[2].check(5),
            stop_data_bitwidth:     img[2].field(3, 2),
            ref_index_bitwidth:     img[2].field(0, 3),
            refclk_divisions:       img[3] as u32
                                    | (img[4] as u32) << 8
                                    | (img[5].field(0, 4) as u32) << 16,
            lvds_test_pattern:      img[6].check(4),
            refclk_by_xosc:         img[7].check(7),
            lvds_data_valid_adjust: img[7].field(4, 2),
            cmos_input:             img[16].check(2),
            refclk_freq,
        })
    }
}
