use chrono::Utc;
use gpx2::{decode_results, encode_results, Config, CONFIG_LEN};
use tdctools::{Status, EMPTY_RESULT};

/// Values written into a synthetic results buffer come back from every slot
#[test]
fn results_fixture() {
    let cases: [[Option<(u32, u32)>; 4]; 4] = [
        [Some((5, 100)), Some((5, 102)), Some((6, 0)), Some((6, 1))],
        [Some((0, 0)), None, Some((0xFF_FFFF, 0)), None],
        [None, Some((0x12_3456, 0x65_4321)), None, Some((0x00_FF00, 0xFF_00FF))],
        [Some((0xFF_FFFE, 199_999)); 4],
    ];
    let config = Config::recommended();
    for slots in cases.iter() {
        let raw = encode_results(*slots);
        let meas = decode_results(&raw, &config, Utc::now()).unwrap();
        for (slot, m) in slots.iter().zip(meas.iter()) {
            match slot {
                Some(key) => {
                    assert_eq!(m.key(), *key);
                    assert_eq!(m.status, Status::Valid);
                }
                None => {
                    assert_eq!(m.key(), (EMPTY_RESULT, EMPTY_RESULT));
                    assert_eq!(m.status, Status::Invalid);
                }
            }
        }
    }
}

/// Extra trailing bytes are ignored, as when a read is longer than needed
#[test]
fn results_long_buffer() {
    let mut raw = encode_results([Some((1, 2)), Some((3, 4)), Some((5, 6)), Some((7, 8))]).to_vec();
    raw.extend_from_slice(&[0; 8]);
    let meas = decode_results(&raw, &Config::recommended(), Utc::now()).unwrap();
    assert_eq!(meas[3].key(), (7, 8));
}

#[test]
fn image_length_at_boundaries() {
    let zero = Config::default();
    let max = Config {
        pin_ena_rstidx: true,
        pin_ena_disable: true,
        pin_ena_lvds_out: true,
        pin_ena_refclk: true,
        pin_ena_stop: [true; 4],
        high_resolution: u8::MAX,
        channel_combine: u8::MAX,
        hit_ena_stop: [true; 4],
        blockwise_fifo_read: true,
        common_fifo_read: true,
        lvds_double_data_rate: true,
        stop_data_bitwidth: u8::MAX,
        ref_index_bitwidth: u8::MAX,
        refclk_divisions: u32::MAX,
        lvds_test_pattern: true,
        refclk_by_xosc: true,
        lvds_data_valid_adjust: u8::MAX,
        cmos_input: true,
        refclk_freq: f64::MAX,
    };
    for c in [zero, max, Config::recommended()].iter() {
        assert_eq!(c.encode().len(), CONFIG_LEN);
    }
    let img = max.encode();
    assert_eq!(&img[..3], &[0xFF, 0xFF, 0xFF]);
    assert_eq!(&img[3..6], &[0xFF, 0xFF, 0x0F]);
    assert_eq!(img[6], 0xD0);
    assert_eq!(img[7], 0xF3);
    assert_eq!(img[16], 0x04);
}
