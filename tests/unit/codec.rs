//! Unit tests for word and block framing

use sbs_gauge::codec::{decode_block, decode_word, encode_block, encode_word, minutes, percent};
use sbs_gauge::{Capacity, CapacityMode, Temperature};

use crate::common::test_utils::assert_float_eq;

#[test]
fn test_word_round_trip_all_values() {
    for x in 0..=u16::MAX {
        assert_eq!(decode_word(encode_word(x)), x);
    }
}

#[test]
fn test_word_is_little_endian() {
    assert_eq!(encode_word(0x1234), [0x34, 0x12]);
    assert_eq!(decode_word([0x34, 0x12]), 4660);
}

#[test]
fn test_block_claimed_length_above_capacity() {
    let mut frame = vec![255u8];
    frame.extend(1..=40u8);

    let block = decode_block(&frame[..5], 4);
    assert_eq!(block.as_bytes(), &[1, 2, 3, 4]);

    for capacity in 0..=32 {
        let block = decode_block(&frame, capacity);
        assert_eq!(block.len(), capacity);
    }
}

#[test]
fn test_block_text_has_no_trailing_garbage() {
    let frame = [0x04, b'A', b'B', b'C', b'D', 0xAA, 0xBB, 0xCC];
    let block = decode_block(&frame, 7);
    assert_eq!(block.as_str(), Some("ABCD"));
    assert_eq!(block.len(), 4);
}

#[test]
fn test_block_invalid_utf8_is_not_text() {
    let block = decode_block(&[0x02, 0xFF, 0xFE], 4);
    assert_eq!(block.as_str(), None);
    assert_eq!(block.as_bytes(), &[0xFF, 0xFE]);
}

#[test]
fn test_encode_block_rejects_small_buffer() {
    let mut out = [0u8; 3];
    assert_eq!(encode_block(b"LION", &mut out), None);
    let mut out = [0u8; 5];
    assert_eq!(encode_block(b"LION", &mut out), Some(5));
    assert_eq!(decode_block(&out, 4).as_str(), Some("LION"));
}

#[test]
fn test_numeric_conventions() {
    assert_float_eq(Temperature::from_raw(2981).kelvin(), 298.1, 0.01);
    assert_float_eq(Temperature::from_raw(2731).celsius(), -0.05, 0.01);
    assert_eq!(percent(0x1F64), 100);
    assert_eq!(minutes(0xFFFF), None);
    assert_eq!(minutes(90), Some(90));
}

#[test]
fn test_capacity_units_follow_mode() {
    assert_eq!(
        Capacity::from_raw(2200, CapacityMode::Current),
        Capacity::MilliampHours(2200)
    );
    let power = Capacity::from_raw(2200, CapacityMode::Power);
    assert_eq!(power, Capacity::CentiwattHours(2200));
    assert_eq!(power.milliwatt_hours(), Some(22_000));
    assert_eq!(Capacity::MilliampHours(1).milliwatt_hours(), None);
}
