//! SMBus register codec
//!
//! Translates between typed values and the bytes that travel on the bus:
//!
//! - **Words** are 16 bits, little-endian (low byte first).
//! - **Blocks** are length-prefixed: the first byte is the payload length the
//!   device *claims*, followed by the payload. The claim is untrusted and is
//!   always clamped against the caller's capacity and the bytes actually read.
//!
//! The numeric helpers at the bottom encode the SBS unit conventions
//! (deciKelvin temperatures, low-byte percentages, capacity-mode scaling).

use core::ops::Deref;

/// Largest payload an SMBus block transfer can carry
pub const MAX_BLOCK_LEN: usize = 32;

/// Encode a word for transmission (low byte first)
pub const fn encode_word(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

/// Decode a word received from the bus (low byte first)
pub const fn decode_word(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/// Payload of a block read, length prefix removed
///
/// Holds at most [`MAX_BLOCK_LEN`] bytes. The length is tracked explicitly, so
/// no terminator byte is stored; [`Block::as_str`] yields exactly the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Block {
    data: heapless::Vec<u8, MAX_BLOCK_LEN>,
}

impl Block {
    /// Build a block from raw payload bytes, truncating at [`MAX_BLOCK_LEN`]
    pub fn from_slice(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_BLOCK_LEN);
        let mut data = heapless::Vec::new();
        // Cannot fail: `len` never exceeds the vector capacity.
        let _ = data.extend_from_slice(&bytes[..len]);
        Self { data }
    }

    /// Payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload as text, if it is valid UTF-8
    ///
    /// Trailing NUL padding, which some gauges append to fixed-size strings,
    /// is not part of the returned text.
    pub fn as_str(&self) -> Option<&str> {
        let end = self
            .data
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        core::str::from_utf8(&self.data[..end]).ok()
    }

    /// True when every payload byte is zero (including an empty payload)
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// Little-endian word at byte offset `index`, if the payload is long enough
    pub fn word_at(&self, index: usize) -> Option<u16> {
        match self.data.get(index..index + 2) {
            Some(&[lo, hi]) => Some(decode_word([lo, hi])),
            _ => None,
        }
    }

    /// Assemble the first four payload bytes into a little-endian `u32`
    ///
    /// Shorter payloads are zero-extended.
    pub fn le_u32(&self) -> u32 {
        self.data
            .iter()
            .take(4)
            .enumerate()
            .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)))
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Decode an SMBus block frame
///
/// `frame[0]` is the payload length claimed by the device. The number of bytes
/// copied is the smallest of the claimed length, `capacity`, the bytes actually
/// present in `frame`, and [`MAX_BLOCK_LEN`]. Nothing past that point is
/// touched, so a device claiming 255 bytes into a 4-byte buffer yields exactly
/// 4 bytes.
pub fn decode_block(frame: &[u8], capacity: usize) -> Block {
    let Some((&claimed, payload)) = frame.split_first() else {
        return Block::default();
    };

    let count = usize::from(claimed)
        .min(capacity)
        .min(payload.len())
        .min(MAX_BLOCK_LEN);

    #[cfg(feature = "defmt")]
    {
        if usize::from(claimed) > count {
            defmt::warn!(
                "block length {=u8} truncated to {=usize} bytes",
                claimed,
                count
            );
        }
    }

    Block::from_slice(&payload[..count])
}

/// Encode a block frame: length prefix followed by at most [`MAX_BLOCK_LEN`] bytes
///
/// Returns the number of bytes written to `out`, or `None` if `out` is too small.
pub fn encode_block(payload: &[u8], out: &mut [u8]) -> Option<usize> {
    let len = payload.len().min(MAX_BLOCK_LEN);
    let frame = out.get_mut(..=len)?;
    frame[0] = len as u8;
    frame[1..].copy_from_slice(&payload[..len]);
    Some(len + 1)
}

/// Offset between Kelvin and degrees Celsius
pub const KELVIN_OFFSET: f32 = 273.15;

/// Temperature reported by the gauge
///
/// SBS temperature registers hold unsigned deciKelvin (raw / 10 = Kelvin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Temperature {
    /// Raw register value in 0.1 K
    pub deci_kelvin: u16,
}

impl Temperature {
    /// Wrap a raw register value
    pub const fn from_raw(deci_kelvin: u16) -> Self {
        Self { deci_kelvin }
    }

    /// Temperature in Kelvin
    pub fn kelvin(self) -> f32 {
        f32::from(self.deci_kelvin) / 10.0
    }

    /// Temperature in degrees Celsius
    pub fn celsius(self) -> f32 {
        self.kelvin() - KELVIN_OFFSET
    }
}

/// Percentage from a percent-valued register
///
/// Only the low byte carries the value; the high byte is undefined.
pub const fn percent(raw: u16) -> u8 {
    (raw & 0x00FF) as u8
}

/// Unit interpretation selected by the `CAPACITY_MODE` bit of `BatteryMode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapacityMode {
    /// Capacities in mAh, rates in mA
    #[default]
    Current,
    /// Capacities in 10 mWh, rates in 10 mW
    Power,
}

impl CapacityMode {
    /// Mode from the `CAPACITY_MODE` bit
    pub const fn from_flag(capacity_mode: bool) -> Self {
        if capacity_mode {
            Self::Power
        } else {
            Self::Current
        }
    }
}

/// Magnitude-bearing capacity value, resolved against the capacity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Capacity {
    /// Charge in mAh
    MilliampHours(u16),
    /// Energy in units of 10 mWh
    CentiwattHours(u16),
}

impl Capacity {
    /// Interpret a raw capacity register under `mode`
    pub const fn from_raw(raw: u16, mode: CapacityMode) -> Self {
        match mode {
            CapacityMode::Current => Self::MilliampHours(raw),
            CapacityMode::Power => Self::CentiwattHours(raw),
        }
    }

    /// Energy in mWh, or `None` when the value is a charge
    pub const fn milliwatt_hours(self) -> Option<u32> {
        match self {
            Self::CentiwattHours(raw) => Some(raw as u32 * 10),
            Self::MilliampHours(_) => None,
        }
    }
}

/// Sentinel used by time-valued registers for "not applicable"
pub const TIME_NOT_APPLICABLE: u16 = 0xFFFF;

/// Minutes from a time-valued register, `None` for the 65535 sentinel
pub const fn minutes(raw: u16) -> Option<u16> {
    if raw == TIME_NOT_APPLICABLE {
        None
    } else {
        Some(raw)
    }
}
