#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod access;
pub mod bitfield;
pub mod codec;
pub mod command;
pub mod family;
pub mod sbs;
pub mod transport;

// Re-export main types
pub use access::{AccessLevel, KeyPair, SecurityKeys, KEY_RETRY_COOLDOWN_MS};
pub use bitfield::{decode_bitfield, Bitfield, Field, FieldValue, Layout, RegisterWidth};
pub use codec::{Block, Capacity, CapacityMode, Temperature};
pub use command::{
    Access, Category, CommandDescriptor, CommandTable, Decode, DecodedValue, KeySequence, Unit,
};
pub use family::{
    family_a::FamilyA, family_b::FamilyB, Family, Gauge, GaugeConfig, ManufacturerCommand, Reply,
    Retrieval,
};
pub use sbs::{BatteryMode, BatteryStatus, ErrorCode, ManufactureDate, SbsDevice, SpecificationInfo};
pub use transport::{scan, BusError, I2cTransport, Transport, SBS_DEFAULT_ADDRESS};

#[cfg(feature = "async")]
pub use transport::AsyncTransport;

/// Protocol-level failure (the bus transaction itself may have succeeded)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// No command with that name in the driver's table
    NotFound,
    /// The requested access-level change is not allowed from the recorded level
    InvalidTransition {
        /// Recorded level when the request was made
        from: AccessLevel,
        /// Requested key sequence
        request: KeySequence,
    },
    /// Both key words were accepted on the bus but the device did not change level
    KeyRejected {
        /// Level the sequence should have produced
        expected: AccessLevel,
        /// Level reported by the device afterwards
        observed: AccessLevel,
    },
    /// The command cannot be performed by this driver
    Unsupported,
    /// An extended register returned an all-zero payload while sealed
    ImplausibleData,
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => f.write_str("command not found"),
            Self::InvalidTransition { from, request } => {
                write!(f, "{request:?} not allowed while {from:?}")
            }
            Self::KeyRejected { expected, observed } => {
                write!(f, "key rejected: expected {expected:?}, device is {observed:?}")
            }
            Self::Unsupported => f.write_str("command not supported by this driver"),
            Self::ImplausibleData => f.write_str("all-zero data, is the device unsealed?"),
        }
    }
}

/// Driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Communication error on the bus, passed through unchanged
    Bus(BusError),
    /// The device or the command table refused the request
    Protocol(ProtocolError),
}

impl From<BusError> for Error {
    fn from(error: BusError) -> Self {
        Self::Bus(error)
    }
}

impl From<ProtocolError> for Error {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus(error) => write!(f, "bus: {error}"),
            Self::Protocol(error) => write!(f, "protocol: {error}"),
        }
    }
}
