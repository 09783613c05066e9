//! Command descriptors and per-driver command tables
//!
//! A [`CommandDescriptor`] names one addressable operation and carries
//! everything needed to perform it generically: the register, the access kind,
//! an optional fixed manufacturer-access sub-command and the decode rule. A
//! [`CommandTable`] is the ordered registry a driver builds at construction,
//! used by consoles for lookup by name and grouped display without knowing
//! any wire details.

use crate::bitfield::{decode_bitfield, Bitfield, Layout};
use crate::codec::{percent, Block, Temperature};
use crate::{Error, ProtocolError};

/// Key sequence performed by a two-word write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeySequence {
    /// Sealed → Unsealed
    Unseal,
    /// Unsealed → Full access
    FullAccess,
    /// Clear latched permanent-failure status
    PermanentFailureClear,
}

/// How a command touches the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Access {
    /// Read one word from the register
    ReadWord,
    /// Write one word to the register (the fixed sub-command for action commands)
    WriteWord,
    /// Block read from the register, keeping at most `capacity` payload bytes
    ReadBlock {
        /// Payload bytes kept
        capacity: u8,
    },
    /// Write the sub-command, then read the result back from the same register
    WriteThenReadWord,
    /// Write the sub-command, then block-read the result from the `data` register
    WriteThenReadBlock {
        /// Register holding the result
        data: u8,
        /// Payload bytes kept
        capacity: u8,
    },
    /// Write two key words to the register back to back
    WriteTwoWordSequence(KeySequence),
}

/// Grouping used for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Category {
    /// Identification, versions, design parameters
    DeviceInfo,
    /// Status, alarm and failure words
    StatusBits,
    /// Measurements and lifetime counters
    UsageInfo,
    /// Values the gauge computes (capacities, run times, state of charge)
    ComputedInfo,
    /// AtRate input and its dependent predictions
    AtRateGroup,
}

/// Physical unit of a numeric result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Unit {
    /// Dimensionless
    None,
    /// mV
    Millivolts,
    /// mA
    Milliamps,
    /// mAh, or 10 mWh when `CAPACITY_MODE` is set
    Capacity,
    /// mA, or 10 mW when `CAPACITY_MODE` is set
    Rate,
    /// %
    Percent,
    /// Minutes
    Minutes,
    /// K
    Kelvin,
    /// Charge cycles
    Cycles,
}

impl Unit {
    /// Short unit suffix for display
    ///
    /// `power_mode` selects the 10 mW / 10 mWh interpretation for
    /// capacity-mode dependent units.
    pub const fn suffix(self, power_mode: bool) -> &'static str {
        match (self, power_mode) {
            (Self::None, _) => "",
            (Self::Millivolts, _) => "mV",
            (Self::Milliamps, _) => "mA",
            (Self::Capacity, false) => "mAh",
            (Self::Capacity, true) => "10mWh",
            (Self::Rate, false) => "mA",
            (Self::Rate, true) => "10mW",
            (Self::Percent, _) => "%",
            (Self::Minutes, _) => "min",
            (Self::Kelvin, _) => "K",
            (Self::Cycles, _) => "cycles",
        }
    }
}

/// How raw bytes become a [`DecodedValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decode {
    /// Unsigned word
    Unsigned(Unit),
    /// Two's-complement word
    Signed(Unit),
    /// Percentage in the low byte
    Percent,
    /// Temperature in 0.1 K
    DeciKelvin,
    /// Word or assembled 32-bit value interpreted through a layout
    Bits(&'static Layout),
    /// Printable block
    Text,
    /// Opaque block
    Bytes,
    /// Block of two little-endian words assembled as `first << 16 | second`
    KeyPair,
    /// Block assembled into a little-endian `u32`
    Dword,
    /// Action with no result
    Action,
}

/// Result of executing a command
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodedValue {
    /// Unsigned word with its unit
    Word {
        /// Value
        value: u16,
        /// Unit
        unit: Unit,
    },
    /// Signed word with its unit
    SignedWord {
        /// Value
        value: i16,
        /// Unit
        unit: Unit,
    },
    /// 32-bit value
    Dword(u32),
    /// Fixed-point value converted to floating point
    Float {
        /// Value
        value: f32,
        /// Unit
        unit: Unit,
    },
    /// Text block
    Text(Block),
    /// Raw block
    Bytes(Block),
    /// Decoded status word
    Bitfield(Bitfield),
    /// Action command completed
    Done,
}

impl DecodedValue {
    /// True when the payload carries no information (all-zero)
    ///
    /// Extended registers commonly read back as zero on a sealed device even
    /// though the bus transaction succeeded.
    pub fn is_all_zero(&self) -> bool {
        match self {
            Self::Word { value, .. } => *value == 0,
            Self::SignedWord { value, .. } => *value == 0,
            Self::Dword(value) => *value == 0,
            Self::Float { .. } | Self::Done => false,
            Self::Text(block) | Self::Bytes(block) => block.is_all_zero(),
            Self::Bitfield(bits) => bits.raw() == 0,
        }
    }
}

/// One addressable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Symbolic name, unique within a table
    pub name: &'static str,
    /// Register address on the bus
    pub register: u8,
    /// Access kind
    pub access: Access,
    /// Display group
    pub category: Category,
    /// Sub-command written first for multiplexed registers
    pub subcommand: Option<u16>,
    /// Decode rule
    pub decode: Decode,
}

impl CommandDescriptor {
    /// Plain word read
    pub const fn read_word(
        name: &'static str,
        register: u8,
        category: Category,
        decode: Decode,
    ) -> Self {
        Self {
            name,
            register,
            access: Access::ReadWord,
            category,
            subcommand: None,
            decode,
        }
    }

    /// Plain block read
    pub const fn read_block(
        name: &'static str,
        register: u8,
        capacity: u8,
        category: Category,
        decode: Decode,
    ) -> Self {
        Self {
            name,
            register,
            access: Access::ReadBlock { capacity },
            category,
            subcommand: None,
            decode,
        }
    }

    /// Sub-command whose result is read back in place
    pub const fn subcommand_word(
        name: &'static str,
        register: u8,
        subcommand: u16,
        category: Category,
        decode: Decode,
    ) -> Self {
        Self {
            name,
            register,
            access: Access::WriteThenReadWord,
            category,
            subcommand: Some(subcommand),
            decode,
        }
    }

    /// Sub-command whose result is read from a separate block register
    pub const fn subcommand_block(
        name: &'static str,
        register: u8,
        subcommand: u16,
        data: u8,
        capacity: u8,
        category: Category,
        decode: Decode,
    ) -> Self {
        Self {
            name,
            register,
            access: Access::WriteThenReadBlock { data, capacity },
            category,
            subcommand: Some(subcommand),
            decode,
        }
    }

    /// Action: write a fixed sub-command, no result
    pub const fn action(name: &'static str, register: u8, subcommand: u16) -> Self {
        Self {
            name,
            register,
            access: Access::WriteWord,
            category: Category::DeviceInfo,
            subcommand: Some(subcommand),
            decode: Decode::Action,
        }
    }

    /// Two-word key sequence
    pub const fn key_sequence(name: &'static str, register: u8, sequence: KeySequence) -> Self {
        Self {
            name,
            register,
            access: Access::WriteTwoWordSequence(sequence),
            category: Category::DeviceInfo,
            subcommand: None,
            decode: Decode::Action,
        }
    }

    /// Interpret a word read for this command
    pub fn decode_word(&self, raw: u16) -> DecodedValue {
        match self.decode {
            Decode::Signed(unit) => DecodedValue::SignedWord {
                value: raw as i16,
                unit,
            },
            Decode::Percent => DecodedValue::Word {
                value: u16::from(percent(raw)),
                unit: Unit::Percent,
            },
            Decode::DeciKelvin => DecodedValue::Float {
                value: Temperature::from_raw(raw).kelvin(),
                unit: Unit::Kelvin,
            },
            Decode::Bits(layout) => DecodedValue::Bitfield(decode_bitfield(raw.into(), layout)),
            Decode::Dword | Decode::KeyPair => DecodedValue::Dword(raw.into()),
            Decode::Action => DecodedValue::Done,
            Decode::Unsigned(unit) => DecodedValue::Word { value: raw, unit },
            Decode::Text | Decode::Bytes => {
                DecodedValue::Bytes(Block::from_slice(&raw.to_le_bytes()))
            }
        }
    }

    /// Interpret a block read for this command
    pub fn decode_block(&self, block: Block) -> DecodedValue {
        match self.decode {
            Decode::Text => DecodedValue::Text(block),
            Decode::Bytes => DecodedValue::Bytes(block),
            Decode::Dword => DecodedValue::Dword(block.le_u32()),
            Decode::KeyPair => DecodedValue::Dword(
                (u32::from(block.word_at(0).unwrap_or(0)) << 16)
                    | u32::from(block.word_at(2).unwrap_or(0)),
            ),
            Decode::Bits(layout) => DecodedValue::Bitfield(decode_bitfield(block.le_u32(), layout)),
            Decode::Action => DecodedValue::Done,
            // Word-shaped decodes on a block take the first payload word.
            Decode::Unsigned(_)
            | Decode::Signed(_)
            | Decode::Percent
            | Decode::DeciKelvin => self.decode_word(block.word_at(0).unwrap_or(0)),
        }
    }
}

/// Ordered command registry owned by one driver
///
/// A table is made of one or more static sections (for example the standard
/// SBS commands followed by a family's extensions). Order is insertion order:
/// sections in sequence, commands within a section as declared.
#[derive(Debug, Clone, Copy)]
pub struct CommandTable {
    sections: &'static [&'static [CommandDescriptor]],
}

impl CommandTable {
    /// Table over the given sections
    pub const fn new(sections: &'static [&'static [CommandDescriptor]]) -> Self {
        Self { sections }
    }

    /// Every command in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &'static CommandDescriptor> + '_ {
        self.sections.iter().flat_map(|section| section.iter())
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.sections.iter().map(|section| section.len()).sum()
    }

    /// True for a table without commands
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Command whose name matches exactly
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotFound`] if no command has that name.
    pub fn by_name(&self, name: &str) -> Result<&'static CommandDescriptor, Error> {
        self.iter()
            .find(|command| command.name == name)
            .ok_or(Error::Protocol(ProtocolError::NotFound))
    }

    /// Commands of one category, in insertion order
    pub fn by_category(
        &self,
        category: Category,
    ) -> impl Iterator<Item = &'static CommandDescriptor> + '_ {
        self.iter().filter(move |command| command.category == category)
    }

    /// True if every name in the table is unique
    pub fn names_are_unique(&self) -> bool {
        self.iter()
            .enumerate()
            .all(|(i, command)| self.iter().skip(i + 1).all(|other| other.name != command.name))
    }
}
