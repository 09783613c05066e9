//! Standard Smart Battery System command set
//!
//! [`SbsDevice`] is the base protocol driver: one register per function, word
//! and block accesses only, no multi-step sequences. Every accessor performs a
//! live bus transaction; nothing is cached. Bus errors are returned unchanged
//! and never retried, and the outcome of the most recent transaction is kept
//! for inspection via [`SbsDevice::last_error`].
//!
//! # Example
//!
//! ```ignore
//! use sbs_gauge::{I2cTransport, SbsDevice, SBS_DEFAULT_ADDRESS};
//!
//! let mut battery = SbsDevice::new(I2cTransport::new(i2c), SBS_DEFAULT_ADDRESS);
//! let mv = battery.voltage()?;
//! let soc = battery.relative_state_of_charge()?;
//! let name = battery.device_name()?;
//! ```

use crate::access::KeyPair;
use crate::bitfield::{decode_bitfield, Bitfield, Field, Layout, RegisterWidth};
use crate::codec::{self, Block, Capacity, CapacityMode, Temperature};
use crate::command::{Access, Category, CommandDescriptor, CommandTable, Decode, DecodedValue, Unit};
use crate::transport::{BusError, Transport};
use crate::{Error, ProtocolError};

/// Standard register addresses
pub mod reg {
    /// Manufacturer-defined multiplexed register
    pub const MANUFACTURER_ACCESS: u8 = 0x00;
    /// Remaining capacity alarm threshold
    pub const REMAINING_CAPACITY_ALARM: u8 = 0x01;
    /// Remaining time alarm threshold
    pub const REMAINING_TIME_ALARM: u8 = 0x02;
    /// Battery operational modes
    pub const BATTERY_MODE: u8 = 0x03;
    /// Hypothetical load for the AtRate predictions
    pub const AT_RATE: u8 = 0x04;
    /// Time to full at the AtRate value
    pub const AT_RATE_TIME_TO_FULL: u8 = 0x05;
    /// Time to empty at the AtRate value
    pub const AT_RATE_TIME_TO_EMPTY: u8 = 0x06;
    /// Whether the AtRate load can be delivered for 10 s
    pub const AT_RATE_OK: u8 = 0x07;
    /// Pack temperature
    pub const TEMPERATURE: u8 = 0x08;
    /// Pack voltage
    pub const VOLTAGE: u8 = 0x09;
    /// Instantaneous current
    pub const CURRENT: u8 = 0x0A;
    /// One-minute rolling average current
    pub const AVERAGE_CURRENT: u8 = 0x0B;
    /// Expected margin of error of the state-of-charge calculation
    pub const MAX_ERROR: u8 = 0x0C;
    /// Remaining capacity as % of full charge capacity
    pub const RELATIVE_STATE_OF_CHARGE: u8 = 0x0D;
    /// Remaining capacity as % of design capacity
    pub const ABSOLUTE_STATE_OF_CHARGE: u8 = 0x0E;
    /// Remaining capacity
    pub const REMAINING_CAPACITY: u8 = 0x0F;
    /// Predicted capacity when fully charged
    pub const FULL_CHARGE_CAPACITY: u8 = 0x10;
    /// Predicted run time at present rate
    pub const RUN_TIME_TO_EMPTY: u8 = 0x11;
    /// Predicted run time at average rate
    pub const AVERAGE_TIME_TO_EMPTY: u8 = 0x12;
    /// Predicted time to full at average rate
    pub const AVERAGE_TIME_TO_FULL: u8 = 0x13;
    /// Desired charging current
    pub const CHARGING_CURRENT: u8 = 0x14;
    /// Desired charging voltage
    pub const CHARGING_VOLTAGE: u8 = 0x15;
    /// Status and alarm flags
    pub const BATTERY_STATUS: u8 = 0x16;
    /// Number of charge/discharge cycles
    pub const CYCLE_COUNT: u8 = 0x17;
    /// Theoretical capacity of a new pack
    pub const DESIGN_CAPACITY: u8 = 0x18;
    /// Theoretical voltage of a new pack
    pub const DESIGN_VOLTAGE: u8 = 0x19;
    /// Supported specification version and scaling
    pub const SPECIFICATION_INFO: u8 = 0x1A;
    /// Packed manufacture date
    pub const MANUFACTURE_DATE: u8 = 0x1B;
    /// Serial number
    pub const SERIAL_NUMBER: u8 = 0x1C;
    /// Manufacturer name (block)
    pub const MANUFACTURER_NAME: u8 = 0x20;
    /// Device name (block)
    pub const DEVICE_NAME: u8 = 0x21;
    /// Cell chemistry (block)
    pub const DEVICE_CHEMISTRY: u8 = 0x22;
    /// Manufacturer data (block)
    pub const MANUFACTURER_DATA: u8 = 0x23;
    /// Cell 4 voltage (optional manufacturer function 4)
    pub const CELL_VOLTAGE_4: u8 = 0x3C;
    /// Cell 3 voltage (optional manufacturer function 3)
    pub const CELL_VOLTAGE_3: u8 = 0x3D;
    /// Cell 2 voltage (optional manufacturer function 2)
    pub const CELL_VOLTAGE_2: u8 = 0x3E;
    /// Cell 1 voltage (optional manufacturer function 1)
    pub const CELL_VOLTAGE_1: u8 = 0x3F;
}

/// `BatteryMode` (0x03)
pub static BATTERY_MODE: Layout = Layout::new(
    "BatteryMode",
    RegisterWidth::Bits16,
    &[
        Field::flag("INTERNAL_CHARGE_CONTROLLER", 0),
        Field::flag("PRIMARY_BATTERY_SUPPORT", 1),
        Field::flag("CONDITION_FLAG", 7),
        Field::flag("CHARGE_CONTROLLER_ENABLED", 8),
        Field::flag("PRIMARY_BATTERY", 9),
        Field::flag("ALARM_MODE", 13),
        Field::flag("CHARGER_MODE", 14),
        Field::flag("CAPACITY_MODE", 15),
    ],
);

/// `BatteryStatus` (0x16)
pub static BATTERY_STATUS: Layout = Layout::new(
    "BatteryStatus",
    RegisterWidth::Bits16,
    &[
        Field::enumerated(
            "ERROR_CODE",
            0,
            4,
            &[
                (0, "OK"),
                (1, "Busy"),
                (2, "ReservedCommand"),
                (3, "UnsupportedCommand"),
                (4, "AccessDenied"),
                (5, "OverUnderflow"),
                (6, "BadSize"),
                (7, "UnknownError"),
            ],
        ),
        Field::flag("FULLY_DISCHARGED", 4),
        Field::flag("FULLY_CHARGED", 5),
        Field::flag("DISCHARGING", 6),
        Field::flag("INITIALIZED", 7),
        Field::flag("REMAINING_TIME_ALARM", 8),
        Field::flag("REMAINING_CAPACITY_ALARM", 9),
        Field::flag("TERMINATE_DISCHARGE_ALARM", 11),
        Field::flag("OVER_TEMP_ALARM", 12),
        Field::flag("TERMINATE_CHARGE_ALARM", 14),
        Field::flag("OVER_CHARGED_ALARM", 15),
    ],
);

/// `SpecificationInfo` (0x1A)
pub static SPECIFICATION_INFO: Layout = Layout::new(
    "SpecificationInfo",
    RegisterWidth::Bits16,
    &[
        Field::enumerated(
            "REVISION",
            0,
            4,
            &[(1, "1.0/1.1")],
        ),
        Field::enumerated(
            "VERSION",
            4,
            4,
            &[(1, "1.0"), (2, "1.1"), (3, "1.1 with PEC")],
        ),
        Field::uint("VSCALE", 8, 4),
        Field::uint("IPSCALE", 12, 4),
    ],
);

/// `ManufactureDate` (0x1B): day, month, years since 1980
pub static MANUFACTURE_DATE: Layout = Layout::new(
    "ManufactureDate",
    RegisterWidth::Bits16,
    &[
        Field::uint("DAY", 0, 5),
        Field::uint("MONTH", 5, 4),
        Field::uint("YEAR", 9, 7),
    ],
);

/// Block capacity kept for `ManufacturerName`
pub const MANUFACTURER_NAME_LEN: u8 = 20;
/// Block capacity kept for `DeviceName`
pub const DEVICE_NAME_LEN: u8 = 7;
/// Block capacity kept for `DeviceChemistry`
pub const DEVICE_CHEMISTRY_LEN: u8 = 4;
/// Block capacity kept for `ManufacturerData`
pub const MANUFACTURER_DATA_LEN: u8 = 14;

const fn word(
    name: &'static str,
    register: u8,
    category: Category,
    unit: Unit,
) -> CommandDescriptor {
    CommandDescriptor::read_word(name, register, category, Decode::Unsigned(unit))
}

const fn signed(
    name: &'static str,
    register: u8,
    category: Category,
    unit: Unit,
) -> CommandDescriptor {
    CommandDescriptor::read_word(name, register, category, Decode::Signed(unit))
}

const fn bits(
    name: &'static str,
    register: u8,
    category: Category,
    layout: &'static Layout,
) -> CommandDescriptor {
    CommandDescriptor::read_word(name, register, category, Decode::Bits(layout))
}

const fn text(name: &'static str, register: u8, capacity: u8) -> CommandDescriptor {
    CommandDescriptor::read_block(name, register, capacity, Category::DeviceInfo, Decode::Text)
}

/// Standard SBS commands, shared as the first section of every driver's table
pub static STANDARD_COMMANDS: [CommandDescriptor; 37] = [
    word("ManufacturerAccess", reg::MANUFACTURER_ACCESS, Category::DeviceInfo, Unit::None),
    word(
        "RemainingCapacityAlarm",
        reg::REMAINING_CAPACITY_ALARM,
        Category::UsageInfo,
        Unit::Capacity,
    ),
    word("RemainingTimeAlarm", reg::REMAINING_TIME_ALARM, Category::UsageInfo, Unit::Minutes),
    bits("BatteryMode", reg::BATTERY_MODE, Category::StatusBits, &BATTERY_MODE),
    signed("AtRate", reg::AT_RATE, Category::AtRateGroup, Unit::Rate),
    word("AtRateTimeToFull", reg::AT_RATE_TIME_TO_FULL, Category::AtRateGroup, Unit::Minutes),
    word("AtRateTimeToEmpty", reg::AT_RATE_TIME_TO_EMPTY, Category::AtRateGroup, Unit::Minutes),
    word("AtRateOK", reg::AT_RATE_OK, Category::AtRateGroup, Unit::None),
    CommandDescriptor::read_word(
        "Temperature",
        reg::TEMPERATURE,
        Category::UsageInfo,
        Decode::DeciKelvin,
    ),
    word("Voltage", reg::VOLTAGE, Category::UsageInfo, Unit::Millivolts),
    signed("Current", reg::CURRENT, Category::UsageInfo, Unit::Milliamps),
    signed("AverageCurrent", reg::AVERAGE_CURRENT, Category::UsageInfo, Unit::Milliamps),
    CommandDescriptor::read_word(
        "MaxError",
        reg::MAX_ERROR,
        Category::ComputedInfo,
        Decode::Percent,
    ),
    CommandDescriptor::read_word(
        "RelativeStateOfCharge",
        reg::RELATIVE_STATE_OF_CHARGE,
        Category::ComputedInfo,
        Decode::Percent,
    ),
    CommandDescriptor::read_word(
        "AbsoluteStateOfCharge",
        reg::ABSOLUTE_STATE_OF_CHARGE,
        Category::ComputedInfo,
        Decode::Percent,
    ),
    word("RemainingCapacity", reg::REMAINING_CAPACITY, Category::ComputedInfo, Unit::Capacity),
    word("FullChargeCapacity", reg::FULL_CHARGE_CAPACITY, Category::ComputedInfo, Unit::Capacity),
    word("RunTimeToEmpty", reg::RUN_TIME_TO_EMPTY, Category::ComputedInfo, Unit::Minutes),
    word("AverageTimeToEmpty", reg::AVERAGE_TIME_TO_EMPTY, Category::ComputedInfo, Unit::Minutes),
    word("AverageTimeToFull", reg::AVERAGE_TIME_TO_FULL, Category::ComputedInfo, Unit::Minutes),
    word("ChargingCurrent", reg::CHARGING_CURRENT, Category::UsageInfo, Unit::Milliamps),
    word("ChargingVoltage", reg::CHARGING_VOLTAGE, Category::UsageInfo, Unit::Millivolts),
    bits("BatteryStatus", reg::BATTERY_STATUS, Category::StatusBits, &BATTERY_STATUS),
    word("CycleCount", reg::CYCLE_COUNT, Category::UsageInfo, Unit::Cycles),
    word("DesignCapacity", reg::DESIGN_CAPACITY, Category::DeviceInfo, Unit::Capacity),
    word("DesignVoltage", reg::DESIGN_VOLTAGE, Category::DeviceInfo, Unit::Millivolts),
    bits("SpecificationInfo", reg::SPECIFICATION_INFO, Category::DeviceInfo, &SPECIFICATION_INFO),
    bits("ManufactureDate", reg::MANUFACTURE_DATE, Category::DeviceInfo, &MANUFACTURE_DATE),
    word("SerialNumber", reg::SERIAL_NUMBER, Category::DeviceInfo, Unit::None),
    text("ManufacturerName", reg::MANUFACTURER_NAME, MANUFACTURER_NAME_LEN),
    text("DeviceName", reg::DEVICE_NAME, DEVICE_NAME_LEN),
    text("DeviceChemistry", reg::DEVICE_CHEMISTRY, DEVICE_CHEMISTRY_LEN),
    CommandDescriptor::read_block(
        "ManufacturerData",
        reg::MANUFACTURER_DATA,
        MANUFACTURER_DATA_LEN,
        Category::DeviceInfo,
        Decode::Bytes,
    ),
    word("CellVoltage4", reg::CELL_VOLTAGE_4, Category::UsageInfo, Unit::Millivolts),
    word("CellVoltage3", reg::CELL_VOLTAGE_3, Category::UsageInfo, Unit::Millivolts),
    word("CellVoltage2", reg::CELL_VOLTAGE_2, Category::UsageInfo, Unit::Millivolts),
    word("CellVoltage1", reg::CELL_VOLTAGE_1, Category::UsageInfo, Unit::Millivolts),
];

/// Table of a plain SBS battery without vendor extensions
pub static STANDARD_TABLE: CommandTable = CommandTable::new(&[&STANDARD_COMMANDS]);

/// True if `command` belongs to the standard set
pub fn is_standard(command: &CommandDescriptor) -> bool {
    STANDARD_COMMANDS.iter().any(|standard| standard == command)
}

/// Decoded `BatteryMode`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryMode {
    bits: Bitfield,
}

impl BatteryMode {
    /// Decode a raw register value
    pub fn from_raw(raw: u16) -> Self {
        Self {
            bits: decode_bitfield(raw.into(), &BATTERY_MODE),
        }
    }

    /// Raw value, reserved bits included
    pub fn raw(&self) -> u16 {
        self.bits.raw() as u16
    }

    /// Generic field view
    pub const fn bits(&self) -> &Bitfield {
        &self.bits
    }

    /// Units selected for capacity and rate registers
    pub fn capacity_mode(&self) -> CapacityMode {
        CapacityMode::from_flag(self.bits.flag("CAPACITY_MODE"))
    }

    /// Charging voltage/current broadcasts to the charger are disabled
    pub fn charger_mode(&self) -> bool {
        self.bits.flag("CHARGER_MODE")
    }

    /// Alarm broadcasts to the host are disabled
    pub fn alarm_mode(&self) -> bool {
        self.bits.flag("ALARM_MODE")
    }

    /// A conditioning cycle is requested
    pub fn condition_flag(&self) -> bool {
        self.bits.flag("CONDITION_FLAG")
    }

    /// Copy with the capacity mode replaced, other bits untouched
    #[must_use]
    pub fn with_capacity_mode(self, mode: CapacityMode) -> Self {
        self.with_flag("CAPACITY_MODE", mode == CapacityMode::Power)
    }

    /// Copy with the charger mode replaced, other bits untouched
    #[must_use]
    pub fn with_charger_mode(self, disabled: bool) -> Self {
        self.with_flag("CHARGER_MODE", disabled)
    }

    /// Copy with the alarm mode replaced, other bits untouched
    #[must_use]
    pub fn with_alarm_mode(self, disabled: bool) -> Self {
        self.with_flag("ALARM_MODE", disabled)
    }

    fn with_flag(self, name: &str, set: bool) -> Self {
        Self {
            bits: self.bits.with(name, set.into()).unwrap_or(self.bits),
        }
    }
}

/// Error code reported in the low nibble of `BatteryStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// Last command completed
    Ok = 0,
    /// Device busy
    Busy = 1,
    /// Reserved command
    ReservedCommand = 2,
    /// Command not supported
    UnsupportedCommand = 3,
    /// Access denied (command not allowed at the current access level)
    AccessDenied = 4,
    /// Arithmetic overflow or underflow
    OverUnderflow = 5,
    /// Wrong transfer size
    BadSize = 6,
    /// Unknown error
    UnknownError = 7,
}

impl ErrorCode {
    /// Decode the 4-bit field; undefined encodings map to [`ErrorCode::UnknownError`]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0 => Self::Ok,
            1 => Self::Busy,
            2 => Self::ReservedCommand,
            3 => Self::UnsupportedCommand,
            4 => Self::AccessDenied,
            5 => Self::OverUnderflow,
            6 => Self::BadSize,
            _ => Self::UnknownError,
        }
    }
}

/// Decoded `BatteryStatus`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus {
    bits: Bitfield,
}

impl BatteryStatus {
    /// Decode a raw register value
    pub fn from_raw(raw: u16) -> Self {
        Self {
            bits: decode_bitfield(raw.into(), &BATTERY_STATUS),
        }
    }

    /// Raw value
    pub fn raw(&self) -> u16 {
        self.bits.raw() as u16
    }

    /// Generic field view
    pub const fn bits(&self) -> &Bitfield {
        &self.bits
    }

    /// Outcome of the last command
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_bits(self.bits.uint("ERROR_CODE").unwrap_or(0) as u8)
    }

    /// Pack is discharging
    pub fn discharging(&self) -> bool {
        self.bits.flag("DISCHARGING")
    }

    /// Pack is fully charged
    pub fn fully_charged(&self) -> bool {
        self.bits.flag("FULLY_CHARGED")
    }

    /// Pack is fully discharged
    pub fn fully_discharged(&self) -> bool {
        self.bits.flag("FULLY_DISCHARGED")
    }

    /// Gauge is calibrated
    pub fn initialized(&self) -> bool {
        self.bits.flag("INITIALIZED")
    }

    /// Any of the alarm flags (bits 8..=15) is set
    pub fn any_alarm(&self) -> bool {
        [
            "REMAINING_TIME_ALARM",
            "REMAINING_CAPACITY_ALARM",
            "TERMINATE_DISCHARGE_ALARM",
            "OVER_TEMP_ALARM",
            "TERMINATE_CHARGE_ALARM",
            "OVER_CHARGED_ALARM",
        ]
        .iter()
        .any(|name| self.bits.flag(name))
    }
}

/// Decoded `SpecificationInfo`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpecificationInfo {
    /// Specification revision
    pub revision: u8,
    /// Specification version (1 = 1.0, 2 = 1.1, 3 = 1.1 with PEC)
    pub version: u8,
    /// Voltage scaling exponent (voltages are multiplied by 10^vscale)
    pub voltage_scale: u8,
    /// Current/capacity scaling exponent
    pub current_scale: u8,
}

impl SpecificationInfo {
    /// Decode a raw register value
    pub const fn from_raw(raw: u16) -> Self {
        Self {
            revision: (raw & 0x0F) as u8,
            version: ((raw >> 4) & 0x0F) as u8,
            voltage_scale: ((raw >> 8) & 0x0F) as u8,
            current_scale: ((raw >> 12) & 0x0F) as u8,
        }
    }

    /// Multiplier applied to voltage registers
    ///
    /// `None` when the scale does not fit a `u32` (10 or more).
    pub const fn voltage_multiplier(&self) -> Option<u32> {
        10u32.checked_pow(self.voltage_scale as u32)
    }

    /// Multiplier applied to current and capacity registers
    ///
    /// `None` when the scale does not fit a `u32` (10 or more).
    pub const fn current_multiplier(&self) -> Option<u32> {
        10u32.checked_pow(self.current_scale as u32)
    }
}

/// Decoded `ManufactureDate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ManufactureDate {
    /// Calendar year
    pub year: u16,
    /// Month (1..=12)
    pub month: u8,
    /// Day (1..=31)
    pub day: u8,
}

impl ManufactureDate {
    /// Decode a raw register value (`(year - 1980) * 512 + month * 32 + day`)
    pub const fn from_raw(raw: u16) -> Self {
        Self {
            year: 1980 + (raw >> 9),
            month: ((raw >> 5) & 0x0F) as u8,
            day: (raw & 0x1F) as u8,
        }
    }

    /// Encode into the register format
    pub const fn to_raw(self) -> u16 {
        ((self.year.saturating_sub(1980) & 0x7F) << 9)
            | ((self.month as u16 & 0x0F) << 5)
            | (self.day as u16 & 0x1F)
    }
}

/// Base protocol driver bound to one bus address
pub struct SbsDevice<T> {
    transport: T,
    address: u8,
    last_error: Option<BusError>,
    table: CommandTable,
}

impl<T> SbsDevice<T> {
    /// Bind a transport to the battery at `address` with the standard table
    pub fn new(transport: T, address: u8) -> Self {
        Self::with_table(transport, address, STANDARD_TABLE)
    }

    /// Bind with a driver-specific command table
    pub const fn with_table(transport: T, address: u8, table: CommandTable) -> Self {
        Self {
            transport,
            address,
            last_error: None,
            table,
        }
    }

    /// Bus address in use
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Point the driver at a different address (e.g. after a new scan)
    ///
    /// Clears the last recorded error.
    pub fn rebind(&mut self, address: u8) {
        self.address = address;
        self.last_error = None;
    }

    /// Outcome of the most recent bus transaction (`None` = success)
    ///
    /// A successful transaction on a sealed device may still carry
    /// meaningless all-zero data; display this next to every decoded value.
    pub const fn last_error(&self) -> Option<BusError> {
        self.last_error
    }

    /// Command table of this driver
    pub const fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Consume the driver and return the transport
    pub fn release(self) -> T {
        self.transport
    }

    fn record<R>(&mut self, result: Result<R, BusError>) -> Result<R, Error> {
        self.last_error = result.as_ref().err().copied();

        #[cfg(feature = "defmt")]
        {
            if let Some(error) = self.last_error {
                defmt::debug!("bus error at {=u8:#04x}: {}", self.address, error);
            }
        }

        result.map_err(Error::Bus)
    }
}

impl<T> SbsDevice<T>
where
    T: Transport,
{
    /// Read a word from `register`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn read_word(&mut self, register: u8) -> Result<u16, Error> {
        let mut buffer = [0u8; 2];
        let result = self
            .transport
            .write_read(self.address, &[register], &mut buffer);
        self.record(result)?;
        Ok(codec::decode_word(buffer))
    }

    /// Read a two's-complement word from `register`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn read_signed_word(&mut self, register: u8) -> Result<i16, Error> {
        self.read_word(register).map(|raw| raw as i16)
    }

    /// Write a word to `register`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn write_word(&mut self, register: u8, value: u16) -> Result<(), Error> {
        let [lo, hi] = codec::encode_word(value);
        let result = self.transport.write(self.address, &[register, lo, hi]);
        self.record(result)
    }

    /// Block read from `register`, keeping at most `capacity` payload bytes
    ///
    /// The device-declared length is clamped against `capacity`.
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn read_block(&mut self, register: u8, capacity: u8) -> Result<Block, Error> {
        let capacity = usize::from(capacity).min(codec::MAX_BLOCK_LEN);
        let mut frame = [0u8; codec::MAX_BLOCK_LEN + 1];
        let frame = &mut frame[..=capacity];
        let result = self.transport.write_read(self.address, &[register], frame);
        self.record(result)?;
        Ok(codec::decode_block(frame, capacity))
    }

    /// Write `subcommand` to `register`, then read the result from the same register
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn write_then_read_word(&mut self, register: u8, subcommand: u16) -> Result<u16, Error> {
        self.write_word(register, subcommand)?;
        self.read_word(register)
    }

    /// Write `subcommand` to `register`, then block-read the result from `data`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn write_then_read_block(
        &mut self,
        register: u8,
        subcommand: u16,
        data: u8,
        capacity: u8,
    ) -> Result<Block, Error> {
        self.write_word(register, subcommand)?;
        self.read_block(data, capacity)
    }

    /// Write both words of `key` to `register`, first then second
    ///
    /// Nothing else is sent in between. If the first write fails the second
    /// is not attempted.
    ///
    /// # Errors
    ///
    /// Returns the bus error of the failing write.
    pub fn write_key_pair(&mut self, register: u8, key: KeyPair) -> Result<(), Error> {
        self.write_word(register, key.first)?;
        self.write_word(register, key.second)
    }

    /// Perform `command` and decode its result
    ///
    /// Dispatches on the access kind. Key sequences need the keys held by an
    /// extension driver and are [`ProtocolError::Unsupported`] here, as is a
    /// plain write without a fixed payload.
    ///
    /// # Errors
    ///
    /// Returns bus errors unchanged.
    pub fn execute(&mut self, command: &CommandDescriptor) -> Result<DecodedValue, Error> {
        match (command.access, command.subcommand) {
            (Access::ReadWord, _) => {
                let raw = self.read_word(command.register)?;
                Ok(command.decode_word(raw))
            }
            (Access::ReadBlock { capacity }, _) => {
                let block = self.read_block(command.register, capacity)?;
                Ok(command.decode_block(block))
            }
            (Access::WriteWord, Some(subcommand)) => {
                self.write_word(command.register, subcommand)?;
                Ok(DecodedValue::Done)
            }
            (Access::WriteThenReadWord, Some(subcommand)) => {
                let raw = self.write_then_read_word(command.register, subcommand)?;
                Ok(command.decode_word(raw))
            }
            (Access::WriteThenReadBlock { data, capacity }, Some(subcommand)) => {
                let block =
                    self.write_then_read_block(command.register, subcommand, data, capacity)?;
                Ok(command.decode_block(block))
            }
            _ => Err(Error::Protocol(ProtocolError::Unsupported)),
        }
    }

    /// Look up `name` in the table and perform it
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotFound`] for unknown names, bus errors unchanged.
    pub fn execute_by_name(&mut self, name: &str) -> Result<DecodedValue, Error> {
        let command = self.table.by_name(name)?;
        self.execute(command)
    }

    /// Manufacturer access word (meaning is vendor defined)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacturer_access(&mut self) -> Result<u16, Error> {
        self.read_word(reg::MANUFACTURER_ACCESS)
    }

    /// Write the manufacturer access word
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn set_manufacturer_access(&mut self, value: u16) -> Result<(), Error> {
        self.write_word(reg::MANUFACTURER_ACCESS, value)
    }

    /// Remaining capacity alarm threshold (mAh or 10 mWh)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn remaining_capacity_alarm(&mut self) -> Result<u16, Error> {
        self.read_word(reg::REMAINING_CAPACITY_ALARM)
    }

    /// Set the remaining capacity alarm threshold (0 disables the alarm)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn set_remaining_capacity_alarm(&mut self, threshold: u16) -> Result<(), Error> {
        self.write_word(reg::REMAINING_CAPACITY_ALARM, threshold)
    }

    /// Remaining time alarm threshold in minutes
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn remaining_time_alarm(&mut self) -> Result<u16, Error> {
        self.read_word(reg::REMAINING_TIME_ALARM)
    }

    /// Set the remaining time alarm threshold in minutes (0 disables the alarm)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn set_remaining_time_alarm(&mut self, minutes: u16) -> Result<(), Error> {
        self.write_word(reg::REMAINING_TIME_ALARM, minutes)
    }

    /// Battery operational modes
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn battery_mode(&mut self) -> Result<BatteryMode, Error> {
        self.read_word(reg::BATTERY_MODE).map(BatteryMode::from_raw)
    }

    /// Write battery operational modes
    ///
    /// Start from a value read with [`SbsDevice::battery_mode`] so reserved
    /// bits are written back unchanged.
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn set_battery_mode(&mut self, mode: BatteryMode) -> Result<(), Error> {
        self.write_word(reg::BATTERY_MODE, mode.raw())
    }

    /// Units currently used by capacity and rate registers
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn capacity_mode(&mut self) -> Result<CapacityMode, Error> {
        self.battery_mode().map(|mode| mode.capacity_mode())
    }

    /// AtRate value (mA or 10 mW, negative for discharge)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn at_rate(&mut self) -> Result<i16, Error> {
        self.read_signed_word(reg::AT_RATE)
    }

    /// Set the hypothetical load for the AtRate predictions
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn set_at_rate(&mut self, rate: i16) -> Result<(), Error> {
        self.write_word(reg::AT_RATE, rate as u16)
    }

    /// Minutes to full at the AtRate value, `None` if not charging
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn at_rate_time_to_full(&mut self) -> Result<Option<u16>, Error> {
        self.read_word(reg::AT_RATE_TIME_TO_FULL).map(codec::minutes)
    }

    /// Minutes to empty at the AtRate value, `None` if not discharging
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn at_rate_time_to_empty(&mut self) -> Result<Option<u16>, Error> {
        self.read_word(reg::AT_RATE_TIME_TO_EMPTY).map(codec::minutes)
    }

    /// Whether the AtRate load can be supplied for at least 10 seconds
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn at_rate_ok(&mut self) -> Result<bool, Error> {
        self.read_word(reg::AT_RATE_OK).map(|raw| raw != 0)
    }

    /// Pack temperature
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn temperature(&mut self) -> Result<Temperature, Error> {
        self.read_word(reg::TEMPERATURE).map(Temperature::from_raw)
    }

    /// Pack voltage in mV
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn voltage(&mut self) -> Result<u16, Error> {
        self.read_word(reg::VOLTAGE)
    }

    /// Current in mA (positive while charging)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn current(&mut self) -> Result<i16, Error> {
        self.read_signed_word(reg::CURRENT)
    }

    /// One-minute rolling average current in mA
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn average_current(&mut self) -> Result<i16, Error> {
        self.read_signed_word(reg::AVERAGE_CURRENT)
    }

    /// Expected margin of error of the state-of-charge calculation in %
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn max_error(&mut self) -> Result<u8, Error> {
        self.read_word(reg::MAX_ERROR).map(codec::percent)
    }

    /// Remaining capacity as % of full charge capacity
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn relative_state_of_charge(&mut self) -> Result<u8, Error> {
        self.read_word(reg::RELATIVE_STATE_OF_CHARGE).map(codec::percent)
    }

    /// Remaining capacity as % of design capacity
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn absolute_state_of_charge(&mut self) -> Result<u8, Error> {
        self.read_word(reg::ABSOLUTE_STATE_OF_CHARGE).map(codec::percent)
    }

    /// Raw remaining capacity (mAh or 10 mWh, see [`SbsDevice::capacity_mode`])
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn remaining_capacity(&mut self) -> Result<u16, Error> {
        self.read_word(reg::REMAINING_CAPACITY)
    }

    /// Raw full charge capacity (mAh or 10 mWh)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn full_charge_capacity(&mut self) -> Result<u16, Error> {
        self.read_word(reg::FULL_CHARGE_CAPACITY)
    }

    /// Raw design capacity (mAh or 10 mWh)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn design_capacity(&mut self) -> Result<u16, Error> {
        self.read_word(reg::DESIGN_CAPACITY)
    }

    /// Remaining capacity with its unit resolved
    ///
    /// Reads `BatteryMode` first, then the capacity register.
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn remaining_capacity_scaled(&mut self) -> Result<Capacity, Error> {
        let mode = self.capacity_mode()?;
        let raw = self.remaining_capacity()?;
        Ok(Capacity::from_raw(raw, mode))
    }

    /// Full charge capacity with its unit resolved
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn full_charge_capacity_scaled(&mut self) -> Result<Capacity, Error> {
        let mode = self.capacity_mode()?;
        let raw = self.full_charge_capacity()?;
        Ok(Capacity::from_raw(raw, mode))
    }

    /// Minutes to empty at the present rate, `None` if not discharging
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn run_time_to_empty(&mut self) -> Result<Option<u16>, Error> {
        self.read_word(reg::RUN_TIME_TO_EMPTY).map(codec::minutes)
    }

    /// Minutes to empty at the average rate, `None` if not discharging
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn average_time_to_empty(&mut self) -> Result<Option<u16>, Error> {
        self.read_word(reg::AVERAGE_TIME_TO_EMPTY).map(codec::minutes)
    }

    /// Minutes to full at the average rate, `None` if not charging
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn average_time_to_full(&mut self) -> Result<Option<u16>, Error> {
        self.read_word(reg::AVERAGE_TIME_TO_FULL).map(codec::minutes)
    }

    /// Desired charging current in mA
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn charging_current(&mut self) -> Result<u16, Error> {
        self.read_word(reg::CHARGING_CURRENT)
    }

    /// Desired charging voltage in mV
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn charging_voltage(&mut self) -> Result<u16, Error> {
        self.read_word(reg::CHARGING_VOLTAGE)
    }

    /// Status and alarm flags
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn battery_status(&mut self) -> Result<BatteryStatus, Error> {
        self.read_word(reg::BATTERY_STATUS).map(BatteryStatus::from_raw)
    }

    /// Number of charge/discharge cycles
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn cycle_count(&mut self) -> Result<u16, Error> {
        self.read_word(reg::CYCLE_COUNT)
    }

    /// Design voltage in mV
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn design_voltage(&mut self) -> Result<u16, Error> {
        self.read_word(reg::DESIGN_VOLTAGE)
    }

    /// Specification version and scaling
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn specification_info(&mut self) -> Result<SpecificationInfo, Error> {
        self.read_word(reg::SPECIFICATION_INFO)
            .map(SpecificationInfo::from_raw)
    }

    /// Manufacture date
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacture_date(&mut self) -> Result<ManufactureDate, Error> {
        self.read_word(reg::MANUFACTURE_DATE)
            .map(ManufactureDate::from_raw)
    }

    /// Serial number
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn serial_number(&mut self) -> Result<u16, Error> {
        self.read_word(reg::SERIAL_NUMBER)
    }

    /// Manufacturer name
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacturer_name(&mut self) -> Result<Block, Error> {
        self.read_block(reg::MANUFACTURER_NAME, MANUFACTURER_NAME_LEN)
    }

    /// Device name
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn device_name(&mut self) -> Result<Block, Error> {
        self.read_block(reg::DEVICE_NAME, DEVICE_NAME_LEN)
    }

    /// Cell chemistry (e.g. `LION`)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn device_chemistry(&mut self) -> Result<Block, Error> {
        self.read_block(reg::DEVICE_CHEMISTRY, DEVICE_CHEMISTRY_LEN)
    }

    /// Manufacturer data block
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacturer_data(&mut self) -> Result<Block, Error> {
        self.read_block(reg::MANUFACTURER_DATA, MANUFACTURER_DATA_LEN)
    }

    /// Voltage of cell `cell` (1..=4) in mV
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Unsupported`] for a cell outside 1..=4 without
    /// touching the bus, bus errors unchanged.
    pub fn cell_voltage(&mut self, cell: u8) -> Result<u16, Error> {
        let register = match cell {
            1 => reg::CELL_VOLTAGE_1,
            2 => reg::CELL_VOLTAGE_2,
            3 => reg::CELL_VOLTAGE_3,
            4 => reg::CELL_VOLTAGE_4,
            _ => return Err(Error::Protocol(ProtocolError::Unsupported)),
        };
        self.read_word(register)
    }
}

#[cfg(feature = "async")]
impl<T> SbsDevice<T>
where
    T: crate::transport::AsyncTransport,
{
    /// Read a word from `register`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub async fn read_word_async(&mut self, register: u8) -> Result<u16, Error> {
        let mut buffer = [0u8; 2];
        let result = self
            .transport
            .write_read(self.address, &[register], &mut buffer)
            .await;
        self.record(result)?;
        Ok(codec::decode_word(buffer))
    }

    /// Write a word to `register`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub async fn write_word_async(&mut self, register: u8, value: u16) -> Result<(), Error> {
        let [lo, hi] = codec::encode_word(value);
        let result = self
            .transport
            .write(self.address, &[register, lo, hi])
            .await;
        self.record(result)
    }

    /// Block read from `register`, keeping at most `capacity` payload bytes
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub async fn read_block_async(&mut self, register: u8, capacity: u8) -> Result<Block, Error> {
        let capacity = usize::from(capacity).min(codec::MAX_BLOCK_LEN);
        let mut frame = [0u8; codec::MAX_BLOCK_LEN + 1];
        let frame = &mut frame[..=capacity];
        let result = self
            .transport
            .write_read(self.address, &[register], frame)
            .await;
        self.record(result)?;
        Ok(codec::decode_block(frame, capacity))
    }

    /// Write both words of `key` to `register`, first then second
    ///
    /// # Errors
    ///
    /// Returns the bus error of the failing write.
    pub async fn write_key_pair_async(&mut self, register: u8, key: KeyPair) -> Result<(), Error> {
        self.write_word_async(register, key.first).await?;
        self.write_word_async(register, key.second).await
    }

    /// Perform `command` and decode its result
    ///
    /// # Errors
    ///
    /// Same as [`SbsDevice::execute`].
    pub async fn execute_async(
        &mut self,
        command: &CommandDescriptor,
    ) -> Result<DecodedValue, Error> {
        match (command.access, command.subcommand) {
            (Access::ReadWord, _) => {
                let raw = self.read_word_async(command.register).await?;
                Ok(command.decode_word(raw))
            }
            (Access::ReadBlock { capacity }, _) => {
                let block = self.read_block_async(command.register, capacity).await?;
                Ok(command.decode_block(block))
            }
            (Access::WriteWord, Some(subcommand)) => {
                self.write_word_async(command.register, subcommand).await?;
                Ok(DecodedValue::Done)
            }
            (Access::WriteThenReadWord, Some(subcommand)) => {
                self.write_word_async(command.register, subcommand).await?;
                let raw = self.read_word_async(command.register).await?;
                Ok(command.decode_word(raw))
            }
            (Access::WriteThenReadBlock { data, capacity }, Some(subcommand)) => {
                self.write_word_async(command.register, subcommand).await?;
                let block = self.read_block_async(data, capacity).await?;
                Ok(command.decode_block(block))
            }
            _ => Err(Error::Protocol(ProtocolError::Unsupported)),
        }
    }

    /// Look up `name` in the table and perform it
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotFound`] for unknown names, bus errors unchanged.
    pub async fn execute_by_name_async(&mut self, name: &str) -> Result<DecodedValue, Error> {
        let command = self.table.by_name(name)?;
        self.execute_async(command).await
    }
}
