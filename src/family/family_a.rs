//! Family A gauges (bq20z-class)
//!
//! Status words are 16-bit registers at 0x50..=0x55. Manufacturer-access
//! sub-commands return their result in place: the word is read back from
//! `ManufacturerAccess` right after the sub-command is written.
//!
//! ```ignore
//! use sbs_gauge::{FamilyA, Gauge, I2cTransport};
//!
//! let mut gauge: Gauge<_, FamilyA> = Gauge::with_defaults(I2cTransport::new(i2c));
//! gauge.unseal()?;
//! let pf = gauge.pf_status()?;
//! for name in pf.active() {
//!     // report latched failures
//! }
//! gauge.seal()?;
//! ```

use crate::access::{AccessLevel, KeyPair, SecurityKeys};
use crate::bitfield::{decode_bitfield, Bitfield, Field, Layout, RegisterWidth};
use crate::codec::{self, Block};
use crate::command::{Category, CommandDescriptor, CommandTable, Decode, KeySequence, Unit};
use crate::family::{Family, Gauge, ManufacturerCommand, Retrieval};
use crate::sbs::{reg as sbs_reg, SbsDevice, STANDARD_COMMANDS};
use crate::transport::Transport;
use crate::Error;

/// Family A extension registers
pub mod reg {
    /// Direct FET control
    pub const FET_CONTROL: u8 = 0x46;
    /// State of health in %
    pub const STATE_OF_HEALTH: u8 = 0x4F;
    /// Pending safety conditions
    pub const SAFETY_ALERT: u8 = 0x50;
    /// Tripped safety conditions
    pub const SAFETY_STATUS: u8 = 0x51;
    /// Pending permanent failures
    pub const PF_ALERT: u8 = 0x52;
    /// Latched permanent failures
    pub const PF_STATUS: u8 = 0x53;
    /// Operational state and seal bits
    pub const OPERATION_STATUS: u8 = 0x54;
    /// Charging algorithm state
    pub const CHARGING_STATUS: u8 = 0x55;
    /// Unseal key readback (block, full access only)
    pub const UNSEAL_KEY: u8 = 0x60;
    /// Full access key readback (block, full access only)
    pub const FULL_ACCESS_KEY: u8 = 0x61;
    /// Permanent-failure clear key readback (block, full access only)
    pub const PF_KEY: u8 = 0x62;
}

/// Manufacturer-access sub-commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Subcommand {
    /// IC part number
    DeviceType = 0x0001,
    /// Firmware version (BCD, e.g. 0x0130 = 1.30)
    FirmwareVersion = 0x0002,
    /// Hardware version
    HardwareVersion = 0x0003,
    /// Data flash signature
    DataFlashChecksum = 0x0004,
    /// FET, permanent-failure and state summary
    ManufacturerStatus = 0x0006,
    /// Chemistry identifier
    ChemistryId = 0x0008,
    /// Enter shutdown
    Shutdown = 0x0010,
    /// Enter sleep
    Sleep = 0x0011,
    /// Seal the device
    Seal = 0x0020,
    /// Reset the device
    Reset = 0x0041,
}

impl ManufacturerCommand for Subcommand {
    fn code(self) -> u16 {
        self as u16
    }

    fn retrieval(self) -> Retrieval {
        match self {
            Self::Shutdown | Self::Sleep | Self::Seal | Self::Reset => Retrieval::None,
            _ => Retrieval::InPlace,
        }
    }
}

static SAFETY_FIELDS: [Field; 16] = [
    Field::flag("SCD", 0),
    Field::flag("SCC", 1),
    Field::flag("AOCD", 2),
    Field::flag("WDF", 3),
    Field::flag("HWDG", 4),
    Field::flag("PF", 5),
    Field::flag("COV", 6),
    Field::flag("CUV", 7),
    Field::flag("POV", 8),
    Field::flag("PUV", 9),
    Field::flag("OCC2", 10),
    Field::flag("OCD2", 11),
    Field::flag("OCC", 12),
    Field::flag("OCD", 13),
    Field::flag("OTC", 14),
    Field::flag("OTD", 15),
];

static PF_FIELDS: [Field; 14] = [
    Field::flag("PFIN", 0),
    Field::flag("SOV", 1),
    Field::flag("SOTC", 2),
    Field::flag("SOTD", 3),
    Field::flag("CIM", 4),
    Field::flag("CFETF", 5),
    Field::flag("DFETF", 6),
    Field::flag("DFF", 7),
    Field::flag("AFE_C", 8),
    Field::flag("AFE_P", 9),
    Field::flag("SOCC", 10),
    Field::flag("SOCD", 11),
    Field::flag("SOPT", 12),
    Field::flag("FBF", 15),
];

/// `SafetyAlert` (0x50)
pub static SAFETY_ALERT: Layout = Layout::new("SafetyAlert", RegisterWidth::Bits16, &SAFETY_FIELDS);

/// `SafetyStatus` (0x51)
pub static SAFETY_STATUS: Layout =
    Layout::new("SafetyStatus", RegisterWidth::Bits16, &SAFETY_FIELDS);

/// `PFAlert` (0x52)
pub static PF_ALERT: Layout = Layout::new("PFAlert", RegisterWidth::Bits16, &PF_FIELDS);

/// `PFStatus` (0x53)
pub static PF_STATUS: Layout = Layout::new("PFStatus", RegisterWidth::Bits16, &PF_FIELDS);

/// `OperationStatus` (0x54)
///
/// `SS` set means sealed; with `SS` clear, `FAS` set means unsealed and `FAS`
/// clear means full access.
pub static OPERATION_STATUS: Layout = Layout::new(
    "OperationStatus",
    RegisterWidth::Bits16,
    &[
        Field::flag("QEN", 0),
        Field::flag("VOK", 1),
        Field::flag("R_DIS", 2),
        Field::flag("XDSGI", 4),
        Field::flag("XDSG", 5),
        Field::flag("DSG", 6),
        Field::flag("WAKE", 7),
        Field::flag("LDMD", 10),
        Field::flag("CSV", 12),
        Field::flag("SS", 13),
        Field::flag("FAS", 14),
        Field::flag("PRES", 15),
    ],
);

/// `ChargingStatus` (0x55)
pub static CHARGING_STATUS: Layout = Layout::new(
    "ChargingStatus",
    RegisterWidth::Bits16,
    &[
        Field::flag("XCHGLV", 0),
        Field::flag("OC", 1),
        Field::flag("OCHGI", 2),
        Field::flag("OCHGV", 3),
        Field::flag("FCMTO", 4),
        Field::flag("PCMTO", 5),
        Field::flag("CB", 6),
        Field::flag("PLSOFF", 7),
        Field::flag("PULSE", 8),
        Field::flag("FCHG", 9),
        Field::flag("TCHG2", 10),
        Field::flag("TCHG1", 11),
        Field::flag("MCHG", 12),
        Field::flag("PCHG", 13),
        Field::flag("CHGSUSP", 14),
        Field::flag("XCHG", 15),
    ],
);

/// `FETControl` (0x46)
pub static FET_CONTROL: Layout = Layout::new(
    "FETControl",
    RegisterWidth::Bits16,
    &[
        Field::flag("DSG", 1),
        Field::flag("CHG", 2),
        Field::flag("ZVCHG", 3),
        Field::flag("OD", 4),
    ],
);

/// Result of the `ManufacturerStatus` sub-command
pub static MANUFACTURER_STATUS: Layout = Layout::new(
    "ManufacturerStatus",
    RegisterWidth::Bits16,
    &[
        Field::enumerated(
            "STATE",
            8,
            4,
            &[
                (0x1, "Wake Up"),
                (0x3, "Normal Discharge"),
                (0x5, "Pre-Charge"),
                (0x7, "Charge"),
                (0x8, "Charge Termination"),
                (0x9, "Fault Charge Terminate"),
                (0xA, "Permanent Failure"),
                (0xB, "Overcurrent"),
                (0xC, "Overtemperature"),
                (0xD, "Battery Failure"),
                (0xE, "Sleep"),
                (0xF, "Battery Removed"),
            ],
        ),
        Field::uint("PF", 12, 2),
        Field::enumerated(
            "FET",
            14,
            2,
            &[
                (0, "Both on"),
                (1, "CHG off"),
                (2, "Both off"),
                (3, "DSG off"),
            ],
        ),
    ],
);

const fn status(name: &'static str, register: u8, layout: &'static Layout) -> CommandDescriptor {
    CommandDescriptor::read_word(name, register, Category::StatusBits, Decode::Bits(layout))
}

const fn in_place(name: &'static str, subcommand: Subcommand, decode: Decode) -> CommandDescriptor {
    CommandDescriptor::subcommand_word(
        name,
        sbs_reg::MANUFACTURER_ACCESS,
        subcommand as u16,
        Category::DeviceInfo,
        decode,
    )
}

const fn key_block(name: &'static str, register: u8) -> CommandDescriptor {
    CommandDescriptor::read_block(name, register, 4, Category::DeviceInfo, Decode::KeyPair)
}

/// Family A extension commands
pub static FAMILY_A_COMMANDS: [CommandDescriptor; 24] = [
    in_place("DeviceType", Subcommand::DeviceType, Decode::Unsigned(Unit::None)),
    in_place("FirmwareVersion", Subcommand::FirmwareVersion, Decode::Unsigned(Unit::None)),
    in_place("HardwareVersion", Subcommand::HardwareVersion, Decode::Unsigned(Unit::None)),
    in_place("DataFlashChecksum", Subcommand::DataFlashChecksum, Decode::Unsigned(Unit::None)),
    in_place(
        "ManufacturerStatus",
        Subcommand::ManufacturerStatus,
        Decode::Bits(&MANUFACTURER_STATUS),
    ),
    in_place("ChemistryID", Subcommand::ChemistryId, Decode::Unsigned(Unit::None)),
    CommandDescriptor::action(
        "Shutdown",
        sbs_reg::MANUFACTURER_ACCESS,
        Subcommand::Shutdown as u16,
    ),
    CommandDescriptor::action("Sleep", sbs_reg::MANUFACTURER_ACCESS, Subcommand::Sleep as u16),
    CommandDescriptor::action("Seal", sbs_reg::MANUFACTURER_ACCESS, Subcommand::Seal as u16),
    CommandDescriptor::action("Reset", sbs_reg::MANUFACTURER_ACCESS, Subcommand::Reset as u16),
    status("FETControl", reg::FET_CONTROL, &FET_CONTROL),
    CommandDescriptor::read_word(
        "StateOfHealth",
        reg::STATE_OF_HEALTH,
        Category::ComputedInfo,
        Decode::Percent,
    ),
    status("SafetyAlert", reg::SAFETY_ALERT, &SAFETY_ALERT),
    status("SafetyStatus", reg::SAFETY_STATUS, &SAFETY_STATUS),
    status("PFAlert", reg::PF_ALERT, &PF_ALERT),
    status("PFStatus", reg::PF_STATUS, &PF_STATUS),
    status("OperationStatus", reg::OPERATION_STATUS, &OPERATION_STATUS),
    status("ChargingStatus", reg::CHARGING_STATUS, &CHARGING_STATUS),
    key_block("UnsealKey", reg::UNSEAL_KEY),
    key_block("FullAccessKey", reg::FULL_ACCESS_KEY),
    key_block("PFKey", reg::PF_KEY),
    CommandDescriptor::key_sequence("Unseal", sbs_reg::MANUFACTURER_ACCESS, KeySequence::Unseal),
    CommandDescriptor::key_sequence(
        "FullAccess",
        sbs_reg::MANUFACTURER_ACCESS,
        KeySequence::FullAccess,
    ),
    CommandDescriptor::key_sequence(
        "PermanentFailureClear",
        sbs_reg::MANUFACTURER_ACCESS,
        KeySequence::PermanentFailureClear,
    ),
];

static FAMILY_A_TABLE: CommandTable = CommandTable::new(&[&STANDARD_COMMANDS, &FAMILY_A_COMMANDS]);

/// Family A marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FamilyA;

impl Family for FamilyA {
    const NAME: &'static str = "Family A";

    const DEFAULT_KEYS: SecurityKeys = SecurityKeys {
        unseal: KeyPair::new(0x0414, 0x3672),
        full_access: KeyPair::new(0xFFFF, 0xFFFF),
        pf_clear: KeyPair::new(0x2673, 0x1712),
    };

    type Subcommand = Subcommand;

    const SEAL: Subcommand = Subcommand::Seal;

    fn table() -> CommandTable {
        FAMILY_A_TABLE
    }

    fn read_operation_status<T: Transport>(sbs: &mut SbsDevice<T>) -> Result<Bitfield, Error> {
        let raw = sbs.read_word(reg::OPERATION_STATUS)?;
        Ok(decode_bitfield(raw.into(), &OPERATION_STATUS))
    }

    fn access_level(status: &Bitfield) -> AccessLevel {
        match (status.flag("SS"), status.flag("FAS")) {
            (true, _) => AccessLevel::Sealed,
            (false, true) => AccessLevel::Unsealed,
            (false, false) => AccessLevel::FullAccess,
        }
    }
}

/// Decoded `ManufacturerStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ManufacturerStatus {
    /// FET state (0 = both on, 1 = CHG off, 2 = both off, 3 = DSG off)
    pub fet: u8,
    /// Permanent-failure indicator
    pub pf: u8,
    /// Operating state
    pub state: u8,
}

impl ManufacturerStatus {
    /// Decode a raw result word
    pub const fn from_raw(raw: u16) -> Self {
        Self {
            fet: ((raw >> 14) & 0x3) as u8,
            pf: ((raw >> 12) & 0x3) as u8,
            state: ((raw >> 8) & 0xF) as u8,
        }
    }

    /// Label of the operating state, if known
    pub fn state_label(&self) -> Option<&'static str> {
        match MANUFACTURER_STATUS.field("STATE")?.value(u32::from(self.state) << 8) {
            crate::bitfield::FieldValue::Enum { label, .. } => label,
            _ => None,
        }
    }
}

fn key_pair(block: &Block) -> KeyPair {
    KeyPair::new(block.word_at(0).unwrap_or(0), block.word_at(2).unwrap_or(0))
}

impl<T> Gauge<T, FamilyA>
where
    T: Transport,
{
    fn subcommand_word(&mut self, subcommand: Subcommand) -> Result<u16, Error> {
        self.manufacturer_command(subcommand)?.into_word()
    }

    fn status_word(&mut self, register: u8, layout: &'static Layout) -> Result<Bitfield, Error> {
        let raw = self.sbs_mut().read_word(register)?;
        Ok(decode_bitfield(raw.into(), layout))
    }

    /// IC part number
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn device_type(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::DeviceType)
    }

    /// Firmware version
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn firmware_version(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::FirmwareVersion)
    }

    /// Hardware version
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn hardware_version(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::HardwareVersion)
    }

    /// Data flash signature
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn data_flash_checksum(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::DataFlashChecksum)
    }

    /// FET, permanent-failure and state summary
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacturer_status(&mut self) -> Result<ManufacturerStatus, Error> {
        self.subcommand_word(Subcommand::ManufacturerStatus)
            .map(ManufacturerStatus::from_raw)
    }

    /// Chemistry identifier
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn chemistry_id(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::ChemistryId)
    }

    /// Enter shutdown mode
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.manufacturer_command(Subcommand::Shutdown).map(|_| ())
    }

    /// Enter sleep mode
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn sleep(&mut self) -> Result<(), Error> {
        self.manufacturer_command(Subcommand::Sleep).map(|_| ())
    }

    /// Reset the device
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.manufacturer_command(Subcommand::Reset).map(|_| ())
    }

    /// FET override state
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn fet_control(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::FET_CONTROL, &FET_CONTROL)
    }

    /// Override the FETs (test use, needs an unsealed device)
    ///
    /// Build `value` from [`Gauge::fet_control`] with [`Bitfield::with`] so
    /// reserved bits go back unchanged.
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn set_fet_control(&mut self, value: Bitfield) -> Result<(), Error> {
        self.sbs_mut().write_word(reg::FET_CONTROL, value.raw() as u16)
    }

    /// State of health in %
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn state_of_health(&mut self) -> Result<u8, Error> {
        self.sbs_mut()
            .read_word(reg::STATE_OF_HEALTH)
            .map(codec::percent)
    }

    /// Pending safety conditions
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn safety_alert(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::SAFETY_ALERT, &SAFETY_ALERT)
    }

    /// Tripped safety conditions
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn safety_status(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::SAFETY_STATUS, &SAFETY_STATUS)
    }

    /// Pending permanent failures
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn pf_alert(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::PF_ALERT, &PF_ALERT)
    }

    /// Latched permanent failures
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn pf_status(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::PF_STATUS, &PF_STATUS)
    }

    /// Operational state, including the seal bits
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn operation_status(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::OPERATION_STATUS, &OPERATION_STATUS)
    }

    /// Charging algorithm state
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn charging_status(&mut self) -> Result<Bitfield, Error> {
        self.status_word(reg::CHARGING_STATUS, &CHARGING_STATUS)
    }

    /// Stored unseal key
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn unseal_key(&mut self) -> Result<KeyPair, Error> {
        self.key_readback(reg::UNSEAL_KEY)
    }

    /// Stored full access key
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn full_access_key(&mut self) -> Result<KeyPair, Error> {
        self.key_readback(reg::FULL_ACCESS_KEY)
    }

    /// Stored permanent-failure clear key
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn pf_key(&mut self) -> Result<KeyPair, Error> {
        self.key_readback(reg::PF_KEY)
    }

    fn key_readback(&mut self, register: u8) -> Result<KeyPair, Error> {
        self.sbs_mut()
            .read_block(register, 4)
            .map(|block| key_pair(&block))
    }
}
