//! Family B gauges (bq40z-class)
//!
//! Every manufacturer-access sub-command is answered through the
//! `ManufacturerData` block register (0x23). Status words are up to 32 bits
//! wide and arrive as little-endian blocks, so they are assembled before being
//! decoded with the family layouts.

use crate::access::{AccessLevel, KeyPair, SecurityKeys};
use crate::bitfield::{decode_bitfield, Bitfield, Field, Layout, RegisterWidth};
use crate::codec::{self, Block};
use crate::command::{Category, CommandDescriptor, CommandTable, Decode, KeySequence, Unit};
use crate::family::{Family, Gauge, ManufacturerCommand, Retrieval};
use crate::sbs::{reg as sbs_reg, SbsDevice, STANDARD_COMMANDS};
use crate::transport::Transport;
use crate::Error;

/// Family B extension registers
pub mod reg {
    /// State of health in % (word register)
    pub const STATE_OF_HEALTH: u8 = 0x4F;
}

/// Manufacturer-access sub-commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Subcommand {
    /// IC part number
    DeviceType = 0x0001,
    /// Firmware identification block
    FirmwareVersion = 0x0002,
    /// Hardware version
    HardwareVersion = 0x0003,
    /// Chemistry identifier
    ChemId = 0x0006,
    /// Toggle FET control between firmware and manual
    FetControl = 0x0022,
    /// Seal the device
    Seal = 0x0030,
    /// Stored unseal and full access keys
    SecurityKeys = 0x0035,
    /// Reset the device
    DeviceReset = 0x0041,
    /// Pending safety conditions
    SafetyAlert = 0x0050,
    /// Tripped safety conditions
    SafetyStatus = 0x0051,
    /// Pending permanent failures
    PfAlert = 0x0052,
    /// Latched permanent failures
    PfStatus = 0x0053,
    /// Operational state and seal field
    OperationStatus = 0x0054,
    /// Temperature range and charging state
    ChargingStatus = 0x0055,
    /// Gauging algorithm state
    GaugingStatus = 0x0056,
    /// Feature enables set at manufacturing
    ManufacturingStatus = 0x0057,
    /// Cell voltages, currents and powers
    DaStatus1 = 0x0071,
}

impl Subcommand {
    /// Bytes kept from the `ManufacturerData` reply
    pub const fn reply_len(self) -> u8 {
        match self {
            Self::FetControl | Self::Seal | Self::DeviceReset => 0,
            Self::DeviceType | Self::HardwareVersion | Self::ChemId => 2,
            Self::ManufacturingStatus => 2,
            Self::ChargingStatus | Self::GaugingStatus => 3,
            Self::SafetyAlert
            | Self::SafetyStatus
            | Self::PfAlert
            | Self::PfStatus
            | Self::OperationStatus => 4,
            Self::SecurityKeys => 8,
            Self::FirmwareVersion => 11,
            Self::DaStatus1 => 32,
        }
    }
}

impl ManufacturerCommand for Subcommand {
    fn code(self) -> u16 {
        self as u16
    }

    fn retrieval(self) -> Retrieval {
        match self.reply_len() {
            0 => Retrieval::None,
            capacity => Retrieval::DataBlock {
                register: sbs_reg::MANUFACTURER_DATA,
                capacity,
            },
        }
    }
}

static SAFETY_FIELDS: [Field; 26] = [
    Field::flag("CUV", 0),
    Field::flag("COV", 1),
    Field::flag("OCC1", 2),
    Field::flag("OCC2", 3),
    Field::flag("OCD1", 4),
    Field::flag("OCD2", 5),
    Field::flag("AOLD", 6),
    Field::flag("AOLDL", 7),
    Field::flag("ASCC", 8),
    Field::flag("ASCCL", 9),
    Field::flag("ASCD", 10),
    Field::flag("ASCDL", 11),
    Field::flag("OTC", 12),
    Field::flag("OTD", 13),
    Field::flag("CUVC", 14),
    Field::flag("OTF", 16),
    Field::flag("PTO", 18),
    Field::flag("PTOS", 19),
    Field::flag("CTO", 20),
    Field::flag("CTOS", 21),
    Field::flag("OC", 22),
    Field::flag("CHGC", 23),
    Field::flag("CHGV", 24),
    Field::flag("PCHGC", 25),
    Field::flag("UTC", 26),
    Field::flag("UTD", 27),
];

static PF_FIELDS: [Field; 26] = [
    Field::flag("SUV", 0),
    Field::flag("SOV", 1),
    Field::flag("SOCC", 2),
    Field::flag("SOCD", 3),
    Field::flag("SOT", 4),
    Field::flag("SOTF", 6),
    Field::flag("QIM", 7),
    Field::flag("CB", 8),
    Field::flag("IMP", 9),
    Field::flag("CD", 10),
    Field::flag("VIMR", 11),
    Field::flag("VIMA", 12),
    Field::flag("CFETF", 16),
    Field::flag("DFETF", 17),
    Field::flag("FUSE", 19),
    Field::flag("AFER", 20),
    Field::flag("AFEC", 21),
    Field::flag("2LVL", 22),
    Field::flag("PTC", 23),
    Field::flag("IFC", 24),
    Field::flag("OPNCELL", 25),
    Field::flag("DFW", 26),
    Field::flag("TS1", 28),
    Field::flag("TS2", 29),
    Field::flag("TS3", 30),
    Field::flag("TS4", 31),
];

/// `SafetyAlert` (0x0050)
pub static SAFETY_ALERT: Layout = Layout::new("SafetyAlert", RegisterWidth::Bits32, &SAFETY_FIELDS);

/// `SafetyStatus` (0x0051)
pub static SAFETY_STATUS: Layout =
    Layout::new("SafetyStatus", RegisterWidth::Bits32, &SAFETY_FIELDS);

/// `PFAlert` (0x0052)
pub static PF_ALERT: Layout = Layout::new("PFAlert", RegisterWidth::Bits32, &PF_FIELDS);

/// `PFStatus` (0x0053)
pub static PF_STATUS: Layout = Layout::new("PFStatus", RegisterWidth::Bits32, &PF_FIELDS);

/// `OperationStatus` (0x0054)
///
/// `SEC` holds the seal state: 3 sealed, 2 unsealed, 1 full access.
pub static OPERATION_STATUS: Layout = Layout::new(
    "OperationStatus",
    RegisterWidth::Bits32,
    &[
        Field::flag("PRES", 0),
        Field::flag("DSG", 1),
        Field::flag("CHG", 2),
        Field::flag("PCHG", 3),
        Field::flag("FUSE", 5),
        Field::flag("BTP_INT", 7),
        Field::enumerated(
            "SEC",
            8,
            2,
            &[(1, "Full Access"), (2, "Unsealed"), (3, "Sealed")],
        ),
        Field::flag("SDV", 10),
        Field::flag("SS", 11),
        Field::flag("PF", 12),
        Field::flag("XDSG", 13),
        Field::flag("XCHG", 14),
        Field::flag("SLEEP", 15),
        Field::flag("SDM", 16),
        Field::flag("LED", 17),
        Field::flag("AUTH", 18),
        Field::flag("AUTOCALM", 19),
        Field::flag("CAL", 20),
        Field::flag("CAL_OFFSET", 21),
        Field::flag("XL", 22),
        Field::flag("SLEEPM", 23),
        Field::flag("INIT", 24),
        Field::flag("SMBLCAL", 25),
        Field::flag("SLPAD", 26),
        Field::flag("SLPCC", 27),
        Field::flag("CB", 28),
        Field::flag("EMSHUT", 29),
    ],
);

/// `ChargingStatus` (0x0055)
pub static CHARGING_STATUS: Layout = Layout::new(
    "ChargingStatus",
    RegisterWidth::Bits32,
    &[
        Field::flag("UT", 0),
        Field::flag("LT", 1),
        Field::flag("STL", 2),
        Field::flag("RT", 3),
        Field::flag("STH", 4),
        Field::flag("HT", 5),
        Field::flag("OT", 6),
        Field::flag("PV", 8),
        Field::flag("LV", 9),
        Field::flag("MV", 10),
        Field::flag("HV", 11),
        Field::flag("IN", 12),
        Field::flag("SU", 13),
        Field::flag("MCHG", 14),
        Field::flag("VCT", 15),
        Field::flag("CCR", 16),
        Field::flag("CVR", 17),
        Field::flag("CCC", 18),
    ],
);

/// `GaugingStatus` (0x0056)
pub static GAUGING_STATUS: Layout = Layout::new(
    "GaugingStatus",
    RegisterWidth::Bits32,
    &[
        Field::flag("FD", 0),
        Field::flag("FC", 1),
        Field::flag("TD", 2),
        Field::flag("TC", 3),
        Field::flag("BAL_EN", 4),
        Field::flag("EDV", 5),
        Field::flag("DSG", 6),
        Field::flag("CF", 7),
        Field::flag("REST", 8),
        Field::flag("R_DIS", 10),
        Field::flag("VOK", 11),
        Field::flag("QEN", 12),
        Field::flag("SLPQMAX", 13),
        Field::flag("NSFM", 15),
        Field::flag("VDQ", 16),
        Field::flag("QMAX", 17),
        Field::flag("RX", 18),
        Field::flag("LDMD", 19),
        Field::flag("OCVFR", 20),
    ],
);

/// `ManufacturingStatus` (0x0057)
pub static MANUFACTURING_STATUS: Layout = Layout::new(
    "ManufacturingStatus",
    RegisterWidth::Bits32,
    &[
        Field::flag("PCHG_TEST", 0),
        Field::flag("CHG_TEST", 1),
        Field::flag("DSG_TEST", 2),
        Field::flag("GAUGE_EN", 3),
        Field::flag("FET_EN", 4),
        Field::flag("LF_EN", 5),
        Field::flag("PF_EN", 6),
        Field::flag("BBR_EN", 7),
        Field::flag("FUSE_EN", 8),
        Field::flag("LED_EN", 9),
        Field::flag("CAL_TEST", 15),
    ],
);

const fn data(
    name: &'static str,
    subcommand: Subcommand,
    category: Category,
    decode: Decode,
) -> CommandDescriptor {
    CommandDescriptor::subcommand_block(
        name,
        sbs_reg::MANUFACTURER_ACCESS,
        subcommand as u16,
        sbs_reg::MANUFACTURER_DATA,
        subcommand.reply_len(),
        category,
        decode,
    )
}

const fn status(
    name: &'static str,
    subcommand: Subcommand,
    layout: &'static Layout,
) -> CommandDescriptor {
    data(name, subcommand, Category::StatusBits, Decode::Bits(layout))
}

/// Family B extension commands
pub static FAMILY_B_COMMANDS: [CommandDescriptor; 21] = [
    data("DeviceType", Subcommand::DeviceType, Category::DeviceInfo, Decode::Unsigned(Unit::None)),
    data("FirmwareVersion", Subcommand::FirmwareVersion, Category::DeviceInfo, Decode::Bytes),
    data(
        "HardwareVersion",
        Subcommand::HardwareVersion,
        Category::DeviceInfo,
        Decode::Unsigned(Unit::None),
    ),
    data("ChemID", Subcommand::ChemId, Category::DeviceInfo, Decode::Unsigned(Unit::None)),
    data("SecurityKeys", Subcommand::SecurityKeys, Category::DeviceInfo, Decode::Bytes),
    CommandDescriptor::action(
        "FETControl",
        sbs_reg::MANUFACTURER_ACCESS,
        Subcommand::FetControl as u16,
    ),
    CommandDescriptor::action("Seal", sbs_reg::MANUFACTURER_ACCESS, Subcommand::Seal as u16),
    CommandDescriptor::action(
        "DeviceReset",
        sbs_reg::MANUFACTURER_ACCESS,
        Subcommand::DeviceReset as u16,
    ),
    status("SafetyAlert", Subcommand::SafetyAlert, &SAFETY_ALERT),
    status("SafetyStatus", Subcommand::SafetyStatus, &SAFETY_STATUS),
    status("PFAlert", Subcommand::PfAlert, &PF_ALERT),
    status("PFStatus", Subcommand::PfStatus, &PF_STATUS),
    status("OperationStatus", Subcommand::OperationStatus, &OPERATION_STATUS),
    status("ChargingStatus", Subcommand::ChargingStatus, &CHARGING_STATUS),
    status("GaugingStatus", Subcommand::GaugingStatus, &GAUGING_STATUS),
    status("ManufacturingStatus", Subcommand::ManufacturingStatus, &MANUFACTURING_STATUS),
    data("DAStatus1", Subcommand::DaStatus1, Category::UsageInfo, Decode::Bytes),
    CommandDescriptor::read_word(
        "StateOfHealth",
        reg::STATE_OF_HEALTH,
        Category::ComputedInfo,
        Decode::Percent,
    ),
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

static FAMILY_B_TABLE: CommandTable = CommandTable::new(&[&STANDARD_COMMANDS, &FAMILY_B_COMMANDS]);

/// Family B marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FamilyB;

impl Family for FamilyB {
    const NAME: &'static str = "Family B";

    const DEFAULT_KEYS: SecurityKeys = SecurityKeys {
        unseal: KeyPair::new(0x0414, 0x3672),
        full_access: KeyPair::new(0xFFFF, 0xFFFF),
        pf_clear: KeyPair::new(0x2673, 0x1712),
    };

    type Subcommand = Subcommand;

    const SEAL: Subcommand = Subcommand::Seal;

    fn table() -> CommandTable {
        FAMILY_B_TABLE
    }

    fn read_operation_status<T: Transport>(sbs: &mut SbsDevice<T>) -> Result<Bitfield, Error> {
        let block = sbs.write_then_read_block(
            sbs_reg::MANUFACTURER_ACCESS,
            Subcommand::OperationStatus as u16,
            sbs_reg::MANUFACTURER_DATA,
            Subcommand::OperationStatus.reply_len(),
        )?;
        Ok(decode_bitfield(block.le_u32(), &OPERATION_STATUS))
    }

    fn access_level(status: &Bitfield) -> AccessLevel {
        match status.uint("SEC") {
            Some(1) => AccessLevel::FullAccess,
            Some(2) => AccessLevel::Unsealed,
            _ => AccessLevel::Sealed,
        }
    }
}

/// Decoded `FirmwareVersion` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FirmwareVersion {
    /// IC part number
    pub device: u16,
    /// Firmware version
    pub version: u16,
    /// Build number
    pub build: u16,
    /// Firmware type
    pub firmware_type: u8,
    /// Impedance Track version
    pub impedance_track: u16,
}

impl FirmwareVersion {
    /// Decode the reply; fields are stored high byte first and missing bytes read as zero
    pub fn from_block(block: &Block) -> Self {
        let byte = |i: usize| block.get(i).copied().unwrap_or(0);
        let be = |i: usize| u16::from_be_bytes([byte(i), byte(i + 1)]);
        Self {
            device: be(0),
            version: be(2),
            build: be(4),
            firmware_type: byte(6),
            impedance_track: be(7),
        }
    }
}

/// Keys stored in the device, as returned by `SecurityKeys`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StoredKeys {
    /// Unseal key
    pub unseal: KeyPair,
    /// Full access key
    pub full_access: KeyPair,
}

impl StoredKeys {
    /// Decode the 8-byte reply (four little-endian words)
    pub fn from_block(block: &Block) -> Self {
        let word = |i: usize| block.word_at(i).unwrap_or(0);
        Self {
            unseal: KeyPair::new(word(0), word(2)),
            full_access: KeyPair::new(word(4), word(6)),
        }
    }
}

/// Decoded `DAStatus1` block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DaStatus1 {
    /// Cell voltages in mV, cell 1 first
    pub cell_voltages: [u16; 4],
    /// Voltage at the BAT pin in mV
    pub battery_voltage: u16,
    /// Voltage at the PACK pin in mV
    pub pack_voltage: u16,
    /// Simultaneous cell currents in mA
    pub cell_currents: [i16; 4],
    /// Cell powers in cW
    pub cell_powers: [i16; 4],
    /// Pack power in cW
    pub power: i16,
    /// Average pack power in cW
    pub average_power: i16,
}

impl DaStatus1 {
    /// Decode the reply; a short reply leaves the missing fields at zero
    pub fn from_block(block: &Block) -> Self {
        let word = |i: usize| block.word_at(2 * i).unwrap_or(0);
        let signed = |i: usize| word(i) as i16;
        Self {
            cell_voltages: [word(0), word(1), word(2), word(3)],
            battery_voltage: word(4),
            pack_voltage: word(5),
            cell_currents: [signed(6), signed(7), signed(8), signed(9)],
            cell_powers: [signed(10), signed(11), signed(12), signed(13)],
            power: signed(14),
            average_power: signed(15),
        }
    }
}

impl<T> Gauge<T, FamilyB>
where
    T: Transport,
{
    fn subcommand_block(&mut self, subcommand: Subcommand) -> Result<Block, Error> {
        self.manufacturer_command(subcommand)?.into_block()
    }

    fn subcommand_word(&mut self, subcommand: Subcommand) -> Result<u16, Error> {
        self.subcommand_block(subcommand)
            .map(|block| block.word_at(0).unwrap_or(0))
    }

    fn status_block(
        &mut self,
        subcommand: Subcommand,
        layout: &'static Layout,
    ) -> Result<Bitfield, Error> {
        self.subcommand_block(subcommand)
            .map(|block| decode_bitfield(block.le_u32(), layout))
    }

    /// IC part number
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn device_type(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::DeviceType)
    }

    /// Firmware identification
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, Error> {
        self.subcommand_block(Subcommand::FirmwareVersion)
            .map(|block| FirmwareVersion::from_block(&block))
    }

    /// Hardware version
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn hardware_version(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::HardwareVersion)
    }

    /// Chemistry identifier
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn chem_id(&mut self) -> Result<u16, Error> {
        self.subcommand_word(Subcommand::ChemId)
    }

    /// Keys stored in the device (full access only)
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn security_keys(&mut self) -> Result<StoredKeys, Error> {
        self.subcommand_block(Subcommand::SecurityKeys)
            .map(|block| StoredKeys::from_block(&block))
    }

    /// Toggle FET control between firmware and manual
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn toggle_fet_control(&mut self) -> Result<(), Error> {
        self.manufacturer_command(Subcommand::FetControl).map(|_| ())
    }

    /// Reset the device
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn device_reset(&mut self) -> Result<(), Error> {
        self.manufacturer_command(Subcommand::DeviceReset).map(|_| ())
    }

    /// Pending safety conditions
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn safety_alert(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::SafetyAlert, &SAFETY_ALERT)
    }

    /// Tripped safety conditions
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn safety_status(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::SafetyStatus, &SAFETY_STATUS)
    }

    /// Pending permanent failures
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn pf_alert(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::PfAlert, &PF_ALERT)
    }

    /// Latched permanent failures
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn pf_status(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::PfStatus, &PF_STATUS)
    }

    /// Operational state, including the seal field
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn operation_status(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::OperationStatus, &OPERATION_STATUS)
    }

    /// Temperature range and charging state
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn charging_status(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::ChargingStatus, &CHARGING_STATUS)
    }

    /// Gauging algorithm state
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn gauging_status(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::GaugingStatus, &GAUGING_STATUS)
    }

    /// Feature enables
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacturing_status(&mut self) -> Result<Bitfield, Error> {
        self.status_block(Subcommand::ManufacturingStatus, &MANUFACTURING_STATUS)
    }

    /// Cell voltages, currents and powers
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn da_status1(&mut self) -> Result<DaStatus1, Error> {
        self.subcommand_block(Subcommand::DaStatus1)
            .map(|block| DaStatus1::from_block(&block))
    }

    /// State of health in %
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn state_of_health(&mut self) -> Result<u8, Error> {
        self.sbs_mut().read_word(reg::STATE_OF_HEALTH).map(codec::percent)
    }
}
