//! Vendor extension drivers
//!
//! Extended gauges overload the `ManufacturerAccess` register (0x00): a 16-bit
//! sub-command is written first and its result is retrieved either by reading
//! the same register back or from a separate block register. Which one is used
//! is a property of each sub-command, described by [`ManufacturerCommand`].
//!
//! [`Gauge`] wraps an [`SbsDevice`] and adds the access-control ladder
//! (seal/unseal/full access/permanent-failure clear). The family-specific parts,
//! register layouts, sub-command codes and command table, come from a
//! [`Family`] implementation.

use core::marker::PhantomData;

use embedded_hal::delay::DelayNs;

use crate::access::{AccessLevel, KeyPair, SecurityKeys, KEY_RETRY_COOLDOWN_MS};
use crate::bitfield::Bitfield;
use crate::codec::Block;
use crate::command::{Access, CommandDescriptor, CommandTable, DecodedValue, KeySequence};
use crate::sbs::{self, reg, SbsDevice};
use crate::transport::{BusError, Transport, SBS_DEFAULT_ADDRESS};
use crate::{Error, ProtocolError};

pub mod family_a;
pub mod family_b;

/// Where the result of a manufacturer-access sub-command is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Retrieval {
    /// Action, nothing to read
    None,
    /// Word read back from `ManufacturerAccess`
    InPlace,
    /// Block read from a separate register
    DataBlock {
        /// Register holding the result
        register: u8,
        /// Payload bytes kept
        capacity: u8,
    },
}

/// Result of a manufacturer-access sub-command
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    /// Action completed
    Done,
    /// Word result
    Word(u16),
    /// Block result
    Block(Block),
}

impl Reply {
    /// Word result
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Unsupported`] for any other reply shape.
    pub fn into_word(self) -> Result<u16, Error> {
        match self {
            Self::Word(word) => Ok(word),
            _ => Err(Error::Protocol(ProtocolError::Unsupported)),
        }
    }

    /// Block result
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Unsupported`] for any other reply shape.
    pub fn into_block(self) -> Result<Block, Error> {
        match self {
            Self::Block(block) => Ok(block),
            _ => Err(Error::Protocol(ProtocolError::Unsupported)),
        }
    }
}

/// Closed set of manufacturer-access sub-commands of one family
pub trait ManufacturerCommand: Copy {
    /// Code written to `ManufacturerAccess`
    fn code(self) -> u16;

    /// How the result is retrieved
    fn retrieval(self) -> Retrieval;
}

/// Family-specific parts of an extended gauge
pub trait Family {
    /// Display name
    const NAME: &'static str;

    /// Factory keys
    const DEFAULT_KEYS: SecurityKeys;

    /// Sub-command set
    type Subcommand: ManufacturerCommand;

    /// Sub-command that seals the device
    const SEAL: Self::Subcommand;

    /// Standard commands followed by the family extensions
    fn table() -> CommandTable;

    /// Read and decode `OperationStatus`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    fn read_operation_status<T: Transport>(sbs: &mut SbsDevice<T>) -> Result<Bitfield, Error>;

    /// Seal state reported by an `OperationStatus` value
    fn access_level(status: &Bitfield) -> AccessLevel;
}

/// Session configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GaugeConfig {
    /// Bus address
    pub address: u8,
    /// Keys for the two-word sequences
    pub keys: SecurityKeys,
    /// Read `OperationStatus` after a key sequence to confirm the new level
    pub verify_transitions: bool,
}

impl GaugeConfig {
    /// Configuration at the default address with verification enabled
    pub const fn new(keys: SecurityKeys) -> Self {
        Self {
            address: SBS_DEFAULT_ADDRESS,
            keys,
            verify_transitions: true,
        }
    }

    /// Defaults of family `F`
    pub const fn for_family<F: Family>() -> Self {
        Self::new(F::DEFAULT_KEYS)
    }

    /// Set the bus address
    #[must_use]
    pub const fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Set the keys
    #[must_use]
    pub const fn with_keys(mut self, keys: SecurityKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Trust the bus acknowledgement of a key sequence without reading back
    #[must_use]
    pub const fn without_verification(mut self) -> Self {
        self.verify_transitions = false;
        self
    }
}

/// Extended gauge session
///
/// Owns the transport, the command table of family `F`, the last bus error
/// and the access level recorded from the key sequences performed so far.
/// The recorded level starts at [`AccessLevel::Sealed`]; use
/// [`Gauge::sync_access_level`] to adopt the level the device reports.
pub struct Gauge<T, F> {
    sbs: SbsDevice<T>,
    config: GaugeConfig,
    level: AccessLevel,
    _family: PhantomData<F>,
}

impl<T, F> Gauge<T, F>
where
    F: Family,
{
    /// Bind `transport` to the gauge described by `config`
    pub fn new(transport: T, config: GaugeConfig) -> Self {
        Self {
            sbs: SbsDevice::with_table(transport, config.address, F::table()),
            config,
            level: AccessLevel::Sealed,
            _family: PhantomData,
        }
    }

    /// Bind with the family's default keys at the default address
    pub fn with_defaults(transport: T) -> Self {
        Self::new(transport, GaugeConfig::for_family::<F>())
    }

    /// Base protocol driver
    pub const fn sbs(&self) -> &SbsDevice<T> {
        &self.sbs
    }

    /// Base protocol driver, for standard commands
    pub fn sbs_mut(&mut self) -> &mut SbsDevice<T> {
        &mut self.sbs
    }

    /// Session configuration
    pub const fn config(&self) -> &GaugeConfig {
        &self.config
    }

    /// Access level recorded by this session
    pub const fn access_level(&self) -> AccessLevel {
        self.level
    }

    /// Outcome of the most recent bus transaction
    pub const fn last_error(&self) -> Option<BusError> {
        self.sbs.last_error()
    }

    /// Command table of this family
    pub const fn table(&self) -> &CommandTable {
        self.sbs.table()
    }

    /// Point the session at a different address
    ///
    /// The recorded level goes back to [`AccessLevel::Sealed`] and the last
    /// error is cleared.
    pub fn rebind(&mut self, address: u8) {
        self.sbs.rebind(address);
        self.config.address = address;
        self.level = AccessLevel::Sealed;
    }

    /// Consume the session and return the transport
    pub fn release(self) -> T {
        self.sbs.release()
    }
}

impl<T, F> Gauge<T, F>
where
    T: Transport,
    F: Family,
{
    /// Perform a manufacturer-access sub-command
    ///
    /// Not checked against the recorded level: a sealed device answers
    /// extended sub-commands with zeros or a NACK.
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn manufacturer_command(&mut self, command: F::Subcommand) -> Result<Reply, Error> {
        let code = command.code();
        match command.retrieval() {
            Retrieval::None => {
                self.sbs.write_word(reg::MANUFACTURER_ACCESS, code)?;
                Ok(Reply::Done)
            }
            Retrieval::InPlace => self
                .sbs
                .write_then_read_word(reg::MANUFACTURER_ACCESS, code)
                .map(Reply::Word),
            Retrieval::DataBlock { register, capacity } => self
                .sbs
                .write_then_read_block(reg::MANUFACTURER_ACCESS, code, register, capacity)
                .map(Reply::Block),
        }
    }

    /// Seal the device
    ///
    /// Allowed from every level; sealing a sealed device writes the command
    /// again and leaves the level unchanged.
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged; the recorded level is kept.
    pub fn seal(&mut self) -> Result<(), Error> {
        self.manufacturer_command(F::SEAL)?;
        self.transition(self.level.sealed());
        Ok(())
    }

    /// Unseal with the configured key
    ///
    /// # Errors
    ///
    /// See [`Gauge::key_sequence`].
    pub fn unseal(&mut self) -> Result<(), Error> {
        self.unseal_with(self.config.keys.unseal)
    }

    /// Unseal with an explicit key
    ///
    /// # Errors
    ///
    /// See [`Gauge::key_sequence`].
    pub fn unseal_with(&mut self, key: KeyPair) -> Result<(), Error> {
        self.key_sequence(KeySequence::Unseal, key)
    }

    /// Enter full access with the configured key
    ///
    /// # Errors
    ///
    /// See [`Gauge::key_sequence`].
    pub fn full_access(&mut self) -> Result<(), Error> {
        self.full_access_with(self.config.keys.full_access)
    }

    /// Enter full access with an explicit key
    ///
    /// # Errors
    ///
    /// See [`Gauge::key_sequence`].
    pub fn full_access_with(&mut self, key: KeyPair) -> Result<(), Error> {
        self.key_sequence(KeySequence::FullAccess, key)
    }

    /// Clear latched permanent-failure status with the configured key
    ///
    /// # Errors
    ///
    /// See [`Gauge::key_sequence`].
    pub fn clear_permanent_failure(&mut self) -> Result<(), Error> {
        self.clear_permanent_failure_with(self.config.keys.pf_clear)
    }

    /// Clear latched permanent-failure status with an explicit key
    ///
    /// # Errors
    ///
    /// See [`Gauge::key_sequence`].
    pub fn clear_permanent_failure_with(&mut self, key: KeyPair) -> Result<(), Error> {
        self.key_sequence(KeySequence::PermanentFailureClear, key)
    }

    /// Unseal, retrying up to `attempts` times
    ///
    /// Waits [`KEY_RETRY_COOLDOWN_MS`] between attempts. At least one attempt
    /// is always made, so an `attempts` of 0 behaves like 1.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt. An invalid transition is
    /// returned immediately.
    pub fn unseal_with_retry<D: DelayNs>(
        &mut self,
        delay: &mut D,
        attempts: u8,
    ) -> Result<(), Error> {
        self.retry_sequence(KeySequence::Unseal, delay, attempts)
    }

    /// Enter full access, retrying up to `attempts` times
    ///
    /// # Errors
    ///
    /// See [`Gauge::unseal_with_retry`].
    pub fn full_access_with_retry<D: DelayNs>(
        &mut self,
        delay: &mut D,
        attempts: u8,
    ) -> Result<(), Error> {
        self.retry_sequence(KeySequence::FullAccess, delay, attempts)
    }

    /// Clear permanent failure, retrying up to `attempts` times
    ///
    /// # Errors
    ///
    /// See [`Gauge::unseal_with_retry`].
    pub fn clear_permanent_failure_with_retry<D: DelayNs>(
        &mut self,
        delay: &mut D,
        attempts: u8,
    ) -> Result<(), Error> {
        self.retry_sequence(KeySequence::PermanentFailureClear, delay, attempts)
    }

    /// Perform a two-word key sequence
    ///
    /// The request is checked against the recorded level first; an invalid
    /// transition fails without touching the bus. Both words are written to
    /// `ManufacturerAccess` back to back. With verification enabled, level
    /// changes are confirmed by reading `OperationStatus`.
    ///
    /// After a failure the caller must wait [`KEY_RETRY_COOLDOWN_MS`] before
    /// trying again.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::InvalidTransition`] if not allowed from the recorded level
    /// - the bus error of the failing write; the recorded level is unchanged
    /// - [`ProtocolError::KeyRejected`] if the device reports another level;
    ///   the reported level is recorded
    pub fn key_sequence(&mut self, sequence: KeySequence, key: KeyPair) -> Result<(), Error> {
        let expected = self.level.after(sequence).map_err(|error| {
            #[cfg(feature = "defmt")]
            defmt::warn!("{=str}: {} rejected while {}", F::NAME, sequence, self.level);
            error
        })?;

        #[cfg(feature = "defmt")]
        defmt::debug!("{=str}: writing {} key", F::NAME, sequence);

        self.sbs.write_key_pair(reg::MANUFACTURER_ACCESS, key)?;

        if self.config.verify_transitions && sequence != KeySequence::PermanentFailureClear {
            let observed = self.read_access_level()?;
            if observed != expected {
                #[cfg(feature = "defmt")]
                defmt::warn!("{=str}: {} key rejected, device is {}", F::NAME, sequence, observed);

                self.level = observed;
                return Err(Error::Protocol(ProtocolError::KeyRejected { expected, observed }));
            }
        }

        self.transition(expected);
        Ok(())
    }

    /// Seal state the device reports in `OperationStatus`
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged.
    pub fn read_access_level(&mut self) -> Result<AccessLevel, Error> {
        let status = F::read_operation_status(&mut self.sbs)?;
        Ok(F::access_level(&status))
    }

    /// Replace the recorded level with the one the device reports
    ///
    /// # Errors
    ///
    /// Returns the bus error unchanged; the recorded level is kept.
    pub fn sync_access_level(&mut self) -> Result<AccessLevel, Error> {
        let level = self.read_access_level()?;
        self.transition(level);
        Ok(level)
    }

    /// Perform `command` from this family's table
    ///
    /// Key sequences use the configured keys and the seal sub-command updates
    /// the recorded level; everything else is performed by the base driver.
    ///
    /// # Errors
    ///
    /// Same as the operation performed.
    pub fn execute(&mut self, command: &CommandDescriptor) -> Result<DecodedValue, Error> {
        match command.access {
            Access::WriteTwoWordSequence(sequence) => {
                self.key_sequence(sequence, self.config.keys.for_sequence(sequence))?;
                Ok(DecodedValue::Done)
            }
            Access::WriteWord
                if command.register == reg::MANUFACTURER_ACCESS
                    && command.subcommand == Some(F::SEAL.code()) =>
            {
                self.seal()?;
                Ok(DecodedValue::Done)
            }
            _ => self.sbs.execute(command),
        }
    }

    /// Look up `name` in the table and perform it
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotFound`] for unknown names.
    pub fn execute_by_name(&mut self, name: &str) -> Result<DecodedValue, Error> {
        let command = self.sbs.table().by_name(name)?;
        self.execute(command)
    }

    /// Like [`Gauge::execute`], but flags extended results that are all zero
    /// while the recorded level is sealed
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ImplausibleData`] for such results.
    pub fn execute_checked(&mut self, command: &CommandDescriptor) -> Result<DecodedValue, Error> {
        let value = self.execute(command)?;
        if self.level == AccessLevel::Sealed && !sbs::is_standard(command) && value.is_all_zero() {
            return Err(Error::Protocol(ProtocolError::ImplausibleData));
        }
        Ok(value)
    }

    fn retry_sequence<D: DelayNs>(
        &mut self,
        sequence: KeySequence,
        delay: &mut D,
        attempts: u8,
    ) -> Result<(), Error> {
        let key = self.config.keys.for_sequence(sequence);
        let mut attempt = 1;
        loop {
            match self.key_sequence(sequence, key) {
                Ok(()) => return Ok(()),
                Err(error @ Error::Protocol(ProtocolError::InvalidTransition { .. })) => {
                    return Err(error)
                }
                Err(error) if attempt >= attempts => return Err(error),
                Err(_) => {
                    delay.delay_ms(KEY_RETRY_COOLDOWN_MS);
                    attempt += 1;
                }
            }
        }
    }

    fn transition(&mut self, level: AccessLevel) {
        #[cfg(feature = "defmt")]
        {
            if level != self.level {
                defmt::info!("{=str}: {} -> {}", F::NAME, self.level, level);
            }
        }

        self.level = level;
    }
}
