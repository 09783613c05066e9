//! Simulated SMBus battery for testing the gauge driver
//!
//! Word registers are kept as `u16` values and served little-endian. Block
//! registers are served as length-prefixed frames. Writes to
//! `ManufacturerAccess` run a small model of an extended gauge: key pairs move
//! the seal state, sub-commands select what the next result read returns.

use sbs_gauge::{AccessLevel, BusError, KeyPair, SecurityKeys, Transport, SBS_DEFAULT_ADDRESS};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Records operations performed on the mock bus
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Plain write
    Write {
        /// Target address
        address: u8,
        /// Bytes written
        bytes: Vec<u8>,
    },
    /// Write followed by a read
    WriteRead {
        /// Target address
        address: u8,
        /// Bytes written
        bytes: Vec<u8>,
        /// Number of bytes requested
        len: usize,
    },
}

impl Operation {
    /// Word written by a `[register, lo, hi]` write
    pub fn written_word(&self) -> Option<(u8, u16)> {
        match self {
            Self::Write { bytes, .. } if bytes.len() == 3 => {
                Some((bytes[0], u16::from_le_bytes([bytes[1], bytes[2]])))
            }
            _ => None,
        }
    }
}

/// Which manufacturer-access model the mock runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFamily {
    /// Plain SBS battery: 0x00 is an ordinary word register
    Plain,
    /// Results read back in place from 0x00, 16-bit status registers
    A,
    /// Results read from the 0x23 block register, 32-bit status words
    B,
}

const MANUFACTURER_ACCESS: u8 = 0x00;
const MANUFACTURER_DATA: u8 = 0x23;
const FAMILY_A_OPERATION_STATUS: u8 = 0x54;
const FAMILY_A_PF_STATUS: u8 = 0x53;
const FAMILY_A_SEAL: u16 = 0x0020;
const FAMILY_B_SEAL: u16 = 0x0030;
const FAMILY_B_OPERATION_STATUS: u16 = 0x0054;
const FAMILY_B_PF_STATUS: u16 = 0x0053;

/// Shared state for the mock bus (uses interior mutability)
#[derive(Debug)]
struct BusState {
    address: u8,
    family: MockFamily,

    /// Word registers
    words: HashMap<u8, u16>,
    /// Block registers as complete frames (length byte first)
    frames: HashMap<u8, Vec<u8>>,

    /// Device-side seal state
    level: AccessLevel,
    keys: SecurityKeys,
    reject_keys: bool,
    pending_key: Option<u16>,
    pf_clears: usize,

    /// Family A in-place results
    subcommand_words: HashMap<u16, u16>,
    /// Family B block results (payload only)
    subcommand_blocks: HashMap<u16, Vec<u8>>,
    last_subcommand: Option<u16>,
    /// Family B `OperationStatus` bits besides the seal field
    operation_status_b: u32,

    /// Operations log for verification
    operations: Vec<Operation>,

    /// Failure injection
    fail_write_after: Option<(usize, BusError)>,
    fail_next_read: Option<BusError>,
}

impl BusState {
    fn new(family: MockFamily) -> Self {
        Self {
            address: SBS_DEFAULT_ADDRESS,
            family,
            words: HashMap::new(),
            frames: HashMap::new(),
            level: AccessLevel::Sealed,
            keys: SecurityKeys {
                unseal: KeyPair::new(0x0414, 0x3672),
                full_access: KeyPair::new(0xFFFF, 0xFFFF),
                pf_clear: KeyPair::new(0x2673, 0x1712),
            },
            reject_keys: false,
            pending_key: None,
            pf_clears: 0,
            subcommand_words: HashMap::new(),
            subcommand_blocks: HashMap::new(),
            last_subcommand: None,
            operation_status_b: 0x0000_0001,
            operations: Vec::new(),
            fail_write_after: None,
            fail_next_read: None,
        }
    }

    fn injected_write_failure(&mut self) -> Option<BusError> {
        let (remaining, error) = self.fail_write_after?;
        if remaining == 0 {
            self.fail_write_after = None;
            Some(error)
        } else {
            self.fail_write_after = Some((remaining - 1, error));
            None
        }
    }

    fn write_word(&mut self, register: u8, value: u16) {
        if register == MANUFACTURER_ACCESS && self.family != MockFamily::Plain {
            self.manufacturer_access(value);
        } else {
            self.words.insert(register, value);
        }
    }

    fn manufacturer_access(&mut self, value: u16) {
        if let Some(first) = self.pending_key.take() {
            if self.accept_key(KeyPair::new(first, value)) {
                return;
            }
        }

        let keys = self.keys;
        if [keys.unseal, keys.full_access, keys.pf_clear]
            .iter()
            .any(|key| key.first == value)
        {
            self.pending_key = Some(value);
            return;
        }

        let seal = match self.family {
            MockFamily::A => FAMILY_A_SEAL,
            _ => FAMILY_B_SEAL,
        };
        if value == seal {
            self.level = AccessLevel::Sealed;
        }

        self.last_subcommand = Some(value);
        if self.family == MockFamily::A {
            let result = self.subcommand_words.get(&value).copied().unwrap_or(0);
            self.words.insert(MANUFACTURER_ACCESS, result);
        }
    }

    fn accept_key(&mut self, key: KeyPair) -> bool {
        if self.reject_keys {
            return false;
        }
        if key == self.keys.unseal && self.level == AccessLevel::Sealed {
            self.level = AccessLevel::Unsealed;
            true
        } else if key == self.keys.full_access && self.level == AccessLevel::Unsealed {
            self.level = AccessLevel::FullAccess;
            true
        } else if key == self.keys.pf_clear {
            self.pf_clears += 1;
            self.words.remove(&FAMILY_A_PF_STATUS);
            self.subcommand_blocks.remove(&FAMILY_B_PF_STATUS);
            true
        } else {
            false
        }
    }

    fn read_word(&self, register: u8) -> u16 {
        let stored = self.words.get(&register).copied().unwrap_or(0);
        if self.family == MockFamily::A && register == FAMILY_A_OPERATION_STATUS {
            let seal_bits = match self.level {
                AccessLevel::Sealed => 0x6000,
                AccessLevel::Unsealed => 0x4000,
                AccessLevel::FullAccess => 0x0000,
            };
            return (stored & !0x6000) | seal_bits;
        }
        stored
    }

    fn frame(&self, register: u8) -> Option<Vec<u8>> {
        if self.family == MockFamily::B && register == MANUFACTURER_DATA {
            let payload = match self.last_subcommand? {
                FAMILY_B_OPERATION_STATUS => {
                    let sec: u32 = match self.level {
                        AccessLevel::Sealed => 3,
                        AccessLevel::Unsealed => 2,
                        AccessLevel::FullAccess => 1,
                    };
                    ((self.operation_status_b & !0x300) | (sec << 8))
                        .to_le_bytes()
                        .to_vec()
                }
                code => self.subcommand_blocks.get(&code).cloned().unwrap_or_default(),
            };
            let mut frame = vec![payload.len() as u8];
            frame.extend(payload);
            return Some(frame);
        }
        self.frames.get(&register).cloned()
    }
}

/// Mock SMBus battery
#[derive(Clone)]
pub struct MockBus {
    state: Rc<RefCell<BusState>>,
}

impl MockBus {
    /// Plain SBS battery at the default address
    pub fn new() -> Self {
        Self::with_family(MockFamily::Plain)
    }

    /// Extended gauge of the given family at the default address
    pub fn with_family(family: MockFamily) -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState::new(family))),
        }
    }

    /// Move the simulated device to another address
    #[allow(dead_code)]
    pub fn set_address(&self, address: u8) {
        self.state.borrow_mut().address = address;
    }

    /// Set a word register
    pub fn set_word(&self, register: u8, value: u16) {
        self.state.borrow_mut().words.insert(register, value);
    }

    /// Get a word register as the device would serve it
    #[allow(dead_code)]
    pub fn word(&self, register: u8) -> u16 {
        self.state.borrow().read_word(register)
    }

    /// Set a block register from its payload
    #[allow(dead_code)]
    pub fn set_block(&self, register: u8, payload: &[u8]) {
        let mut frame = vec![payload.len() as u8];
        frame.extend_from_slice(payload);
        self.set_frame(register, frame);
    }

    /// Set a block register from raw frame bytes (length byte not checked)
    pub fn set_frame(&self, register: u8, frame: Vec<u8>) {
        self.state.borrow_mut().frames.insert(register, frame);
    }

    /// Family A: in-place result of a sub-command
    #[allow(dead_code)]
    pub fn set_subcommand_word(&self, subcommand: u16, value: u16) {
        self.state
            .borrow_mut()
            .subcommand_words
            .insert(subcommand, value);
    }

    /// Family B: block result of a sub-command
    #[allow(dead_code)]
    pub fn set_subcommand_block(&self, subcommand: u16, payload: &[u8]) {
        self.state
            .borrow_mut()
            .subcommand_blocks
            .insert(subcommand, payload.to_vec());
    }

    /// Device-side seal state
    #[allow(dead_code)]
    pub fn level(&self) -> AccessLevel {
        self.state.borrow().level
    }

    /// Force the device-side seal state
    #[allow(dead_code)]
    pub fn set_level(&self, level: AccessLevel) {
        self.state.borrow_mut().level = level;
    }

    /// Ignore every key pair from now on
    #[allow(dead_code)]
    pub fn reject_keys(&self, reject: bool) {
        self.state.borrow_mut().reject_keys = reject;
    }

    /// Number of accepted permanent-failure clears
    #[allow(dead_code)]
    pub fn pf_clears(&self) -> usize {
        self.state.borrow().pf_clears
    }

    /// Fail the `n`-th write from now (1-based) with `error`
    pub fn fail_nth_write(&self, n: usize, error: BusError) {
        self.state.borrow_mut().fail_write_after = Some((n.saturating_sub(1), error));
    }

    /// Fail the next write with `error`
    #[allow(dead_code)]
    pub fn fail_next_write(&self, error: BusError) {
        self.fail_nth_write(1, error);
    }

    /// Fail the next write-read with `error`
    #[allow(dead_code)]
    pub fn fail_next_read(&self, error: BusError) {
        self.state.borrow_mut().fail_next_read = Some(error);
    }

    /// Get all recorded operations
    pub fn operations(&self) -> Vec<Operation> {
        self.state.borrow().operations.clone()
    }

    /// Words written to `register`, in order
    #[allow(dead_code)]
    pub fn written_words(&self, register: u8) -> Vec<u16> {
        self.operations()
            .iter()
            .filter_map(Operation::written_word)
            .filter(|&(reg, _)| reg == register)
            .map(|(_, value)| value)
            .collect()
    }

    /// Clear recorded operations
    pub fn clear_operations(&self) {
        self.state.borrow_mut().operations.clear();
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        state.operations.push(Operation::Write {
            address,
            bytes: bytes.to_vec(),
        });

        if address != state.address {
            return Err(BusError::NackAddress);
        }
        if let Some(error) = state.injected_write_failure() {
            return Err(error);
        }

        match *bytes {
            [register, lo, hi] => state.write_word(register, u16::from_le_bytes([lo, hi])),
            [register, ref payload @ ..] if !payload.is_empty() => {
                let mut frame = vec![payload.len() as u8];
                frame.extend_from_slice(payload);
                state.frames.insert(register, frame);
            }
            _ => {}
        }
        Ok(())
    }

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        let mut state = self.state.borrow_mut();
        state.operations.push(Operation::WriteRead {
            address,
            bytes: bytes.to_vec(),
            len: buffer.len(),
        });

        if address != state.address {
            return Err(BusError::NackAddress);
        }
        if let Some(error) = state.fail_next_read.take() {
            return Err(error);
        }

        let register = bytes.first().copied().unwrap_or(0);
        buffer.fill(0);
        match state.frame(register) {
            Some(frame) => {
                let n = frame.len().min(buffer.len());
                buffer[..n].copy_from_slice(&frame[..n]);
            }
            None => {
                let word = state.read_word(register).to_le_bytes();
                let n = buffer.len().min(2);
                buffer[..n].copy_from_slice(&word[..n]);
            }
        }
        Ok(())
    }
}

#[cfg(feature = "async")]
impl sbs_gauge::AsyncTransport for MockBus {
    async fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        Transport::write(self, address, bytes)
    }

    async fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        Transport::write_read(self, address, bytes, buffer)
    }
}
