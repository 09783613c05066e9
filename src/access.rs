//! Access control: seal levels, key pairs and the transition rules
//!
//! Extended gauges gate their manufacturer registers behind a three-level
//! ladder:
//!
//! ```text
//!            Unseal(key)          FullAccess(key)
//!   Sealed ─────────────▶ Unsealed ───────────────▶ FullAccess
//!     ▲                      │                          │
//!     └──────── Seal ────────┴──────────────────────────┘
//! ```
//!
//! Each key is a pair of words written to the manufacturer-access register
//! back to back. A rejected or timed-out sequence must not be retried until
//! [`KEY_RETRY_COOLDOWN_MS`] has elapsed; the device gives no other indication
//! of the cooldown than failing again.

use crate::command::KeySequence;
use crate::ProtocolError;

/// Minimum wait before retrying a failed key sequence
pub const KEY_RETRY_COOLDOWN_MS: u32 = 4_000;

/// Access level of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessLevel {
    /// Only standard commands are available
    #[default]
    Sealed,
    /// Extended commands are available
    Unsealed,
    /// Extended commands and data flash writes are available
    FullAccess,
}

impl AccessLevel {
    /// Level that results from a successful `request`
    ///
    /// Permanent-failure clear is allowed from any level and leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidTransition`] when `request` is not
    /// allowed from `self`.
    pub const fn after(self, request: KeySequence) -> Result<Self, ProtocolError> {
        match (self, request) {
            (Self::Sealed, KeySequence::Unseal) => Ok(Self::Unsealed),
            (Self::Unsealed, KeySequence::FullAccess) => Ok(Self::FullAccess),
            (level, KeySequence::PermanentFailureClear) => Ok(level),
            (from, request) => Err(ProtocolError::InvalidTransition { from, request }),
        }
    }

    /// Level after a seal command (always [`AccessLevel::Sealed`])
    pub const fn sealed(self) -> Self {
        Self::Sealed
    }

    /// True for [`AccessLevel::Unsealed`] and [`AccessLevel::FullAccess`]
    pub const fn is_unsealed(self) -> bool {
        !matches!(self, Self::Sealed)
    }
}

/// Two words written in order to the manufacturer-access register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyPair {
    /// Written first
    pub first: u16,
    /// Written second
    pub second: u16,
}

impl KeyPair {
    /// Key pair from its two words
    pub const fn new(first: u16, second: u16) -> Self {
        Self { first, second }
    }

    /// Key pair from the 32-bit form used in datasheets (`first` in the high half)
    pub const fn from_u32(key: u32) -> Self {
        Self {
            first: (key >> 16) as u16,
            second: key as u16,
        }
    }

    /// 32-bit form, `first << 16 | second`
    pub const fn to_u32(self) -> u32 {
        ((self.first as u32) << 16) | self.second as u32
    }
}

/// Keys used for the three two-word sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityKeys {
    /// Sealed → Unsealed
    pub unseal: KeyPair,
    /// Unsealed → Full access
    pub full_access: KeyPair,
    /// Permanent-failure clear
    pub pf_clear: KeyPair,
}

impl SecurityKeys {
    /// Key for `sequence`
    pub const fn for_sequence(&self, sequence: KeySequence) -> KeyPair {
        match sequence {
            KeySequence::Unseal => self.unseal,
            KeySequence::FullAccess => self.full_access,
            KeySequence::PermanentFailureClear => self.pf_clear,
        }
    }
}
