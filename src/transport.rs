//! Bus transport for SBS fuel gauges
//!
//! The driver only needs two byte-level primitives from the board: a plain write
//! and a combined write-then-read with a repeated start. SMBus word and block
//! framing is layered on top of these by [`crate::codec`], so a transport never
//! has to know what a register means.
//!
//! [`I2cTransport`] adapts any `embedded-hal` I2C bus. Platforms that can detect
//! clock-stretch timeouts at the electrical level may implement [`Transport`]
//! directly and report [`BusError::Timeout`].

use core::ops::RangeInclusive;

/// Default 7-bit SMBus address of a smart battery
pub const SBS_DEFAULT_ADDRESS: u8 = 0x0B;

/// Valid 7-bit device address range, the usual argument to [`scan`]
///
/// Addresses below 0x08 and above 0x77 are reserved by the I2C specification.
pub const SCAN_RANGE: RangeInclusive<u8> = 0x08..=0x77;

/// Transport-level bus failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// Transfer exceeded what the bus controller could buffer
    DataTooLong,
    /// No acknowledge received for the device address
    NackAddress,
    /// No acknowledge received for a data byte
    NackData,
    /// Any other bus error (arbitration loss, bus fault, ...)
    Other,
    /// The transaction did not complete in time (e.g. clock held low)
    Timeout,
}

impl BusError {
    /// Numeric status code as reported by common two-wire stacks
    ///
    /// `0` is reserved for success, see [`bus_status_code`].
    pub const fn code(self) -> u8 {
        match self {
            Self::DataTooLong => 1,
            Self::NackAddress => 2,
            Self::NackData => 3,
            Self::Other => 4,
            Self::Timeout => 5,
        }
    }
}

impl core::fmt::Display for BusError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Self::DataTooLong => "data too long",
            Self::NackAddress => "address not acknowledged",
            Self::NackData => "data not acknowledged",
            Self::Other => "bus error",
            Self::Timeout => "bus timeout",
        };
        f.write_str(text)
    }
}

/// Status code for an optional last error (`0` means the transaction succeeded)
pub const fn bus_status_code(status: Option<BusError>) -> u8 {
    match status {
        Some(error) => error.code(),
        None => 0,
    }
}

impl From<embedded_hal::i2c::ErrorKind> for BusError {
    fn from(kind: embedded_hal::i2c::ErrorKind) -> Self {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match kind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => Self::NackAddress,
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data) => Self::NackData,
            ErrorKind::Overrun => Self::DataTooLong,
            _ => Self::Other,
        }
    }
}

/// Blocking byte-level bus access
///
/// Every call blocks until the exchange completes or the platform gives up.
/// Implementations must bound stalled transfers themselves; the driver has no
/// cancellation primitive.
pub trait Transport {
    /// Write `bytes` to the device at `address` and issue a stop condition
    ///
    /// # Errors
    ///
    /// Returns the bus failure reported by the platform.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// Write `bytes`, then read `buffer.len()` bytes after a repeated start
    ///
    /// # Errors
    ///
    /// Returns the bus failure reported by the platform.
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8])
        -> Result<(), BusError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        (**self).write(address, bytes)
    }

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        (**self).write_read(address, bytes, buffer)
    }
}

/// Async byte-level bus access, mirroring [`Transport`]
#[cfg(feature = "async")]
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    /// Write `bytes` to the device at `address` and issue a stop condition
    ///
    /// # Errors
    ///
    /// Returns the bus failure reported by the platform.
    async fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError>;

    /// Write `bytes`, then read `buffer.len()` bytes after a repeated start
    ///
    /// # Errors
    ///
    /// Returns the bus failure reported by the platform.
    async fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError>;
}

/// [`Transport`] over an `embedded-hal` I2C bus
pub struct I2cTransport<I2C> {
    i2c: I2C,
}

impl<I2C> I2cTransport<I2C> {
    /// Wrap an I2C peripheral
    pub const fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Consume the transport and return the I2C peripheral
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C> Transport for I2cTransport<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        use embedded_hal::i2c::Error as _;

        self.i2c
            .write(address, bytes)
            .map_err(|e| BusError::from(e.kind()))
    }

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        use embedded_hal::i2c::Error as _;

        self.i2c
            .write_read(address, bytes, buffer)
            .map_err(|e| BusError::from(e.kind()))
    }
}

#[cfg(feature = "async")]
impl<I2C> AsyncTransport for I2cTransport<I2C>
where
    I2C: embedded_hal_async::i2c::I2c,
{
    async fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusError> {
        use embedded_hal::i2c::Error as _;

        self.i2c
            .write(address, bytes)
            .await
            .map_err(|e| BusError::from(e.kind()))
    }

    async fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), BusError> {
        use embedded_hal::i2c::Error as _;

        self.i2c
            .write_read(address, bytes, buffer)
            .await
            .map_err(|e| BusError::from(e.kind()))
    }
}

/// Find the first address in `range` that acknowledges a zero-length write
///
/// Discovery is only a prerequisite for building a session; it takes no part
/// in protocol correctness.
pub fn scan<T>(transport: &mut T, mut range: RangeInclusive<u8>) -> Option<u8>
where
    T: Transport + ?Sized,
{
    let found = range.find(|&address| transport.write(address, &[]).is_ok());

    #[cfg(feature = "defmt")]
    defmt::debug!("scan: first acknowledging address {}", found);

    found
}
