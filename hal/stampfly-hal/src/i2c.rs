//! I2C bus abstractions
//!
//! Provides the I2C master driver trait and bus configuration.

use crate::error::Fault;
use crate::ticks::Ticks;

/// I2C bus master driver
///
/// Provides basic I2C read/write operations for communicating with
/// peripheral devices. Every transfer is blocking and bounded by `timeout`.
pub trait I2cBus {
    /// Install the driver with the given bus configuration
    fn install(&mut self, config: &I2cConfig) -> Result<(), Fault>;

    /// Remove the driver and release the pins
    fn uninstall(&mut self) -> Result<(), Fault>;

    /// Write data to a device at the given address
    ///
    /// # Arguments
    /// * `address` - 7-bit I2C address
    /// * `data` - Bytes to write (may be empty to check that an address acknowledges)
    /// * `timeout` - Maximum time to hold the bus
    fn write(&mut self, address: u8, data: &[u8], timeout: Ticks) -> Result<(), Fault>;

    /// Read data from a device at the given address
    ///
    /// # Arguments
    /// * `address` - 7-bit I2C address
    /// * `buf` - Buffer to read into
    /// * `timeout` - Maximum time to hold the bus
    fn read(&mut self, address: u8, buf: &mut [u8], timeout: Ticks) -> Result<(), Fault>;

    /// Write then read in a single transaction (repeated start)
    ///
    /// This is commonly used to write a register address then read data.
    ///
    /// # Arguments
    /// * `address` - 7-bit I2C address
    /// * `write_data` - Bytes to write (typically register address)
    /// * `read_buf` - Buffer to read into
    /// * `timeout` - Maximum time to hold the bus
    fn write_read(
        &mut self,
        address: u8,
        write_data: &[u8],
        read_buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<(), Fault>;
}

/// Highest valid 7-bit address
pub const MAX_ADDRESS: u8 = 0x7F;

/// First non-reserved 7-bit device address
pub const FIRST_DEVICE_ADDRESS: u8 = 0x08;

/// Last non-reserved 7-bit device address
pub const LAST_DEVICE_ADDRESS: u8 = 0x77;

/// I2C configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cConfig {
    /// SDA pin, `None` when not yet assigned
    pub sda_pin: Option<u8>,
    /// SCL pin, `None` when not yet assigned
    pub scl_pin: Option<u8>,
    /// Clock frequency in Hz
    pub frequency: u32,
    /// Enable the internal SDA pull-up
    pub sda_pullup: bool,
    /// Enable the internal SCL pull-up
    pub scl_pullup: bool,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl I2cConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: Self = Self {
        sda_pin: None,
        scl_pin: None,
        frequency: 100_000,
        sda_pullup: true,
        scl_pullup: true,
    };

    /// Fast mode (400 kHz)
    pub const FAST: Self = Self {
        frequency: 400_000,
        ..Self::STANDARD
    };

    /// Fast mode plus (1 MHz)
    pub const FAST_PLUS: Self = Self {
        frequency: 1_000_000,
        ..Self::STANDARD
    };

    /// Same configuration on the given pins
    pub const fn with_pins(mut self, sda: u8, scl: u8) -> Self {
        self.sda_pin = Some(sda);
        self.scl_pin = Some(scl);
        self
    }

    /// Check if both pins are assigned
    pub const fn has_pins(&self) -> bool {
        self.sda_pin.is_some() && self.scl_pin.is_some()
    }
}

/// Byte order of multi-byte register values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Endian {
    /// Most significant byte first
    #[default]
    Big,
    /// Least significant byte first
    Little,
}

impl Endian {
    /// Encode a 16-bit value
    pub fn encode_u16(self, value: u16) -> [u8; 2] {
        match self {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        }
    }

    /// Decode a 16-bit value
    pub fn decode_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endian::Big => u16::from_be_bytes(bytes),
            Endian::Little => u16::from_le_bytes(bytes),
        }
    }
}

/// Adapter exposing any `embedded-hal` 1.0 I2C master as an [`I2cBus`]
///
/// `embedded-hal` has no notion of timeouts or driver installation, so the
/// timeout is ignored and install/uninstall only track state.
pub struct EmbeddedHalI2c<T> {
    inner: T,
    installed: bool,
}

impl<T> EmbeddedHalI2c<T> {
    /// Wrap an `embedded-hal` bus
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            installed: false,
        }
    }

    /// Release the wrapped bus
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn map_eh_error<E: embedded_hal::i2c::Error>(error: E) -> Fault {
    use embedded_hal::i2c::ErrorKind;

    match error.kind() {
        ErrorKind::NoAcknowledge(_) => Fault::Nack,
        ErrorKind::Bus | ErrorKind::ArbitrationLoss => Fault::Bus,
        _ => Fault::Hardware,
    }
}

impl<T: embedded_hal::i2c::I2c> I2cBus for EmbeddedHalI2c<T> {
    fn install(&mut self, _config: &I2cConfig) -> Result<(), Fault> {
        self.installed = true;
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), Fault> {
        self.installed = false;
        Ok(())
    }

    fn write(&mut self, address: u8, data: &[u8], _timeout: Ticks) -> Result<(), Fault> {
        if !self.installed {
            return Err(Fault::InvalidState);
        }
        self.inner.write(address, data).map_err(map_eh_error)
    }

    fn read(&mut self, address: u8, buf: &mut [u8], _timeout: Ticks) -> Result<(), Fault> {
        if !self.installed {
            return Err(Fault::InvalidState);
        }
        self.inner.read(address, buf).map_err(map_eh_error)
    }

    fn write_read(
        &mut self,
        address: u8,
        write_data: &[u8],
        read_buf: &mut [u8],
        _timeout: Ticks,
    ) -> Result<(), Fault> {
        if !self.installed {
            return Err(Fault::InvalidState);
        }
        self.inner
            .write_read(address, write_data, read_buf)
            .map_err(map_eh_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(I2cConfig::default().frequency, 100_000);
        assert_eq!(I2cConfig::FAST.frequency, 400_000);
        assert!(I2cConfig::FAST.sda_pullup);
        assert!(!I2cConfig::STANDARD.has_pins());
        assert!(I2cConfig::STANDARD.with_pins(3, 4).has_pins());
    }

    #[test]
    fn test_endian_encoding() {
        assert_eq!(Endian::Big.encode_u16(0x1234), [0x12, 0x34]);
        assert_eq!(Endian::Little.encode_u16(0x1234), [0x34, 0x12]);
        assert_eq!(Endian::Big.decode_u16([0xAB, 0xCD]), 0xABCD);
        assert_eq!(Endian::Little.decode_u16([0xAB, 0xCD]), 0xCDAB);
    }
}
