//! SPI bus abstractions
//!
//! Provides the SPI master driver trait, bus/device configuration and the
//! transaction frame handed to the driver.

use crate::error::Fault;

/// Payloads up to this many bytes travel inside the transaction descriptor
pub const INLINE_PAYLOAD_LEN: usize = 4;

/// SPI bus master driver
///
/// Devices are attached to an initialized bus and addressed through the
/// driver's own handle type.
pub trait SpiBus {
    /// Driver handle for an attached device
    type Device: Copy + PartialEq;

    /// Claim the bus pins and initialize the host
    fn initialize_bus(&mut self, config: &SpiBusConfig) -> Result<(), Fault>;

    /// Release the bus (all devices must be removed first)
    fn free_bus(&mut self) -> Result<(), Fault>;

    /// Attach a device to the bus
    fn add_device(&mut self, config: &SpiDeviceConfig) -> Result<Self::Device, Fault>;

    /// Detach a device
    fn remove_device(&mut self, device: Self::Device) -> Result<(), Fault>;

    /// Run one full-duplex transaction, blocking until it completes
    fn transmit(&mut self, device: Self::Device, frame: &mut Frame<'_>) -> Result<(), Fault>;
}

/// SPI bus configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiBusConfig {
    /// Host peripheral index (SPI2 = 1, SPI3 = 2)
    pub host: u8,
    /// MOSI pin
    pub mosi_pin: Option<u8>,
    /// MISO pin
    pub miso_pin: Option<u8>,
    /// SCLK pin
    pub sclk_pin: Option<u8>,
    /// Largest single transfer in bytes
    pub max_transfer_size: usize,
    /// DMA channel, `None` to pick automatically
    pub dma_channel: Option<u8>,
    /// Transaction queue depth
    pub queue_size: u8,
}

impl Default for SpiBusConfig {
    fn default() -> Self {
        Self {
            host: 1,
            mosi_pin: None,
            miso_pin: None,
            sclk_pin: None,
            max_transfer_size: 4096,
            dma_channel: None,
            queue_size: 7,
        }
    }
}

impl SpiBusConfig {
    /// Same configuration on the given pins
    pub const fn with_pins(mut self, mosi: u8, miso: u8, sclk: u8) -> Self {
        self.mosi_pin = Some(mosi);
        self.miso_pin = Some(miso);
        self.sclk_pin = Some(sclk);
        self
    }

    /// Check if the clock and at least one data line are assigned
    pub const fn has_pins(&self) -> bool {
        self.sclk_pin.is_some() && (self.mosi_pin.is_some() || self.miso_pin.is_some())
    }
}

/// Per-device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiDeviceConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
    /// SPI mode
    pub mode: Mode,
    /// Chip-select pin
    pub cs_pin: Option<u8>,
    /// Clock cycles CS is asserted before the transfer
    pub cs_pretrans: u8,
    /// Clock cycles CS is held after the transfer
    pub cs_posttrans: u8,
    /// Width of the command phase in bits
    pub command_bits: u8,
    /// Width of the address phase in bits
    pub address_bits: u8,
    /// Dummy bits between address and data
    pub dummy_bits: u8,
    /// Per-device transaction queue depth
    pub queue_size: u8,
}

impl Default for SpiDeviceConfig {
    fn default() -> Self {
        Self {
            frequency: 1_000_000, // 1 MHz
            mode: Mode::Mode0,
            cs_pin: None,
            cs_pretrans: 0,
            cs_posttrans: 0,
            command_bits: 0,
            address_bits: 0,
            dummy_bits: 0,
            queue_size: 7,
        }
    }
}

/// SPI clock polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Clock idles low (CPOL=0)
    IdleLow,
    /// Clock idles high (CPOL=1)
    IdleHigh,
}

/// SPI clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Data captured on first clock transition (CPHA=0)
    CaptureOnFirstTransition,
    /// Data captured on second clock transition (CPHA=1)
    CaptureOnSecondTransition,
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl From<Mode> for (Polarity, Phase) {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => (Polarity::IdleLow, Phase::CaptureOnFirstTransition),
            Mode::Mode1 => (Polarity::IdleLow, Phase::CaptureOnSecondTransition),
            Mode::Mode2 => (Polarity::IdleHigh, Phase::CaptureOnFirstTransition),
            Mode::Mode3 => (Polarity::IdleHigh, Phase::CaptureOnSecondTransition),
        }
    }
}

/// Data phase of a transaction
#[derive(Debug, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Short transfer carried inside the descriptor (no DMA buffers)
    Inline {
        /// Bytes clocked out
        tx: [u8; INLINE_PAYLOAD_LEN],
        /// Bytes clocked in
        rx: [u8; INLINE_PAYLOAD_LEN],
    },
    /// Transfer through caller buffers
    Buffered {
        /// Bytes clocked out (shorter than the transfer: zero padded)
        tx: &'a [u8],
        /// Bytes clocked in (shorter than the transfer: tail dropped)
        rx: &'a mut [u8],
    },
}

/// One SPI transaction as seen by the driver
#[derive(Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Command phase value
    pub command: u16,
    /// Address phase value
    pub address: u64,
    /// Data phase length in bits
    pub length_bits: usize,
    /// Data phase
    pub payload: Payload<'a>,
}

impl Frame<'_> {
    /// Data phase length in bytes
    pub fn len(&self) -> usize {
        self.length_bits.div_ceil(8)
    }

    /// Check for an empty data phase
    pub fn is_empty(&self) -> bool {
        self.length_bits == 0
    }

    /// Check whether the inline path was chosen
    pub fn is_inline(&self) -> bool {
        matches!(self.payload, Payload::Inline { .. })
    }
}
