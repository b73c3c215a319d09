//! UART serial communication abstractions
//!
//! Provides the UART driver trait that chip-specific HALs implement, and
//! the frame format configuration.

use crate::error::Fault;
use crate::ticks::Ticks;

/// UART port driver
///
/// The driver owns the RX/TX ring buffers and an event queue. Reads and
/// writes block for at most `timeout`.
pub trait UartPort {
    /// Install the driver with the given configuration
    fn install(&mut self, config: &UartConfig) -> Result<(), Fault>;

    /// Remove the driver and free its buffers
    fn uninstall(&mut self) -> Result<(), Fault>;

    /// Queue bytes for transmission, returning how many were accepted
    fn write(&mut self, data: &[u8], timeout: Ticks) -> Result<usize, Fault>;

    /// Read up to `buf.len()` bytes, returning how many arrived before the
    /// timeout
    fn read(&mut self, buf: &mut [u8], timeout: Ticks) -> Result<usize, Fault>;

    /// Bytes waiting in the RX buffer
    fn available(&self) -> Result<usize, Fault>;

    /// Discard everything in the RX buffer
    fn flush_input(&mut self) -> Result<(), Fault>;

    /// Wait until the TX FIFO has drained
    fn wait_tx_done(&mut self, timeout: Ticks) -> Result<(), Fault>;

    /// Change the baud rate
    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), Fault>;

    /// Current baud rate as measured by the peripheral
    fn baudrate(&self) -> Result<u32, Fault>;

    /// Write `data` followed by a break of `break_bits` bit times
    fn write_with_break(&mut self, data: &[u8], break_bits: u32) -> Result<(), Fault>;

    /// Raise [`UartEvent::PatternDetected`] when `pattern` repeats `count`
    /// times
    fn enable_pattern_detect(&mut self, pattern: u8, count: u8, timing: PatternTiming)
        -> Result<(), Fault>;

    /// Stop pattern detection
    fn disable_pattern_detect(&mut self) -> Result<(), Fault>;

    /// Switch between normal UART and RS485 half-duplex mode
    fn set_rs485(&mut self, enable: bool) -> Result<(), Fault>;

    /// Pop the next driver event, if any
    fn next_event(&mut self) -> Option<(UartEvent, usize)>;
}

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits (typically 8)
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Hardware flow control
    pub flow_control: FlowControl,
    /// TX pin, `None` keeps the default routing
    pub tx_pin: Option<u8>,
    /// RX pin, `None` keeps the default routing
    pub rx_pin: Option<u8>,
    /// RTS pin
    pub rts_pin: Option<u8>,
    /// CTS pin
    pub cts_pin: Option<u8>,
    /// RX ring buffer size in bytes
    pub rx_buffer_size: usize,
    /// TX ring buffer size in bytes (0 = blocking writes)
    pub tx_buffer_size: usize,
    /// Event queue depth
    pub event_queue_size: u8,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            tx_pin: None,
            rx_pin: None,
            rts_pin: None,
            cts_pin: None,
            rx_buffer_size: 1024,
            tx_buffer_size: 0,
            event_queue_size: 10,
        }
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    OneAndHalf,
    Two,
}

/// Hardware flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowControl {
    None,
    Rts,
    Cts,
    RtsCts,
}

/// Driver events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartEvent {
    /// Data arrived
    Data,
    /// Break detected on RX
    Break,
    /// RX ring buffer full
    BufferFull,
    /// Hardware FIFO overflowed
    FifoOverflow,
    /// Framing error
    FrameError,
    /// Parity error
    ParityError,
    /// TX data and break finished
    DataBreak,
    /// Configured pattern seen
    PatternDetected,
}

impl UartEvent {
    /// Number of event kinds
    pub const COUNT: usize = 8;

    /// Stable index for per-event counters
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Check if the event reports lost or corrupted data
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            UartEvent::BufferFull
                | UartEvent::FifoOverflow
                | UartEvent::FrameError
                | UartEvent::ParityError
        )
    }
}

/// Pattern detection timing, in baud periods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternTiming {
    /// Maximum gap between pattern characters
    pub gap_timeout: u16,
    /// Idle time required before the first character
    pub pre_idle: u16,
    /// Idle time required after the last character
    pub post_idle: u16,
}

impl Default for PatternTiming {
    fn default() -> Self {
        Self {
            gap_timeout: 9,
            pre_idle: 0,
            post_idle: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_8n1() {
        let config = UartConfig::default();
        assert_eq!(config.baudrate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
    }

    #[test]
    fn test_event_indices_unique() {
        let events = [
            UartEvent::Data,
            UartEvent::Break,
            UartEvent::BufferFull,
            UartEvent::FifoOverflow,
            UartEvent::FrameError,
            UartEvent::ParityError,
            UartEvent::DataBreak,
            UartEvent::PatternDetected,
        ];
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.index(), i);
            assert!(event.index() < UartEvent::COUNT);
        }
        assert!(UartEvent::FrameError.is_error());
        assert!(!UartEvent::Data.is_error());
    }
}
