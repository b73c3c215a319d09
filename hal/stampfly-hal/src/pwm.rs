//! PWM (LEDC) abstractions
//!
//! Timers set frequency and duty resolution; channels bind a pin to a
//! timer and carry a duty value.

use crate::error::Fault;

/// Number of LEDC timers
pub const MAX_TIMERS: usize = 4;

/// Number of LEDC channels
pub const MAX_CHANNELS: usize = 8;

/// Highest supported duty resolution
pub const MAX_RESOLUTION_BITS: u8 = 20;

/// LEDC speed mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpeedMode {
    /// Low-speed group (the only group on the ESP32-S3)
    #[default]
    LowSpeed,
    /// High-speed group
    HighSpeed,
}

/// Fade completion behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FadeMode {
    /// Return immediately
    #[default]
    NoWait,
    /// Block until the fade finishes
    WaitDone,
}

/// PWM timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmTimerConfig {
    /// Timer index
    pub timer: u8,
    /// Speed mode
    pub speed_mode: SpeedMode,
    /// Duty resolution in bits (1..=20)
    pub resolution_bits: u8,
    /// Output frequency in Hz
    pub frequency_hz: u32,
}

impl Default for PwmTimerConfig {
    fn default() -> Self {
        Self {
            timer: 0,
            speed_mode: SpeedMode::LowSpeed,
            resolution_bits: 13,
            frequency_hz: 5_000,
        }
    }
}

/// PWM channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmChannelConfig {
    /// Channel index
    pub channel: u8,
    /// Timer driving this channel
    pub timer: u8,
    /// Speed mode
    pub speed_mode: SpeedMode,
    /// Output pin
    pub gpio: u8,
    /// Initial duty
    pub duty: u32,
    /// Phase offset in timer ticks
    pub hpoint: u32,
}

/// Fade request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FadeConfig {
    /// Duty reached at the end of the fade
    pub target_duty: u32,
    /// Fade duration in milliseconds
    pub time_ms: u32,
    /// Completion behaviour
    pub mode: FadeMode,
}

/// LEDC driver
pub trait PwmDriver {
    /// Configure a timer
    fn configure_timer(&mut self, config: &PwmTimerConfig) -> Result<(), Fault>;

    /// Configure a channel
    fn configure_channel(&mut self, config: &PwmChannelConfig) -> Result<(), Fault>;

    /// Set and latch a channel duty
    fn set_duty(&mut self, mode: SpeedMode, channel: u8, duty: u32) -> Result<(), Fault>;

    /// Current channel duty
    fn duty(&self, mode: SpeedMode, channel: u8) -> u32;

    /// Change a timer frequency
    fn set_frequency(&mut self, mode: SpeedMode, timer: u8, frequency_hz: u32)
        -> Result<(), Fault>;

    /// Current timer frequency
    fn frequency(&self, mode: SpeedMode, timer: u8) -> u32;

    /// Install the hardware fade service
    fn install_fade_service(&mut self) -> Result<(), Fault>;

    /// Remove the hardware fade service
    fn uninstall_fade_service(&mut self);

    /// Start a fade on a channel
    fn start_fade(&mut self, mode: SpeedMode, channel: u8, fade: &FadeConfig)
        -> Result<(), Fault>;

    /// Abort a running fade
    fn stop_fade(&mut self, mode: SpeedMode, channel: u8) -> Result<(), Fault>;

    /// Stop the output and park it at `idle_high`
    fn stop(&mut self, mode: SpeedMode, channel: u8, idle_high: bool) -> Result<(), Fault>;
}
