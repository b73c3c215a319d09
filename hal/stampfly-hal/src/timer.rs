//! Timer abstractions
//!
//! Two timer classes share one driver trait:
//!
//! - High-resolution timers: microsecond period, software dispatched
//!   (`esp_timer` on the ESP32-S3)
//! - General-purpose counters: configurable tick rate, up/down counting,
//!   alarm triggered from interrupt context (`gptimer`)
//!
//! The driver never owns callbacks. When a timer is created it receives an
//! [`AlarmRoute`] naming the owning manager and a slot number, and calls
//! [`AlarmRoute::fire`] when the alarm expires.

use crate::error::Fault;

/// Receiver of timer alarms
///
/// Called from interrupt (or timer task) context. Implementations must not
/// block.
pub trait AlarmSink: Sync {
    /// Handle an alarm for `slot`
    ///
    /// Returns true if a higher priority task was woken and the ISR should
    /// yield on exit.
    fn on_alarm(&self, slot: u8) -> bool;
}

/// Context handed to the driver for one timer
///
/// This is the interrupt argument of the timer: it carries the owning
/// manager so several managers can coexist.
#[derive(Clone, Copy)]
pub struct AlarmRoute {
    /// Owning manager
    pub sink: &'static dyn AlarmSink,
    /// Slot inside the owning manager
    pub slot: u8,
}

impl AlarmRoute {
    /// Deliver the alarm, returning the wake hint
    pub fn fire(&self) -> bool {
        self.sink.on_alarm(self.slot)
    }
}

impl core::fmt::Debug for AlarmRoute {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlarmRoute").field("slot", &self.slot).finish()
    }
}

/// Counting direction of a general-purpose timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CountDirection {
    /// Count up from zero to the alarm value
    #[default]
    Up,
    /// Count down towards the alarm value
    Down,
}

/// High-resolution timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HighResConfig {
    /// Period in microseconds
    pub period_us: u64,
    /// Re-arm after every expiry
    pub auto_reload: bool,
    /// Name shown in driver diagnostics
    pub name: &'static str,
}

impl Default for HighResConfig {
    fn default() -> Self {
        Self {
            period_us: 1_000,
            auto_reload: true,
            name: "hr_timer",
        }
    }
}

/// General-purpose counter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CounterConfig {
    /// Counter tick rate in Hz
    pub resolution_hz: u32,
    /// Counting direction
    pub direction: CountDirection,
    /// Counter value that raises the alarm
    pub alarm_count: u64,
    /// Reset the counter when the alarm fires
    pub auto_reload_on_alarm: bool,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            resolution_hz: 1_000_000, // 1 MHz, 1 tick = 1 us
            direction: CountDirection::Up,
            alarm_count: 1_000,
            auto_reload_on_alarm: true,
        }
    }
}

/// Timer class and its configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// Software-dispatched microsecond timer
    HighRes(HighResConfig),
    /// Hardware counter with alarm
    Counter(CounterConfig),
}

impl TimerKind {
    /// Check if the timer stops after the first expiry
    pub fn is_one_shot(&self) -> bool {
        match self {
            TimerKind::HighRes(config) => !config.auto_reload,
            TimerKind::Counter(config) => !config.auto_reload_on_alarm,
        }
    }
}

/// Convert a period to a counter alarm value
///
/// Returns `None` if the result does not fit in 64 bits.
pub fn period_to_alarm_count(period_us: u64, resolution_hz: u32) -> Option<u64> {
    let count = (period_us as u128 * resolution_hz as u128) / 1_000_000;
    u64::try_from(count).ok()
}

/// Timer hardware driver
///
/// Timers are addressed by the slot number chosen by the manager.
pub trait TimerDriver {
    /// Monotonic time since boot in microseconds
    fn now_us(&self) -> u64;

    /// Create a stopped timer
    fn create(&mut self, slot: u8, kind: &TimerKind, route: AlarmRoute) -> Result<(), Fault>;

    /// Start (arm) a timer
    fn start(&mut self, slot: u8) -> Result<(), Fault>;

    /// Stop (disarm) a timer
    fn stop(&mut self, slot: u8) -> Result<(), Fault>;

    /// Delete a timer and free its hardware
    fn delete(&mut self, slot: u8) -> Result<(), Fault>;

    /// Change the period of a high-resolution timer
    ///
    /// A running timer restarts with the new period.
    fn set_period(&mut self, slot: u8, period_us: u64) -> Result<(), Fault>;

    /// Change the alarm of a counter
    fn set_alarm(&mut self, slot: u8, alarm_count: u64, auto_reload: bool) -> Result<(), Fault>;

    /// Read a counter
    fn count(&self, slot: u8) -> Result<u64, Fault>;

    /// Overwrite a counter
    fn set_count(&mut self, slot: u8, count: u64) -> Result<(), Fault>;
}
