//! Blocking-call timeouts
//!
//! Timeouts on blocking calls are expressed in scheduler ticks. The tick
//! period is fixed at 1 ms.

/// Scheduler tick rate in Hz
pub const TICK_RATE_HZ: u32 = 1000;

/// Timeout in scheduler ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticks(pub u32);

impl Ticks {
    /// Wait indefinitely
    pub const FOREVER: Self = Self(u32::MAX);

    /// Do not wait at all
    pub const NONE: Self = Self(0);

    /// Convert milliseconds to ticks, saturating below [`Ticks::FOREVER`]
    pub const fn from_ms(ms: u32) -> Self {
        let ticks = (ms as u64 * TICK_RATE_HZ as u64) / 1000;
        if ticks >= u32::MAX as u64 {
            Self(u32::MAX - 1)
        } else {
            Self(ticks as u32)
        }
    }

    /// Check if this is the infinite-wait sentinel
    pub const fn is_forever(&self) -> bool {
        self.0 == u32::MAX
    }

    /// Timeout in milliseconds, `None` when waiting forever
    pub const fn as_ms(&self) -> Option<u32> {
        if self.is_forever() {
            None
        } else {
            Some(((self.0 as u64 * 1000) / TICK_RATE_HZ as u64) as u32)
        }
    }
}
