//! GPIO port abstractions
//!
//! A [`GpioPort`] is the whole digital I/O block of the chip. Its methods
//! take `&self` because pin registers are written atomically by the
//! hardware (set/clear registers), and because [`GpioPort::level`] is also
//! called from the edge interrupt.

use crate::error::Fault;

/// Number of GPIO lines (GPIO0..=GPIO48 on the ESP32-S3)
pub const MAX_PINS: usize = 49;

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Input only
    #[default]
    Input,
    /// Output only
    Output,
    /// Input and output enabled (open loopback)
    InputOutput,
}

impl Direction {
    /// Check if the output driver is enabled
    pub fn can_drive(&self) -> bool {
        matches!(self, Direction::Output | Direction::InputOutput)
    }
}

/// Internal pull resistors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pull {
    /// Floating
    #[default]
    None,
    /// Pull-up
    Up,
    /// Pull-down
    Down,
    /// Pull-up and pull-down (weak midpoint)
    UpDown,
}

/// Interrupt trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Trigger {
    /// No interrupt
    #[default]
    Disabled,
    /// Low to high transition
    RisingEdge,
    /// High to low transition
    FallingEdge,
    /// Either transition
    AnyEdge,
    /// While the line is low
    LowLevel,
    /// While the line is high
    HighLevel,
}

impl Trigger {
    /// Check whether a transition from `was` to `now` fires this trigger
    pub fn fires(&self, was: bool, now: bool) -> bool {
        match self {
            Trigger::Disabled => false,
            Trigger::RisingEdge => !was && now,
            Trigger::FallingEdge => was && !now,
            Trigger::AnyEdge => was != now,
            Trigger::LowLevel => !now,
            Trigger::HighLevel => now,
        }
    }
}

/// Per-pin configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinConfig {
    /// Pin direction
    pub direction: Direction,
    /// Pull resistors
    pub pull: Pull,
    /// Interrupt trigger
    pub trigger: Trigger,
    /// Logical inversion applied to reads and writes
    pub invert: bool,
}

impl PinConfig {
    /// Push-pull output
    pub const fn output() -> Self {
        Self {
            direction: Direction::Output,
            pull: Pull::None,
            trigger: Trigger::Disabled,
            invert: false,
        }
    }

    /// Input with the given pull
    pub const fn input(pull: Pull) -> Self {
        Self {
            direction: Direction::Input,
            pull,
            trigger: Trigger::Disabled,
            invert: false,
        }
    }

    /// Same configuration with logical inversion
    pub const fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }
}

/// The chip's GPIO block
///
/// Implementations must be safe to call from interrupt context for
/// [`GpioPort::level`].
pub trait GpioPort {
    /// Check whether `pin` exists on this chip
    fn is_valid_pin(&self, pin: u8) -> bool {
        (pin as usize) < MAX_PINS
    }

    /// Apply a full pin configuration
    ///
    /// Levels passed to and returned from the port are physical;
    /// `config.invert` is applied by the caller.
    fn configure(&self, pin: u8, config: &PinConfig) -> Result<(), Fault>;

    /// Return a pin to its reset state (input, floating, no interrupt)
    fn reset_pin(&self, pin: u8) -> Result<(), Fault>;

    /// Change only the direction
    fn set_direction(&self, pin: u8, direction: Direction) -> Result<(), Fault>;

    /// Change only the pull resistors
    fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), Fault>;

    /// Drive the physical level
    fn set_level(&self, pin: u8, high: bool) -> Result<(), Fault>;

    /// Read the physical level
    fn level(&self, pin: u8) -> bool;

    /// Change the interrupt trigger
    fn set_trigger(&self, pin: u8, trigger: Trigger) -> Result<(), Fault>;

    /// Unmask the pin interrupt
    fn enable_interrupt(&self, pin: u8) -> Result<(), Fault>;

    /// Mask the pin interrupt
    fn disable_interrupt(&self, pin: u8) -> Result<(), Fault>;

    /// Check whether the shared GPIO interrupt service is installed
    fn isr_service_installed(&self) -> bool;

    /// Install the shared GPIO interrupt service
    ///
    /// `vector` is called from interrupt context with the pin number of
    /// every pin whose interrupt fired.
    fn install_isr_service(&self, vector: fn(u8)) -> Result<(), Fault>;
}

impl<T: GpioPort + ?Sized> GpioPort for &T {
    fn is_valid_pin(&self, pin: u8) -> bool {
        (**self).is_valid_pin(pin)
    }

    fn configure(&self, pin: u8, config: &PinConfig) -> Result<(), Fault> {
        (**self).configure(pin, config)
    }

    fn reset_pin(&self, pin: u8) -> Result<(), Fault> {
        (**self).reset_pin(pin)
    }

    fn set_direction(&self, pin: u8, direction: Direction) -> Result<(), Fault> {
        (**self).set_direction(pin, direction)
    }

    fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), Fault> {
        (**self).set_pull(pin, pull)
    }

    fn set_level(&self, pin: u8, high: bool) -> Result<(), Fault> {
        (**self).set_level(pin, high)
    }

    fn level(&self, pin: u8) -> bool {
        (**self).level(pin)
    }

    fn set_trigger(&self, pin: u8, trigger: Trigger) -> Result<(), Fault> {
        (**self).set_trigger(pin, trigger)
    }

    fn enable_interrupt(&self, pin: u8) -> Result<(), Fault> {
        (**self).enable_interrupt(pin)
    }

    fn disable_interrupt(&self, pin: u8) -> Result<(), Fault> {
        (**self).disable_interrupt(pin)
    }

    fn isr_service_installed(&self) -> bool {
        (**self).isr_service_installed()
    }

    fn install_isr_service(&self, vector: fn(u8)) -> Result<(), Fault> {
        (**self).install_isr_service(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_triggers() {
        assert!(Trigger::RisingEdge.fires(false, true));
        assert!(!Trigger::RisingEdge.fires(true, false));
        assert!(Trigger::FallingEdge.fires(true, false));
        assert!(Trigger::AnyEdge.fires(true, false));
        assert!(Trigger::AnyEdge.fires(false, true));
        assert!(!Trigger::AnyEdge.fires(true, true));
        assert!(!Trigger::Disabled.fires(false, true));
    }

    #[test]
    fn test_level_triggers() {
        assert!(Trigger::HighLevel.fires(true, true));
        assert!(Trigger::LowLevel.fires(false, false));
        assert!(!Trigger::HighLevel.fires(true, false));
    }

    #[test]
    fn test_direction_can_drive() {
        assert!(!Direction::Input.can_drive());
        assert!(Direction::Output.can_drive());
        assert!(Direction::InputOutput.can_drive());
    }
}
