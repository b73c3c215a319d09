//! Simulated GPIO block
//!
//! Each pin carries one wire level. Driving an output changes the wire, so
//! a second handle reading the same pin sees a loopback. Tests can also
//! force the wire from outside with [`SimGpio::drive`].

use std::sync::{Arc, Mutex};

use stampfly_hal::gpio::{Direction, GpioPort, PinConfig, Pull, Trigger, MAX_PINS};
use stampfly_hal::Fault;

use crate::lock;

#[derive(Debug, Clone, Copy, Default)]
struct SimPin {
    config: PinConfig,
    level: bool,
    interrupt_enabled: bool,
}

#[derive(Debug)]
struct GpioState {
    pins: [SimPin; MAX_PINS],
    vector: Option<fn(u8)>,
    service_installs: u32,
}

/// Simulated GPIO port
#[derive(Debug, Clone)]
pub struct SimGpio {
    state: Arc<Mutex<GpioState>>,
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimGpio {
    /// All pins floating low, no interrupt service
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GpioState {
                pins: [SimPin::default(); MAX_PINS],
                vector: None,
                service_installs: 0,
            })),
        }
    }

    /// Force the wire level from outside the chip
    ///
    /// Fires the pin interrupt when its trigger matches the transition.
    pub fn drive(&self, pin: u8, high: bool) {
        self.change_level(pin, high);
    }

    /// Current pin configuration as seen by the hardware
    pub fn config(&self, pin: u8) -> Option<PinConfig> {
        let state = lock(&self.state);
        state.pins.get(pin as usize).map(|p| p.config)
    }

    /// Check if the pin interrupt is unmasked
    pub fn interrupt_enabled(&self, pin: u8) -> bool {
        let state = lock(&self.state);
        state
            .pins
            .get(pin as usize)
            .is_some_and(|p| p.interrupt_enabled)
    }

    /// Number of times the interrupt service was installed
    pub fn service_installs(&self) -> u32 {
        lock(&self.state).service_installs
    }

    fn change_level(&self, pin: u8, high: bool) {
        let fire = {
            let mut state = lock(&self.state);
            let vector = state.vector;
            let Some(sim) = state.pins.get_mut(pin as usize) else {
                return;
            };
            let was = sim.level;
            sim.level = high;
            let fires = sim.interrupt_enabled && sim.config.trigger.fires(was, high);
            if fires {
                vector
            } else {
                None
            }
        };
        if let Some(vector) = fire {
            vector(pin);
        }
    }

    fn with_pin<R>(&self, pin: u8, f: impl FnOnce(&mut SimPin) -> R) -> Result<R, Fault> {
        let mut state = lock(&self.state);
        state
            .pins
            .get_mut(pin as usize)
            .map(f)
            .ok_or(Fault::InvalidArgument)
    }
}

impl GpioPort for SimGpio {
    fn configure(&self, pin: u8, config: &PinConfig) -> Result<(), Fault> {
        self.with_pin(pin, |p| {
            p.config = *config;
            if config.trigger == Trigger::Disabled {
                p.interrupt_enabled = false;
            }
        })
    }

    fn reset_pin(&self, pin: u8) -> Result<(), Fault> {
        self.with_pin(pin, |p| *p = SimPin::default())
    }

    fn set_direction(&self, pin: u8, direction: Direction) -> Result<(), Fault> {
        self.with_pin(pin, |p| p.config.direction = direction)
    }

    fn set_pull(&self, pin: u8, pull: Pull) -> Result<(), Fault> {
        self.with_pin(pin, |p| p.config.pull = pull)
    }

    fn set_level(&self, pin: u8, high: bool) -> Result<(), Fault> {
        let drives = self.with_pin(pin, |p| p.config.direction.can_drive())?;
        if !drives {
            return Err(Fault::InvalidState);
        }
        self.change_level(pin, high);
        Ok(())
    }

    fn level(&self, pin: u8) -> bool {
        let state = lock(&self.state);
        state.pins.get(pin as usize).is_some_and(|p| p.level)
    }

    fn set_trigger(&self, pin: u8, trigger: Trigger) -> Result<(), Fault> {
        self.with_pin(pin, |p| p.config.trigger = trigger)
    }

    fn enable_interrupt(&self, pin: u8) -> Result<(), Fault> {
        self.with_pin(pin, |p| p.interrupt_enabled = true)
    }

    fn disable_interrupt(&self, pin: u8) -> Result<(), Fault> {
        self.with_pin(pin, |p| p.interrupt_enabled = false)
    }

    fn isr_service_installed(&self) -> bool {
        lock(&self.state).vector.is_some()
    }

    fn install_isr_service(&self, vector: fn(u8)) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.vector.is_some() {
            return Err(Fault::InvalidState);
        }
        state.vector = Some(vector);
        state.service_installs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static HITS: AtomicU32 = AtomicU32::new(0);

    fn count_hit(_pin: u8) {
        HITS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_output_drives_wire() {
        let gpio = SimGpio::new();
        gpio.configure(4, &PinConfig::output()).unwrap();
        gpio.set_level(4, true).unwrap();
        assert!(gpio.level(4));
    }

    #[test]
    fn test_input_cannot_drive() {
        let gpio = SimGpio::new();
        gpio.configure(5, &PinConfig::input(Pull::Up)).unwrap();
        assert_eq!(gpio.set_level(5, true), Err(Fault::InvalidState));
    }

    #[test]
    fn test_rising_edge_fires_vector() {
        let gpio = SimGpio::new();
        gpio.install_isr_service(count_hit).unwrap();
        gpio.configure(
            6,
            &PinConfig {
                trigger: Trigger::RisingEdge,
                ..PinConfig::input(Pull::None)
            },
        )
        .unwrap();
        gpio.enable_interrupt(6).unwrap();

        gpio.drive(6, true);
        gpio.drive(6, false);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert_eq!(gpio.install_isr_service(count_hit), Err(Fault::InvalidState));
    }
}
