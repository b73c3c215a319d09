//! Digital I/O manager
//!
//! Owns the per-pin configuration of a [`GpioPort`] and the edge interrupt
//! callbacks attached to its pins.
//!
//! Logical inversion is applied here, symmetrically on both paths:
//! `write(pin, level)` drives `level ^ invert` and `read(pin)` returns
//! `physical ^ invert`.
//!
//! # Interrupt path
//!
//! ```text
//! pin edge ─► port ISR service ─► dispatch_edge(pin)
//!                                      │ router (pin → manager)
//!                                      ▼
//!                              GpioManager::on_edge(pin)
//!                                      │ route slot (pin → callback)
//!                                      ▼
//!                              callback(pin, level)
//! ```
//!
//! No step takes the registry mutex.

mod router;

pub use router::{dispatch_edge, is_routed, EdgeSink};

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::FnvIndexMap;
use portable_atomic::{AtomicU32, Ordering};
use stampfly_hal::gpio::{Direction, GpioPort, PinConfig, Pull, Trigger, MAX_PINS};

use crate::error::{Error, Result};
use crate::isr::{self, Slot};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

/// Edge callback: `(pin, logical_level)`, runs in interrupt context
pub type EdgeCallback = fn(u8, bool);

/// Capacity of the pin registry (power of two covering every pin)
const REGISTRY_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
struct EdgeRoute {
    callback: EdgeCallback,
    invert: bool,
}

#[derive(Debug, Clone, Copy)]
struct PinEntry {
    config: PinConfig,
    /// Last logical level written
    level: bool,
}

struct Inner {
    lifecycle: Lifecycle,
    pins: FnvIndexMap<u8, PinEntry, REGISTRY_CAPACITY>,
}

impl Inner {
    fn entry(&self, pin: u8) -> Result<&PinEntry> {
        self.pins.get(&pin).ok_or(Error::NotFound)
    }

    fn entry_mut(&mut self, pin: u8) -> Result<&mut PinEntry> {
        self.pins.get_mut(&pin).ok_or(Error::NotFound)
    }
}

/// Digital I/O manager
pub struct GpioManager<M: RawMutex, P: GpioPort> {
    port: P,
    inner: Mutex<M, RefCell<Inner>>,
    routes: [Slot<EdgeRoute>; MAX_PINS],
    edges: [AtomicU32; MAX_PINS],
}

impl<M: RawMutex, P: GpioPort> GpioManager<M, P> {
    /// Create a manager for `port`
    pub const fn new(port: P) -> Self {
        Self {
            port,
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("gpio"),
                pins: FnvIndexMap::new(),
            })),
            routes: [const { isr::empty() }; MAX_PINS],
            edges: [const { AtomicU32::new(0) }; MAX_PINS],
        }
    }

    /// Apply a full configuration to a pin
    ///
    /// Reconfiguring a pin detaches any interrupt attached to it.
    pub fn configure_pin(&self, pin: u8, config: PinConfig) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            if !self.port.is_valid_pin(pin) {
                return Err(Error::InvalidArgument);
            }
            if inner.pins.contains_key(&pin) {
                self.detach(pin)?;
            } else if inner.pins.len() == inner.pins.capacity() {
                return Err(Error::NoMemory);
            }

            self.port.configure(pin, &config)?;
            inner
                .pins
                .insert(pin, PinEntry { config, level: false })
                .map_err(|_| Error::NoMemory)?;
            debug!("gpio: pin {} configured as {:?}", pin, config.direction);
            Ok(())
        })
    }

    /// Change the direction of a configured pin
    pub fn set_direction(&self, pin: u8, direction: Direction) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.entry_mut(pin)?;
            self.port.set_direction(pin, direction)?;
            entry.config.direction = direction;
            Ok(())
        })
    }

    /// Change the pull resistors of a configured pin
    pub fn set_pull(&self, pin: u8, pull: Pull) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.entry_mut(pin)?;
            self.port.set_pull(pin, pull)?;
            entry.config.pull = pull;
            Ok(())
        })
    }

    /// Write a logical level
    ///
    /// Fails with [`Error::InvalidArgument`] on an input-only pin.
    pub fn write(&self, pin: u8, level: bool) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.entry_mut(pin)?;
            if !entry.config.direction.can_drive() {
                return Err(Error::InvalidArgument);
            }
            self.port.set_level(pin, level ^ entry.config.invert)?;
            entry.level = level;
            Ok(())
        })
    }

    /// Read the logical level
    pub fn read(&self, pin: u8) -> Result<bool> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            let entry = inner.entry(pin)?;
            Ok(self.port.level(pin) ^ entry.config.invert)
        })
    }

    /// Invert the last written logical level
    pub fn toggle(&self, pin: u8) -> Result<()> {
        let level = self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            inner.entry(pin).map(|e| e.level)
        })?;
        self.write(pin, !level)
    }

    /// Detach the interrupt of a pin
    ///
    /// Succeeds without effect if no interrupt is attached.
    pub fn disable_interrupt(&self, pin: u8) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.entry_mut(pin)?;
            self.detach(pin)?;
            entry.config.trigger = Trigger::Disabled;
            Ok(())
        })
    }

    /// Number of edges dispatched on a pin since it was configured
    pub fn edge_count(&self, pin: u8) -> Result<u32> {
        self.inner.lock(|inner| inner.borrow().lifecycle.require_ready())?;
        self.edges
            .get(pin as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .ok_or(Error::InvalidArgument)
    }

    /// Stored configuration of a pin
    pub fn pin_config(&self, pin: u8) -> Result<PinConfig> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            inner.entry(pin).map(|e| e.config)
        })
    }

    /// Check if a pin is configured
    pub fn is_configured(&self, pin: u8) -> bool {
        self.inner
            .lock(|inner| inner.borrow().pins.contains_key(&pin))
    }

    /// Number of configured pins
    pub fn configured_pins(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().pins.len())
    }

    /// Check if an interrupt callback is attached to a pin
    pub fn has_interrupt(&self, pin: u8) -> bool {
        self.routes
            .get(pin as usize)
            .is_some_and(|slot| isr::load(slot).is_some())
    }

    fn owner(&self) -> *const () {
        (self as *const Self).cast::<()>()
    }

    fn detach(&self, pin: u8) -> Result<()> {
        let Some(slot) = self.routes.get(pin as usize) else {
            return Ok(());
        };
        if isr::load(slot).is_none() {
            return Ok(());
        }
        self.port.disable_interrupt(pin)?;
        self.port.set_trigger(pin, Trigger::Disabled)?;
        isr::store(slot, None);
        router::unpublish(pin, self.owner());
        debug!("gpio: pin {} interrupt detached", pin);
        Ok(())
    }

    /// Release every pin, returning the first backend failure
    fn release_all(&self, inner: &mut Inner) -> Result<()> {
        let mut first_error = None;
        for (&pin, _) in inner.pins.iter() {
            let outcome = self
                .detach(pin)
                .and_then(|_| self.port.reset_pin(pin).map_err(Error::from));
            if let Err(e) = outcome {
                warn!("gpio: releasing pin {} failed: {}", pin, e);
                first_error.get_or_insert(e);
            }
            if let Some(counter) = self.edges.get(pin as usize) {
                counter.store(0, Ordering::Relaxed);
            }
        }
        inner.pins.clear();
        first_error.map_or(Ok(()), Err)
    }
}

impl<M, P> GpioManager<M, P>
where
    M: RawMutex + Sync + 'static,
    P: GpioPort + Sync + 'static,
{
    /// Attach an edge callback to a configured pin
    ///
    /// Installs the port's interrupt service on first use, then routes the
    /// pin to this manager. The callback runs in interrupt context with
    /// the logical (inversion-adjusted) level and must not block.
    pub fn set_interrupt(
        &'static self,
        pin: u8,
        trigger: Trigger,
        callback: EdgeCallback,
    ) -> Result<()> {
        if trigger == Trigger::Disabled {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let entry = inner.entry_mut(pin)?;

            if !self.port.isr_service_installed() {
                self.port.install_isr_service(dispatch_edge)?;
                info!("gpio: interrupt service installed");
            }
            router::publish(pin, self)?;

            let slot = &self.routes[pin as usize];
            isr::store(
                slot,
                Some(EdgeRoute {
                    callback,
                    invert: entry.config.invert,
                }),
            );
            let armed = self
                .port
                .set_trigger(pin, trigger)
                .and_then(|_| self.port.enable_interrupt(pin));
            if let Err(fault) = armed {
                isr::store(slot, None);
                router::unpublish(pin, self.owner());
                return Err(fault.into());
            }

            entry.config.trigger = trigger;
            info!("gpio: pin {} interrupt on {:?}", pin, trigger);
            Ok(())
        })
    }
}

impl<M: RawMutex + Sync, P: GpioPort + Sync> EdgeSink for GpioManager<M, P> {
    fn on_edge(&self, pin: u8) {
        let Some(slot) = self.routes.get(pin as usize) else {
            return;
        };
        let Some(route) = isr::load(slot) else {
            return;
        };
        if let Some(counter) = self.edges.get(pin as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        let level = self.port.level(pin) ^ route.invert;
        (route.callback)(pin, level);
    }
}

impl<M: RawMutex, P: GpioPort> Peripheral for GpioManager<M, P> {
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Configure)?;
            let mut outcome = Ok(());
            for (&pin, entry) in inner.pins.iter() {
                if let Err(fault) = self.port.configure(pin, &entry.config) {
                    outcome = Err(Error::from(fault));
                    break;
                }
            }
            match outcome {
                Ok(()) => inner.lifecycle.apply(Event::Configure).map(|_| ()),
                Err(e) => Err(inner.lifecycle.fail(e)),
            }
        })
    }

    fn start(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut guard = inner.borrow_mut();
            let inner = &mut *guard;
            inner.lifecycle.check(Event::Start)?;
            for (&pin, _) in inner.pins.iter() {
                if self.has_interrupt(pin) {
                    if let Err(fault) = self.port.enable_interrupt(pin) {
                        return Err(inner.lifecycle.fail(fault.into()));
                    }
                }
            }
            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Stop)?;
            for (&pin, _) in inner.pins.iter() {
                if self.has_interrupt(pin) {
                    self.port.disable_interrupt(pin)?;
                }
            }
            inner.lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(e) = self.release_all(&mut inner) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, P: GpioPort> Drop for GpioManager<M, P> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = self.release_all(&mut inner.borrow_mut());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use stampfly_hal_sim::SimGpio;
    use std::boxed::Box;
    use std::sync::atomic::{AtomicBool, AtomicU32 as StdAtomicU32, Ordering as StdOrdering};

    type Manager = GpioManager<CriticalSectionRawMutex, SimGpio>;

    fn ready(sim: &SimGpio) -> Manager {
        let gpio = Manager::new(sim.clone());
        gpio.initialize().unwrap();
        gpio
    }

    fn leaked(sim: &SimGpio) -> &'static Manager {
        Box::leak(Box::new(ready(sim)))
    }

    #[test]
    fn test_operations_before_initialize() {
        let sim = SimGpio::new();
        let gpio = Manager::new(sim.clone());
        assert_eq!(gpio.configure_pin(2, PinConfig::output()), Err(Error::InvalidState));
        assert_eq!(gpio.write(2, true), Err(Error::InvalidState));
        assert_eq!(gpio.read(2), Err(Error::InvalidState));
        assert_eq!(sim.config(2), Some(PinConfig::default()));
        assert!(!gpio.is_configured(2));
    }

    #[test]
    fn test_write_read_back() {
        let sim = SimGpio::new();
        let gpio = ready(&sim);
        gpio.configure_pin(
            3,
            PinConfig {
                direction: Direction::InputOutput,
                ..PinConfig::output()
            },
        )
        .unwrap();
        gpio.write(3, true).unwrap();
        assert_eq!(gpio.read(3), Ok(true));
        gpio.toggle(3).unwrap();
        assert_eq!(gpio.read(3), Ok(false));
    }

    #[test]
    fn test_inversion_is_symmetric() {
        let sim = SimGpio::new();
        let gpio = ready(&sim);
        gpio.configure_pin(4, PinConfig::output().inverted()).unwrap();
        gpio.write(4, true).unwrap();
        assert!(!sim.level(4));
        assert_eq!(gpio.read(4), Ok(true));
    }

    #[test]
    fn test_input_pin_rejects_write() {
        let gpio = ready(&SimGpio::new());
        gpio.configure_pin(5, PinConfig::input(Pull::Up)).unwrap();
        assert_eq!(gpio.write(5, true), Err(Error::InvalidArgument));
        assert_eq!(gpio.write(6, true), Err(Error::NotFound));
        assert_eq!(gpio.read(6), Err(Error::NotFound));
    }

    #[test]
    fn test_invalid_pin() {
        let gpio = ready(&SimGpio::new());
        assert_eq!(
            gpio.configure_pin(MAX_PINS as u8, PinConfig::output()),
            Err(Error::InvalidArgument)
        );
    }

    static RISES: StdAtomicU32 = StdAtomicU32::new(0);
    static LAST_LEVEL: AtomicBool = AtomicBool::new(false);

    fn on_rise(pin: u8, level: bool) {
        assert_eq!(pin, 10);
        RISES.fetch_add(1, StdOrdering::SeqCst);
        LAST_LEVEL.store(level, StdOrdering::SeqCst);
    }

    #[test]
    fn test_edge_dispatch() {
        let sim = SimGpio::new();
        let gpio = leaked(&sim);
        gpio.configure_pin(10, PinConfig::input(Pull::Down)).unwrap();
        gpio.set_interrupt(10, Trigger::RisingEdge, on_rise).unwrap();
        assert!(is_routed(10));
        assert_eq!(sim.service_installs(), 1);

        sim.drive(10, true);
        sim.drive(10, false);
        sim.drive(10, true);
        assert_eq!(RISES.load(StdOrdering::SeqCst), 2);
        assert!(LAST_LEVEL.load(StdOrdering::SeqCst));
        assert_eq!(gpio.edge_count(10), Ok(2));

        gpio.disable_interrupt(10).unwrap();
        assert!(!is_routed(10));
        sim.drive(10, false);
        sim.drive(10, true);
        assert_eq!(RISES.load(StdOrdering::SeqCst), 2);
    }

    fn ignore_edge(_pin: u8, _level: bool) {}

    #[test]
    fn test_service_installed_once() {
        let sim = SimGpio::new();
        let gpio = leaked(&sim);
        gpio.configure_pin(11, PinConfig::input(Pull::None)).unwrap();
        gpio.configure_pin(12, PinConfig::input(Pull::None)).unwrap();
        gpio.set_interrupt(11, Trigger::AnyEdge, ignore_edge).unwrap();
        gpio.set_interrupt(12, Trigger::AnyEdge, ignore_edge).unwrap();
        assert_eq!(sim.service_installs(), 1);
        assert_eq!(
            gpio.set_interrupt(12, Trigger::Disabled, ignore_edge),
            Err(Error::InvalidArgument)
        );
        gpio.reset().unwrap();
    }

    #[test]
    fn test_stop_masks_interrupts() {
        let sim = SimGpio::new();
        let gpio = leaked(&sim);
        gpio.configure_pin(13, PinConfig::input(Pull::None)).unwrap();
        gpio.set_interrupt(13, Trigger::AnyEdge, ignore_edge).unwrap();
        gpio.start().unwrap();
        gpio.stop().unwrap();
        assert!(!sim.interrupt_enabled(13));
        gpio.start().unwrap();
        assert!(sim.interrupt_enabled(13));
        gpio.reset().unwrap();
    }

    #[test]
    fn test_reset_releases_everything() {
        let sim = SimGpio::new();
        let gpio = leaked(&sim);
        gpio.configure_pin(14, PinConfig::input(Pull::None)).unwrap();
        gpio.set_interrupt(14, Trigger::FallingEdge, ignore_edge).unwrap();
        gpio.start().unwrap();

        gpio.reset().unwrap();
        assert_eq!(gpio.state(), crate::State::Initialized);
        assert_eq!(gpio.configured_pins(), 0);
        assert!(!is_routed(14));
        assert_eq!(sim.config(14), Some(PinConfig::default()));

        gpio.configure_pin(14, PinConfig::input(Pull::None)).unwrap();
    }

    #[test]
    fn test_drop_releases_pins() {
        let sim = SimGpio::new();
        {
            let gpio = ready(&sim);
            gpio.configure_pin(16, PinConfig::output()).unwrap();
            gpio.write(16, true).unwrap();
            assert_eq!(sim.config(16).map(|c| c.direction), Some(Direction::Output));
        }
        assert_eq!(sim.config(16), Some(PinConfig::default()));
        assert!(!sim.level(16));
    }
}
