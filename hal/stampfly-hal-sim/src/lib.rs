//! Host simulation of the StampFly peripheral backends
//!
//! Every type here implements one `stampfly-hal` trait on top of plain
//! in-memory state, so the managers in `stampfly-core` can be exercised on
//! a development machine. Handles are cheap to clone and share their state,
//! which lets a test keep one handle for inspection and fault injection
//! while the manager owns another.
//!
//! Simulated interrupts (pin edges, timer alarms, raw sources) are always
//! delivered after the internal lock is released, the same way hardware
//! would never run a handler while the driver holds its spinlock.

#![deny(unsafe_code)]

pub mod adc;
pub mod flash;
pub mod gpio;
pub mod i2c;
pub mod interrupt;
pub mod pwm;
pub mod spi;
pub mod timer;
pub mod uart;

pub use adc::{SimAdc, SimDelay};
pub use flash::SimFlash;
pub use gpio::SimGpio;
pub use i2c::{I2cOp, SimI2c};
pub use interrupt::SimInterrupts;
pub use pwm::SimPwm;
pub use spi::{SimSpi, SpiRecord};
pub use timer::SimTimers;
pub use uart::SimUart;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock shared simulation state, ignoring poisoning from a panicked test
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
