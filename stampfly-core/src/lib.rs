//! Peripheral managers for the StampFly quadcopter firmware
//!
//! This crate owns the stateful peripherals of the flight controller and
//! exposes them to the flight stack through one lifecycle contract:
//!
//! - Lifecycle contract and state machine ([`lifecycle`])
//! - Digital I/O with edge interrupts ([`gpio`])
//! - High-resolution timers, counters and raw interrupts ([`timer`])
//! - I2C and SPI bus managers ([`i2c`], [`spi`])
//! - ADC with calibration, averaging and filtering ([`adc`])
//! - Persistent key-value storage ([`nvs`])
//! - LEDC PWM outputs ([`pwm`]) and UART ([`uart`])
//!
//! Managers are generic over a `stampfly-hal` backend and over the raw
//! mutex guarding their registry, so the same code runs on the ESP32-S3
//! and against the host simulation.

#![no_std]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate std;

#[macro_use]
mod fmt;

#[macro_use]
pub mod lifecycle;

pub mod adc;
pub mod error;
pub mod gpio;
pub mod i2c;
mod isr;
pub mod nvs;
pub mod pwm;
pub mod spi;
pub mod timer;
pub mod uart;

pub use error::{Error, Result};
pub use lifecycle::{Peripheral, Priority, State};
