//! StampFly Hardware Abstraction Layer
//!
//! This crate defines the traits a chip support crate implements so the
//! peripheral managers in `stampfly-core` can run on real silicon (ESP32-S3)
//! or on the host simulation in `stampfly-hal-sim`.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Flight stack (tasks, ISRs, consumers)  │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  stampfly-core (managers, lifecycle)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  stampfly-hal (this crate - traits)     │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  chip crate   │       │ stampfly-hal- │
//! │  (esp32s3)    │       │      sim      │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::GpioPort`] - Digital I/O block with edge interrupts
//! - [`timer::TimerDriver`] - High-resolution and counter timers
//! - [`interrupt::InterruptController`] - Raw interrupt allocation and masking
//! - [`i2c::I2cBus`] - I2C master
//! - [`spi::SpiBus`] - SPI master with attached devices
//! - [`adc::AdcUnit`] - One-shot ADC unit and calibration fitting
//! - [`pwm::PwmDriver`] - LEDC style PWM timers and channels
//! - [`uart::UartPort`] - UART with an event queue
//! - [`flash::NvsPartition`] - Persistent key-value partition

#![no_std]
#![deny(unsafe_code)]

pub mod adc;
pub mod error;
pub mod flash;
pub mod gpio;
pub mod i2c;
pub mod interrupt;
pub mod pwm;
pub mod spi;
pub mod ticks;
pub mod timer;
pub mod uart;

// Re-export key items at crate root for convenience
pub use adc::AdcUnit;
pub use error::Fault;
pub use flash::NvsPartition;
pub use gpio::GpioPort;
pub use i2c::I2cBus;
pub use interrupt::InterruptController;
pub use pwm::PwmDriver;
pub use spi::SpiBus;
pub use ticks::Ticks;
pub use timer::TimerDriver;
pub use uart::UartPort;
