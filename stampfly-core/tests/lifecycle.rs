//! Lifecycle contract shared by every manager, run against the host
//! simulation

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use stampfly_core::adc::{AdcConfig, AdcManager};
use stampfly_core::gpio::GpioManager;
use stampfly_core::i2c::I2cManager;
use stampfly_core::nvs::NvsManager;
use stampfly_core::pwm::PwmManager;
use stampfly_core::spi::SpiManager;
use stampfly_core::timer::TimerManager;
use stampfly_core::uart::UartManager;
use stampfly_core::{Error, Peripheral, Priority, State};
use stampfly_hal::adc::Attenuation;
use stampfly_hal::i2c::I2cConfig;
use stampfly_hal::spi::{SpiBusConfig, SpiDeviceConfig};
use stampfly_hal::uart::UartConfig;
use stampfly_hal::Ticks;
use stampfly_hal_sim::{
    SimAdc, SimDelay, SimFlash, SimGpio, SimI2c, SimInterrupts, SimPwm, SimSpi, SimTimers,
    SimUart,
};

type Raw = CriticalSectionRawMutex;

/// Walk a manager through the full contract
fn exercise(manager: &dyn Peripheral) {
    assert_eq!(manager.state(), State::Uninitialized);
    assert_eq!(manager.start(), Err(Error::InvalidState));
    assert_eq!(manager.configure(), Err(Error::InvalidState));

    manager.initialize().unwrap();
    assert_eq!(manager.state(), State::Initialized);
    assert_eq!(
        manager.initialize(),
        Err(Error::InvalidState),
        "{} initialized twice",
        manager.name()
    );

    manager.configure().unwrap();
    assert_eq!(manager.state(), State::Initialized);

    manager.start().unwrap();
    assert_eq!(manager.state(), State::Running);
    manager.configure().unwrap();
    assert_eq!(manager.state(), State::Running);

    manager.stop().unwrap();
    assert_eq!(manager.state(), State::Suspended);
    assert_eq!(manager.configure(), Err(Error::InvalidState));
    manager.start().unwrap();
    assert_eq!(manager.state(), State::Running);

    manager.reset().unwrap();
    assert_eq!(manager.state(), State::Initialized);
    manager.configure().unwrap();
    assert_eq!(manager.state(), State::Initialized);

    manager.set_priority(Priority::High);
    assert_eq!(manager.priority(), Priority::High);
}

#[test]
fn test_gpio_contract() {
    exercise(&GpioManager::<Raw, _>::new(SimGpio::new()));
}

#[test]
fn test_timer_contract() {
    exercise(&TimerManager::<Raw, _, _>::new(
        SimTimers::new(),
        SimInterrupts::new(),
    ));
}

#[test]
fn test_i2c_contract() {
    exercise(&I2cManager::<Raw, _>::new(
        0,
        SimI2c::new(),
        I2cConfig::FAST.with_pins(3, 4),
    ));
}

#[test]
fn test_spi_contract() {
    exercise(&SpiManager::<Raw, _>::new(
        SimSpi::new(),
        SpiBusConfig::default().with_pins(14, 43, 44),
    ));
}

#[test]
fn test_adc_contract() {
    exercise(&AdcManager::<Raw, _, _>::new(
        SimAdc::new(),
        SimDelay::new(),
        AdcConfig::default(),
    ));
}

#[test]
fn test_nvs_contract() {
    exercise(&NvsManager::<Raw, _>::new(SimFlash::new(), "nvs"));
}

#[test]
fn test_pwm_contract() {
    exercise(&PwmManager::<Raw, _>::new(SimPwm::new()));
}

#[test]
fn test_uart_contract() {
    exercise(&UartManager::<Raw, _>::new(
        SimUart::new(),
        UartConfig::default(),
    ));
}

#[test]
fn test_failed_initialize_recovers_through_reset() {
    let sim = SimI2c::with_devices(&[0x76]);
    let i2c = I2cManager::<Raw, _>::new(0, sim.clone(), I2cConfig::FAST);

    assert_eq!(i2c.initialize(), Err(Error::InvalidArgument));
    assert_eq!(i2c.state(), State::Error);
    assert_eq!(i2c.start(), Err(Error::InvalidState));
    assert_eq!(i2c.device_exists(0x76), Err(Error::InvalidState));

    i2c.set_config(I2cConfig::FAST.with_pins(3, 4)).unwrap();
    i2c.reset().unwrap();
    assert_eq!(i2c.state(), State::Initialized);
    i2c.start().unwrap();
    assert_eq!(i2c.device_exists(0x76), Ok(true));
    assert_eq!(sim.installs(), 1);
}

#[test]
fn test_reset_leaves_managers_usable() {
    let adc = AdcManager::<Raw, _, _>::new(SimAdc::new(), SimDelay::new(), AdcConfig::default());
    let i2c = I2cManager::<Raw, _>::new(0, SimI2c::new(), I2cConfig::FAST.with_pins(3, 4));
    let spi = SpiManager::<Raw, _>::new(SimSpi::new(), SpiBusConfig::default().with_pins(14, 43, 44));
    let nvs = NvsManager::<Raw, _>::new(SimFlash::new(), "nvs");
    let uart = UartManager::<Raw, _>::new(SimUart::new(), UartConfig::default());

    // Straight from Uninitialized for some, after a run for the others
    adc.reset().unwrap();
    spi.reset().unwrap();
    let cycled: [&dyn Peripheral; 3] = [&i2c, &nvs, &uart];
    for manager in cycled {
        manager.initialize().unwrap();
        manager.start().unwrap();
        manager.reset().unwrap();
    }

    adc.configure_channel(0, Attenuation::Db11, false).unwrap();
    i2c.set_config(I2cConfig::STANDARD.with_pins(3, 4)).unwrap();
    spi.add_device(SpiDeviceConfig {
        cs_pin: Some(46),
        ..Default::default()
    })
    .unwrap();
    nvs.write_u32("cfg", "x", 7).unwrap();
    assert_eq!(nvs.read_u32("cfg", "x"), Ok(7));
    assert_eq!(uart.available(), Ok(0));

    // Data paths still wait for start
    assert_eq!(adc.read_raw(0), Err(Error::InvalidState));
    assert_eq!(i2c.device_exists(0x76), Err(Error::InvalidState));
    assert_eq!(uart.write(b"x", Ticks::NONE), Err(Error::InvalidState));
}

#[test]
fn test_corrupt_partition_does_not_fail_initialize() {
    let flash = SimFlash::new();
    flash.corrupt();
    let nvs = NvsManager::<Raw, _>::new(flash.clone(), "nvs");
    nvs.initialize().unwrap();
    assert_eq!(nvs.state(), State::Initialized);
}
