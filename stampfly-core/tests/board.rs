//! Board bring-up scenarios spanning several managers on shared simulated
//! hardware

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use stampfly_core::adc::{AdcConfig, AdcManager};
use stampfly_core::gpio::GpioManager;
use stampfly_core::i2c::I2cManager;
use stampfly_core::nvs::NvsManager;
use stampfly_core::spi::SpiManager;
use stampfly_core::{Error, Peripheral};
use stampfly_hal::adc::Attenuation;
use stampfly_hal::gpio::{PinConfig, Pull};
use stampfly_hal::i2c::{EmbeddedHalI2c, Endian, I2cConfig};
use stampfly_hal::spi::{SpiBusConfig, SpiDeviceConfig};
use stampfly_hal_sim::{SimAdc, SimDelay, SimFlash, SimGpio, SimI2c, SimSpi};

type Raw = CriticalSectionRawMutex;

const BMP280: u8 = 0x76;
const BMM150: u8 = 0x10;
const VL53L3: u8 = 0x29;

#[test]
fn test_gpio_loopback_between_managers() {
    let wire = SimGpio::new();
    let reader = GpioManager::<Raw, _>::new(wire.clone());
    let driver = GpioManager::<Raw, _>::new(wire.clone());
    reader.initialize().unwrap();
    driver.initialize().unwrap();

    reader.configure_pin(20, PinConfig::input(Pull::None)).unwrap();
    driver.configure_pin(20, PinConfig::output().inverted()).unwrap();

    driver.write(20, true).unwrap();
    assert_eq!(reader.read(20), Ok(false));
    driver.write(20, false).unwrap();
    assert_eq!(reader.read(20), Ok(true));
    assert_eq!(driver.read(20), Ok(false));
}

#[test]
fn test_sensor_bus_bring_up() {
    let i2c_sim = SimI2c::with_devices(&[BMM150, VL53L3, BMP280]);
    i2c_sim.set_register(BMP280, 0xD0, 0x58);
    i2c_sim.set_register(BMP280, 0x88, 0x70);
    i2c_sim.set_register(BMP280, 0x89, 0x6B);
    let i2c = I2cManager::<Raw, _>::new(0, i2c_sim.clone(), I2cConfig::FAST.with_pins(3, 4));
    i2c.initialize().unwrap();
    i2c.start().unwrap();

    let found = i2c.scan_bus().unwrap();
    assert_eq!(found.as_slice(), &[BMM150, VL53L3, BMP280]);
    assert_eq!(i2c.read_register8(BMP280, 0xD0), Ok(0x58));
    // Calibration words are little-endian
    assert_eq!(i2c.read_register16(BMP280, 0x88, Endian::Little), Ok(0x6B70));

    let spi_sim = SimSpi::new();
    let spi = SpiManager::<Raw, _>::new(spi_sim.clone(), SpiBusConfig::default().with_pins(14, 43, 44));
    spi.initialize().unwrap();
    let imu = spi
        .add_device(SpiDeviceConfig {
            frequency: 10_000_000,
            cs_pin: Some(46),
            ..Default::default()
        })
        .unwrap();
    let device = spi_sim.devices()[0].0;
    spi_sim.set_register(device, 0x00, 0x24);
    spi.start().unwrap();
    assert_eq!(spi.read_register8(imu, 0x00), Ok(0x24));

    spi.write_register8(imu, 0x7D, 0x0E).unwrap();
    assert_eq!(spi_sim.register(device, 0x7D), Some(0x0E));
}

#[test]
fn test_missing_sensor_is_soft() {
    let sim = SimI2c::with_devices(&[BMP280]);
    let i2c = I2cManager::<Raw, _>::new(0, sim, I2cConfig::FAST.with_pins(3, 4));
    i2c.initialize().unwrap();
    i2c.start().unwrap();
    assert_eq!(i2c.device_exists(BMM150), Ok(false));
    assert!(i2c.read_register8(BMM150, 0x40).unwrap_err().is_io());
    assert_eq!(i2c.device_exists(BMP280), Ok(true));
}

#[test]
fn test_managed_port_through_embedded_hal() {
    let sim = SimI2c::with_devices(&[BMP280]);
    sim.set_register(BMP280, 0xD0, 0x58);
    let port = I2cManager::<Raw, _>::new(0, sim.clone(), I2cConfig::FAST.with_pins(3, 4));
    port.initialize().unwrap();
    port.start().unwrap();

    // A second manager driving the first one as a plain embedded-hal bus
    let shared = I2cManager::<Raw, _>::new(
        1,
        EmbeddedHalI2c::new(&port),
        I2cConfig::FAST.with_pins(7, 8),
    );
    shared.initialize().unwrap();
    shared.start().unwrap();
    assert_eq!(shared.read_register8(BMP280, 0xD0), Ok(0x58));
    assert_eq!(shared.device_exists(BMM150), Ok(false));
    assert_eq!(sim.installs(), 1);
}

#[test]
fn test_battery_voltage_without_calibration() {
    let sim = SimAdc::new();
    sim.set_idle_value(2, 2048);
    let adc = AdcManager::<Raw, _, _>::new(sim, SimDelay::new(), AdcConfig::default());
    adc.initialize().unwrap();
    adc.configure_channel(2, Attenuation::Db11, true).unwrap();
    adc.start().unwrap();

    assert_eq!(adc.is_calibrated(2), Ok(false));
    assert_eq!(adc.read_voltage(2), Ok(550));
    assert_eq!(adc.read_average(2, 8).map(|r| r.raw), Ok(2048));
}

#[test]
fn test_settings_survive_restart() {
    let flash = SimFlash::new();
    {
        let nvs = NvsManager::<Raw, _>::new(flash.clone(), "nvs");
        nvs.initialize().unwrap();
        nvs.start().unwrap();
        nvs.write_u32("cfg", "x", 0xDEAD_BEEF).unwrap();
        nvs.write_f32("pid", "kp", 0.8).unwrap();
        nvs.write_str("sys", "name", "stampfly").unwrap();
        // Stopping commits everything staged
        nvs.stop().unwrap();
        nvs.write_u8("cfg", "lost", 1).unwrap_err();
    }

    let nvs = NvsManager::<Raw, _>::new(flash, "nvs");
    nvs.initialize().unwrap();
    assert_eq!(nvs.read_u32("cfg", "x"), Ok(0xDEAD_BEEF));
    assert_eq!(nvs.read_f32("pid", "kp"), Ok(0.8));
    let mut buf = [0u8; 16];
    assert_eq!(nvs.read_str("sys", "name", &mut buf), Ok("stampfly"));
    assert_eq!(nvs.read_u32("cfg", "y"), Err(Error::NotFound));
    assert_eq!(nvs.read_u8("cfg", "lost"), Err(Error::NotFound));
}

#[test]
fn test_uncommitted_settings_are_lost() {
    let flash = SimFlash::new();
    {
        let nvs = NvsManager::<Raw, _>::new(flash.clone(), "nvs");
        nvs.initialize().unwrap();
        nvs.write_u16("cfg", "gain", 3).unwrap();
    }
    let nvs = NvsManager::<Raw, _>::new(flash, "nvs");
    nvs.initialize().unwrap();
    assert_eq!(nvs.read_u16("cfg", "gain"), Err(Error::NotFound));
}
