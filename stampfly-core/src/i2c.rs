//! I2C master manager
//!
//! Owns one I2C port. Every transfer is a blocking call into the backend,
//! serialized by the manager mutex. Register helpers follow the usual
//! sensor convention: the first written byte selects the register.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use stampfly_hal::i2c::{
    Endian, I2cBus, I2cConfig, FIRST_DEVICE_ADDRESS, LAST_DEVICE_ADDRESS, MAX_ADDRESS,
};
use stampfly_hal::Ticks;

use crate::error::{Error, Result};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

/// Timeout used by the register helpers
pub const DEFAULT_TIMEOUT: Ticks = Ticks::from_ms(1000);

/// Timeout of the address check in [`I2cManager::device_exists`]
pub const ADDRESS_CHECK_TIMEOUT: Ticks = Ticks::from_ms(100);

/// Largest payload accepted by [`I2cManager::write_register`]
pub const MAX_REGISTER_WRITE: usize = 64;

/// Number of addresses checked by a bus scan
pub const SCAN_RANGE: usize = (LAST_DEVICE_ADDRESS - FIRST_DEVICE_ADDRESS + 1) as usize;

/// Addresses found by [`I2cManager::scan_bus`]
pub type ScanResult = Vec<u8, SCAN_RANGE>;

struct Inner<B> {
    lifecycle: Lifecycle,
    bus: B,
    port: u8,
    config: I2cConfig,
    installed: bool,
}

impl<B: I2cBus> Inner<B> {
    fn install(&mut self) -> Result<()> {
        if !self.config.has_pins() {
            warn!("i2c{}: SDA/SCL not assigned", self.port);
            return Err(Error::InvalidArgument);
        }
        self.bus.install(&self.config)?;
        self.installed = true;
        info!(
            "i2c{}: installed at {} Hz (sda {:?}, scl {:?})",
            self.port,
            self.config.frequency,
            self.config.sda_pin,
            self.config.scl_pin
        );
        Ok(())
    }

    fn uninstall(&mut self) -> Result<()> {
        if self.installed {
            self.installed = false;
            self.bus.uninstall()?;
        }
        Ok(())
    }

    fn reinstall(&mut self) -> Result<()> {
        self.uninstall()?;
        self.install()
    }

    /// Bus handle for a transfer
    fn bus(&mut self) -> Result<&mut B> {
        self.lifecycle.require_running()?;
        if !self.installed {
            return Err(Error::InvalidState);
        }
        Ok(&mut self.bus)
    }
}

fn check_address(address: u8) -> Result<()> {
    if address > MAX_ADDRESS {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

/// I2C port manager
pub struct I2cManager<M: RawMutex, B: I2cBus> {
    inner: Mutex<M, RefCell<Inner<B>>>,
}

impl<M: RawMutex, B: I2cBus> I2cManager<M, B> {
    /// Create a manager for `port`
    ///
    /// Nothing touches the hardware until [`Peripheral::initialize`].
    pub const fn new(port: u8, bus: B, config: I2cConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("i2c"),
                bus,
                port,
                config,
                installed: false,
            })),
        }
    }

    fn with_bus<R>(&self, address: u8, f: impl FnOnce(&mut B) -> Result<R>) -> Result<R> {
        check_address(address)?;
        self.inner.lock(|inner| f(inner.borrow_mut().bus()?))
    }

    /// Write bytes to a device
    pub fn write(&self, address: u8, data: &[u8], timeout: Ticks) -> Result<()> {
        self.with_bus(address, |bus| Ok(bus.write(address, data, timeout)?))
    }

    /// Read bytes from a device
    pub fn read(&self, address: u8, buf: &mut [u8], timeout: Ticks) -> Result<()> {
        self.with_bus(address, |bus| Ok(bus.read(address, buf, timeout)?))
    }

    /// Write `data` to consecutive registers starting at `register`
    ///
    /// The register and data go out in a single write.
    pub fn write_register(
        &self,
        address: u8,
        register: u8,
        data: &[u8],
        timeout: Ticks,
    ) -> Result<()> {
        let mut frame: Vec<u8, { MAX_REGISTER_WRITE + 1 }> = Vec::new();
        frame.push(register).map_err(|_| Error::NoMemory)?;
        frame
            .extend_from_slice(data)
            .map_err(|_| Error::InvalidArgument)?;
        self.write(address, &frame, timeout)
    }

    /// Read consecutive registers starting at `register` (repeated start)
    pub fn read_register(
        &self,
        address: u8,
        register: u8,
        buf: &mut [u8],
        timeout: Ticks,
    ) -> Result<()> {
        self.with_bus(address, |bus| {
            Ok(bus.write_read(address, &[register], buf, timeout)?)
        })
    }

    pub fn write_register8(&self, address: u8, register: u8, value: u8) -> Result<()> {
        self.write_register(address, register, &[value], DEFAULT_TIMEOUT)
    }

    pub fn read_register8(&self, address: u8, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_register(address, register, &mut buf, DEFAULT_TIMEOUT)?;
        Ok(buf[0])
    }

    /// Write a 16-bit register in the given byte order
    pub fn write_register16(
        &self,
        address: u8,
        register: u8,
        value: u16,
        endian: Endian,
    ) -> Result<()> {
        self.write_register(address, register, &endian.encode_u16(value), DEFAULT_TIMEOUT)
    }

    /// Read a 16-bit register in the given byte order
    pub fn read_register16(&self, address: u8, register: u8, endian: Endian) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_register(address, register, &mut buf, DEFAULT_TIMEOUT)?;
        Ok(endian.decode_u16(buf))
    }

    /// Check an address with a zero-length write
    ///
    /// A missing acknowledge means the device is absent; any other fault is
    /// returned.
    pub fn device_exists(&self, address: u8) -> Result<bool> {
        match self.write(address, &[], ADDRESS_CHECK_TIMEOUT) {
            Ok(()) => Ok(true),
            Err(Error::Io(fault)) if fault.is_absence() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check every non-reserved address in ascending order
    ///
    /// Absent devices are skipped. The first hard fault aborts the scan.
    pub fn scan_bus(&self) -> Result<ScanResult> {
        let mut found = ScanResult::new();
        for address in FIRST_DEVICE_ADDRESS..=LAST_DEVICE_ADDRESS {
            if self.device_exists(address)? {
                debug!("i2c: device at {:#x}", address);
                found.push(address).map_err(|_| Error::NoMemory)?;
            }
        }
        Ok(found)
    }

    /// Replace the bus configuration
    ///
    /// An installed driver is reinstalled with the new settings.
    pub fn set_config(&self, config: I2cConfig) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.installed && !config.has_pins() {
                return Err(Error::InvalidArgument);
            }
            inner.config = config;
            if inner.installed {
                inner.reinstall()?;
            }
            Ok(())
        })
    }

    pub fn config(&self) -> I2cConfig {
        self.inner.lock(|inner| inner.borrow().config)
    }

    pub fn port(&self) -> u8 {
        self.inner.lock(|inner| inner.borrow().port)
    }
}

impl<M: RawMutex, B: I2cBus> Peripheral for I2cManager<M, B> {
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            if let Err(e) = inner.install() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    /// Delete and reinstall the driver with the stored configuration
    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Configure)?;
            if let Err(e) = inner.reinstall() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Configure)?;
            Ok(())
        })
    }

    fn start(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Start)?;
            if !inner.installed {
                if let Err(e) = inner.install() {
                    return Err(inner.lifecycle.fail(e));
                }
            }
            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        // Transfers are blocking, nothing is in flight once the lock is held
        self.inner.lock(|inner| {
            inner.borrow_mut().lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    /// Reinstall the driver from the stored configuration
    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(e) = inner.reinstall() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, B: I2cBus> Drop for I2cManager<M, B> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = inner.borrow_mut().uninstall();
        });
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        match self {
            Error::Io(fault) => embedded_hal::i2c::Error::kind(fault),
            _ => embedded_hal::i2c::ErrorKind::Other,
        }
    }
}

impl<M: RawMutex, B: I2cBus> embedded_hal::i2c::ErrorType for &I2cManager<M, B> {
    type Error = Error;
}

/// Lets `embedded-hal` sensor drivers share the managed port
///
/// A write immediately followed by a read is issued as one repeated-start
/// transfer; other operations go out one by one.
impl<M: RawMutex, B: I2cBus> embedded_hal::i2c::I2c for &I2cManager<M, B> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<()> {
        use embedded_hal::i2c::Operation;

        let mut i = 0;
        while i < operations.len() {
            let (head, tail) = operations.split_at_mut(i + 1);
            match (&mut head[i], tail.first_mut()) {
                (Operation::Write(data), Some(Operation::Read(buf))) => {
                    let data: &[u8] = data;
                    self.with_bus(address, |bus| {
                        Ok(bus.write_read(address, data, buf, DEFAULT_TIMEOUT)?)
                    })?;
                    i += 2;
                }
                (Operation::Write(data), _) => {
                    I2cManager::write(self, address, data, DEFAULT_TIMEOUT)?;
                    i += 1;
                }
                (Operation::Read(buf), _) => {
                    I2cManager::read(self, address, buf, DEFAULT_TIMEOUT)?;
                    i += 1;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use stampfly_hal::Fault;
    use stampfly_hal_sim::{I2cOp, SimI2c};
    use std::vec;

    use crate::lifecycle::State;

    type Manager = I2cManager<CriticalSectionRawMutex, SimI2c>;

    fn ready(sim: &SimI2c) -> Manager {
        let manager = Manager::new(0, sim.clone(), I2cConfig::FAST.with_pins(3, 4));
        manager.initialize().unwrap();
        manager.start().unwrap();
        manager
    }

    #[test]
    fn test_initialize_without_pins() {
        let sim = SimI2c::new();
        let manager = Manager::new(0, sim.clone(), I2cConfig::default());
        assert_eq!(manager.initialize(), Err(Error::InvalidArgument));
        assert_eq!(manager.state(), State::Error);
        assert_eq!(manager.read_register8(0x68, 0x75), Err(Error::InvalidState));
        assert_eq!(sim.installs(), 0);
    }

    #[test]
    fn test_operations_before_initialize() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = Manager::new(0, sim, I2cConfig::FAST.with_pins(3, 4));
        assert_eq!(manager.write(0x68, &[1], DEFAULT_TIMEOUT), Err(Error::InvalidState));
        assert_eq!(manager.device_exists(0x68), Err(Error::InvalidState));
    }

    #[test]
    fn test_transfers_need_running() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = Manager::new(0, sim.clone(), I2cConfig::FAST.with_pins(3, 4));
        manager.initialize().unwrap();
        assert_eq!(manager.read_register8(0x68, 0x75), Err(Error::InvalidState));
        assert_eq!(manager.scan_bus(), Err(Error::InvalidState));
        assert!(sim.take_log().is_empty());

        // Configuration is accepted before start
        manager.set_config(I2cConfig::STANDARD.with_pins(3, 4)).unwrap();
        manager.start().unwrap();
        assert_eq!(manager.device_exists(0x68), Ok(true));
    }

    #[test]
    fn test_scan_finds_devices() {
        let sim = SimI2c::with_devices(&[0x42, 0x10]);
        let manager = ready(&sim);
        let found = manager.scan_bus().unwrap();
        assert_eq!(found.as_slice(), &[0x10, 0x42]);
        assert_eq!(sim.take_log().len(), SCAN_RANGE);
    }

    #[test]
    fn test_scan_aborts_on_hard_fault() {
        let sim = SimI2c::with_devices(&[0x10, 0x42]);
        sim.inject_fault(0x20, Fault::Timeout);
        let manager = ready(&sim);
        assert_eq!(manager.scan_bus(), Err(Error::Io(Fault::Timeout)));
        // Probing stopped at the faulty address
        assert_eq!(sim.take_log().len(), (0x20 - FIRST_DEVICE_ADDRESS + 1) as usize);
    }

    #[test]
    fn test_device_exists() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = ready(&sim);
        assert_eq!(manager.device_exists(0x68), Ok(true));
        assert_eq!(manager.device_exists(0x69), Ok(false));
        assert_eq!(manager.device_exists(0x80), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_register_access() {
        let sim = SimI2c::with_devices(&[0x68]);
        sim.set_register(0x68, 0x75, 0x70);
        let manager = ready(&sim);
        assert_eq!(manager.read_register8(0x68, 0x75), Ok(0x70));

        manager.write_register(0x68, 0x1B, &[0x18, 0x08], DEFAULT_TIMEOUT).unwrap();
        assert_eq!(sim.register(0x68, 0x1B), Some(0x18));
        assert_eq!(sim.register(0x68, 0x1C), Some(0x08));

        let log = sim.take_log();
        assert_eq!(
            log[0],
            I2cOp::WriteRead {
                address: 0x68,
                data: vec![0x75],
                len: 1
            }
        );
        assert_eq!(
            log[1],
            I2cOp::Write {
                address: 0x68,
                data: vec![0x1B, 0x18, 0x08]
            }
        );
    }

    #[test]
    fn test_register16_byte_order() {
        let sim = SimI2c::with_devices(&[0x76]);
        let manager = ready(&sim);
        manager.write_register16(0x76, 0x00, 0x1234, Endian::Big).unwrap();
        assert_eq!(sim.register(0x76, 0x00), Some(0x12));
        assert_eq!(sim.register(0x76, 0x01), Some(0x34));
        assert_eq!(manager.read_register16(0x76, 0x00, Endian::Big), Ok(0x1234));
        assert_eq!(manager.read_register16(0x76, 0x00, Endian::Little), Ok(0x3412));
    }

    #[test]
    fn test_oversized_register_write() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = ready(&sim);
        let data = [0u8; MAX_REGISTER_WRITE + 1];
        assert_eq!(
            manager.write_register(0x68, 0, &data, DEFAULT_TIMEOUT),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_configure_reinstalls() {
        let sim = SimI2c::new();
        let manager = ready(&sim);
        manager.set_config(I2cConfig::STANDARD.with_pins(5, 6)).unwrap();
        assert_eq!(sim.installs(), 2);
        assert_eq!(sim.config().map(|c| c.frequency), Some(100_000));
        manager.configure().unwrap();
        assert_eq!(sim.installs(), 3);
        assert_eq!(
            manager.set_config(I2cConfig::STANDARD),
            Err(Error::InvalidArgument)
        );
        assert_eq!(manager.config().sda_pin, Some(5));
    }

    #[test]
    fn test_stop_quiesces_and_drop_uninstalls() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = ready(&sim);
        manager.stop().unwrap();
        assert_eq!(manager.device_exists(0x68), Err(Error::InvalidState));
        manager.start().unwrap();
        assert_eq!(manager.device_exists(0x68), Ok(true));
        drop(manager);
        assert_eq!(sim.config(), None);
    }

    #[test]
    fn test_reset_reinstalls_driver() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = ready(&sim);
        manager.set_config(I2cConfig::STANDARD.with_pins(5, 6)).unwrap();
        manager.reset().unwrap();
        assert_eq!(manager.state(), State::Initialized);
        assert_eq!(sim.installs(), 3);
        assert_eq!(sim.config().map(|c| c.sda_pin), Some(Some(5)));

        manager.start().unwrap();
        assert_eq!(sim.installs(), 3);
        assert_eq!(manager.device_exists(0x68), Ok(true));
    }

    #[test]
    fn test_reset_from_uninitialized_installs() {
        let sim = SimI2c::with_devices(&[0x68]);
        let manager = Manager::new(0, sim.clone(), I2cConfig::FAST.with_pins(3, 4));
        manager.reset().unwrap();
        assert_eq!(manager.state(), State::Initialized);
        assert_eq!(sim.installs(), 1);
        manager.start().unwrap();
        assert_eq!(manager.device_exists(0x68), Ok(true));
    }

    #[test]
    fn test_reset_without_pins_fails() {
        let manager = Manager::new(0, SimI2c::new(), I2cConfig::FAST);
        assert_eq!(manager.reset(), Err(Error::InvalidArgument));
        assert_eq!(manager.state(), State::Error);
    }

    #[test]
    fn test_embedded_hal_write_read() {
        use embedded_hal::i2c::I2c;

        let sim = SimI2c::with_devices(&[0x68]);
        sim.set_register(0x68, 0x3B, 0xAB);
        let manager = ready(&sim);
        let mut port = &manager;
        let mut out = [0u8; 1];
        port.write_read(0x68, &[0x3B], &mut out).unwrap();
        assert_eq!(out, [0xAB]);
        assert_eq!(sim.take_log().len(), 1);
    }
}
