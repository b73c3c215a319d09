//! Simulated I2C bus
//!
//! Devices are 256-byte register files with an auto-incrementing register
//! pointer, which is how most IMU, barometer and ToF parts behave: the
//! first written byte selects the register, following bytes are stored
//! from there on, and reads continue from the pointer.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use stampfly_hal::i2c::{I2cBus, I2cConfig};
use stampfly_hal::{Fault, Ticks};

use crate::lock;

/// One bus transaction as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cOp {
    /// Plain write
    Write { address: u8, data: Vec<u8> },
    /// Plain read
    Read { address: u8, len: usize },
    /// Write followed by a repeated-start read
    WriteRead {
        address: u8,
        data: Vec<u8>,
        len: usize,
    },
}

#[derive(Debug, Clone)]
struct SimDevice {
    registers: [u8; 256],
    pointer: u8,
}

impl SimDevice {
    fn new() -> Self {
        Self {
            registers: [0; 256],
            pointer: 0,
        }
    }

    fn write(&mut self, data: &[u8]) {
        if let Some((&register, payload)) = data.split_first() {
            self.pointer = register;
            for &byte in payload {
                self.registers[self.pointer as usize] = byte;
                self.pointer = self.pointer.wrapping_add(1);
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.registers[self.pointer as usize];
            self.pointer = self.pointer.wrapping_add(1);
        }
    }
}

#[derive(Debug, Default)]
struct I2cState {
    config: Option<I2cConfig>,
    installs: u32,
    devices: BTreeMap<u8, SimDevice>,
    faults: BTreeMap<u8, Fault>,
    log: Vec<I2cOp>,
}

impl I2cState {
    fn target(&mut self, address: u8) -> Result<&mut SimDevice, Fault> {
        if self.config.is_none() {
            return Err(Fault::InvalidState);
        }
        if let Some(fault) = self.faults.get(&address) {
            return Err(*fault);
        }
        self.devices.get_mut(&address).ok_or(Fault::Nack)
    }
}

/// Simulated I2C master with attached devices
#[derive(Debug, Clone, Default)]
pub struct SimI2c {
    state: Arc<Mutex<I2cState>>,
}

impl SimI2c {
    /// Empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with devices acknowledging at the given addresses
    pub fn with_devices(addresses: &[u8]) -> Self {
        let sim = Self::new();
        for &address in addresses {
            sim.attach(address);
        }
        sim
    }

    /// Attach a device (all registers zero)
    pub fn attach(&self, address: u8) {
        lock(&self.state).devices.insert(address, SimDevice::new());
    }

    /// Detach a device so it stops acknowledging
    pub fn detach(&self, address: u8) {
        lock(&self.state).devices.remove(&address);
    }

    /// Preload a device register
    pub fn set_register(&self, address: u8, register: u8, value: u8) {
        let mut state = lock(&self.state);
        if let Some(device) = state.devices.get_mut(&address) {
            device.registers[register as usize] = value;
        }
    }

    /// Read back a device register
    pub fn register(&self, address: u8, register: u8) -> Option<u8> {
        let state = lock(&self.state);
        state
            .devices
            .get(&address)
            .map(|d| d.registers[register as usize])
    }

    /// Make every transaction to `address` fail with `fault`
    pub fn inject_fault(&self, address: u8, fault: Fault) {
        lock(&self.state).faults.insert(address, fault);
    }

    /// Remove injected faults
    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    /// Installed configuration, `None` while the driver is removed
    pub fn config(&self) -> Option<I2cConfig> {
        lock(&self.state).config
    }

    /// Number of driver installs so far
    pub fn installs(&self) -> u32 {
        lock(&self.state).installs
    }

    /// Drain the transaction log
    pub fn take_log(&self) -> Vec<I2cOp> {
        std::mem::take(&mut lock(&self.state).log)
    }
}

impl I2cBus for SimI2c {
    fn install(&mut self, config: &I2cConfig) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.config.is_some() {
            return Err(Fault::InvalidState);
        }
        if !config.has_pins() {
            return Err(Fault::InvalidArgument);
        }
        state.config = Some(*config);
        state.installs += 1;
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.config.take().map(|_| ()).ok_or(Fault::InvalidState)
    }

    fn write(&mut self, address: u8, data: &[u8], _timeout: Ticks) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.log.push(I2cOp::Write {
            address,
            data: data.to_vec(),
        });
        state.target(address)?.write(data);
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8], _timeout: Ticks) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.log.push(I2cOp::Read {
            address,
            len: buf.len(),
        });
        state.target(address)?.read(buf);
        Ok(())
    }

    fn write_read(
        &mut self,
        address: u8,
        write_data: &[u8],
        read_buf: &mut [u8],
        _timeout: Ticks,
    ) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.log.push(I2cOp::WriteRead {
            address,
            data: write_data.to_vec(),
            len: read_buf.len(),
        });
        let device = state.target(address)?;
        device.write(write_data);
        device.read(read_buf);
        Ok(())
    }
}
