//! Simulated SPI host
//!
//! Attached devices behave like a typical sensor register file: the first
//! byte of a transfer is the register address with bit 7 set for reads.
//! A read clocks out one dummy byte (the address phase) followed by the
//! register contents. Responses queued with [`SimSpi::queue_response`]
//! take priority over the register model.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use stampfly_hal::spi::{Frame, Payload, SpiBus, SpiBusConfig, SpiDeviceConfig};
use stampfly_hal::Fault;

use crate::lock;

/// One transaction as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiRecord {
    /// Target device
    pub device: u32,
    /// Command phase
    pub command: u16,
    /// Address phase
    pub address: u64,
    /// Whether the descriptor carried the data inline
    pub inline: bool,
    /// Bytes clocked out (zero padded to the transfer length)
    pub tx: Vec<u8>,
}

#[derive(Debug, Clone)]
struct SimDevice {
    config: SpiDeviceConfig,
    registers: [u8; 128],
    responses: VecDeque<Vec<u8>>,
}

impl SimDevice {
    fn exchange(&mut self, tx: &[u8]) -> Vec<u8> {
        let mut rx = vec![0u8; tx.len()];
        if let Some(response) = self.responses.pop_front() {
            for (dst, src) in rx.iter_mut().zip(response) {
                *dst = src;
            }
            return rx;
        }
        let Some((&first, data)) = tx.split_first() else {
            return rx;
        };
        let start = (first & 0x7F) as usize;
        if first & 0x80 != 0 {
            for (i, byte) in rx.iter_mut().skip(1).enumerate() {
                *byte = self.registers[(start + i) % self.registers.len()];
            }
        } else {
            for (i, &byte) in data.iter().enumerate() {
                self.registers[(start + i) % self.registers.len()] = byte;
            }
        }
        rx
    }
}

#[derive(Debug, Default)]
struct SpiState {
    bus: Option<SpiBusConfig>,
    bus_inits: u32,
    devices: BTreeMap<u32, SimDevice>,
    next_device: u32,
    log: Vec<SpiRecord>,
    fail_next: Option<Fault>,
}

/// Simulated SPI host
#[derive(Debug, Clone, Default)]
pub struct SimSpi {
    state: Arc<Mutex<SpiState>>,
}

impl SimSpi {
    /// Host with no bus claimed
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response for the next transaction on `device`
    pub fn queue_response(&self, device: u32, bytes: &[u8]) {
        let mut state = lock(&self.state);
        if let Some(d) = state.devices.get_mut(&device) {
            d.responses.push_back(bytes.to_vec());
        }
    }

    /// Preload a register of an attached device
    pub fn set_register(&self, device: u32, register: u8, value: u8) {
        let mut state = lock(&self.state);
        if let Some(d) = state.devices.get_mut(&device) {
            d.registers[(register & 0x7F) as usize] = value;
        }
    }

    /// Read back a register of an attached device
    pub fn register(&self, device: u32, register: u8) -> Option<u8> {
        let state = lock(&self.state);
        state
            .devices
            .get(&device)
            .map(|d| d.registers[(register & 0x7F) as usize])
    }

    /// Fail the next transaction with `fault`
    pub fn fail_next(&self, fault: Fault) {
        lock(&self.state).fail_next = Some(fault);
    }

    /// Bus configuration, `None` while the bus is free
    pub fn bus_config(&self) -> Option<SpiBusConfig> {
        lock(&self.state).bus
    }

    /// Number of bus initializations so far
    pub fn bus_inits(&self) -> u32 {
        lock(&self.state).bus_inits
    }

    /// Configurations of the attached devices
    pub fn devices(&self) -> Vec<(u32, SpiDeviceConfig)> {
        lock(&self.state)
            .devices
            .iter()
            .map(|(id, d)| (*id, d.config))
            .collect()
    }

    /// Drain the transaction log
    pub fn take_log(&self) -> Vec<SpiRecord> {
        std::mem::take(&mut lock(&self.state).log)
    }
}

impl SpiBus for SimSpi {
    type Device = u32;

    fn initialize_bus(&mut self, config: &SpiBusConfig) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.bus.is_some() {
            return Err(Fault::InvalidState);
        }
        if !config.has_pins() {
            return Err(Fault::InvalidArgument);
        }
        state.bus = Some(*config);
        state.bus_inits += 1;
        Ok(())
    }

    fn free_bus(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.bus.is_none() || !state.devices.is_empty() {
            return Err(Fault::InvalidState);
        }
        state.bus = None;
        Ok(())
    }

    fn add_device(&mut self, config: &SpiDeviceConfig) -> Result<u32, Fault> {
        let mut state = lock(&self.state);
        if state.bus.is_none() {
            return Err(Fault::InvalidState);
        }
        let id = state.next_device;
        state.next_device += 1;
        state.devices.insert(
            id,
            SimDevice {
                config: *config,
                registers: [0; 128],
                responses: VecDeque::new(),
            },
        );
        Ok(id)
    }

    fn remove_device(&mut self, device: u32) -> Result<(), Fault> {
        lock(&self.state)
            .devices
            .remove(&device)
            .map(|_| ())
            .ok_or(Fault::NotFound)
    }

    fn transmit(&mut self, device: u32, frame: &mut Frame<'_>) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if let Some(fault) = state.fail_next.take() {
            return Err(fault);
        }
        let len = frame.len();
        let mut tx = vec![0u8; len];
        let inline = frame.is_inline();
        match &frame.payload {
            Payload::Inline { tx: data, .. } => {
                let n = len.min(data.len());
                tx[..n].copy_from_slice(&data[..n]);
            }
            Payload::Buffered { tx: data, .. } => {
                let n = len.min(data.len());
                tx[..n].copy_from_slice(&data[..n]);
            }
        }

        let sim = state.devices.get_mut(&device).ok_or(Fault::NotFound)?;
        let rx = sim.exchange(&tx);
        match &mut frame.payload {
            Payload::Inline { rx: out, .. } => {
                let n = out.len().min(rx.len());
                out[..n].copy_from_slice(&rx[..n]);
            }
            Payload::Buffered { rx: out, .. } => {
                let n = out.len().min(rx.len());
                out[..n].copy_from_slice(&rx[..n]);
            }
        }

        state.log.push(SpiRecord {
            device,
            command: frame.command,
            address: frame.address,
            inline,
            tx,
        });
        Ok(())
    }
}
