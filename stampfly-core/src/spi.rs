//! SPI master manager
//!
//! Owns one SPI host and the devices attached to it. Callers address
//! devices through [`DeviceHandle`]s issued by the manager, which stay
//! valid when [`Peripheral::configure`] rebuilds the bus and re-attaches
//! every device.
//!
//! Register helpers use the common sensor framing: bit 7 of the first byte
//! selects a read, and a read clocks one address byte before the data.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use stampfly_hal::spi::{
    Frame, Payload, SpiBus, SpiBusConfig, SpiDeviceConfig, INLINE_PAYLOAD_LEN,
};

use crate::error::{Error, Result};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

/// Maximum number of devices per bus
pub const MAX_DEVICES: usize = 8;

/// Largest register burst handled by the register helpers
pub const MAX_REGISTER_BURST: usize = 64;

/// Read flag in the register address byte
const READ_FLAG: u8 = 0x80;

/// Opaque handle of an attached device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceHandle(u16);

/// One full-duplex transfer
///
/// The data phase is as long as the longer of `tx` and `rx`. A shorter
/// `tx` is padded with zeros; a shorter `rx` drops the tail.
#[derive(Debug)]
pub struct Transaction<'a> {
    /// Command phase value (used when the device has command bits)
    pub command: u16,
    /// Address phase value (used when the device has address bits)
    pub address: u64,
    pub tx: &'a [u8],
    pub rx: &'a mut [u8],
}

impl<'a> Transaction<'a> {
    /// Write-only transfer
    pub fn write(tx: &'a [u8]) -> Self {
        Self {
            command: 0,
            address: 0,
            tx,
            rx: &mut [],
        }
    }

    /// Read-only transfer
    pub fn read(rx: &'a mut [u8]) -> Self {
        Self {
            command: 0,
            address: 0,
            tx: &[],
            rx,
        }
    }

    /// Simultaneous write and read
    pub fn transfer(tx: &'a [u8], rx: &'a mut [u8]) -> Self {
        Self {
            command: 0,
            address: 0,
            tx,
            rx,
        }
    }

    /// Data phase length in bytes
    pub fn len(&self) -> usize {
        self.tx.len().max(self.rx.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Attached<D> {
    handle: DeviceHandle,
    config: SpiDeviceConfig,
    /// Driver handle while attached to the bus
    device: Option<D>,
}

struct Inner<B: SpiBus> {
    lifecycle: Lifecycle,
    bus: B,
    config: SpiBusConfig,
    bus_ready: bool,
    devices: Vec<Attached<B::Device>, MAX_DEVICES>,
    next_handle: u16,
}

impl<B: SpiBus> Inner<B> {
    fn bring_up(&mut self) -> Result<()> {
        if !self.bus_ready {
            self.bus.initialize_bus(&self.config)?;
            self.bus_ready = true;
            info!(
                "spi{}: bus up, max transfer {} bytes",
                self.config.host,
                self.config.max_transfer_size
            );
        }
        for attached in self.devices.iter_mut() {
            if attached.device.is_none() {
                attached.device = Some(self.bus.add_device(&attached.config)?);
            }
        }
        Ok(())
    }

    /// Detach every device and free the bus; stored devices are kept
    fn tear_down(&mut self) -> Result<()> {
        let mut first_error = None;
        for attached in self.devices.iter_mut() {
            if let Some(device) = attached.device.take() {
                if let Err(fault) = self.bus.remove_device(device) {
                    first_error.get_or_insert(Error::from(fault));
                }
            }
        }
        if self.bus_ready {
            self.bus_ready = false;
            if let Err(fault) = self.bus.free_bus() {
                first_error.get_or_insert(Error::from(fault));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn device(&self, handle: DeviceHandle) -> Result<B::Device> {
        self.lifecycle.require_running()?;
        let attached = self
            .devices
            .iter()
            .find(|a| a.handle == handle)
            .ok_or(Error::NotFound)?;
        attached.device.ok_or(Error::InvalidState)
    }

    fn next_handle(&mut self) -> DeviceHandle {
        loop {
            let handle = DeviceHandle(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1);
            if !self.devices.iter().any(|a| a.handle == handle) {
                return handle;
            }
        }
    }
}

/// SPI host manager
pub struct SpiManager<M: RawMutex, B: SpiBus> {
    inner: Mutex<M, RefCell<Inner<B>>>,
}

impl<M: RawMutex, B: SpiBus> SpiManager<M, B> {
    pub const fn new(bus: B, config: SpiBusConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("spi"),
                bus,
                config,
                bus_ready: false,
                devices: Vec::new(),
                next_handle: 0,
            })),
        }
    }

    /// Attach a device to the bus
    pub fn add_device(&self, config: SpiDeviceConfig) -> Result<DeviceHandle> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            if !inner.bus_ready {
                return Err(Error::InvalidState);
            }
            if inner.devices.is_full() {
                return Err(Error::NoMemory);
            }
            let device = inner.bus.add_device(&config)?;
            let handle = inner.next_handle();
            let attached = Attached {
                handle,
                config,
                device: Some(device),
            };
            if inner.devices.push(attached).is_err() {
                let _ = inner.bus.remove_device(device);
                return Err(Error::NoMemory);
            }
            info!(
                "spi: device {} attached (cs {:?}, {} Hz)",
                handle.0,
                config.cs_pin,
                config.frequency
            );
            Ok(handle)
        })
    }

    /// Detach a device and invalidate its handle
    pub fn remove_device(&self, handle: DeviceHandle) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let index = inner
                .devices
                .iter()
                .position(|a| a.handle == handle)
                .ok_or(Error::NotFound)?;
            if let Some(device) = inner.devices[index].device {
                inner.bus.remove_device(device)?;
            }
            inner.devices.swap_remove(index);
            Ok(())
        })
    }

    pub fn device_count(&self) -> usize {
        self.inner.lock(|inner| inner.borrow().devices.len())
    }

    /// Stored configuration of a device
    pub fn device_config(&self, handle: DeviceHandle) -> Result<SpiDeviceConfig> {
        self.inner.lock(|inner| {
            inner
                .borrow()
                .devices
                .iter()
                .find(|a| a.handle == handle)
                .map(|a| a.config)
                .ok_or(Error::NotFound)
        })
    }

    pub fn bus_config(&self) -> SpiBusConfig {
        self.inner.lock(|inner| inner.borrow().config)
    }

    /// Run one transaction
    ///
    /// Transfers of up to four bytes travel inline in the descriptor;
    /// longer ones use the caller's buffers directly.
    pub fn transmit(&self, handle: DeviceHandle, txn: Transaction<'_>) -> Result<()> {
        let len = txn.len();
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let device = inner.device(handle)?;
            if len > inner.config.max_transfer_size {
                return Err(Error::InvalidArgument);
            }

            if len <= INLINE_PAYLOAD_LEN {
                let mut tx = [0u8; INLINE_PAYLOAD_LEN];
                tx[..txn.tx.len()].copy_from_slice(txn.tx);
                let mut frame = Frame {
                    command: txn.command,
                    address: txn.address,
                    length_bits: len * 8,
                    payload: Payload::Inline {
                        tx,
                        rx: [0; INLINE_PAYLOAD_LEN],
                    },
                };
                inner.bus.transmit(device, &mut frame)?;
                if let Payload::Inline { rx, .. } = frame.payload {
                    let n = txn.rx.len();
                    txn.rx.copy_from_slice(&rx[..n]);
                }
            } else {
                let mut frame = Frame {
                    command: txn.command,
                    address: txn.address,
                    length_bits: len * 8,
                    payload: Payload::Buffered {
                        tx: txn.tx,
                        rx: txn.rx,
                    },
                };
                inner.bus.transmit(device, &mut frame)?;
            }
            Ok(())
        })
    }

    pub fn write(&self, handle: DeviceHandle, data: &[u8]) -> Result<()> {
        self.transmit(handle, Transaction::write(data))
    }

    pub fn read(&self, handle: DeviceHandle, buf: &mut [u8]) -> Result<()> {
        self.transmit(handle, Transaction::read(buf))
    }

    /// Write consecutive registers starting at `address`
    pub fn write_register(&self, handle: DeviceHandle, address: u8, data: &[u8]) -> Result<()> {
        let mut frame: Vec<u8, { MAX_REGISTER_BURST + 1 }> = Vec::new();
        frame
            .push(address & !READ_FLAG)
            .map_err(|_| Error::NoMemory)?;
        frame
            .extend_from_slice(data)
            .map_err(|_| Error::InvalidArgument)?;
        self.write(handle, &frame)
    }

    /// Read consecutive registers starting at `address`
    ///
    /// The byte clocked in during the address phase is discarded.
    pub fn read_register(&self, handle: DeviceHandle, address: u8, buf: &mut [u8]) -> Result<()> {
        if buf.len() > MAX_REGISTER_BURST {
            return Err(Error::InvalidArgument);
        }
        let len = buf.len() + 1;
        let tx = [address | READ_FLAG];
        let mut rx = [0u8; MAX_REGISTER_BURST + 1];
        self.transmit(handle, Transaction::transfer(&tx, &mut rx[..len]))?;
        buf.copy_from_slice(&rx[1..len]);
        Ok(())
    }

    pub fn write_register8(&self, handle: DeviceHandle, address: u8, value: u8) -> Result<()> {
        self.write_register(handle, address, &[value])
    }

    pub fn read_register8(&self, handle: DeviceHandle, address: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_register(handle, address, &mut buf)?;
        Ok(buf[0])
    }
}

impl<M: RawMutex, B: SpiBus> Peripheral for SpiManager<M, B> {
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            if let Err(e) = inner.bring_up() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    /// Rebuild the bus from the stored configuration
    ///
    /// Every stored device is re-attached, so handles issued earlier stay
    /// valid.
    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Configure)?;
            let rebuilt = inner.tear_down().and_then(|()| inner.bring_up());
            if let Err(e) = rebuilt {
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
            if let Err(e) = inner.bring_up() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    /// Reject new transactions; devices stay attached
    fn stop(&self) -> Result<()> {
        self.inner.lock(|inner| {
            inner.borrow_mut().lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    /// Remove every device and bring the bus back up empty
    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let released = inner.tear_down();
            inner.devices.clear();
            if let Err(e) = released.and_then(|()| inner.bring_up()) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, B: SpiBus> Drop for SpiManager<M, B> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = inner.borrow_mut().tear_down();
        });
    }
}
