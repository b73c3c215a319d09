//! UART manager
//!
//! Owns one UART port and its driver event queue. Data transfer requires
//! the manager to be running; line control (baud rate, pattern detection,
//! RS485) only needs the driver installed.
//!
//! The driver queues events (data arrival, breaks, line errors) that are
//! delivered by [`UartManager::poll_events`]. Call it from a dedicated task;
//! the event callback runs there, outside the manager lock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{String, Vec};
use stampfly_hal::uart::{PatternTiming, UartConfig, UartPort};
use stampfly_hal::Ticks;

use crate::error::{Error, Result};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

pub use stampfly_hal::uart::UartEvent;

/// Per-byte wait of [`UartManager::read_line`]
pub const LINE_POLL: Ticks = Ticks::from_ms(10);

/// Driver event handler
pub type EventCallback = fn(UartEvent, usize);

#[derive(Debug, Clone, Copy)]
struct Pattern {
    byte: u8,
    count: u8,
    timing: PatternTiming,
}

struct Inner<U> {
    lifecycle: Lifecycle,
    port: U,
    config: UartConfig,
    installed: bool,
    pattern: Option<Pattern>,
    rs485: bool,
    callback: Option<EventCallback>,
    counts: [u32; UartEvent::COUNT],
}

/// Append received bytes to `line`
///
/// A partial line may stop inside a multi-byte character; that tail is
/// dropped. Any other invalid sequence is rejected.
fn decode_line<const N: usize>(bytes: &[u8], line: &mut String<N>, complete: bool) -> Result<()> {
    let text = match core::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) if !complete && e.error_len().is_none() => {
            core::str::from_utf8(&bytes[..e.valid_up_to()]).map_err(|_| Error::InvalidArgument)?
        }
        Err(_) => return Err(Error::InvalidArgument),
    };
    line.push_str(text).map_err(|_| Error::NoMemory)
}

fn validate(config: &UartConfig) -> Result<()> {
    if config.baudrate == 0 || config.rx_buffer_size == 0 || config.event_queue_size == 0 {
        return Err(Error::InvalidArgument);
    }
    Ok(())
}

impl<U: UartPort> Inner<U> {
    /// Install the driver and restore line modes
    fn install(&mut self) -> Result<()> {
        if self.installed {
            return Ok(());
        }
        validate(&self.config)?;
        self.port.install(&self.config)?;
        self.installed = true;
        if let Some(p) = self.pattern {
            self.port.enable_pattern_detect(p.byte, p.count, p.timing)?;
        }
        if self.rs485 {
            self.port.set_rs485(true)?;
        }
        info!(
            "uart: installed at {} baud (tx {:?}, rx {:?})",
            self.config.baudrate, self.config.tx_pin, self.config.rx_pin
        );
        Ok(())
    }

    fn uninstall(&mut self) -> Result<()> {
        if self.installed {
            self.installed = false;
            self.port.uninstall()?;
        }
        Ok(())
    }

    fn reinstall(&mut self) -> Result<()> {
        self.uninstall()?;
        self.install()
    }

    /// Port handle for line control
    fn port(&mut self) -> Result<&mut U> {
        self.lifecycle.require_ready()?;
        if !self.installed {
            return Err(Error::InvalidState);
        }
        Ok(&mut self.port)
    }

    /// Port handle for data transfer
    fn data_port(&mut self) -> Result<&mut U> {
        self.lifecycle.require_running()?;
        self.port()
    }
}

/// UART port manager
pub struct UartManager<M: RawMutex, U: UartPort> {
    inner: Mutex<M, RefCell<Inner<U>>>,
}

impl<M: RawMutex, U: UartPort> UartManager<M, U> {
    pub const fn new(port: U, config: UartConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("uart"),
                port,
                config,
                installed: false,
                pattern: None,
                rs485: false,
                callback: None,
                counts: [0; UartEvent::COUNT],
            })),
        }
    }

    fn with_port<R>(&self, f: impl FnOnce(&mut U) -> Result<R>) -> Result<R> {
        self.inner.lock(|inner| f(inner.borrow_mut().port()?))
    }

    fn with_data_port<R>(&self, f: impl FnOnce(&mut U) -> Result<R>) -> Result<R> {
        self.inner.lock(|inner| f(inner.borrow_mut().data_port()?))
    }

    /// Replace the configuration, reinstalling the driver if installed
    pub fn set_config(&self, config: UartConfig) -> Result<()> {
        validate(&config)?;
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.config = config;
            if inner.installed {
                inner.reinstall()?;
            }
            Ok(())
        })
    }

    pub fn config(&self) -> UartConfig {
        self.inner.lock(|inner| inner.borrow().config)
    }

    /// Queue bytes for transmission, returning how many were accepted
    pub fn write(&self, data: &[u8], timeout: Ticks) -> Result<usize> {
        self.with_data_port(|port| Ok(port.write(data, timeout)?))
    }

    pub fn write_str(&self, text: &str, timeout: Ticks) -> Result<usize> {
        self.write(text.as_bytes(), timeout)
    }

    /// Read up to `buf.len()` bytes
    pub fn read(&self, buf: &mut [u8], timeout: Ticks) -> Result<usize> {
        self.with_data_port(|port| Ok(port.read(buf, timeout)?))
    }

    /// Read one UTF-8 line into `line`, without its terminator
    ///
    /// Bytes are collected until `\n`; a trailing `\r` is dropped. Returns
    /// `false` if `timeout` passed first, leaving the partial line in
    /// `line`. A line longer than `N` bytes fails with [`Error::NoMemory`]
    /// and one that is not valid UTF-8 with [`Error::InvalidArgument`].
    pub fn read_line<const N: usize>(&self, line: &mut String<N>, timeout: Ticks) -> Result<bool> {
        line.clear();
        let mut bytes: Vec<u8, N> = Vec::new();
        let mut remaining = timeout.0;
        loop {
            let mut byte = [0u8; 1];
            let wait = if timeout.is_forever() {
                LINE_POLL
            } else {
                Ticks(remaining.min(LINE_POLL.0))
            };
            if self.read(&mut byte, wait)? == 1 {
                if byte[0] == b'\n' {
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    decode_line(&bytes, line, true)?;
                    return Ok(true);
                }
                bytes.push(byte[0]).map_err(|_| Error::NoMemory)?;
                continue;
            }
            if timeout.is_forever() {
                continue;
            }
            if remaining == 0 {
                decode_line(&bytes, line, false)?;
                return Ok(false);
            }
            remaining -= wait.0;
        }
    }

    /// Bytes waiting in the RX buffer
    pub fn available(&self) -> Result<usize> {
        self.with_port(|port| Ok(port.available()?))
    }

    /// Discard everything in the RX buffer
    pub fn flush(&self) -> Result<()> {
        self.with_port(|port| Ok(port.flush_input()?))
    }

    pub fn wait_tx_done(&self, timeout: Ticks) -> Result<()> {
        self.with_data_port(|port| Ok(port.wait_tx_done(timeout)?))
    }

    pub fn set_baudrate(&self, baudrate: u32) -> Result<()> {
        if baudrate == 0 {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.port()?.set_baudrate(baudrate)?;
            inner.config.baudrate = baudrate;
            info!("uart: baud rate {}", baudrate);
            Ok(())
        })
    }

    /// Baud rate reported by the peripheral
    pub fn baudrate(&self) -> Result<u32> {
        self.with_port(|port| Ok(port.baudrate()?))
    }

    /// Hold the line low for `bits` bit times
    pub fn send_break(&self, bits: u32) -> Result<()> {
        if bits == 0 {
            return Err(Error::InvalidArgument);
        }
        self.with_data_port(|port| Ok(port.write_with_break(&[], bits)?))
    }

    /// Raise [`UartEvent::PatternDetected`] when `byte` repeats `count` times
    ///
    /// The pattern is restored whenever the driver is reinstalled.
    pub fn set_pattern_detect(&self, byte: u8, count: u8, timing: PatternTiming) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.port()?.enable_pattern_detect(byte, count, timing)?;
            inner.pattern = Some(Pattern {
                byte,
                count,
                timing,
            });
            Ok(())
        })
    }

    pub fn disable_pattern_detect(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.port()?.disable_pattern_detect()?;
            inner.pattern = None;
            Ok(())
        })
    }

    /// Switch RS485 half-duplex mode
    pub fn set_rs485(&self, enable: bool) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.port()?.set_rs485(enable)?;
            inner.rs485 = enable;
            Ok(())
        })
    }

    /// Handler invoked by [`UartManager::poll_events`]
    pub fn set_event_callback(&self, callback: EventCallback) {
        self.inner
            .lock(|inner| inner.borrow_mut().callback = Some(callback));
    }

    pub fn clear_event_callback(&self) {
        self.inner.lock(|inner| inner.borrow_mut().callback = None);
    }

    /// Drain the driver event queue
    ///
    /// Each event is counted and handed to the callback, if any. Returns
    /// the number of events drained.
    pub fn poll_events(&self) -> Result<usize> {
        let mut drained = 0;
        loop {
            let next = self.inner.lock(|inner| {
                let mut guard = inner.borrow_mut();
                let inner = &mut *guard;
                let Some((event, size)) = inner.port()?.next_event() else {
                    return Ok(None);
                };
                let count = &mut inner.counts[event.index()];
                *count = count.wrapping_add(1);
                Ok::<_, Error>(Some((event, size, inner.callback)))
            })?;
            let Some((event, size, callback)) = next else {
                return Ok(drained);
            };
            if event.is_error() {
                warn!("uart: {:?} ({} bytes)", event, size);
            } else {
                trace!("uart: {:?} ({} bytes)", event, size);
            }
            if let Some(callback) = callback {
                callback(event, size);
            }
            drained += 1;
        }
    }

    /// Number of events of one kind seen by [`UartManager::poll_events`]
    pub fn event_count(&self, event: UartEvent) -> u32 {
        self.inner.lock(|inner| inner.borrow().counts[event.index()])
    }

    pub fn reset_event_counts(&self) {
        self.inner
            .lock(|inner| inner.borrow_mut().counts = [0; UartEvent::COUNT]);
    }
}

impl<M: RawMutex, U: UartPort> Peripheral for UartManager<M, U> {
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

    /// Reinstall the driver with the current configuration
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
            if let Err(e) = inner.install() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.inner.lock(|inner| {
            inner.borrow_mut().lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    /// Reinstall the driver with default line modes
    ///
    /// Buffered data, queued events, the pattern, RS485 mode, the event
    /// callback and the counters are all dropped.
    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let released = inner.uninstall();
            inner.pattern = None;
            inner.rs485 = false;
            inner.callback = None;
            inner.counts = [0; UartEvent::COUNT];
            if let Err(e) = released.and_then(|()| inner.install()) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, U: UartPort> Drop for UartManager<M, U> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = inner.borrow_mut().uninstall();
        });
    }
}

impl<M: RawMutex, U: UartPort> embedded_io::ErrorType for &UartManager<M, U> {
    type Error = Error;
}

/// Blocking reads; waits until at least one byte arrives
impl<M: RawMutex, U: UartPort> embedded_io::Read for &UartManager<M, U> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        UartManager::read(*self, buf, Ticks::FOREVER)
    }
}

impl<M: RawMutex, U: UartPort> embedded_io::Write for &UartManager<M, U> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        UartManager::write(*self, buf, Ticks::FOREVER)
    }

    fn flush(&mut self) -> Result<()> {
        UartManager::wait_tx_done(*self, Ticks::FOREVER)
    }
}
