//! Simulated UART port
//!
//! Received bytes are injected by the test (or looped back from TX) and
//! raise the same events the real driver queues.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use stampfly_hal::uart::{PatternTiming, UartConfig, UartEvent, UartPort};
use stampfly_hal::{Fault, Ticks};

use crate::lock;

#[derive(Debug, Default)]
struct UartState {
    config: Option<UartConfig>,
    baudrate: u32,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    events: VecDeque<(UartEvent, usize)>,
    loopback: bool,
    pattern: Option<(u8, u8)>,
    rs485: bool,
    breaks: u32,
}

impl UartState {
    fn receive(&mut self, bytes: &[u8]) {
        let Some(config) = self.config else {
            return;
        };
        let room = config.rx_buffer_size.saturating_sub(self.rx.len());
        let accepted = bytes.len().min(room);
        self.rx.extend(&bytes[..accepted]);
        if accepted > 0 {
            self.push_event(UartEvent::Data, accepted);
        }
        if accepted < bytes.len() {
            self.push_event(UartEvent::BufferFull, bytes.len() - accepted);
        }
        if let Some((pattern, count)) = self.pattern {
            let run = bytes.iter().filter(|&&b| b == pattern).count();
            if count > 0 && run >= count as usize {
                self.push_event(UartEvent::PatternDetected, run);
            }
        }
    }

    fn push_event(&mut self, event: UartEvent, size: usize) {
        let depth = self.config.map_or(0, |c| c.event_queue_size as usize);
        if self.events.len() < depth {
            self.events.push_back((event, size));
        }
    }
}

/// Simulated UART
#[derive(Debug, Clone, Default)]
pub struct SimUart {
    state: Arc<Mutex<UartState>>,
}

impl SimUart {
    /// Port with the driver not installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Port whose TX is wired to its own RX
    pub fn loopback() -> Self {
        let sim = Self::default();
        lock(&sim.state).loopback = true;
        sim
    }

    /// Deliver bytes to the RX side
    pub fn inject_rx(&self, bytes: &[u8]) {
        lock(&self.state).receive(bytes);
    }

    /// Queue a line error event
    pub fn inject_event(&self, event: UartEvent, size: usize) {
        lock(&self.state).push_event(event, size);
    }

    /// Drain everything written so far
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut lock(&self.state).tx)
    }

    /// Number of breaks sent
    pub fn breaks(&self) -> u32 {
        lock(&self.state).breaks
    }

    /// Check if RS485 half-duplex mode is active
    pub fn rs485(&self) -> bool {
        lock(&self.state).rs485
    }

    /// Installed configuration
    pub fn config(&self) -> Option<UartConfig> {
        lock(&self.state).config
    }
}

fn installed(state: &UartState) -> Result<(), Fault> {
    if state.config.is_some() {
        Ok(())
    } else {
        Err(Fault::InvalidState)
    }
}

impl UartPort for SimUart {
    fn install(&mut self, config: &UartConfig) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.config.is_some() {
            return Err(Fault::InvalidState);
        }
        if config.baudrate == 0 || config.rx_buffer_size == 0 {
            return Err(Fault::InvalidArgument);
        }
        state.config = Some(*config);
        state.baudrate = config.baudrate;
        Ok(())
    }

    fn uninstall(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        state.config = None;
        state.rx.clear();
        state.events.clear();
        state.pattern = None;
        state.rs485 = false;
        Ok(())
    }

    fn write(&mut self, data: &[u8], _timeout: Ticks) -> Result<usize, Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        state.tx.extend_from_slice(data);
        if state.loopback {
            state.receive(data);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Ticks) -> Result<usize, Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        let mut n = 0;
        for slot in buf.iter_mut() {
            let Some(byte) = state.rx.pop_front() else {
                break;
            };
            *slot = byte;
            n += 1;
        }
        Ok(n)
    }

    fn available(&self) -> Result<usize, Fault> {
        let state = lock(&self.state);
        installed(&state)?;
        Ok(state.rx.len())
    }

    fn flush_input(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        state.rx.clear();
        Ok(())
    }

    fn wait_tx_done(&mut self, _timeout: Ticks) -> Result<(), Fault> {
        installed(&lock(&self.state))
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<(), Fault> {
        if baudrate == 0 {
            return Err(Fault::InvalidArgument);
        }
        let mut state = lock(&self.state);
        installed(&state)?;
        state.baudrate = baudrate;
        Ok(())
    }

    fn baudrate(&self) -> Result<u32, Fault> {
        let state = lock(&self.state);
        installed(&state)?;
        Ok(state.baudrate)
    }

    fn write_with_break(&mut self, data: &[u8], _break_bits: u32) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        state.tx.extend_from_slice(data);
        state.breaks += 1;
        state.push_event(UartEvent::DataBreak, data.len());
        if state.loopback {
            state.receive(data);
            state.push_event(UartEvent::Break, 0);
        }
        Ok(())
    }

    fn enable_pattern_detect(
        &mut self,
        pattern: u8,
        count: u8,
        _timing: PatternTiming,
    ) -> Result<(), Fault> {
        if count == 0 {
            return Err(Fault::InvalidArgument);
        }
        let mut state = lock(&self.state);
        installed(&state)?;
        state.pattern = Some((pattern, count));
        Ok(())
    }

    fn disable_pattern_detect(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        state.pattern = None;
        Ok(())
    }

    fn set_rs485(&mut self, enable: bool) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        installed(&state)?;
        state.rs485 = enable;
        Ok(())
    }

    fn next_event(&mut self) -> Option<(UartEvent, usize)> {
        lock(&self.state).events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_echoes() {
        let mut uart = SimUart::loopback();
        uart.install(&UartConfig::default()).unwrap();
        uart.write(b"ok", Ticks(10)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(uart.read(&mut buf, Ticks(10)), Ok(2));
        assert_eq!(&buf[..2], b"ok");
        assert_eq!(uart.next_event(), Some((UartEvent::Data, 2)));
    }

    #[test]
    fn test_overflow_reports_buffer_full() {
        let mut uart = SimUart::new();
        uart.install(&UartConfig {
            rx_buffer_size: 4,
            ..Default::default()
        })
        .unwrap();
        uart.inject_rx(b"abcdef");
        assert_eq!(uart.available(), Ok(4));
        assert_eq!(uart.next_event(), Some((UartEvent::Data, 4)));
        assert_eq!(uart.next_event(), Some((UartEvent::BufferFull, 2)));
    }
}
