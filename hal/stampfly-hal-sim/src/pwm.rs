//! Simulated LEDC block
//!
//! Fades complete instantly: the duty jumps to the target when the fade
//! starts.

use std::sync::{Arc, Mutex};

use stampfly_hal::pwm::{
    FadeConfig, PwmChannelConfig, PwmDriver, PwmTimerConfig, SpeedMode, MAX_CHANNELS,
    MAX_RESOLUTION_BITS, MAX_TIMERS,
};
use stampfly_hal::Fault;

use crate::lock;

#[derive(Debug, Clone, Copy)]
struct SimChannel {
    config: PwmChannelConfig,
    duty: u32,
    running: bool,
    idle_high: bool,
}

#[derive(Debug, Default)]
struct PwmState {
    timers: [Option<PwmTimerConfig>; MAX_TIMERS],
    channels: [Option<SimChannel>; MAX_CHANNELS],
    fade_installed: bool,
    fade_installs: u32,
    fades: u32,
}

impl PwmState {
    fn channel(&mut self, channel: u8) -> Result<&mut SimChannel, Fault> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(Fault::InvalidArgument)?
            .as_mut()
            .ok_or(Fault::InvalidState)
    }
}

/// Simulated LEDC driver
#[derive(Debug, Clone, Default)]
pub struct SimPwm {
    state: Arc<Mutex<PwmState>>,
}

impl SimPwm {
    /// Nothing configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Duty latched on a channel, `None` if unconfigured
    pub fn output_duty(&self, channel: u8) -> Option<u32> {
        let state = lock(&self.state);
        state
            .channels
            .get(channel as usize)
            .and_then(|c| c.as_ref())
            .map(|c| c.duty)
    }

    /// Configuration last applied to a channel
    pub fn channel_config(&self, channel: u8) -> Option<PwmChannelConfig> {
        let state = lock(&self.state);
        state
            .channels
            .get(channel as usize)
            .and_then(|c| c.as_ref())
            .map(|c| c.config)
    }

    /// Check whether a channel is generating a waveform
    pub fn is_running(&self, channel: u8) -> bool {
        let state = lock(&self.state);
        state
            .channels
            .get(channel as usize)
            .and_then(|c| c.as_ref())
            .is_some_and(|c| c.running)
    }

    /// Idle level of a stopped channel
    pub fn idle_level(&self, channel: u8) -> Option<bool> {
        let state = lock(&self.state);
        state
            .channels
            .get(channel as usize)
            .and_then(|c| c.as_ref())
            .filter(|c| !c.running)
            .map(|c| c.idle_high)
    }

    /// Number of fade service installs
    pub fn fade_installs(&self) -> u32 {
        lock(&self.state).fade_installs
    }

    /// Number of fades started
    pub fn fades(&self) -> u32 {
        lock(&self.state).fades
    }
}

impl PwmDriver for SimPwm {
    fn configure_timer(&mut self, config: &PwmTimerConfig) -> Result<(), Fault> {
        if config.resolution_bits == 0 || config.resolution_bits > MAX_RESOLUTION_BITS {
            return Err(Fault::InvalidArgument);
        }
        if config.frequency_hz == 0 {
            return Err(Fault::InvalidArgument);
        }
        let mut state = lock(&self.state);
        let slot = state
            .timers
            .get_mut(config.timer as usize)
            .ok_or(Fault::InvalidArgument)?;
        *slot = Some(*config);
        Ok(())
    }

    fn configure_channel(&mut self, config: &PwmChannelConfig) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        let timer_ready = state
            .timers
            .get(config.timer as usize)
            .is_some_and(|t| t.is_some());
        if !timer_ready {
            return Err(Fault::InvalidState);
        }
        let slot = state
            .channels
            .get_mut(config.channel as usize)
            .ok_or(Fault::InvalidArgument)?;
        *slot = Some(SimChannel {
            config: *config,
            duty: config.duty,
            running: true,
            idle_high: false,
        });
        Ok(())
    }

    fn set_duty(&mut self, _mode: SpeedMode, channel: u8, duty: u32) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        let sim = state.channel(channel)?;
        sim.duty = duty;
        sim.running = true;
        Ok(())
    }

    fn duty(&self, _mode: SpeedMode, channel: u8) -> u32 {
        self.output_duty(channel).unwrap_or(0)
    }

    fn set_frequency(
        &mut self,
        _mode: SpeedMode,
        timer: u8,
        frequency_hz: u32,
    ) -> Result<(), Fault> {
        if frequency_hz == 0 {
            return Err(Fault::InvalidArgument);
        }
        let mut state = lock(&self.state);
        let config = state
            .timers
            .get_mut(timer as usize)
            .ok_or(Fault::InvalidArgument)?
            .as_mut()
            .ok_or(Fault::InvalidState)?;
        config.frequency_hz = frequency_hz;
        Ok(())
    }

    fn frequency(&self, _mode: SpeedMode, timer: u8) -> u32 {
        let state = lock(&self.state);
        state
            .timers
            .get(timer as usize)
            .and_then(|t| t.as_ref())
            .map_or(0, |t| t.frequency_hz)
    }

    fn install_fade_service(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.fade_installed {
            return Err(Fault::InvalidState);
        }
        state.fade_installed = true;
        state.fade_installs += 1;
        Ok(())
    }

    fn uninstall_fade_service(&mut self) {
        lock(&self.state).fade_installed = false;
    }

    fn start_fade(
        &mut self,
        _mode: SpeedMode,
        channel: u8,
        fade: &FadeConfig,
    ) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if !state.fade_installed {
            return Err(Fault::InvalidState);
        }
        let sim = state.channel(channel)?;
        sim.duty = fade.target_duty;
        sim.running = true;
        state.fades += 1;
        Ok(())
    }

    fn stop_fade(&mut self, _mode: SpeedMode, channel: u8) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if !state.fade_installed {
            return Err(Fault::InvalidState);
        }
        state.channel(channel).map(|_| ())
    }

    fn stop(&mut self, _mode: SpeedMode, channel: u8, idle_high: bool) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        let sim = state.channel(channel)?;
        sim.running = false;
        sim.idle_high = idle_high;
        Ok(())
    }
}
