//! LEDC PWM manager
//!
//! Timers set frequency and duty resolution, channels bind an output pin
//! to a timer. The manager remembers every timer and channel it configured
//! so [`Peripheral::configure`] can replay them and
//! [`PwmManager::resume_output`] can restore the last duty.
//!
//! Configuration needs the manager ready; driving outputs (duty, fades,
//! stop and resume) needs it running.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use stampfly_hal::pwm::{
    FadeConfig, PwmChannelConfig, PwmDriver, PwmTimerConfig, MAX_CHANNELS, MAX_RESOLUTION_BITS,
    MAX_TIMERS,
};

use crate::error::{Error, Result};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

pub use stampfly_hal::pwm::{FadeMode, SpeedMode};

/// Largest duty value at a resolution
pub const fn max_duty(resolution_bits: u8) -> u32 {
    if resolution_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << resolution_bits) - 1
    }
}

/// Duty for a percentage, clamped to 0..=100 and truncated
pub fn percent_to_duty(percent: f32, resolution_bits: u8) -> u32 {
    let percent = percent.clamp(0.0, 100.0);
    (percent / 100.0 * max_duty(resolution_bits) as f32) as u32
}

/// Percentage of full scale for a duty
pub fn duty_to_percent(duty: u32, resolution_bits: u8) -> f32 {
    let max = max_duty(resolution_bits);
    if max == 0 {
        return 0.0;
    }
    duty as f32 / max as f32 * 100.0
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    config: PwmChannelConfig,
    /// Last duty written, restored by resume
    duty: u32,
    running: bool,
    /// Parked by a lifecycle stop rather than by the caller
    parked: bool,
}

struct Inner<P> {
    lifecycle: Lifecycle,
    driver: P,
    timers: [Option<PwmTimerConfig>; MAX_TIMERS],
    channels: [Option<Channel>; MAX_CHANNELS],
    fade_installed: bool,
}

impl<P: PwmDriver> Inner<P> {
    fn timer(&self, timer: u8) -> Result<PwmTimerConfig> {
        self.timers
            .get(timer as usize)
            .copied()
            .flatten()
            .ok_or(Error::InvalidArgument)
    }

    fn channel(&self, channel: u8) -> Result<Channel> {
        self.channels
            .get(channel as usize)
            .copied()
            .flatten()
            .ok_or(Error::InvalidArgument)
    }

    fn channel_mut(&mut self, channel: u8) -> Option<&mut Channel> {
        self.channels.get_mut(channel as usize)?.as_mut()
    }

    /// Resolution of the timer driving a channel
    fn resolution(&self, channel: &Channel) -> Result<u8> {
        Ok(self.timer(channel.config.timer)?.resolution_bits)
    }

    fn write_duty(&mut self, channel: u8, duty: u32) -> Result<()> {
        let state = self.channel(channel)?;
        if duty > max_duty(self.resolution(&state)?) {
            return Err(Error::InvalidArgument);
        }
        self.driver
            .set_duty(state.config.speed_mode, channel, duty)?;
        if let Some(stored) = self.channel_mut(channel) {
            stored.duty = duty;
            stored.running = true;
            stored.parked = false;
        }
        Ok(())
    }

    fn install_fade(&mut self) -> Result<()> {
        if !self.fade_installed {
            self.driver.install_fade_service()?;
            self.fade_installed = true;
            debug!("pwm: fade service installed");
        }
        Ok(())
    }

    /// Replay every stored timer and channel
    fn reapply(&mut self) -> Result<()> {
        for config in self.timers.iter().flatten() {
            self.driver.configure_timer(config)?;
        }
        for channel in self.channels.iter().flatten() {
            let config = PwmChannelConfig {
                duty: channel.duty,
                ..channel.config
            };
            self.driver.configure_channel(&config)?;
            if !channel.running {
                self.driver
                    .stop(config.speed_mode, config.channel, false)?;
            }
        }
        Ok(())
    }

    /// Park every running output low
    fn park_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for slot in self.channels.iter_mut() {
            let Some(channel) = slot.as_mut().filter(|c| c.running) else {
                continue;
            };
            let config = channel.config;
            match self.driver.stop(config.speed_mode, config.channel, false) {
                Ok(()) => {
                    channel.running = false;
                    channel.parked = true;
                }
                Err(fault) => {
                    warn!("pwm: parking channel {} failed: {}", config.channel, fault);
                    first_error.get_or_insert(Error::from(fault));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Resume outputs parked by [`Inner::park_all`]
    fn unpark_all(&mut self) -> Result<()> {
        for index in 0..MAX_CHANNELS {
            let Some(channel) = self.channels[index].filter(|c| c.parked) else {
                continue;
            };
            self.write_duty(channel.config.channel, channel.duty)?;
        }
        Ok(())
    }

    /// Park outputs, remove the fade service and forget all configuration
    fn release(&mut self) -> Result<()> {
        let parked = self.park_all();
        if self.fade_installed {
            self.driver.uninstall_fade_service();
            self.fade_installed = false;
        }
        self.timers = [None; MAX_TIMERS];
        self.channels = [None; MAX_CHANNELS];
        parked
    }
}

/// LEDC PWM manager
pub struct PwmManager<M: RawMutex, P: PwmDriver> {
    inner: Mutex<M, RefCell<Inner<P>>>,
}

impl<M: RawMutex, P: PwmDriver> PwmManager<M, P> {
    pub const fn new(driver: P) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("pwm"),
                driver,
                timers: [None; MAX_TIMERS],
                channels: [None; MAX_CHANNELS],
                fade_installed: false,
            })),
        }
    }

    /// Configure a timer
    ///
    /// Resolution must be 1..=20 bits and the frequency non-zero.
    pub fn configure_timer(&self, config: PwmTimerConfig) -> Result<()> {
        if config.resolution_bits == 0
            || config.resolution_bits > MAX_RESOLUTION_BITS
            || config.frequency_hz == 0
            || config.timer as usize >= MAX_TIMERS
        {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            inner.driver.configure_timer(&config)?;
            inner.timers[config.timer as usize] = Some(config);
            info!(
                "pwm: timer {} at {} Hz, {} bit",
                config.timer, config.frequency_hz, config.resolution_bits
            );
            Ok(())
        })
    }

    /// Configure a channel on an already configured timer
    pub fn configure_channel(&self, config: PwmChannelConfig) -> Result<()> {
        if config.channel as usize >= MAX_CHANNELS {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_ready()?;
            let timer = inner.timer(config.timer).map_err(|_| Error::InvalidState)?;
            if config.duty > max_duty(timer.resolution_bits) {
                return Err(Error::InvalidArgument);
            }
            inner.driver.configure_channel(&config)?;
            inner.channels[config.channel as usize] = Some(Channel {
                config,
                duty: config.duty,
                running: true,
                parked: false,
            });
            info!(
                "pwm: channel {} on gpio {} via timer {}",
                config.channel, config.gpio, config.timer
            );
            Ok(())
        })
    }

    /// Set and latch a channel duty
    pub fn set_duty(&self, channel: u8, duty: u32) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            inner.write_duty(channel, duty)
        })
    }

    /// Duty currently latched by the hardware
    pub fn duty(&self, channel: u8) -> Result<u32> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            let state = inner.channel(channel)?;
            Ok(inner.driver.duty(state.config.speed_mode, channel))
        })
    }

    /// Set a channel duty as a percentage of full scale
    pub fn set_duty_percent(&self, channel: u8, percent: f32) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            let state = inner.channel(channel)?;
            let duty = percent_to_duty(percent, inner.resolution(&state)?);
            inner.write_duty(channel, duty)
        })
    }

    pub fn duty_percent(&self, channel: u8) -> Result<f32> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            let state = inner.channel(channel)?;
            let duty = inner.driver.duty(state.config.speed_mode, channel);
            Ok(duty_to_percent(duty, inner.resolution(&state)?))
        })
    }

    /// Change a timer frequency, affecting every channel it drives
    pub fn set_frequency(&self, timer: u8, frequency_hz: u32) -> Result<()> {
        if frequency_hz == 0 {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            let config = inner.timer(timer)?;
            inner
                .driver
                .set_frequency(config.speed_mode, timer, frequency_hz)?;
            inner.timers[timer as usize] = Some(PwmTimerConfig {
                frequency_hz,
                ..config
            });
            info!("pwm: timer {} now {} Hz", timer, frequency_hz);
            Ok(())
        })
    }

    pub fn frequency(&self, timer: u8) -> Result<u32> {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            inner.lifecycle.require_ready()?;
            let config = inner.timer(timer)?;
            Ok(inner.driver.frequency(config.speed_mode, timer))
        })
    }

    /// Ramp a channel to a new duty
    ///
    /// The hardware fade service is installed on first use and kept until
    /// reset.
    pub fn start_fade(&self, channel: u8, fade: FadeConfig) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            let state = inner.channel(channel)?;
            if fade.target_duty > max_duty(inner.resolution(&state)?) {
                return Err(Error::InvalidArgument);
            }
            inner.install_fade()?;
            inner
                .driver
                .start_fade(state.config.speed_mode, channel, &fade)?;
            if let Some(stored) = inner.channel_mut(channel) {
                stored.duty = fade.target_duty;
                stored.running = true;
                stored.parked = false;
            }
            debug!(
                "pwm: channel {} fading to {} over {} ms",
                channel, fade.target_duty, fade.time_ms
            );
            Ok(())
        })
    }

    /// Abort a running fade, leaving the duty where it is
    pub fn stop_fade(&self, channel: u8) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            let state = inner.channel(channel)?;
            if !inner.fade_installed {
                return Err(Error::InvalidState);
            }
            inner.driver.stop_fade(state.config.speed_mode, channel)?;
            let duty = inner.driver.duty(state.config.speed_mode, channel);
            if let Some(stored) = inner.channel_mut(channel) {
                stored.duty = duty;
            }
            Ok(())
        })
    }

    /// Stop a channel and hold its pin at the idle level
    pub fn stop_output(&self, channel: u8, idle_high: bool) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            let state = inner.channel(channel)?;
            inner
                .driver
                .stop(state.config.speed_mode, channel, idle_high)?;
            if let Some(stored) = inner.channel_mut(channel) {
                stored.running = false;
                stored.parked = false;
            }
            Ok(())
        })
    }

    /// Restart a stopped channel at its last duty
    pub fn resume_output(&self, channel: u8) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.require_running()?;
            let state = inner.channel(channel)?;
            inner.write_duty(channel, state.duty)
        })
    }

    /// Check if a channel is generating a waveform
    pub fn is_output_running(&self, channel: u8) -> Result<bool> {
        self.inner
            .lock(|inner| Ok(inner.borrow().channel(channel)?.running))
    }

    pub fn timer_config(&self, timer: u8) -> Result<PwmTimerConfig> {
        self.inner.lock(|inner| inner.borrow().timer(timer))
    }

    pub fn channel_config(&self, channel: u8) -> Result<PwmChannelConfig> {
        self.inner
            .lock(|inner| Ok(inner.borrow().channel(channel)?.config))
    }
}

impl<M: RawMutex, P: PwmDriver> Peripheral for PwmManager<M, P> {
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    /// Replay every configured timer and channel
    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Configure)?;
            if let Err(e) = inner.reapply() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Configure)?;
            Ok(())
        })
    }

    /// Resume the outputs parked by the last stop
    fn start(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Start)?;
            if let Err(e) = inner.unpark_all() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Start)?;
            Ok(())
        })
    }

    /// Park every running output low
    fn stop(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Stop)?;
            if let Err(e) = inner.park_all() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Stop)?;
            Ok(())
        })
    }

    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(e) = inner.release() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, P: PwmDriver> Drop for PwmManager<M, P> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if inner.fade_installed {
                inner.driver.uninstall_fade_service();
                inner.fade_installed = false;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use proptest::prelude::*;
    use stampfly_hal_sim::SimPwm;

    use crate::lifecycle::State;

    type Manager = PwmManager<CriticalSectionRawMutex, SimPwm>;

    const MOTOR_TIMER: PwmTimerConfig = PwmTimerConfig {
        timer: 0,
        speed_mode: SpeedMode::LowSpeed,
        resolution_bits: 8,
        frequency_hz: 150_000,
    };

    fn motor(channel: u8, gpio: u8) -> PwmChannelConfig {
        PwmChannelConfig {
            channel,
            timer: 0,
            speed_mode: SpeedMode::LowSpeed,
            gpio,
            duty: 0,
            hpoint: 0,
        }
    }

    fn running(sim: &SimPwm) -> Manager {
        let manager = Manager::new(sim.clone());
        manager.initialize().unwrap();
        manager.configure_timer(MOTOR_TIMER).unwrap();
        manager.configure_channel(motor(0, 5)).unwrap();
        manager.start().unwrap();
        manager
    }

    #[test]
    fn test_duty_mapping() {
        assert_eq!(max_duty(8), 255);
        assert_eq!(max_duty(13), 8191);
        assert_eq!(max_duty(20), 1_048_575);
        assert_eq!(percent_to_duty(50.0, 13), 4095);
        assert_eq!(percent_to_duty(100.0, 13), 8191);
        assert_eq!(percent_to_duty(150.0, 8), 255);
        assert_eq!(percent_to_duty(-5.0, 8), 0);
        assert_eq!(duty_to_percent(8191, 13), 100.0);
        assert_eq!(duty_to_percent(0, 13), 0.0);
        assert_eq!(duty_to_percent(5, 0), 0.0);
    }

    #[test]
    fn test_operations_before_initialize() {
        let manager = Manager::new(SimPwm::new());
        assert_eq!(manager.configure_timer(MOTOR_TIMER), Err(Error::InvalidState));
        assert_eq!(manager.set_duty(0, 1), Err(Error::InvalidState));
    }

    #[test]
    fn test_timer_validation() {
        let manager = Manager::new(SimPwm::new());
        manager.initialize().unwrap();
        let bad = [
            PwmTimerConfig {
                resolution_bits: 0,
                ..MOTOR_TIMER
            },
            PwmTimerConfig {
                resolution_bits: 21,
                ..MOTOR_TIMER
            },
            PwmTimerConfig {
                frequency_hz: 0,
                ..MOTOR_TIMER
            },
            PwmTimerConfig {
                timer: 4,
                ..MOTOR_TIMER
            },
        ];
        for config in bad {
            assert_eq!(manager.configure_timer(config), Err(Error::InvalidArgument));
        }
    }

    #[test]
    fn test_channel_needs_timer() {
        let manager = Manager::new(SimPwm::new());
        manager.initialize().unwrap();
        assert_eq!(
            manager.configure_channel(motor(0, 5)),
            Err(Error::InvalidState)
        );
        manager.configure_timer(MOTOR_TIMER).unwrap();
        assert_eq!(
            manager.configure_channel(PwmChannelConfig {
                duty: 256,
                ..motor(0, 5)
            }),
            Err(Error::InvalidArgument)
        );
        manager.configure_channel(motor(0, 5)).unwrap();
        assert_eq!(manager.channel_config(0).map(|c| c.gpio), Ok(5));
    }

    #[test]
    fn test_output_needs_running() {
        let sim = SimPwm::new();
        let manager = Manager::new(sim.clone());
        manager.initialize().unwrap();
        manager.configure_timer(MOTOR_TIMER).unwrap();
        manager.configure_channel(motor(0, 5)).unwrap();
        assert_eq!(manager.set_duty(0, 10), Err(Error::InvalidState));
        manager.start().unwrap();
        manager.set_duty(0, 10).unwrap();
        assert_eq!(sim.output_duty(0), Some(10));
    }

    #[test]
    fn test_duty_and_percent() {
        let sim = SimPwm::new();
        let manager = running(&sim);
        manager.set_duty(0, 128).unwrap();
        assert_eq!(manager.duty(0), Ok(128));
        assert_eq!(manager.set_duty(0, 256), Err(Error::InvalidArgument));
        assert_eq!(manager.set_duty(3, 1), Err(Error::InvalidArgument));

        manager.set_duty_percent(0, 100.0).unwrap();
        assert_eq!(sim.output_duty(0), Some(255));
        assert_eq!(manager.duty_percent(0), Ok(100.0));
        assert_eq!(
            manager.set_duty_percent(0, 100.5),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            manager.set_duty_percent(0, -1.0),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_frequency_change() {
        let manager = running(&SimPwm::new());
        manager.set_frequency(0, 20_000).unwrap();
        assert_eq!(manager.frequency(0), Ok(20_000));
        assert_eq!(manager.timer_config(0).map(|t| t.frequency_hz), Ok(20_000));
        assert_eq!(manager.set_frequency(0, 0), Err(Error::InvalidArgument));
        assert_eq!(manager.set_frequency(2, 1_000), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_fade_service_installed_once() {
        let sim = SimPwm::new();
        let manager = running(&sim);
        assert_eq!(manager.stop_fade(0), Err(Error::InvalidState));
        let fade = FadeConfig {
            target_duty: 200,
            time_ms: 500,
            mode: FadeMode::NoWait,
        };
        manager.start_fade(0, fade).unwrap();
        manager
            .start_fade(
                0,
                FadeConfig {
                    target_duty: 20,
                    ..fade
                },
            )
            .unwrap();
        assert_eq!(sim.fade_installs(), 1);
        assert_eq!(sim.fades(), 2);
        assert_eq!(sim.output_duty(0), Some(20));
        manager.stop_fade(0).unwrap();
        assert_eq!(
            manager.start_fade(
                0,
                FadeConfig {
                    target_duty: 300,
                    ..fade
                }
            ),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_stop_and_resume_output() {
        let sim = SimPwm::new();
        let manager = running(&sim);
        manager.set_duty(0, 77).unwrap();
        manager.stop_output(0, true).unwrap();
        assert_eq!(sim.idle_level(0), Some(true));
        assert_eq!(manager.is_output_running(0), Ok(false));

        manager.resume_output(0).unwrap();
        assert!(sim.is_running(0));
        assert_eq!(sim.output_duty(0), Some(77));
    }

    #[test]
    fn test_lifecycle_stop_parks_outputs() {
        let sim = SimPwm::new();
        let manager = running(&sim);
        manager.configure_channel(motor(1, 10)).unwrap();
        manager.set_duty(0, 40).unwrap();
        manager.stop_output(1, true).unwrap();

        manager.stop().unwrap();
        assert_eq!(manager.state(), State::Suspended);
        assert_eq!(sim.idle_level(0), Some(false));

        manager.start().unwrap();
        assert!(sim.is_running(0));
        assert_eq!(sim.output_duty(0), Some(40));
        // Stopped by the caller, stays stopped
        assert!(!sim.is_running(1));
    }

    #[test]
    fn test_configure_replays_channels() {
        let sim = SimPwm::new();
        let manager = running(&sim);
        manager.set_duty(0, 99).unwrap();
        manager.configure().unwrap();
        assert_eq!(manager.state(), State::Running);
        assert_eq!(sim.output_duty(0), Some(99));
        let replayed = sim.channel_config(0).unwrap();
        assert_eq!(replayed.duty, 99);
        assert_eq!(replayed.gpio, 5);
    }

    #[test]
    fn test_reset_forgets_configuration() {
        let sim = SimPwm::new();
        let manager = running(&sim);
        manager
            .start_fade(
                0,
                FadeConfig {
                    target_duty: 10,
                    time_ms: 100,
                    mode: FadeMode::WaitDone,
                },
            )
            .unwrap();
        manager.reset().unwrap();
        assert_eq!(manager.state(), State::Initialized);
        assert!(!sim.is_running(0));
        assert_eq!(manager.channel_config(0), Err(Error::InvalidArgument));

        // Fade service was removed, so the next fade installs it again
        manager.configure_timer(MOTOR_TIMER).unwrap();
        manager.configure_channel(motor(0, 6)).unwrap();
        assert_eq!(sim.channel_config(0).map(|c| c.gpio), Some(6));
        manager.start().unwrap();
        manager
            .start_fade(
                0,
                FadeConfig {
                    target_duty: 10,
                    time_ms: 100,
                    mode: FadeMode::NoWait,
                },
            )
            .unwrap();
        assert_eq!(sim.fade_installs(), 2);
    }

    proptest! {
        #[test]
        fn test_percent_never_exceeds_max(percent in -50.0f32..150.0, bits in 1u8..=20) {
            prop_assert!(percent_to_duty(percent, bits) <= max_duty(bits));
        }

        #[test]
        fn test_duty_percent_in_range(bits in 1u8..=20, raw in any::<u32>()) {
            let duty = raw % (max_duty(bits) + 1);
            let percent = duty_to_percent(duty, bits);
            prop_assert!((0.0..=100.0).contains(&percent));
        }
    }
}
