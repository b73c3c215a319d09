//! ADC manager
//!
//! One-shot conversions on a single ADC unit. Each configured channel
//! carries its attenuation, the conversion used to turn raw samples into
//! millivolts, and an optional moving-average filter.
//!
//! Factory calibration is best effort: when the chip has no curve for a
//! channel setting, the channel falls back to a linear estimate against
//! [`AdcConfig::default_vref_mv`] and keeps working.

pub mod calibration;

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use heapless::FnvIndexMap;
use stampfly_hal::adc::{AdcUnit, AdcUnitId, Attenuation, BitWidth};

use crate::error::{Error, Result};
use crate::lifecycle::{Event, Lifecycle, Peripheral};

pub use calibration::{Conversion, Ema};

/// Maximum number of configured channels
pub const MAX_CHANNELS: usize = 16;

/// Pause between samples of [`AdcManager::read_average`]
pub const SAMPLE_INTERVAL_US: u32 = 1_000;

/// ADC unit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcConfig {
    pub unit: AdcUnitId,
    pub bit_width: BitWidth,
    /// Reference used by the uncalibrated estimate
    pub default_vref_mv: u32,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            unit: AdcUnitId::Unit1,
            bit_width: BitWidth::Bits12,
            default_vref_mv: 1100,
        }
    }
}

/// One conversion result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub raw: u16,
    pub voltage_mv: i32,
    /// Voltage came from a factory curve rather than the linear estimate
    pub calibrated: bool,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    attenuation: Attenuation,
    calibration: bool,
    conversion: Conversion,
    filter: Ema,
}

impl ChannelState {
    fn reading(&self, raw: u16) -> Reading {
        Reading {
            raw,
            voltage_mv: self.conversion.to_mv(raw),
            calibrated: self.conversion.is_calibrated(),
        }
    }
}

struct Inner<A, D> {
    lifecycle: Lifecycle,
    adc: A,
    delay: D,
    config: AdcConfig,
    powered: bool,
    channels: FnvIndexMap<u8, ChannelState, MAX_CHANNELS>,
}

impl<A: AdcUnit, D> Inner<A, D> {
    fn require_unit(&self) -> Result<()> {
        self.lifecycle.require_ready()?;
        if !self.powered {
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    /// Channel state for a conversion, which needs the data path running
    fn sampling(&self, channel: u8) -> Result<ChannelState> {
        self.lifecycle.require_running()?;
        self.channel(channel)
    }

    fn channel(&self, channel: u8) -> Result<ChannelState> {
        self.require_unit()?;
        // Unconfigured channels are rejected like out-of-range ones
        self.channels
            .get(&channel)
            .copied()
            .ok_or(Error::InvalidArgument)
    }

    fn linear(&self) -> Conversion {
        Conversion::Linear {
            vref_mv: self.config.default_vref_mv,
            full_scale: self.config.bit_width.full_scale(),
        }
    }

    /// Fetch the factory curve for a channel setting
    fn curve(&self, channel: u8, attenuation: Attenuation) -> Result<Conversion> {
        let curve = self
            .adc
            .curve_fit(channel, attenuation, self.config.bit_width)?;
        Ok(Conversion::Curve(curve))
    }

    /// Curve if requested and available, linear estimate otherwise
    fn conversion_for(&self, channel: u8, attenuation: Attenuation, calibration: bool) -> Conversion {
        if !calibration {
            return self.linear();
        }
        match self.curve(channel, attenuation) {
            Ok(conversion) => conversion,
            Err(e) => {
                warn!("adc: channel {} uncalibrated ({}), using linear estimate", channel, e);
                self.linear()
            }
        }
    }

    fn apply_channel(
        &mut self,
        channel: u8,
        attenuation: Attenuation,
        calibration: bool,
    ) -> Result<()> {
        self.adc
            .configure_channel(channel, attenuation, self.config.bit_width)?;
        let state = ChannelState {
            attenuation,
            calibration,
            conversion: self.conversion_for(channel, attenuation, calibration),
            filter: Ema::new(),
        };
        self.channels
            .insert(channel, state)
            .map_err(|_| Error::NoMemory)?;
        Ok(())
    }

    /// Re-apply every channel at the current bit width
    fn reapply_all(&mut self) -> Result<()> {
        let configured: heapless::Vec<(u8, Attenuation, bool), MAX_CHANNELS> = self
            .channels
            .iter()
            .map(|(ch, s)| (*ch, s.attenuation, s.calibration))
            .collect();
        for (channel, attenuation, calibration) in configured {
            self.apply_channel(channel, attenuation, calibration)?;
        }
        Ok(())
    }

    fn power_up(&mut self) -> Result<()> {
        if !self.powered {
            self.adc.init_unit(self.config.unit)?;
            self.powered = true;
            info!(
                "adc: {:?} up, {} bit",
                self.config.unit,
                self.config.bit_width.bits()
            );
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.channels.clear();
        if self.powered {
            self.powered = false;
            self.adc.deinit_unit()?;
        }
        Ok(())
    }
}

/// ADC unit manager
pub struct AdcManager<M: RawMutex, A: AdcUnit, D: DelayNs> {
    inner: Mutex<M, RefCell<Inner<A, D>>>,
}

impl<M: RawMutex, A: AdcUnit, D: DelayNs> AdcManager<M, A, D> {
    /// Create a manager; `delay` paces [`AdcManager::read_average`]
    pub const fn new(adc: A, delay: D, config: AdcConfig) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                lifecycle: Lifecycle::new("adc"),
                adc,
                delay,
                config,
                powered: false,
                channels: FnvIndexMap::new(),
            })),
        }
    }

    /// Configure a channel
    ///
    /// With `calibration` set the factory curve is used when the chip has
    /// one; otherwise, or when it is missing, the linear estimate is used.
    pub fn configure_channel(
        &self,
        channel: u8,
        attenuation: Attenuation,
        calibration: bool,
    ) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_unit()?;
            if channel >= inner.adc.channel_count() {
                return Err(Error::InvalidArgument);
            }
            inner.apply_channel(channel, attenuation, calibration)
        })
    }

    /// Take one sample
    pub fn read(&self, channel: u8) -> Result<Reading> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let state = inner.sampling(channel)?;
            let raw = inner.adc.read_raw(channel)?;
            Ok(state.reading(raw))
        })
    }

    pub fn read_raw(&self, channel: u8) -> Result<u16> {
        self.read(channel).map(|r| r.raw)
    }

    pub fn read_voltage(&self, channel: u8) -> Result<i32> {
        self.read(channel).map(|r| r.voltage_mv)
    }

    /// Mean of `samples` consecutive samples
    ///
    /// Samples are spaced by [`SAMPLE_INTERVAL_US`]. The mean is truncated
    /// and converted like a single sample. The first failed sample aborts.
    pub fn read_average(&self, channel: u8, samples: u32) -> Result<Reading> {
        if samples == 0 {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let state = inner.sampling(channel)?;
            let mut sum = 0u64;
            for i in 0..samples {
                if i > 0 {
                    inner.delay.delay_us(SAMPLE_INTERVAL_US);
                }
                sum += inner.adc.read_raw(channel)? as u64;
            }
            Ok(state.reading((sum / samples as u64) as u16))
        })
    }

    /// Sample through the channel's moving-average filter
    ///
    /// The first call after configuration or [`AdcManager::reset_filter`]
    /// seeds the filter and returns the raw sample.
    pub fn read_filtered(&self, channel: u8, alpha: f32) -> Result<Reading> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidArgument);
        }
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let mut state = inner.sampling(channel)?;
            let raw = inner.adc.read_raw(channel)?;
            let filtered = state.filter.update(raw as f32, alpha);
            if let Some(stored) = inner.channels.get_mut(&channel) {
                stored.filter = state.filter;
            }
            Ok(state.reading(filtered as u16))
        })
    }

    /// Forget the filter state of a channel
    pub fn reset_filter(&self, channel: u8) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.channel(channel)?;
            if let Some(stored) = inner.channels.get_mut(&channel) {
                stored.filter.reset();
            }
            Ok(())
        })
    }

    /// Change the attenuation of a configured channel
    ///
    /// The calibration curve is rebuilt for the new range.
    pub fn set_attenuation(&self, channel: u8, attenuation: Attenuation) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let state = inner.channel(channel)?;
            inner.apply_channel(channel, attenuation, state.calibration)
        })
    }

    /// Change the conversion width of the unit and re-apply every channel
    pub fn set_bit_width(&self, width: BitWidth) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.require_unit()?;
            inner.config.bit_width = width;
            inner.reapply_all()
        })
    }

    /// Rebuild the factory curve of one channel
    ///
    /// Unlike [`AdcManager::configure_channel`] a missing curve is
    /// reported; the channel keeps its linear estimate.
    pub fn calibrate(&self, channel: u8) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            let state = inner.channel(channel)?;
            let conversion = inner.curve(channel, state.attenuation)?;
            if let Some(stored) = inner.channels.get_mut(&channel) {
                stored.calibration = true;
                stored.conversion = conversion;
            }
            Ok(())
        })
    }

    /// Calibrate every configured channel
    ///
    /// All channels are attempted; the first failure is returned.
    pub fn calibrate_all(&self) -> Result<()> {
        let channels: heapless::Vec<u8, MAX_CHANNELS> =
            self.inner.lock(|inner| inner.borrow().channels.keys().copied().collect());
        let mut first_error = None;
        for channel in channels {
            if let Err(e) = self.calibrate(channel) {
                warn!("adc: calibrating channel {} failed: {}", channel, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Convert a raw value with the channel's conversion
    pub fn convert_to_voltage(&self, channel: u8, raw: u16) -> Result<i32> {
        self.inner
            .lock(|inner| Ok(inner.borrow().channel(channel)?.conversion.to_mv(raw)))
    }

    /// Check if a channel uses a factory curve
    pub fn is_calibrated(&self, channel: u8) -> Result<bool> {
        self.inner
            .lock(|inner| Ok(inner.borrow().channel(channel)?.conversion.is_calibrated()))
    }

    pub fn attenuation(&self, channel: u8) -> Result<Attenuation> {
        self.inner
            .lock(|inner| Ok(inner.borrow().channel(channel)?.attenuation))
    }

    pub fn config(&self) -> AdcConfig {
        self.inner.lock(|inner| inner.borrow().config)
    }
}

impl<M: RawMutex, A: AdcUnit, D: DelayNs> Peripheral for AdcManager<M, A, D> {
    fn initialize(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.apply(Event::Initialize)?;
            if let Err(e) = inner.power_up() {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::InitComplete)?;
            Ok(())
        })
    }

    /// Re-apply every channel and rebuild its calibration
    fn configure(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.lifecycle.check(Event::Configure)?;
            if let Err(e) = inner.power_up().and_then(|()| inner.reapply_all()) {
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
            if let Err(e) = inner.power_up() {
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

    /// Drop every channel with its calibration and filter, then power cycle
    /// the unit
    fn reset(&self) -> Result<()> {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            if let Err(e) = inner.release().and_then(|()| inner.power_up()) {
                return Err(inner.lifecycle.fail(e));
            }
            inner.lifecycle.apply(Event::Reset)?;
            Ok(())
        })
    }

    lifecycle_accessors!();
}

impl<M: RawMutex, A: AdcUnit, D: DelayNs> Drop for AdcManager<M, A, D> {
    fn drop(&mut self) {
        self.inner.lock(|inner| {
            let _ = inner.borrow_mut().release();
        });
    }
}
