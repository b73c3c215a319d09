//! Simulated ADC unit and delay provider

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use stampfly_hal::adc::{AdcUnit, AdcUnitId, Attenuation, BitWidth, CurveFit};
use stampfly_hal::Fault;

use crate::lock;

/// Channels on ADC1 of the ESP32-S3
pub const CHANNELS: u8 = 10;

#[derive(Debug, Clone, Default)]
struct SimChannel {
    setting: Option<(Attenuation, BitWidth)>,
    samples: VecDeque<u16>,
    /// Returned once the sample queue is empty
    idle_value: u16,
}

#[derive(Debug, Default)]
struct AdcState {
    unit: Option<AdcUnitId>,
    channels: BTreeMap<u8, SimChannel>,
    curves: BTreeMap<u8, CurveFit>,
    fail_after: Option<(u32, Fault)>,
    reads: u32,
}

fn attenuation_key(attenuation: Attenuation) -> u8 {
    match attenuation {
        Attenuation::Db0 => 0,
        Attenuation::Db2_5 => 1,
        Attenuation::Db6 => 2,
        Attenuation::Db11 => 3,
    }
}

/// Simulated one-shot ADC unit
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    state: Arc<Mutex<AdcState>>,
}

impl SimAdc {
    /// Unit without factory calibration data
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw samples for a channel, returned in order
    pub fn push_samples(&self, channel: u8, samples: &[u16]) {
        let mut state = lock(&self.state);
        let sim = state.channels.entry(channel).or_default();
        sim.samples.extend(samples.iter().copied());
    }

    /// Value returned once the sample queue of a channel is empty
    pub fn set_idle_value(&self, channel: u8, raw: u16) {
        lock(&self.state).channels.entry(channel).or_default().idle_value = raw;
    }

    /// Provide factory calibration for one attenuation
    pub fn set_curve(&self, attenuation: Attenuation, curve: CurveFit) {
        lock(&self.state)
            .curves
            .insert(attenuation_key(attenuation), curve);
    }

    /// Fail every read after `reads` more successful ones
    pub fn fail_after(&self, reads: u32, fault: Fault) {
        let mut state = lock(&self.state);
        let base = state.reads;
        state.fail_after = Some((base + reads, fault));
    }

    /// Setting programmed for a channel
    pub fn channel_setting(&self, channel: u8) -> Option<(Attenuation, BitWidth)> {
        lock(&self.state)
            .channels
            .get(&channel)
            .and_then(|c| c.setting)
    }

    /// Check if the unit is powered
    pub fn is_powered(&self) -> bool {
        lock(&self.state).unit.is_some()
    }
}

impl AdcUnit for SimAdc {
    fn channel_count(&self) -> u8 {
        CHANNELS
    }

    fn init_unit(&mut self, unit: AdcUnitId) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        if state.unit.is_some() {
            return Err(Fault::InvalidState);
        }
        state.unit = Some(unit);
        Ok(())
    }

    fn deinit_unit(&mut self) -> Result<(), Fault> {
        let mut state = lock(&self.state);
        state.unit.take().map(|_| ()).ok_or(Fault::InvalidState)
    }

    fn configure_channel(
        &mut self,
        channel: u8,
        attenuation: Attenuation,
        width: BitWidth,
    ) -> Result<(), Fault> {
        if channel >= CHANNELS {
            return Err(Fault::InvalidArgument);
        }
        let mut state = lock(&self.state);
        if state.unit.is_none() {
            return Err(Fault::InvalidState);
        }
        state.channels.entry(channel).or_default().setting = Some((attenuation, width));
        Ok(())
    }

    fn read_raw(&mut self, channel: u8) -> Result<u16, Fault> {
        let mut state = lock(&self.state);
        if state.unit.is_none() {
            return Err(Fault::InvalidState);
        }
        if let Some((limit, fault)) = state.fail_after {
            if state.reads >= limit {
                return Err(fault);
            }
        }
        state.reads += 1;
        let sim = state.channels.get_mut(&channel).ok_or(Fault::InvalidState)?;
        let (_, width) = sim.setting.ok_or(Fault::InvalidState)?;
        let raw = sim.samples.pop_front().unwrap_or(sim.idle_value);
        Ok(raw.min(width.full_scale() as u16))
    }

    fn curve_fit(
        &self,
        channel: u8,
        attenuation: Attenuation,
        _width: BitWidth,
    ) -> Result<CurveFit, Fault> {
        if channel >= CHANNELS {
            return Err(Fault::InvalidArgument);
        }
        lock(&self.state)
            .curves
            .get(&attenuation_key(attenuation))
            .copied()
            .ok_or(Fault::NotFound)
    }
}

/// Delay provider that records instead of sleeping
#[derive(Debug, Clone, Default)]
pub struct SimDelay {
    total_ns: Arc<AtomicU64>,
}

impl SimDelay {
    /// Zeroed delay counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Total requested delay in nanoseconds
    pub fn total_ns(&self) -> u64 {
        self.total_ns.load(Ordering::SeqCst)
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns.fetch_add(ns as u64, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_in_order_then_idle() {
        let mut adc = SimAdc::new();
        adc.init_unit(AdcUnitId::Unit1).unwrap();
        adc.configure_channel(2, Attenuation::Db11, BitWidth::Bits12)
            .unwrap();
        adc.push_samples(2, &[10, 20]);
        adc.set_idle_value(2, 7);
        assert_eq!(adc.read_raw(2), Ok(10));
        assert_eq!(adc.read_raw(2), Ok(20));
        assert_eq!(adc.read_raw(2), Ok(7));
    }

    #[test]
    fn test_curve_availability() {
        let adc = SimAdc::new();
        adc.set_curve(Attenuation::Db11, CurveFit::linear(800, 0));
        assert!(adc.curve_fit(0, Attenuation::Db11, BitWidth::Bits12).is_ok());
        assert_eq!(
            adc.curve_fit(0, Attenuation::Db0, BitWidth::Bits12),
            Err(Fault::NotFound)
        );
    }

    #[test]
    fn test_delay_accumulates() {
        let mut delay = SimDelay::new();
        delay.delay_ms(1);
        delay.delay_us(500);
        assert_eq!(delay.total_ns(), 1_500_000);
    }
}
