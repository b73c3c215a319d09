//! ADC abstractions
//!
//! One-shot conversion unit plus access to the factory calibration data
//! used to build a voltage curve.

use crate::error::Fault;

/// Maximum number of error-correction terms in a fitted curve
pub const MAX_CORRECTION_TERMS: usize = 5;

/// ADC unit selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcUnitId {
    /// SAR ADC1
    #[default]
    Unit1,
    /// SAR ADC2 (shared with the radio)
    Unit2,
}

/// Input attenuation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attenuation {
    /// 0 dB, roughly 100 mV to 950 mV
    Db0,
    /// 2.5 dB, roughly 100 mV to 1250 mV
    Db2_5,
    /// 6 dB, roughly 150 mV to 1750 mV
    Db6,
    /// 11 dB, roughly 150 mV to 2450 mV
    #[default]
    Db11,
}

impl Attenuation {
    /// Upper end of the usable input range in millivolts
    pub fn full_range_mv(&self) -> u32 {
        match self {
            Attenuation::Db0 => 950,
            Attenuation::Db2_5 => 1250,
            Attenuation::Db6 => 1750,
            Attenuation::Db11 => 2450,
        }
    }
}

/// Conversion width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitWidth {
    Bits9,
    Bits10,
    Bits11,
    #[default]
    Bits12,
    Bits13,
}

impl BitWidth {
    /// Number of bits per sample
    pub fn bits(&self) -> u8 {
        match self {
            BitWidth::Bits9 => 9,
            BitWidth::Bits10 => 10,
            BitWidth::Bits11 => 11,
            BitWidth::Bits12 => 12,
            BitWidth::Bits13 => 13,
        }
    }

    /// Largest raw sample value
    pub fn full_scale(&self) -> u32 {
        (1u32 << self.bits()) - 1
    }
}

/// Fitted raw-to-voltage curve from factory calibration
///
/// `voltage_mv = raw * gain_uv_per_lsb / 1000 + offset_mv - error(raw)`
/// where `error(raw) = Σ correction[i] * raw^i`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CurveFit {
    /// Slope in microvolts per LSB
    pub gain_uv_per_lsb: u32,
    /// Intercept in millivolts
    pub offset_mv: i32,
    /// Polynomial error terms in millivolts, lowest order first
    pub correction: [f32; MAX_CORRECTION_TERMS],
    /// Number of valid entries in `correction`
    pub terms: u8,
}

impl CurveFit {
    /// Straight-line fit without error correction
    pub const fn linear(gain_uv_per_lsb: u32, offset_mv: i32) -> Self {
        Self {
            gain_uv_per_lsb,
            offset_mv,
            correction: [0.0; MAX_CORRECTION_TERMS],
            terms: 0,
        }
    }
}

/// One-shot ADC unit driver
pub trait AdcUnit {
    /// Number of channels on the unit
    fn channel_count(&self) -> u8;

    /// Power up the unit
    fn init_unit(&mut self, unit: AdcUnitId) -> Result<(), Fault>;

    /// Power down the unit
    fn deinit_unit(&mut self) -> Result<(), Fault>;

    /// Configure one channel
    fn configure_channel(
        &mut self,
        channel: u8,
        attenuation: Attenuation,
        width: BitWidth,
    ) -> Result<(), Fault>;

    /// Take one raw sample
    fn read_raw(&mut self, channel: u8) -> Result<u16, Fault>;

    /// Fetch the factory curve for a channel setting
    ///
    /// Returns [`Fault::Unsupported`] or [`Fault::NotFound`] when the chip
    /// carries no calibration data for it.
    fn curve_fit(
        &self,
        channel: u8,
        attenuation: Attenuation,
        width: BitWidth,
    ) -> Result<CurveFit, Fault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale() {
        assert_eq!(BitWidth::Bits12.full_scale(), 4095);
        assert_eq!(BitWidth::Bits9.full_scale(), 511);
        assert_eq!(BitWidth::default(), BitWidth::Bits12);
    }

    #[test]
    fn test_attenuation_range() {
        assert!(Attenuation::Db0.full_range_mv() < Attenuation::Db11.full_range_mv());
    }
}
