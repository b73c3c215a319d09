//! Raw sample to millivolt conversion

use stampfly_hal::adc::CurveFit;

/// Conversion used for one channel
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Conversion {
    /// Factory curve for the channel's attenuation
    Curve(CurveFit),
    /// Uncalibrated estimate against a reference voltage
    Linear { vref_mv: u32, full_scale: u32 },
}

impl Conversion {
    /// Convert a raw sample
    pub fn to_mv(&self, raw: u16) -> i32 {
        match self {
            Conversion::Curve(curve) => curve_mv(curve, raw),
            Conversion::Linear {
                vref_mv,
                full_scale,
            } => linear_mv(raw, *vref_mv, *full_scale) as i32,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, Conversion::Curve(_))
    }
}

/// `raw * vref / full_scale`, truncated
pub fn linear_mv(raw: u16, vref_mv: u32, full_scale: u32) -> u32 {
    if full_scale == 0 {
        return 0;
    }
    ((raw as u64 * vref_mv as u64) / full_scale as u64) as u32
}

/// Evaluate a fitted curve
pub fn curve_mv(curve: &CurveFit, raw: u16) -> i32 {
    let linear = (raw as i64 * curve.gain_uv_per_lsb as i64) / 1000 + curve.offset_mv as i64;

    let terms = (curve.terms as usize).min(curve.correction.len());
    let mut error = 0.0f32;
    let mut power = 1.0f32;
    for coefficient in &curve.correction[..terms] {
        error += coefficient * power;
        power *= raw as f32;
    }

    (linear - error as i64).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// First-order exponential moving average
///
/// The first sample seeds the state and is returned as is.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Ema {
    state: Option<f32>,
}

impl Ema {
    pub const fn new() -> Self {
        Self { state: None }
    }

    /// Feed one sample, returning the filtered value
    pub fn update(&mut self, sample: f32, alpha: f32) -> f32 {
        let next = match self.state {
            Some(state) => alpha * sample + (1.0 - alpha) * state,
            None => sample,
        };
        self.state = Some(next);
        next
    }

    pub fn value(&self) -> Option<f32> {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stampfly_hal::adc::MAX_CORRECTION_TERMS;

    #[test]
    fn test_linear_fallback() {
        assert_eq!(linear_mv(4095, 1100, 4095), 1100);
        assert_eq!(linear_mv(2048, 1100, 4095), 550);
        assert_eq!(linear_mv(0, 1100, 4095), 0);
        assert_eq!(linear_mv(511, 1100, 511), 1100);
    }

    #[test]
    fn test_curve_with_correction() {
        let curve = CurveFit::linear(800, 10);
        assert_eq!(curve_mv(&curve, 1000), 810);

        let mut corrected = curve;
        corrected.correction[0] = 5.0;
        corrected.correction[1] = 0.25;
        corrected.terms = 2;
        // 810 - (5 + 0.25 * 1000)
        assert_eq!(curve_mv(&corrected, 1000), 555);
    }

    #[test]
    fn test_terms_beyond_table_ignored() {
        let mut curve = CurveFit::linear(1000, 0);
        curve.terms = (MAX_CORRECTION_TERMS + 3) as u8;
        assert_eq!(curve_mv(&curve, 100), 100);
    }

    #[test]
    fn test_ema_sequence() {
        let mut ema = Ema::new();
        assert_eq!(ema.update(100.0, 0.5), 100.0);
        assert_eq!(ema.update(200.0, 0.5), 150.0);
        assert_eq!(ema.update(200.0, 0.5), 175.0);
        ema.reset();
        assert_eq!(ema.value(), None);
    }

    proptest! {
        #[test]
        fn test_linear_within_vref(raw in 0u16..=4095, vref in 1u32..=3300) {
            prop_assert!(linear_mv(raw, vref, 4095) <= vref);
        }

        #[test]
        fn test_ema_stays_between_inputs(
            seed in 0.0f32..4096.0,
            sample in 0.0f32..4096.0,
            alpha in 0.0f32..=1.0,
        ) {
            let mut ema = Ema::new();
            ema.update(seed, alpha);
            let out = ema.update(sample, alpha);
            let lo = seed.min(sample) - 1e-2;
            let hi = seed.max(sample) + 1e-2;
            prop_assert!(out >= lo && out <= hi);
        }
    }
}
