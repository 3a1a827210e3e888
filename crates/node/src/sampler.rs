//! Raw ADC → tank percentage conversion.

use serde::Serialize;
use thiserror::Error;

use crate::adc::{AdcError, AnalogInput};
use crate::calibration::CalibrationState;

#[derive(Debug, Error)]
pub enum SampleError {
    /// Both endpoints hold the same raw value, so the mapping has no slope.
    #[error("calibration endpoints are both {endpoint}; level is undefined (raw {raw})")]
    CalibrationInvalid { raw: u16, endpoint: u16 },
    #[error(transparent)]
    Input(#[from] AdcError),
}

/// One sampling cycle's result. Produced fresh each time, never retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadingSample {
    pub raw: u16,
    pub percentage: i32,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Integer linear re-mapping of `x` from `[in_min, in_max]` onto
/// `[out_min, out_max]`:
///
/// `(x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min`
///
/// Division truncates toward zero and the result is not clamped, so values
/// outside the input range extrapolate. Returns `None` when
/// `in_min == in_max`.
pub fn linear_map(x: i64, in_min: i64, in_max: i64, out_min: i64, out_max: i64) -> Option<i64> {
    let divisor = in_max - in_min;
    if divisor == 0 {
        return None;
    }
    Some((x - in_min) * (out_max - out_min) / divisor + out_min)
}

/// Level percentage for `raw` under `cal`. Not clamped to 0..=100.
pub fn level_percentage(raw: u16, cal: &CalibrationState) -> Result<i32, SampleError> {
    linear_map(
        i64::from(raw),
        i64::from(cal.empty_raw),
        i64::from(cal.full_raw),
        0,
        100,
    )
    // |result| <= 65535 * 100, always fits.
    .map(|p| p as i32)
    .ok_or(SampleError::CalibrationInvalid {
        raw,
        endpoint: cal.empty_raw,
    })
}

pub struct LevelSampler<A> {
    input: A,
}

impl<A: AnalogInput> LevelSampler<A> {
    pub fn new(input: A) -> Self {
        Self { input }
    }

    /// One unconverted reading, as used for automatic calibration.
    pub fn read_raw(&mut self) -> Result<u16, SampleError> {
        Ok(self.input.read_raw()?)
    }

    /// Read the input once and convert it under `cal`, stamping it with
    /// `timestamp` (unix seconds).
    pub fn sample(
        &mut self,
        cal: &CalibrationState,
        timestamp: i64,
    ) -> Result<ReadingSample, SampleError> {
        let raw = self.read_raw()?;
        let percentage = level_percentage(raw, cal)?;
        Ok(ReadingSample {
            raw,
            percentage,
            timestamp,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAdc;

    // -- linear_map -----------------------------------------------------------

    #[test]
    fn endpoints_map_to_0_and_100() {
        for (empty, full) in [(300, 800), (0, 1023), (800, 300), (1, 2)] {
            assert_eq!(linear_map(empty, empty, full, 0, 100), Some(0));
            assert_eq!(linear_map(full, empty, full, 0, 100), Some(100));
        }
    }

    #[test]
    fn midpoint_interpolates() {
        assert_eq!(linear_map(550, 300, 800, 0, 100), Some(50));
    }

    #[test]
    fn truncates_toward_zero() {
        // 250 * 100 / 600 = 41.67
        assert_eq!(linear_map(550, 300, 900, 0, 100), Some(41));
        // -10 * 100 / 600 = -1.67
        assert_eq!(linear_map(290, 300, 900, 0, 100), Some(-1));
    }

    #[test]
    fn extrapolates_without_clamping() {
        assert_eq!(linear_map(1000, 300, 800, 0, 100), Some(140));
        assert_eq!(linear_map(0, 300, 800, 0, 100), Some(-60));
    }

    #[test]
    fn inverted_calibration_maps_inversely() {
        // Sensor whose raw value falls as the tank fills.
        assert_eq!(linear_map(600, 800, 300, 0, 100), Some(40));
    }

    #[test]
    fn equal_input_bounds_yield_none() {
        assert_eq!(linear_map(500, 400, 400, 0, 100), None);
    }

    #[test]
    fn output_offset_is_applied() {
        assert_eq!(linear_map(5, 0, 10, 100, 200), Some(150));
    }

    // -- level_percentage -----------------------------------------------------

    #[test]
    fn level_percentage_extremes_do_not_overflow() {
        let cal = CalibrationState::new(65535, 65534);
        assert_eq!(level_percentage(0, &cal).unwrap(), 6_553_500);
    }

    #[test]
    fn degenerate_calibration_is_an_error() {
        let cal = CalibrationState::new(512, 512);
        assert!(matches!(
            level_percentage(700, &cal),
            Err(SampleError::CalibrationInvalid { raw: 700, endpoint: 512 })
        ));
    }

    // -- LevelSampler ---------------------------------------------------------

    #[test]
    fn sample_reads_and_converts() {
        let adc = FakeAdc::new(550);
        let mut sampler = LevelSampler::new(adc);

        let reading = sampler
            .sample(&CalibrationState::new(300, 800), 1_700_000_000)
            .unwrap();
        assert_eq!(
            reading,
            ReadingSample {
                raw: 550,
                percentage: 50,
                timestamp: 1_700_000_000,
            }
        );
    }

    #[test]
    fn sample_follows_live_input() {
        let adc = FakeAdc::new(300);
        let mut sampler = LevelSampler::new(adc.clone());
        let cal = CalibrationState::new(300, 800);

        assert_eq!(sampler.sample(&cal, 0).unwrap().percentage, 0);
        adc.set(800);
        assert_eq!(sampler.sample(&cal, 0).unwrap().percentage, 100);
    }

    #[test]
    fn sample_propagates_input_failure() {
        let adc = FakeAdc::new(0);
        adc.fail(true);
        let mut sampler = LevelSampler::new(adc);

        assert!(matches!(
            sampler.sample(&CalibrationState::new(0, 1), 0),
            Err(SampleError::Input(_))
        ));
    }
}
