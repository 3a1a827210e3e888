//! Simulated diesel tank sender for running the node without hardware.
//!
//! Models a float-arm potentiometer on a 10-bit ADC:
//! - Slow fuel consumption between refuels
//! - Occasional refuel back to (nearly) full once the tank runs low
//! - Slosh: short-lived wobble that decays
//! - Per-reading ADC noise
//!
//! The output is mapped between the configured empty/full raw endpoints, so
//! a device calibrated with the same endpoints reports 0 to 100 %.

use tracing::info;

use crate::adc::{AdcError, AnalogInput, ADC_MAX};

/// Level fraction below which a refuel becomes possible.
const REFUEL_THRESHOLD: f64 = 0.15;

/// Chance per sample that a refuel happens once below the threshold.
const REFUEL_PROB: f64 = 0.02;

/// Per-sample decay of slosh amplitude.
const SLOSH_DECAY: f64 = 0.9;

/// ADC noise sigma, in raw counts.
const NOISE_SIGMA: f64 = 1.5;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1): sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct TankSim {
    empty_raw: f64,
    full_raw: f64,
    /// True fuel level as a fraction of capacity, 0.0..=1.0.
    level: f64,
    /// Fraction of capacity burnt per sample.
    consumption: f64,
    slosh: f64,
}

impl TankSim {
    /// `consumption_per_sample` is a fraction of the tank, e.g. `0.0005`
    /// empties it in 2000 samples (~17 minutes at the default 500 ms rate).
    pub fn new(empty_raw: u16, full_raw: u16, consumption_per_sample: f64) -> Self {
        info!(
            empty_raw,
            full_raw,
            consumption_per_sample,
            "tank simulator initialised"
        );
        Self {
            empty_raw: f64::from(empty_raw),
            full_raw: f64::from(full_raw),
            level: 0.5 + gaussian(0.0, 0.1).clamp(-0.3, 0.3),
            consumption: consumption_per_sample,
            slosh: 0.0,
        }
    }

    /// Current true fill fraction.
    #[cfg(test)]
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Fill the tank; the fuel sloshes for a while afterwards.
    pub fn refuel(&mut self) {
        self.level = (0.95 + fastrand::f64() * 0.05).min(1.0);
        self.slosh = 0.05;
    }

    fn step(&mut self) {
        self.level = (self.level - self.consumption * (0.5 + fastrand::f64())).max(0.0);
        if self.level < REFUEL_THRESHOLD && fastrand::f64() < REFUEL_PROB {
            self.refuel();
        }
        self.slosh *= SLOSH_DECAY;
    }

    fn next_raw(&mut self) -> u16 {
        self.step();

        let wobble = gaussian(0.0, self.slosh);
        let fraction = (self.level + wobble).clamp(0.0, 1.0);
        let raw = self.empty_raw + fraction * (self.full_raw - self.empty_raw);
        let noisy = gaussian(raw, NOISE_SIGMA);

        noisy.round().clamp(0.0, f64::from(ADC_MAX)) as u16
    }
}

impl AnalogInput for TankSim {
    fn read_raw(&mut self) -> Result<u16, AdcError> {
        Ok(self.next_raw())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
