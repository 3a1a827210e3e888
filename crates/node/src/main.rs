mod adc;
mod calibration;
mod config;
mod device;
mod eeprom;
mod mqtt;
mod platform;
mod reporter;
mod sampler;
mod session;
#[cfg(feature = "sim")]
mod sim;
#[cfg(test)]
mod testing;
mod transport;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::adc::{AdcError, AnalogInput, IioAdc};
use crate::calibration::{CalibrationStore, REGION_SIZE};
use crate::config::{Config, SensorSource};
use crate::device::Device;
use crate::eeprom::FileStore;
use crate::mqtt::Topics;
use crate::platform::{Clock, HostPlatform, SystemClock};
use crate::sampler::LevelSampler;
use crate::session::Session;
use crate::transport::MqttTransport;

/// The level sender selected in the config.
enum Sensor {
    Iio(IioAdc),
    #[cfg(feature = "sim")]
    Sim(sim::TankSim),
}

impl AnalogInput for Sensor {
    fn read_raw(&mut self) -> Result<u16, AdcError> {
        match self {
            Sensor::Iio(adc) => adc.read_raw(),
            #[cfg(feature = "sim")]
            Sensor::Sim(tank) => tank.read_raw(),
        }
    }
}

fn build_sensor(config: &Config) -> Result<Sensor> {
    match config.sensor.source {
        SensorSource::Iio => Ok(Sensor::Iio(IioAdc::new(&config.sensor.iio_path))),
        #[cfg(feature = "sim")]
        SensorSource::Sim => {
            let s = &config.sensor.sim;
            info!(
                empty = s.empty_raw,
                full = s.full_raw,
                "using simulated tank sender"
            );
            Ok(Sensor::Sim(sim::TankSim::new(
                s.empty_raw,
                s.full_raw,
                s.consumption_per_sample,
            )))
        }
        #[cfg(not(feature = "sim"))]
        SensorSource::Sim => anyhow::bail!("sensor.source = \"sim\" requires the `sim` feature"),
    }
}

/// Block (asynchronously) until the wall clock has been synchronised.
/// Readings carry Unix timestamps, so nothing is published before this.
async fn wait_for_wall_clock<C: Clock>(clock: &C, poll: Duration) {
    if clock.wall_clock_valid() {
        return;
    }
    info!("waiting for wall clock synchronisation");
    while !clock.wall_clock_valid() {
        tokio::time::sleep(poll).await;
    }
    info!(unix = clock.unix_time(), "wall clock synchronised");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::load_from_env()?;
    info!(
        namespace = %config.namespace,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "fuel-level-node starting"
    );

    let file_store = FileStore::open(&config.storage.path, REGION_SIZE)
        .with_context(|| format!("failed to open calibration store: {}", config.storage.path))?;
    let store = CalibrationStore::new(file_store);
    let sampler = LevelSampler::new(build_sensor(&config)?);
    let platform = HostPlatform::new(&config.mqtt.host, config.mqtt.port);
    let clock = SystemClock::new();

    let poll = Duration::from_millis(config.timing.time_sync_poll_ms);
    tokio::select! {
        _ = wait_for_wall_clock(&clock, poll) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested before time sync");
            return Ok(());
        }
    }

    let session = Session::new(
        MqttTransport::new(config.mqtt_settings()),
        Topics::new(&config.namespace),
        config.session_timing(),
    );
    let mut device = Device::new(
        store,
        sampler,
        session,
        platform,
        clock,
        config.timing.sample_interval_ms,
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(config.timing.loop_period_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => device.step(),
            _ = tokio::signal::ctrl_c() => {
                let cal = device.calibration();
                info!(
                    state = ?device.session().state(),
                    empty = cal.empty_raw,
                    full = cal.full_raw,
                    "shutdown requested"
                );
                break;
            }
        }
    }

    Ok(())
}
