use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tracing::{debug, info, Instrument, Span};

use crate::sensor::{Reading, Sensor};
use crate::shutdown::stopped;
use crate::store::{SensorStore, StoreError};

#[derive(Debug, PartialEq)]
pub enum SensorStatus {
    Fresh(Reading),
    /// The last reading is too old to be trusted.
    Stale { age: Duration },
    Down(StoreError),
}

/// Periodically logs the latest reading of every sensor.
///
/// Readings older than `stale_after` are reported as absent.
pub struct Reporter {
    store: SensorStore,
    stale_after: Duration,
    span: Span,
}

impl Reporter {
    pub fn new(store: SensorStore, stale_after: Duration, span: Span) -> Reporter {
        Reporter {
            store,
            stale_after,
            span,
        }
    }

    pub async fn status(&self, now: SystemTime) -> Vec<(Sensor, SensorStatus)> {
        let mut result = Vec::new();

        for sensor in self.store.sensors().await {
            let status = match self.store.get_latest(&sensor.address).await {
                Ok(reading) => {
                    // readings from the future count as fresh
                    let age = now.duration_since(reading.timestamp).unwrap_or_default();
                    if age >= self.stale_after {
                        SensorStatus::Stale { age }
                    } else {
                        SensorStatus::Fresh(reading)
                    }
                }
                Err(e) => SensorStatus::Down(e),
            };
            result.push((sensor, status));
        }

        result
    }

    pub async fn log_status(&self) {
        for (sensor, status) in self.status(SystemTime::now()).await {
            match status {
                SensorStatus::Fresh(r) => info!(
                    "{}: {:.1}°C, {}% moisture, {} lux, {} µS/cm, {}% battery, firmware {}",
                    sensor,
                    r.temperature_celsius,
                    r.moisture_percent,
                    r.light_lux,
                    r.conductivity,
                    r.battery_percent,
                    r.firmware_version
                ),
                SensorStatus::Stale { age } => {
                    info!("{}: stale, last reading {}s ago", sensor, age.as_secs())
                }
                SensorStatus::Down(e) => info!("{}: down ({})", sensor, e),
            }
        }
    }

    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let span = self.span.clone();

        async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick fires immediately, before any sensor was read
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = stopped(&mut shutdown) => break,
                    _ = ticker.tick() => self.log_status().await,
                }
            }
            debug!("reporter stopped");
        }
        .instrument(span)
        .await
    }
}
