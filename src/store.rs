use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, Span};

use crate::sensor::{Reading, Sensor};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("no sensor with address registered: {0}")]
    UnknownSensor(String),
    #[error("no data available for {0}")]
    NoData(String),
}

#[derive(Debug)]
struct SensorRecord {
    sensor: Sensor,
    latest: Option<Reading>,
}

/// Latest successful reading per registered sensor.
///
/// Cloning is cheap and every clone shares the same records. Readers only
/// ever take the read lock and copy a whole `Reading` out, so they see either
/// the previous or the new value.
#[derive(Clone)]
pub struct SensorStore {
    records: Arc<RwLock<BTreeMap<String, SensorRecord>>>,
    span: Span,
}

impl SensorStore {
    pub fn new(span: Span) -> SensorStore {
        SensorStore {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            span,
        }
    }

    /// Adds a sensor without data. Registering a known address again replaces
    /// its identity and forgets the previous reading.
    pub async fn register(&self, sensor: Sensor) {
        let mut records = self.records.write().await;

        self.span.in_scope(|| debug!(%sensor, "registering sensor"));
        records.insert(
            sensor.address.clone(),
            SensorRecord {
                sensor,
                latest: None,
            },
        );
    }

    pub async fn get_latest(&self, address: &str) -> Result<Reading, StoreError> {
        let records = self.records.read().await;

        let record = records
            .get(address)
            .ok_or_else(|| StoreError::UnknownSensor(address.to_string()))?;

        record
            .latest
            .clone()
            .ok_or_else(|| StoreError::NoData(address.to_string()))
    }

    pub async fn set_latest(&self, address: &str, reading: Reading) -> Result<(), StoreError> {
        let mut records = self.records.write().await;

        let record = records
            .get_mut(address)
            .ok_or_else(|| StoreError::UnknownSensor(address.to_string()))?;
        record.latest = Some(reading);
        Ok(())
    }

    pub async fn contains(&self, address: &str) -> bool {
        self.records.read().await.contains_key(address)
    }

    /// Registered sensors, ordered by address.
    pub async fn sensors(&self) -> Vec<Sensor> {
        let records = self.records.read().await;
        records.values().map(|r| r.sensor.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    pub(crate) fn reading(value: u16) -> Reading {
        Reading {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(value as u64),
            firmware_version: format!("3.{}", value),
            battery_percent: (value % 100) as u8,
            temperature_celsius: value as f64 / 10.0,
            moisture_percent: (value % 100) as u8,
            light_lux: value,
            conductivity: value,
        }
    }

    fn is_consistent(r: &Reading) -> bool {
        let value = r.light_lux;
        *r == reading(value)
    }

    #[tokio::test]
    async fn unknown_sensor() {
        let store = SensorStore::new(Span::none());

        assert_eq!(
            store.get_latest("AA:BB").await,
            Err(StoreError::UnknownSensor("AA:BB".to_string()))
        );
        assert_eq!(
            store.set_latest("AA:BB", reading(1)).await,
            Err(StoreError::UnknownSensor("AA:BB".to_string()))
        );
    }

    #[tokio::test]
    async fn no_data_before_first_reading() {
        let store = SensorStore::new(Span::none());
        store.register(Sensor::new("AA:BB")).await;

        assert_eq!(
            store.get_latest("AA:BB").await,
            Err(StoreError::NoData("AA:BB".to_string()))
        );
    }

    #[tokio::test]
    async fn latest_reading_wins() {
        let store = SensorStore::new(Span::none());
        store.register(Sensor::new("AA:BB")).await;

        store.set_latest("AA:BB", reading(1)).await.unwrap();
        store.set_latest("AA:BB", reading(2)).await.unwrap();

        assert_eq!(store.get_latest("AA:BB").await.unwrap(), reading(2));
    }

    #[tokio::test]
    async fn register_again_replaces_identity() {
        let store = SensorStore::new(Span::none());
        store.register(Sensor::new("AA:BB")).await;
        store.set_latest("AA:BB", reading(1)).await.unwrap();

        store.register(Sensor::named("Basil", "AA:BB")).await;

        assert_eq!(store.sensors().await, vec![Sensor::named("Basil", "AA:BB")]);
        assert_eq!(
            store.get_latest("AA:BB").await,
            Err(StoreError::NoData("AA:BB".to_string()))
        );
    }

    #[tokio::test]
    async fn sensors_are_ordered_by_address() {
        let store = SensorStore::new(Span::none());
        store.register(Sensor::new("CC")).await;
        store.register(Sensor::new("AA")).await;
        store.register(Sensor::new("BB")).await;

        let addresses: Vec<String> = store
            .sensors()
            .await
            .into_iter()
            .map(|s| s.address)
            .collect();
        assert_eq!(addresses, vec!["AA", "BB", "CC"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_torn_readings() {
        let store = SensorStore::new(Span::none());
        store.register(Sensor::new("AA:BB")).await;
        store.set_latest("AA:BB", reading(0)).await.unwrap();

        let writer = tokio::spawn({
            let store = store.clone();
            async move {
                for value in 1..2000u16 {
                    store.set_latest("AA:BB", reading(value)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..2000 {
                        let r = store.get_latest("AA:BB").await.unwrap();
                        assert!(is_consistent(&r), "torn reading: {:?}", r);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
