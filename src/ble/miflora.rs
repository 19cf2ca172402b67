//! Flower Care (Miflora) sensors over btleplug.
//!
//! A reading takes three GATT operations: read the firmware characteristic
//! (battery and version), switch the sensor into realtime mode and read the
//! realtime data characteristic.

use std::time::{Duration, SystemTime};

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tracing::{debug, Instrument, Span};
use uuid::Uuid;

use super::{ReadError, SensorReader};
use crate::sensor::Reading;

const MODE_UUID: Uuid = Uuid::from_u128(0x00001a00_0000_1000_8000_00805f9b34fb);
const DATA_UUID: Uuid = Uuid::from_u128(0x00001a01_0000_1000_8000_00805f9b34fb);
const FIRMWARE_UUID: Uuid = Uuid::from_u128(0x00001a02_0000_1000_8000_00805f9b34fb);

const REALTIME_MODE: [u8; 2] = [0xA0, 0x1F];

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, PartialEq)]
pub struct Firmware {
    pub version: String,
    pub battery: u8,
}

impl Firmware {
    pub fn parse(data: &[u8]) -> Result<Firmware, ReadError> {
        if data.len() < 3 {
            return Err(ReadError::Payload {
                what: "firmware info",
                reason: format!("data not long enough: {} < 3", data.len()),
            });
        }

        let version = String::from_utf8_lossy(&data[2..])
            .trim_end_matches('\0')
            .to_string();

        Ok(Firmware {
            version,
            battery: data[0],
        })
    }
}

#[derive(Debug, PartialEq)]
pub struct Measurements {
    pub temperature: f64,
    pub moisture: u8,
    pub light: u16,
    pub conductivity: u16,
}

impl Measurements {
    // TT TT ?? LL LL ?? ?? MM CC CC ?? ?? ?? ?? ?? ??
    pub fn parse(data: &[u8]) -> Result<Measurements, ReadError> {
        if data.len() != 16 {
            return Err(ReadError::Payload {
                what: "sensor data",
                reason: format!("invalid data length: {} != 16", data.len()),
            });
        }

        let temperature = i16::from_le_bytes([data[0], data[1]]);

        Ok(Measurements {
            temperature: f64::from(temperature) / 10.0,
            light: u16::from_le_bytes([data[3], data[4]]),
            moisture: data[7],
            conductivity: u16::from_le_bytes([data[8], data[9]]),
        })
    }
}

/// Checks for six colon separated hex octets.
fn validate_address(address: &str) -> Result<(), ReadError> {
    let octets: Vec<&str> = address.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

    if valid {
        Ok(())
    } else {
        Err(ReadError::InvalidAddress(address.to_string()))
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, ReadError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(ReadError::MissingCharacteristic(uuid))
}

pub struct MifloraReader {
    adapter: Adapter,
    adapter_name: String,
    scan_timeout: Duration,
    span: Span,
}

impl MifloraReader {
    /// Opens the adapter whose info starts with `adapter_name`, e.g. `hci0`.
    pub async fn new(
        adapter_name: &str,
        scan_timeout: Duration,
        span: Span,
    ) -> Result<MifloraReader, ReadError> {
        let manager = Manager::new().await?;

        for adapter in manager.adapters().await? {
            let info = adapter.adapter_info().await?;
            if info.starts_with(adapter_name) {
                span.in_scope(|| debug!(adapter = %info, "using bluetooth adapter"));
                return Ok(MifloraReader {
                    adapter,
                    adapter_name: adapter_name.to_string(),
                    scan_timeout,
                    span,
                });
            }
        }

        Err(ReadError::NoAdapter(adapter_name.to_string()))
    }

    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>, ReadError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, ReadError> {
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        debug!(address, adapter = %self.adapter_name, "scanning for sensor");
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = tokio::time::Instant::now() + self.scan_timeout;
        let found = loop {
            match self.known_peripheral(address).await {
                Ok(Some(peripheral)) => break Ok(peripheral),
                Ok(None) if tokio::time::Instant::now() >= deadline => {
                    break Err(ReadError::NotFound(address.to_string()))
                }
                Ok(None) => tokio::time::sleep(SCAN_POLL_INTERVAL).await,
                Err(e) => break Err(e),
            }
        };

        self.adapter.stop_scan().await?;
        found
    }

    async fn read_connected(&self, peripheral: &Peripheral) -> Result<Reading, ReadError> {
        peripheral.discover_services().await?;

        let raw = peripheral
            .read(&find_characteristic(peripheral, FIRMWARE_UUID)?)
            .await?;
        let firmware = Firmware::parse(&raw)?;
        debug!(?firmware, "firmware info");

        peripheral
            .write(
                &find_characteristic(peripheral, MODE_UUID)?,
                &REALTIME_MODE,
                WriteType::WithResponse,
            )
            .await?;

        let raw = peripheral
            .read(&find_characteristic(peripheral, DATA_UUID)?)
            .await?;
        let measurements = Measurements::parse(&raw)?;
        debug!(?measurements, "sensor data");

        Ok(Reading {
            timestamp: SystemTime::now(),
            firmware_version: firmware.version,
            battery_percent: firmware.battery,
            temperature_celsius: measurements.temperature,
            moisture_percent: measurements.moisture,
            light_lux: measurements.light,
            conductivity: measurements.conductivity,
        })
    }

    async fn read_sensor(&self, address: &str) -> Result<Reading, ReadError> {
        validate_address(address)?;

        let peripheral = self.find_peripheral(address).await?;
        peripheral.connect().await?;

        let result = self.read_connected(&peripheral).await;

        if let Err(e) = peripheral.disconnect().await {
            debug!(address, error = %e, "disconnect failed");
        }
        result
    }
}

impl SensorReader for MifloraReader {
    async fn read(&mut self, address: &str) -> Result<Reading, ReadError> {
        let span = self.span.clone();
        self.read_sensor(address).instrument(span).await
    }
}
