pub mod miflora;

use std::future::Future;

use crate::sensor::Reading;

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
    #[error("invalid sensor address {0:?}")]
    InvalidAddress(String),
    #[error("no bluetooth adapter named {0:?}")]
    NoAdapter(String),
    #[error("sensor {0} not found while scanning")]
    NotFound(String),
    #[error("characteristic {0} not found")]
    MissingCharacteristic(uuid::Uuid),
    #[error("can not parse {what}: {reason}")]
    Payload { what: &'static str, reason: String },
}

/// A round-trip to one sensor over the shared radio.
///
/// Implementations hold the radio handle. The scheduler owns its reader
/// exclusively and drops the returned future to abort a read on shutdown.
pub trait SensorReader: Send + 'static {
    fn read(&mut self, address: &str) -> impl Future<Output = Result<Reading, ReadError>> + Send;
}
