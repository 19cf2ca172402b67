use std::fmt;
use std::time::SystemTime;

use serde::Deserialize;

/// Identity of a Flower Care sensor, fixed for the lifetime of the process.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(try_from = "SensorEntry")]
pub struct Sensor {
    pub address: String,
    pub name: Option<String>,
}

impl Sensor {
    pub fn new(address: impl Into<String>) -> Sensor {
        Sensor {
            address: address.into(),
            name: None,
        }
    }

    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Sensor {
        Sensor {
            address: address.into(),
            name: Some(name.into()),
        }
    }

    /// Parses the `name=address` shorthand; a bare value is just the address.
    pub fn parse(value: &str) -> Result<Sensor, String> {
        if value.is_empty() {
            return Err("empty sensor string".to_string());
        }

        match value.split_once('=') {
            Some((name, address)) => Ok(Sensor::named(name, address)),
            None => Ok(Sensor::new(value)),
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{} ({})", name, self.address),
            _ => write!(f, "{}", self.address),
        }
    }
}

// sensors can be written either as `{address, name}` maps or as `name=address` strings
#[derive(Deserialize)]
#[serde(untagged)]
enum SensorEntry {
    Short(String),
    Full {
        address: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl TryFrom<SensorEntry> for Sensor {
    type Error = String;

    fn try_from(entry: SensorEntry) -> Result<Self, Self::Error> {
        match entry {
            SensorEntry::Short(value) => Sensor::parse(&value),
            SensorEntry::Full { address, name } => Ok(Sensor { address, name }),
        }
    }
}

/// One successful snapshot of a sensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub timestamp: SystemTime,
    pub firmware_version: String,
    pub battery_percent: u8,
    pub temperature_celsius: f64,
    pub moisture_percent: u8,
    pub light_lux: u16,
    /// Raw soil conductivity in µS/cm.
    pub conductivity: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Sensor::new("C4:7C:8D:6A:12:34").to_string(), "C4:7C:8D:6A:12:34");
        assert_eq!(
            Sensor::named("Basil", "C4:7C:8D:6A:12:34").to_string(),
            "Basil (C4:7C:8D:6A:12:34)"
        );
        assert_eq!(
            Sensor::named("", "C4:7C:8D:6A:12:34").to_string(),
            "C4:7C:8D:6A:12:34"
        );
    }

    #[test]
    fn parse_shorthand() {
        assert_eq!(
            Sensor::parse("Basil=C4:7C:8D:6A:12:34").unwrap(),
            Sensor::named("Basil", "C4:7C:8D:6A:12:34")
        );
        assert_eq!(
            Sensor::parse("C4:7C:8D:6A:12:34").unwrap(),
            Sensor::new("C4:7C:8D:6A:12:34")
        );
        assert!(Sensor::parse("").is_err());
    }
}
