//! YAML configuration for the daemon mode (`serde` feature).
//!
//! The file carries the raw values as written by the user; validation into
//! the typed [`crate::protocol`] values happens in
//! [`Config::charger_config`], so a typo in the address or baud rate is
//! reported with the offending value instead of a deserialize error.
//!
//! ```yaml
//! charger:
//!   port: /dev/ttyUSB0
//!   slave: 1
//!   baudrate: 38400
//!   name: Carport
//!   timeout: 1s
//! poll_interval: 30s
//! ```

use crate::protocol as proto;
use crate::session::ChargerConfig;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    InvalidValue(#[from] proto::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargerSection {
    /// Serial port device path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    #[serde(default = "default_slave")]
    pub slave: u8,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    /// Optional display name for logs and status lines.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_slave() -> u8 {
    1
}

fn default_baudrate() -> u32 {
    38400
}

fn default_timeout() -> Duration {
    ChargerConfig::DEFAULT_TIMEOUT
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub charger: ChargerSection,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        log::debug!("loading config file from {path:?}");
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(&file)?)
    }

    /// Validates the raw charger section into typed connection parameters.
    pub fn charger_config(&self) -> Result<ChargerConfig, Error> {
        Ok(ChargerConfig {
            port: self.charger.port.clone(),
            address: proto::Address::try_from(self.charger.slave)?,
            baud_rate: proto::BaudRate::try_from(self.charger.baudrate)?,
            name: self.charger.name.clone(),
            timeout: self.charger.timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("charger:\n  port: /dev/ttyUSB0\n").unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(30));

        let charger = config.charger_config().unwrap();
        assert_eq!(charger.port, "/dev/ttyUSB0");
        assert_eq!(*charger.address, 1);
        assert_eq!(charger.baud_rate, proto::BaudRate::B38400);
        assert_eq!(charger.name, None);
        assert_eq!(charger.timeout, ChargerConfig::DEFAULT_TIMEOUT);
    }

    #[test]
    fn full_config_round_trip() {
        let yaml = "\
charger:
  port: /dev/ttyS1
  slave: 5
  baudrate: 19200
  name: Carport
  timeout: 2s
poll_interval: 10s
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));

        let charger = config.charger_config().unwrap();
        assert_eq!(charger.port, "/dev/ttyS1");
        assert_eq!(*charger.address, 5);
        assert_eq!(charger.baud_rate, proto::BaudRate::B19200);
        assert_eq!(charger.name.as_deref(), Some("Carport"));
        assert_eq!(charger.timeout, Duration::from_secs(2));
    }

    #[test]
    fn invalid_values_are_reported_with_the_offending_value() {
        let config: Config =
            serde_yaml::from_str("charger:\n  port: /dev/ttyUSB0\n  slave: 0\n").unwrap();
        assert_matches!(
            config.charger_config(),
            Err(Error::InvalidValue(proto::Error::AddressOutOfRange(0)))
        );

        let config: Config =
            serde_yaml::from_str("charger:\n  port: /dev/ttyUSB0\n  baudrate: 1200\n").unwrap();
        assert_matches!(
            config.charger_config(),
            Err(Error::InvalidValue(proto::Error::BaudRateNotSupported(1200)))
        );
    }
}
