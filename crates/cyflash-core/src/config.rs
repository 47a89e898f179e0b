//! TOML configuration
//!
//! Every field is optional; missing values fall back to the protocol
//! defaults:
//!
//! ```toml
//! key = "0A1B2C3D4E5F"
//!
//! [protocol]
//! packet_size = 64
//! command_delay_ms = 25
//!
//! [discovery]
//! max_attempts = 10
//! retry_delay_ms = 200
//! timeout_ms = 5000
//!
//! [usb]
//! vendor_id = "0x04B4"
//! product_id = "0xB71D"
//!
//! [serial]
//! baud_rate = 115200
//! read_timeout_ms = 250
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::{BootloaderKey, DEFAULT_PACKET_SIZE, FRAME_OVERHEAD};
use crate::session::{SessionOptions, DEFAULT_COMMAND_DELAY};
use crate::transport::RetryPolicy;

/// Default USB vendor ID of the bootloader
pub const DEFAULT_VENDOR_ID: u16 = 0x04B4;
/// Default USB product ID of the bootloader
pub const DEFAULT_PRODUCT_ID: u16 = 0xB71D;
/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Default serial read timeout in milliseconds
pub const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 250;

/// Complete configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bootloader key as 12 hex digits
    pub key: Option<String>,
    /// Framing and pacing
    pub protocol: ProtocolConfig,
    /// Device discovery retries
    pub discovery: DiscoveryConfig,
    /// USB device identity
    pub usb: UsbConfig,
    /// Serial line settings
    pub serial: SerialConfig,
}

/// `[protocol]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolConfig {
    /// Largest frame per transfer
    pub packet_size: usize,
    /// Pause between write and read in milliseconds
    pub command_delay_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            command_delay_ms: DEFAULT_COMMAND_DELAY.as_millis() as u64,
        }
    }
}

/// `[discovery]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Overall deadline in milliseconds
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            retry_delay_ms: policy.delay.as_millis() as u64,
            timeout_ms: policy.timeout.as_millis() as u64,
        }
    }
}

/// `[usb]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UsbConfig {
    /// Vendor ID (hex string or integer)
    #[serde(deserialize_with = "deserialize_hex_u16")]
    pub vendor_id: u16,
    /// Product ID (hex string or integer)
    #[serde(deserialize_with = "deserialize_hex_u16")]
    pub product_id: u16,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
        }
    }
}

/// `[serial]` section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    /// Line speed
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_SERIAL_TIMEOUT_MS,
        }
    }
}

/// Deserialize a u16 that can be hex (0x...) or decimal
fn deserialize_hex_u16<'de, D>(deserializer: D) -> core::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Int(u16),
        Str(String),
    }

    match HexOrInt::deserialize(deserializer)? {
        HexOrInt::Int(n) => Ok(n),
        HexOrInt::Str(s) => parse_u16(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a u16 that can be hex (0x...) or decimal
pub fn parse_u16(s: &str) -> core::result::Result<u16, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

impl Config {
    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let packet = self.protocol.packet_size;
        if packet <= FRAME_OVERHEAD || packet > u16::MAX as usize + FRAME_OVERHEAD {
            return Err(Error::Config(format!(
                "packet_size {} must be between {} and {}",
                packet,
                FRAME_OVERHEAD + 1,
                u16::MAX as usize + FRAME_OVERHEAD
            )));
        }
        if self.discovery.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(Error::Config("baud_rate must be non-zero".into()));
        }
        self.bootloader_key()?;
        Ok(())
    }

    /// Decoded bootloader key, if one is configured
    pub fn bootloader_key(&self) -> Result<Option<BootloaderKey>> {
        self.key
            .as_deref()
            .map(|k| {
                k.parse::<BootloaderKey>()
                    .map_err(|e| Error::Config(e.to_string()))
            })
            .transpose()
    }

    /// Session settings derived from this configuration
    pub fn session_options(&self) -> Result<SessionOptions> {
        Ok(SessionOptions {
            packet_size: self.protocol.packet_size,
            command_delay: Duration::from_millis(self.protocol.command_delay_ms),
            key: self.bootloader_key()?,
        })
    }

    /// Discovery retry schedule
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.discovery.max_attempts,
            delay: Duration::from_millis(self.discovery.retry_delay_ms),
            timeout: Duration::from_millis(self.discovery.timeout_ms),
        }
    }

    /// Serial read timeout
    pub fn serial_read_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.usb.vendor_id, 0x04B4);
        assert_eq!(config.usb.product_id, 0xB71D);
        assert_eq!(config.retry_policy(), RetryPolicy::default());

        let options = config.session_options().unwrap();
        assert_eq!(options.packet_size, 64);
        assert_eq!(options.command_delay, Duration::from_millis(25));
        assert!(options.key.is_none());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml_str(
            r#"
            key = "0A1B2C3D4E5F"

            [protocol]
            packet_size = 32
            command_delay_ms = 10

            [discovery]
            max_attempts = 3
            retry_delay_ms = 50
            timeout_ms = 1000

            [usb]
            vendor_id = "0x1234"
            product_id = 43981

            [serial]
            baud_rate = 57600
            read_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.usb.vendor_id, 0x1234);
        assert_eq!(config.usb.product_id, 0xABCD);
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial_read_timeout(), Duration::from_millis(500));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_millis(50));

        let options = config.session_options().unwrap();
        assert_eq!(options.packet_size, 32);
        assert_eq!(
            options.key.map(|k| *k.as_bytes()),
            Some([0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F])
        );
    }

    #[test]
    fn test_invalid_values() {
        for text in [
            "key = \"0A1B\"",
            "key = \"zz1B2C3D4E5F\"",
            "[protocol]\npacket_size = 7",
            "[discovery]\nmax_attempts = 0",
            "[usb]\nvendor_id = \"0xGGGG\"",
            "[serial]\nparity = \"even\"",
        ] {
            assert!(
                matches!(Config::from_toml_str(text), Err(Error::Config(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nbaud_rate = 9600").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);

        assert!(matches!(
            Config::from_file("/nonexistent/cyflash.toml"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("0x04b4"), Ok(0x04B4));
        assert_eq!(parse_u16("1204"), Ok(1204));
        assert!(parse_u16("70000").is_err());
    }
}
