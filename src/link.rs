//! Link selection
//!
//! Turns the `--mode`/`--serial`/`--port` options into an open transport,
//! running discovery with the configured retry policy.

use crate::cli::{LinkArgs, Mode};
use cyflash_core::{Config, Error, FirmwareImage, Result, SessionOptions, Transport};

/// Check that the selector a mode needs was given, returning it
pub fn device_selector(link: &LinkArgs) -> Result<String> {
    match link.mode {
        #[cfg(feature = "usb")]
        Mode::Usb => link
            .serial
            .clone()
            .ok_or_else(|| Error::Config("usb mode requires --serial".into())),
        #[cfg(feature = "serial")]
        Mode::Serial => link
            .port
            .clone()
            .ok_or_else(|| Error::Config("serial mode requires --port".into())),
        #[cfg(feature = "dummy")]
        Mode::Dummy => Ok(link.serial.clone().unwrap_or_default()),
    }
}

/// Session options from the configuration, with command-line overrides
pub fn session_options(link: &LinkArgs, config: &Config) -> Result<SessionOptions> {
    let mut options = config.session_options()?;
    if link.key.is_some() {
        options.key = link.key;
    }
    Ok(options)
}

/// Find the device and open a transport to it
///
/// `image` lets the emulated device report the silicon the image targets.
#[cfg_attr(not(feature = "dummy"), allow(unused_variables))]
pub fn open(
    link: &LinkArgs,
    config: &Config,
    image: Option<&FirmwareImage>,
) -> Result<Box<dyn Transport>> {
    let selector = device_selector(link)?;
    let policy = config.retry_policy();
    log::debug!(
        "Looking for {:?} device {:?} (up to {} attempts)",
        link.mode,
        selector,
        policy.max_attempts
    );

    match link.mode {
        #[cfg(feature = "usb")]
        Mode::Usb => {
            let mut discoverer = cyflash_usb::UsbDiscoverer {
                filter: cyflash_usb::DeviceFilter {
                    vendor_id: config.usb.vendor_id,
                    product_id: config.usb.product_id,
                },
            };
            let transport = policy.acquire(&mut discoverer, &selector)?;
            log::info!("Connected to bootloader at {}", transport.info());
            Ok(Box::new(transport))
        }
        #[cfg(feature = "serial")]
        Mode::Serial => {
            let mut discoverer = cyflash_serial::SerialDiscoverer {
                baud_rate: config.serial.baud_rate,
                read_timeout: config.serial_read_timeout(),
            };
            let transport = policy.acquire(&mut discoverer, &selector)?;
            log::info!("Connected to bootloader on {}", transport.name());
            Ok(Box::new(transport))
        }
        #[cfg(feature = "dummy")]
        Mode::Dummy => {
            let mut dummy_config = cyflash_dummy::DummyConfig {
                key: link.key.or(config.bootloader_key()?),
                ..Default::default()
            };
            if let Some(image) = image {
                dummy_config.silicon_id = image.silicon_id();
                dummy_config.silicon_rev = image.silicon_rev();
            }
            let device = cyflash_dummy::DummyBootloader::new(dummy_config);
            let mut discoverer = cyflash_dummy::DummyDiscoverer::new(&selector, device);
            Ok(Box::new(policy.acquire(&mut discoverer, &selector)?))
        }
    }
}
