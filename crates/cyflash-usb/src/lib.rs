//! cyflash-usb - USB link to a bootloader
//!
//! The bootloader enumerates as VID 0x04B4 / PID 0xB71D with one OUT
//! endpoint (0x01) and one IN endpoint (0x82). Each request is written as a
//! single transfer and each response arrives as one 64-byte packet padded
//! after the stop byte.
//!
//! Devices are told apart by their USB serial-number string.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod device;

pub use device::{DeviceFilter, UsbDeviceInfo, UsbDiscoverer, UsbTransport};

/// OUT endpoint address
pub const OUT_EP: u8 = 0x01;
/// IN endpoint address
pub const IN_EP: u8 = 0x82;
/// Packet size of both endpoints
pub const PACKET_SIZE: usize = 64;
