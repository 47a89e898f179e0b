//! Error types for cyflash-core
//!
//! A programming session reports exactly one of these when it fails. Each
//! variant corresponds to one class of fatal condition; the orchestrator
//! never retries a transaction once a transport has been acquired.

use core::fmt;

use thiserror::Error;

use crate::image::FormatError;
use crate::protocol::ProtocolError;
use crate::transport::TransportError;

/// Details about a checksum disagreement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumFailure {
    /// The device's checksum of a freshly programmed row differs from the
    /// value derived from the image
    Row {
        /// Flash array of the row
        array_id: u8,
        /// Row number within the array
        row_num: u16,
        /// Checksum computed from the image record
        expected: u8,
        /// Checksum reported by the device
        actual: u8,
    },
    /// The device reported a zero application checksum after programming
    Application {
        /// Raw value returned by VerifyAppChecksum
        value: u8,
    },
}

impl fmt::Display for ChecksumFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Row {
                array_id,
                row_num,
                expected,
                actual,
            } => write!(
                f,
                "row checksum mismatch at array {} row {}: expected 0x{:02X}, device reported 0x{:02X}",
                array_id, row_num, expected, actual
            ),
            Self::Application { value } => write!(
                f,
                "application checksum verification failed (device returned 0x{:02X})",
                value
            ),
        }
    }
}

/// Session error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// The firmware image is malformed
    #[error("invalid firmware image: {0}")]
    Format(#[from] FormatError),

    /// No device with the requested serial number showed up in time
    #[error("device {serial:?} not found after {attempts} attempt(s)")]
    DeviceNotFound {
        /// Serial number or port that was searched for
        serial: String,
        /// Number of discovery attempts made
        attempts: u32,
    },

    /// The device reported a different silicon than the image targets
    #[error(
        "device mismatch: image targets silicon 0x{expected_id:08X} rev 0x{expected_rev:02X}, \
         device is 0x{found_id:08X} rev 0x{found_rev:02X}"
    )]
    DeviceMismatch {
        /// Silicon ID from the image header
        expected_id: u32,
        /// Silicon revision from the image header
        expected_rev: u8,
        /// Silicon ID reported by the bootloader
        found_id: u32,
        /// Silicon revision reported by the bootloader
        found_rev: u8,
    },

    /// A row lies outside the flash bounds reported for its array
    #[error("row {row_num} of array {array_id} is outside flash rows {start_row}..={end_row}")]
    OutOfRange {
        /// Flash array of the row
        array_id: u8,
        /// Offending row number
        row_num: u16,
        /// First programmable row reported by the device
        start_row: u16,
        /// Last programmable row reported by the device
        end_row: u16,
    },

    /// Malformed frame or non-success status from the device
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport-level I/O failure or timeout
    #[error("communication error: {0}")]
    Communication(#[from] TransportError),

    /// Row or application checksum disagreement
    #[error("{0}")]
    ChecksumMismatch(ChecksumFailure),

    /// Invalid configuration value or file
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the failure came from the link rather than the device or image
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_))
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
