//! Response status codes

use core::fmt;

/// Status byte carried in the second position of every response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Command completed
    Success,
    /// File is not accessible
    File,
    /// Reached the end of the file
    Eof,
    /// Amount of data is not what was expected
    Length,
    /// Data is not of the proper form
    Data,
    /// Command is not recognized
    Command,
    /// Expected device does not match the detected device
    Device,
    /// Bootloader version does not match
    Version,
    /// Checksum does not match the expected value
    Checksum,
    /// Flash array is not valid
    Array,
    /// Flash row is not valid
    Row,
    /// Bootloader is not ready to process commands
    Bootloader,
    /// Application is currently marked as active
    Active,
    /// Operation failed for an unknown reason
    Unknown,
    /// Operation was aborted
    Abort,
    /// Value not defined by the protocol
    Other(u8),
}

impl StatusCode {
    /// Raw status byte
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::File => 0x01,
            Self::Eof => 0x02,
            Self::Length => 0x03,
            Self::Data => 0x04,
            Self::Command => 0x05,
            Self::Device => 0x06,
            Self::Version => 0x07,
            Self::Checksum => 0x08,
            Self::Array => 0x09,
            Self::Row => 0x0A,
            Self::Bootloader => 0x0B,
            Self::Active => 0x0C,
            Self::Unknown => 0x0F,
            Self::Abort => 0xFF,
            Self::Other(code) => code,
        }
    }

    /// Whether this is the success status
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::File,
            0x02 => Self::Eof,
            0x03 => Self::Length,
            0x04 => Self::Data,
            0x05 => Self::Command,
            0x06 => Self::Device,
            0x07 => Self::Version,
            0x08 => Self::Checksum,
            0x09 => Self::Array,
            0x0A => Self::Row,
            0x0B => Self::Bootloader,
            0x0C => Self::Active,
            0x0F => Self::Unknown,
            0xFF => Self::Abort,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::File => "file is not accessible",
            Self::Eof => "end of file",
            Self::Length => "unexpected amount of data",
            Self::Data => "data is not of the proper form",
            Self::Command => "command not recognized",
            Self::Device => "device mismatch",
            Self::Version => "bootloader version mismatch",
            Self::Checksum => "checksum mismatch",
            Self::Array => "invalid flash array",
            Self::Row => "invalid flash row",
            Self::Bootloader => "bootloader not ready",
            Self::Active => "application is active",
            Self::Unknown => "unknown failure",
            Self::Abort => "operation aborted",
            Self::Other(_) => "undefined status",
        };
        write!(f, "{} (0x{:02X})", text, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_roundtrip_known() {
        for raw in [0x00u8, 0x03, 0x08, 0x0A, 0x0F, 0xFF] {
            assert_eq!(StatusCode::from(raw).code(), raw);
        }
        assert_eq!(StatusCode::from(0x42), StatusCode::Other(0x42));
        assert!(StatusCode::from(0).is_success());
        assert!(!StatusCode::from(0x0A).is_success());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StatusCode::Row.to_string(), "invalid flash row (0x0A)");
    }
}
