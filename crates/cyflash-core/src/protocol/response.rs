//! Typed response decoding
//!
//! Every decoder validates the frame envelope the same way before looking at
//! the data: start byte, status byte, declared length against the length the
//! command defines, then the stop byte. A non-success status is reported as
//! [`ProtocolError::DeviceStatus`] so callers can tell a device-side refusal
//! apart from a garbled frame.
//!
//! The response checksum is not verified.

use super::{ProtocolError, StatusCode, END_OF_FRAME, FRAME_OVERHEAD, START_OF_FRAME};

/// Offset of the first data byte in a frame
const DATA_OFFSET: usize = 4;

/// Validate a response envelope and return its data bytes
fn parse_frame(buf: &[u8], expected_len: usize) -> Result<&[u8], ProtocolError> {
    if buf.len() < DATA_OFFSET {
        return Err(ProtocolError::Truncated {
            len: buf.len(),
            needed: FRAME_OVERHEAD + expected_len,
        });
    }
    if buf[0] != START_OF_FRAME {
        return Err(ProtocolError::BadStart(buf[0]));
    }

    let status = StatusCode::from(buf[1]);
    if !status.is_success() {
        return Err(ProtocolError::DeviceStatus(status));
    }

    let declared = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    if declared != expected_len {
        return Err(ProtocolError::LengthMismatch {
            declared,
            expected: expected_len,
        });
    }

    let total = FRAME_OVERHEAD + expected_len;
    if buf.len() < total {
        return Err(ProtocolError::Truncated {
            len: buf.len(),
            needed: total,
        });
    }
    if buf[total - 1] != END_OF_FRAME {
        return Err(ProtocolError::BadStop(buf[total - 1]));
    }

    Ok(&buf[DATA_OFFSET..DATA_OFFSET + expected_len])
}

/// Identity reported by EnterBootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderInfo {
    /// Silicon ID of the target
    pub silicon_id: u32,
    /// Silicon revision of the target
    pub silicon_rev: u8,
    /// Bootloader version (24 bits)
    pub bootloader_version: u32,
}

impl BootloaderInfo {
    /// Data length of the response
    pub const LEN: usize = 8;

    /// Decode an EnterBootloader response
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let data = parse_frame(buf, Self::LEN)?;
        Ok(Self {
            silicon_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            silicon_rev: data[4],
            bootloader_version: u32::from_le_bytes([data[5], data[6], data[7], 0]),
        })
    }

    /// Version formatted as `major.minor.patch` from its three bytes
    pub fn version_string(&self) -> String {
        let [patch, minor, major, _] = self.bootloader_version.to_le_bytes();
        format!("{}.{}.{}", major, minor, patch)
    }
}

/// Programmable row range of one flash array (inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashBounds {
    /// First programmable row
    pub start_row: u16,
    /// Last programmable row
    pub end_row: u16,
}

impl FlashBounds {
    /// Data length of the response
    pub const LEN: usize = 4;

    /// Decode a GetFlashSize response
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let data = parse_frame(buf, Self::LEN)?;
        Ok(Self {
            start_row: u16::from_le_bytes([data[0], data[1]]),
            end_row: u16::from_le_bytes([data[2], data[3]]),
        })
    }

    /// Whether `row_num` can be programmed
    pub fn contains(&self, row_num: u16) -> bool {
        (self.start_row..=self.end_row).contains(&row_num)
    }

    /// Rows in the range
    pub fn row_count(&self) -> usize {
        (self.end_row as usize + 1).saturating_sub(self.start_row as usize)
    }
}

/// Decode a response that only carries a status (SendData, ProgramRow, EraseRow)
pub fn decode_ack(buf: &[u8]) -> Result<(), ProtocolError> {
    parse_frame(buf, 0).map(|_| ())
}

/// Decode a single checksum byte (GetRowChecksum, VerifyAppChecksum)
pub fn decode_checksum(buf: &[u8]) -> Result<u8, ProtocolError> {
    parse_frame(buf, 1).map(|data| data[0])
}
