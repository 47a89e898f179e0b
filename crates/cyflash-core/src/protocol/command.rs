//! Request builders

use core::fmt;
use core::str::FromStr;

use super::{
    Frame, ProtocolError, CMD_ENTER_BOOTLOADER, CMD_ERASE_ROW, CMD_EXIT_BOOTLOADER,
    CMD_GET_FLASH_SIZE, CMD_GET_ROW_CHECKSUM, CMD_PROGRAM_ROW, CMD_SEND_DATA,
    CMD_VERIFY_CHECKSUM, KEY_LEN,
};

/// Six-byte secret that unlocks a protected bootloader
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BootloaderKey(pub [u8; KEY_LEN]);

impl BootloaderKey {
    /// Build a key from a byte slice of exactly six bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| ProtocolError::KeyLength(bytes.len()))?;
        Ok(Self(key))
    }

    /// Key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl FromStr for BootloaderKey {
    type Err = ProtocolError;

    /// Parse a hex string such as `0A1B2C3D4E5F` (an optional `0x` prefix is accepted)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| ProtocolError::KeyHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

// Keep the secret out of logs
impl fmt::Debug for BootloaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BootloaderKey(******)")
    }
}

/// A bootloader request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Start a bootloader session, optionally presenting a key
    EnterBootloader {
        /// Key for protected bootloaders
        key: Option<BootloaderKey>,
    },
    /// Leave the bootloader and start the application (no response)
    ExitBootloader,
    /// Query the programmable row range of an array
    GetFlashSize {
        /// Flash array to query
        array_id: u8,
    },
    /// Buffer a chunk of row data on the device
    SendData {
        /// Chunk bytes
        data: &'a [u8],
    },
    /// Program a row from buffered data plus the trailing bytes given here
    ProgramRow {
        /// Flash array of the row
        array_id: u8,
        /// Row number
        row_num: u16,
        /// Last part of the row payload
        data: &'a [u8],
    },
    /// Read the device-side checksum of a row
    GetRowChecksum {
        /// Flash array of the row
        array_id: u8,
        /// Row number
        row_num: u16,
    },
    /// Erase a row
    EraseRow {
        /// Flash array of the row
        array_id: u8,
        /// Row number
        row_num: u16,
    },
    /// Ask the device to verify the whole application checksum
    VerifyAppChecksum,
}

impl<'a> Command<'a> {
    /// Command identifier
    pub fn code(&self) -> u8 {
        match self {
            Self::EnterBootloader { .. } => CMD_ENTER_BOOTLOADER,
            Self::ExitBootloader => CMD_EXIT_BOOTLOADER,
            Self::GetFlashSize { .. } => CMD_GET_FLASH_SIZE,
            Self::SendData { .. } => CMD_SEND_DATA,
            Self::ProgramRow { .. } => CMD_PROGRAM_ROW,
            Self::GetRowChecksum { .. } => CMD_GET_ROW_CHECKSUM,
            Self::EraseRow { .. } => CMD_ERASE_ROW,
            Self::VerifyAppChecksum => CMD_VERIFY_CHECKSUM,
        }
    }

    /// Human-readable command name
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnterBootloader { .. } => "EnterBootloader",
            Self::ExitBootloader => "ExitBootloader",
            Self::GetFlashSize { .. } => "GetFlashSize",
            Self::SendData { .. } => "SendData",
            Self::ProgramRow { .. } => "ProgramRow",
            Self::GetRowChecksum { .. } => "GetRowChecksum",
            Self::EraseRow { .. } => "EraseRow",
            Self::VerifyAppChecksum => "VerifyAppChecksum",
        }
    }

    /// Data length of the success response, `None` when no response is sent
    pub fn response_len(&self) -> Option<usize> {
        match self {
            Self::EnterBootloader { .. } => Some(8),
            Self::ExitBootloader => None,
            Self::GetFlashSize { .. } => Some(4),
            Self::GetRowChecksum { .. } | Self::VerifyAppChecksum => Some(1),
            Self::SendData { .. } | Self::ProgramRow { .. } | Self::EraseRow { .. } => Some(0),
        }
    }

    /// Request payload
    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Self::EnterBootloader { key } => key.map(|k| k.0.to_vec()).unwrap_or_default(),
            Self::ExitBootloader | Self::VerifyAppChecksum => Vec::new(),
            Self::GetFlashSize { array_id } => vec![array_id],
            Self::SendData { data } => data.to_vec(),
            Self::ProgramRow {
                array_id,
                row_num,
                data,
            } => {
                let mut payload = Vec::with_capacity(3 + data.len());
                payload.push(array_id);
                payload.extend_from_slice(&row_num.to_le_bytes());
                payload.extend_from_slice(data);
                payload
            }
            Self::GetRowChecksum { array_id, row_num } | Self::EraseRow { array_id, row_num } => {
                let [lo, hi] = row_num.to_le_bytes();
                vec![array_id, lo, hi]
            }
        }
    }

    /// Build the request frame
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Frame::new(self.code(), self.payload())
    }

    /// Build the request wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.to_frame()?.encode())
    }

    /// Interpret a decoded request frame
    pub fn from_frame(frame: &'a Frame) -> Result<Self, ProtocolError> {
        let payload = frame.payload.as_slice();
        let expect_len = |expected: usize| {
            if payload.len() == expected {
                Ok(())
            } else {
                Err(ProtocolError::LengthMismatch {
                    declared: payload.len(),
                    expected,
                })
            }
        };
        let row_address = || -> Result<(u8, u16), ProtocolError> {
            if payload.len() < 3 {
                return Err(ProtocolError::Truncated {
                    len: payload.len(),
                    needed: 3,
                });
            }
            Ok((payload[0], u16::from_le_bytes([payload[1], payload[2]])))
        };

        match frame.code {
            CMD_ENTER_BOOTLOADER => {
                let key = match payload.len() {
                    0 => None,
                    _ => Some(BootloaderKey::from_slice(payload)?),
                };
                Ok(Self::EnterBootloader { key })
            }
            CMD_EXIT_BOOTLOADER => {
                expect_len(0)?;
                Ok(Self::ExitBootloader)
            }
            CMD_VERIFY_CHECKSUM => {
                expect_len(0)?;
                Ok(Self::VerifyAppChecksum)
            }
            CMD_GET_FLASH_SIZE => {
                expect_len(1)?;
                Ok(Self::GetFlashSize {
                    array_id: payload[0],
                })
            }
            CMD_SEND_DATA => Ok(Self::SendData { data: payload }),
            CMD_PROGRAM_ROW => {
                let (array_id, row_num) = row_address()?;
                Ok(Self::ProgramRow {
                    array_id,
                    row_num,
                    data: &payload[3..],
                })
            }
            CMD_GET_ROW_CHECKSUM => {
                expect_len(3)?;
                let (array_id, row_num) = row_address()?;
                Ok(Self::GetRowChecksum { array_id, row_num })
            }
            CMD_ERASE_ROW => {
                expect_len(3)?;
                let (array_id, row_num) = row_address()?;
                Ok(Self::EraseRow { array_id, row_num })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}
