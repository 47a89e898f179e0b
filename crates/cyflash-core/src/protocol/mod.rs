//! Bootloader wire protocol
//!
//! Every request and response is one frame:
//!
//! ```text
//! [0x01][code][len_lo][len_hi][payload ...][chk_lo][chk_hi][0x17]
//! ```
//!
//! `code` is the command identifier in a request and the status byte in a
//! response. The checksum is the 16-bit two's complement of the byte sum of
//! everything before it (see [`checksum`]).

mod command;
mod frame;
mod response;
mod status;

pub use command::{BootloaderKey, Command};
pub use frame::{checksum, Frame};
pub use response::{decode_ack, decode_checksum, BootloaderInfo, FlashBounds};
pub use status::StatusCode;

use thiserror::Error;

/// First byte of every frame
pub const START_OF_FRAME: u8 = 0x01;
/// Last byte of every frame
pub const END_OF_FRAME: u8 = 0x17;
/// Bytes a frame adds around its payload
pub const FRAME_OVERHEAD: usize = 7;
/// Largest frame the USB and serial links carry in one transfer
pub const DEFAULT_PACKET_SIZE: usize = 64;
/// Length of the optional bootloader key
pub const KEY_LEN: usize = 6;

// Command identifiers
/// Verify the checksum of the whole bootloadable application
pub const CMD_VERIFY_CHECKSUM: u8 = 0x31;
/// Query the first and last programmable row of a flash array
pub const CMD_GET_FLASH_SIZE: u8 = 0x32;
/// Erase one row
pub const CMD_ERASE_ROW: u8 = 0x34;
/// Buffer data on the device without programming it yet
pub const CMD_SEND_DATA: u8 = 0x37;
/// Enter the bootloader; all other commands are ignored until this is sent
pub const CMD_ENTER_BOOTLOADER: u8 = 0x38;
/// Program one row from the buffered data plus this frame's payload
pub const CMD_PROGRAM_ROW: u8 = 0x39;
/// Read back the checksum of one row
pub const CMD_GET_ROW_CHECKSUM: u8 = 0x3A;
/// Leave the bootloader and start the application
pub const CMD_EXIT_BOOTLOADER: u8 = 0x3B;

/// Frame encoding/decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The device answered with a non-success status byte
    #[error("device reported error: {0}")]
    DeviceStatus(StatusCode),

    /// The frame does not begin with the start byte
    #[error("bad start byte 0x{0:02X}")]
    BadStart(u8),

    /// The frame does not end with the stop byte
    #[error("bad stop byte 0x{0:02X}")]
    BadStop(u8),

    /// The length field disagrees with what was expected
    #[error("length field is {declared}, expected {expected}")]
    LengthMismatch {
        /// Value of the length field
        declared: usize,
        /// Length the frame actually carries or the command defines
        expected: usize,
    },

    /// Fewer bytes than a complete frame
    #[error("frame truncated: got {len} bytes, need {needed}")]
    Truncated {
        /// Bytes available
        len: usize,
        /// Bytes required
        needed: usize,
    },

    /// The checksum field does not match the frame contents
    #[error("frame checksum 0x{found:04X}, computed 0x{computed:04X}")]
    BadChecksum {
        /// Checksum carried by the frame
        found: u16,
        /// Checksum computed over the frame
        computed: u16,
    },

    /// Unknown command identifier in a request frame
    #[error("unknown command 0x{0:02X}")]
    UnknownCommand(u8),

    /// Bootloader key of the wrong length
    #[error("bootloader key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),

    /// Bootloader key is not valid hex
    #[error("bootloader key is not valid hex: {0}")]
    KeyHex(String),

    /// Payload does not fit the 16-bit length field
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}
