//! cyflash-core - Host side of the row-oriented bootloader protocol
//!
//! This crate holds everything needed to program a microcontroller through
//! its resident bootloader, independent of how bytes reach the device:
//!
//! - [`image`] - parser for `.cyacd` firmware images (header + rows)
//! - [`protocol`] - frame codec: request builders and typed response decoders
//! - [`transport`] - the byte-stream contract a link must provide, plus the
//!   device discovery contract and its retry policy
//! - [`session`] - the programming state machine driving a transport
//! - [`config`] - optional TOML configuration
//!
//! # Example
//!
//! ```ignore
//! use cyflash_core::{FirmwareImage, Session, SessionOptions, NoProgress};
//!
//! let image = FirmwareImage::from_file("app.cyacd")?;
//! let session = Session::new(transport, SessionOptions::default());
//! let report = session.program(&image, &mut NoProgress)?;
//! println!("programmed {} rows", report.rows_programmed);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod image;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{ChecksumFailure, Error, Result};
pub use image::{FirmwareImage, FormatError, Row};
pub use session::{
    DeviceInfo, NoProgress, ProgramProgress, Session, SessionOptions, SessionReport, SessionState,
};
pub use transport::{Discover, RetryPolicy, Transport, TransportError};
