//! cyflash-serial - Serial-port link to a UART bootloader
//!
//! Opens a port at 115200 8N1 by default and exchanges one protocol frame
//! per transaction. Responses are reassembled from the byte stream using
//! the frame's length field, so a response split across several reads is
//! returned whole.
//!
//! # Example
//!
//! ```no_run
//! use cyflash_core::{NoProgress, FirmwareImage, RetryPolicy, Session, SessionOptions};
//! use cyflash_serial::SerialDiscoverer;
//!
//! let image = FirmwareImage::from_file("app.cyacd")?;
//! let mut ports = SerialDiscoverer::default();
//! let transport = RetryPolicy::default().acquire(&mut ports, "/dev/ttyUSB0")?;
//! Session::new(transport, SessionOptions::default()).program(&image, &mut NoProgress)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod transport;

pub use transport::{read_frame, SerialDiscoverer, SerialTransport};
