//! Link abstraction and device discovery
//!
//! A [`Transport`] moves whole frames between host and bootloader. It is
//! half duplex: the session always writes one request and then reads one
//! response before doing anything else.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::{Error, Result};

/// Link-level failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response arrived within the read timeout
    #[error("timed out waiting for the device")]
    Timeout,
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),
    /// The link was already closed
    #[error("transport is closed")]
    Closed,
    /// The requested device or port does not exist
    #[error("device not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Byte link to a bootloader
pub trait Transport {
    /// Write one complete request frame
    ///
    /// All or nothing: `Ok` means every byte of `data` was handed to the
    /// link, so no byte count is returned. A short write is an error.
    fn write(&mut self, data: &[u8]) -> core::result::Result<(), TransportError>;

    /// Read one response frame into `buf`, returning the number of bytes read
    ///
    /// Blocks until a frame arrives or the link's read timeout expires.
    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, TransportError>;

    /// Release the link
    ///
    /// Called exactly once when a session ends. Closing twice is harmless.
    fn close(&mut self) -> core::result::Result<(), TransportError> {
        Ok(())
    }

    /// Largest frame the link carries in one transfer
    fn max_packet_size(&self) -> usize {
        crate::protocol::DEFAULT_PACKET_SIZE
    }

    /// Wait between a write and the matching read
    ///
    /// Links to emulated devices override this with a no-op.
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> core::result::Result<(), TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn close(&mut self) -> core::result::Result<(), TransportError> {
        (**self).close()
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> core::result::Result<(), TransportError> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn close(&mut self) -> core::result::Result<(), TransportError> {
        (**self).close()
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}

/// Finds a device by serial number (or port name) and opens a link to it
///
/// One call is one attempt; [`RetryPolicy`] owns the retries.
pub trait Discover {
    /// Link type produced on success
    type Transport: Transport;

    /// Look for the device once, `Ok(None)` when it is not present
    fn discover(
        &mut self,
        serial: &str,
    ) -> core::result::Result<Option<Self::Transport>, TransportError>;
}

/// Bounded retry schedule for discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
    /// Overall deadline measured from the first attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(200),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Run `discoverer` until it yields a link, attempts run out, or the deadline passes
    ///
    /// The first attempt runs immediately. Discovery errors count as a
    /// failed attempt and are logged; exhaustion yields [`Error::DeviceNotFound`].
    pub fn acquire<D: Discover>(&self, discoverer: &mut D, serial: &str) -> Result<D::Transport> {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0;

        while attempts < self.max_attempts {
            if attempts > 0 {
                if Instant::now() + self.delay > deadline {
                    log::debug!("discovery deadline reached after {} attempt(s)", attempts);
                    break;
                }
                std::thread::sleep(self.delay);
            }
            attempts += 1;

            match discoverer.discover(serial) {
                Ok(Some(transport)) => {
                    log::debug!("found device {:?} on attempt {}", serial, attempts);
                    return Ok(transport);
                }
                Ok(None) => {
                    log::debug!(
                        "device {:?} not present (attempt {}/{})",
                        serial,
                        attempts,
                        self.max_attempts
                    );
                }
                Err(e) => {
                    log::warn!("discovery attempt {} failed: {}", attempts, e);
                }
            }
        }

        Err(Error::DeviceNotFound {
            serial: serial.to_string(),
            attempts,
        })
    }
}
