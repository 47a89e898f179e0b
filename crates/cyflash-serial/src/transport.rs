//! Serial port transport

use std::io::{Read, Write};
use std::time::Duration;

use cyflash_core::config::{DEFAULT_BAUD_RATE, DEFAULT_SERIAL_TIMEOUT_MS};
use cyflash_core::protocol::{FRAME_OVERHEAD, START_OF_FRAME};
use cyflash_core::{Discover, Transport, TransportError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Header bytes before the payload: start, status, length
const HEADER_LEN: usize = 4;

fn map_serial_error(e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::NotFound(e.description),
        serialport::ErrorKind::Io(kind) => std::io::Error::new(kind, e.description).into(),
        _ => TransportError::Io(e.description),
    }
}

/// Read one response frame from a byte stream into `buf`
///
/// Reads the 4-byte header first, then the payload, checksum and stop byte
/// the length field announces. Stray bytes before the start byte are
/// dropped.
pub fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, TransportError> {
    if buf.len() < FRAME_OVERHEAD {
        return Err(TransportError::Io(format!(
            "receive buffer of {} bytes cannot hold a frame",
            buf.len()
        )));
    }

    loop {
        reader.read_exact(&mut buf[..1])?;
        if buf[0] == START_OF_FRAME {
            break;
        }
        log::trace!("serial: skipping stray byte 0x{:02X}", buf[0]);
    }
    reader.read_exact(&mut buf[1..HEADER_LEN])?;

    let len = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let total = FRAME_OVERHEAD + len;
    if total > buf.len() {
        return Err(TransportError::Io(format!(
            "response of {} bytes exceeds receive buffer of {}",
            total,
            buf.len()
        )));
    }
    reader.read_exact(&mut buf[HEADER_LEN..total])?;
    Ok(total)
}

/// Serial port link
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    /// Open `device` at `baud` 8N1 with the given read timeout
    pub fn open(device: &str, baud: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(map_serial_error)?;

        log::info!("Opened serial port {} at {} baud", device, baud);

        Ok(Self {
            port: Some(port),
            name: device.to_string(),
        })
    }

    /// Port name this link was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let port = self.port()?;
        read_frame(&mut **port, buf)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            log::debug!("serial: closed {}", self.name);
        }
        Ok(())
    }
}

/// Opens serial ports by name
///
/// The "serial number" handed to [`Discover::discover`] is the port path.
#[derive(Debug, Clone)]
pub struct SerialDiscoverer {
    /// Line speed
    pub baud_rate: u32,
    /// Per-read timeout
    pub read_timeout: Duration,
}

impl Default for SerialDiscoverer {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS),
        }
    }
}

impl Discover for SerialDiscoverer {
    type Transport = SerialTransport;

    fn discover(&mut self, port: &str) -> Result<Option<SerialTransport>, TransportError> {
        match SerialTransport::open(port, self.baud_rate, self.read_timeout) {
            Ok(transport) => Ok(Some(transport)),
            Err(TransportError::NotFound(reason)) => {
                log::debug!("serial: {} not available: {}", port, reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyflash_core::protocol::Frame;
    use std::io::Cursor;

    /// Returns at most `step` bytes per read, like a slow UART
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
            }
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_read_frame_reassembles() {
        let frame = Frame::new(0x00, vec![0x69, 0x11, 0x2E, 0x04, 0x11, 0x01, 0x1E, 0x01])
            .unwrap()
            .encode();
        let mut reader = Trickle {
            data: frame.clone(),
            pos: 0,
            step: 3,
        };
        let mut buf = [0u8; 64];
        let n = read_frame(&mut reader, &mut buf).unwrap();
        assert_eq!(&buf[..n], frame.as_slice());
    }

    #[test]
    fn test_read_frame_skips_noise_and_leaves_next_frame() {
        let first = Frame::new(0x00, vec![0x42]).unwrap().encode();
        let second = Frame::new(0x00, vec![]).unwrap().encode();
        let mut stream = vec![0x00, 0xFF];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);
        let mut reader = Cursor::new(stream);

        let mut buf = [0u8; 64];
        let n = read_frame(&mut reader, &mut buf).unwrap();
        assert_eq!(&buf[..n], first.as_slice());
        let n = read_frame(&mut reader, &mut buf).unwrap();
        assert_eq!(&buf[..n], second.as_slice());
    }

    #[test]
    fn test_read_frame_timeout() {
        let mut reader = Trickle {
            data: vec![0x01, 0x00],
            pos: 0,
            step: 1,
        };
        let mut buf = [0u8; 64];
        assert_eq!(
            read_frame(&mut reader, &mut buf),
            Err(TransportError::Timeout)
        );
    }

    #[test]
    fn test_read_frame_oversize() {
        let frame = Frame::new(0x00, vec![0; 100]).unwrap().encode();
        let mut reader = Cursor::new(frame);
        let mut buf = [0u8; 64];
        assert!(matches!(
            read_frame(&mut reader, &mut buf),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_closed_port() {
        let mut transport = SerialTransport {
            port: None,
            name: "/dev/ttyACM0".to_string(),
        };
        assert_eq!(transport.name(), "/dev/ttyACM0");
        assert_eq!(transport.write(&[0x01]), Err(TransportError::Closed));
        let mut buf = [0u8; 64];
        assert_eq!(transport.read(&mut buf), Err(TransportError::Closed));
        assert_eq!(transport.close(), Ok(()));
    }

    #[test]
    fn test_missing_port_is_not_found() {
        let mut ports = SerialDiscoverer::default();
        let found = ports.discover("/dev/cyflash-does-not-exist");
        // Depending on the platform this is reported as absent or as an I/O failure
        assert!(!matches!(found, Ok(Some(_))));
    }
}
