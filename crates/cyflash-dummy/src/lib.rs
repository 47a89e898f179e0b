//! cyflash-dummy - In-memory bootloader emulator for testing
//!
//! [`DummyBootloader`] implements [`Transport`] by decoding each request
//! frame, applying it to an in-memory flash and queueing a framed response.
//! Faults can be injected to exercise every failure path of a session
//! without hardware.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use std::collections::BTreeMap;
use std::time::Duration;

use cyflash_core::protocol::{
    BootloaderKey, Command, Frame, FlashBounds, ProtocolError, StatusCode, FRAME_OVERHEAD,
};
use cyflash_core::{Discover, Transport, TransportError};

/// Request bytes the device buffers across SendData frames
const MAX_BUFFERED: usize = 1024;

/// Injected failures
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Report a wrong checksum for this (array, row)
    pub corrupt_row_checksum: Option<(u8, u16)>,
    /// Report zero from VerifyAppChecksum
    pub zero_app_checksum: bool,
    /// Answer every request with this command code using the given status
    pub fail_command: Option<(u8, StatusCode)>,
    /// Stop answering after this many responses
    pub silent_after: Option<usize>,
}

/// Configuration for the emulated device
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Silicon ID reported by EnterBootloader
    pub silicon_id: u32,
    /// Silicon revision reported by EnterBootloader
    pub silicon_rev: u8,
    /// Bootloader version (24 bits)
    pub bootloader_version: u32,
    /// Programmable row range per flash array
    pub arrays: BTreeMap<u8, FlashBounds>,
    /// Key EnterBootloader must present
    pub key: Option<BootloaderKey>,
    /// Injected failures
    pub faults: Faults,
}

impl Default for DummyConfig {
    fn default() -> Self {
        let bounds = FlashBounds {
            start_row: 0,
            end_row: 255,
        };
        Self {
            silicon_id: 0x2E12_3069, // CY8C5888
            silicon_rev: 0x00,
            bootloader_version: 0x01_1E01,
            arrays: [(0, bounds), (1, bounds)].into_iter().collect(),
            key: None,
            faults: Faults::default(),
        }
    }
}

/// Emulated bootloader
pub struct DummyBootloader {
    config: DummyConfig,
    flash: BTreeMap<(u8, u16), Vec<u8>>,
    buffer: Vec<u8>,
    pending: Option<Vec<u8>>,
    active: bool,
    exited: bool,
    closed: bool,
    requests: Vec<u8>,
    responses: usize,
}

impl DummyBootloader {
    /// Create an emulator with empty flash
    pub fn new(config: DummyConfig) -> Self {
        Self {
            config,
            flash: BTreeMap::new(),
            buffer: Vec::new(),
            pending: None,
            active: false,
            exited: false,
            closed: false,
            requests: Vec::new(),
            responses: 0,
        }
    }

    /// Create an emulator with the default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Contents of a programmed row
    pub fn row(&self, array_id: u8, row_num: u16) -> Option<&[u8]> {
        self.flash.get(&(array_id, row_num)).map(Vec::as_slice)
    }

    /// Number of programmed rows
    pub fn programmed_rows(&self) -> usize {
        self.flash.len()
    }

    /// Command codes received, in order
    pub fn requests(&self) -> &[u8] {
        &self.requests
    }

    /// Whether ExitBootloader was received
    pub fn exited(&self) -> bool {
        self.exited
    }

    /// Whether the link was closed
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Checksum the device reports for a row: two's complement of its byte sum
    pub fn row_checksum(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)).wrapping_neg()
    }

    fn respond(&mut self, status: StatusCode, data: Vec<u8>) {
        if let Some(limit) = self.config.faults.silent_after {
            if self.responses >= limit {
                log::debug!("dummy: staying silent");
                return;
            }
        }
        self.responses += 1;
        // Response data is at most 8 bytes
        if let Ok(frame) = Frame::new(status.code(), data) {
            self.pending = Some(frame.encode());
        }
    }

    fn handle(&mut self, cmd: Command<'_>) -> Result<Vec<u8>, StatusCode> {
        if let Some((code, status)) = self.config.faults.fail_command {
            if code == cmd.code() {
                return Err(status);
            }
        }

        if let Command::EnterBootloader { key } = cmd {
            if self.config.key.is_some() && key != self.config.key {
                log::debug!("dummy: wrong bootloader key");
                return Err(StatusCode::Data);
            }
            self.active = true;
            self.buffer.clear();
            let mut data = self.config.silicon_id.to_le_bytes().to_vec();
            data.push(self.config.silicon_rev);
            data.extend_from_slice(&self.config.bootloader_version.to_le_bytes()[..3]);
            return Ok(data);
        }
        if !self.active {
            return Err(StatusCode::Bootloader);
        }

        match cmd {
            Command::GetFlashSize { array_id } => {
                let bounds = self.bounds(array_id)?;
                let mut data = bounds.start_row.to_le_bytes().to_vec();
                data.extend_from_slice(&bounds.end_row.to_le_bytes());
                Ok(data)
            }
            Command::SendData { data } => {
                if self.buffer.len() + data.len() > MAX_BUFFERED {
                    self.buffer.clear();
                    return Err(StatusCode::Length);
                }
                self.buffer.extend_from_slice(data);
                Ok(Vec::new())
            }
            Command::ProgramRow {
                array_id,
                row_num,
                data,
            } => {
                let mut row = std::mem::take(&mut self.buffer);
                self.check_row(array_id, row_num)?;
                row.extend_from_slice(data);
                log::debug!(
                    "dummy: programmed array {} row {} ({} bytes)",
                    array_id,
                    row_num,
                    row.len()
                );
                self.flash.insert((array_id, row_num), row);
                Ok(Vec::new())
            }
            Command::GetRowChecksum { array_id, row_num } => {
                self.check_row(array_id, row_num)?;
                let data = self
                    .flash
                    .get(&(array_id, row_num))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                let mut checksum = Self::row_checksum(data);
                if self.config.faults.corrupt_row_checksum == Some((array_id, row_num)) {
                    checksum = checksum.wrapping_add(1);
                }
                Ok(vec![checksum])
            }
            Command::EraseRow { array_id, row_num } => {
                self.check_row(array_id, row_num)?;
                self.flash.remove(&(array_id, row_num));
                Ok(Vec::new())
            }
            Command::VerifyAppChecksum => {
                let valid = !self.flash.is_empty() && !self.config.faults.zero_app_checksum;
                Ok(vec![u8::from(valid)])
            }
            Command::EnterBootloader { .. } | Command::ExitBootloader => Ok(Vec::new()),
        }
    }

    fn bounds(&self, array_id: u8) -> Result<FlashBounds, StatusCode> {
        self.config
            .arrays
            .get(&array_id)
            .copied()
            .ok_or(StatusCode::Array)
    }

    fn check_row(&self, array_id: u8, row_num: u16) -> Result<(), StatusCode> {
        if self.bounds(array_id)?.contains(row_num) {
            Ok(())
        } else {
            Err(StatusCode::Row)
        }
    }
}

impl Transport for DummyBootloader {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.pending = None;

        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("dummy: rejected frame: {}", e);
                let status = match e {
                    ProtocolError::BadChecksum { .. } => StatusCode::Checksum,
                    _ => StatusCode::Data,
                };
                self.respond(status, Vec::new());
                return Ok(());
            }
        };
        self.requests.push(frame.code);

        let cmd = match Command::from_frame(&frame) {
            Ok(cmd) => cmd,
            Err(ProtocolError::UnknownCommand(_)) => {
                self.respond(StatusCode::Command, Vec::new());
                return Ok(());
            }
            Err(_) => {
                self.respond(StatusCode::Length, Vec::new());
                return Ok(());
            }
        };
        log::trace!("dummy: {}", cmd.name());

        if cmd == Command::ExitBootloader {
            self.active = false;
            self.exited = true;
            self.buffer.clear();
            return Ok(());
        }

        match self.handle(cmd) {
            Ok(data) => self.respond(StatusCode::Success, data),
            Err(status) => self.respond(status, Vec::new()),
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let response = self.pending.take().ok_or(TransportError::Timeout)?;
        if response.len() > buf.len() {
            return Err(TransportError::Io(format!(
                "response of {} bytes exceeds buffer of {}",
                response.len(),
                buf.len()
            )));
        }
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }

    fn delay(&mut self, _duration: Duration) {}
}

/// Hands out one emulated device when asked for its serial number
pub struct DummyDiscoverer {
    serial: String,
    device: Option<DummyBootloader>,
}

impl DummyDiscoverer {
    /// Offer `device` under `serial`
    pub fn new(serial: &str, device: DummyBootloader) -> Self {
        Self {
            serial: serial.to_string(),
            device: Some(device),
        }
    }
}

impl Discover for DummyDiscoverer {
    type Transport = DummyBootloader;

    fn discover(&mut self, serial: &str) -> Result<Option<DummyBootloader>, TransportError> {
        if serial.is_empty() || serial == self.serial {
            Ok(self.device.take())
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyflash_core::protocol::{
        CMD_ENTER_BOOTLOADER, CMD_EXIT_BOOTLOADER, CMD_GET_ROW_CHECKSUM, CMD_PROGRAM_ROW,
        CMD_SEND_DATA,
    };
    use cyflash_core::{
        ChecksumFailure, Error, FirmwareImage, NoProgress, RetryPolicy, Session, SessionOptions,
    };

    /// One `.cyacd` row line with a valid record checksum
    fn row_line(array_id: u8, row_num: u16, data: &[u8]) -> String {
        let mut record = vec![array_id];
        record.extend_from_slice(&row_num.to_be_bytes());
        record.extend_from_slice(&(data.len() as u16).to_be_bytes());
        record.extend_from_slice(data);
        let sum = record.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let mut line = String::from(":");
        for b in record.iter().chain(std::iter::once(&sum.wrapping_neg())) {
            line.push_str(&format!("{:02X}", b));
        }
        line
    }

    fn image_text(silicon_id: u32, silicon_rev: u8, rows: &[(u8, u16, Vec<u8>)]) -> String {
        let mut text = format!("{:08X}{:02X}00\n", silicon_id, silicon_rev);
        for (array_id, row_num, data) in rows {
            text.push_str(&row_line(*array_id, *row_num, data));
            text.push('\n');
        }
        text
    }

    fn sample_rows(count: u16) -> Vec<(u8, u16, Vec<u8>)> {
        (0..count)
            .map(|i| {
                let data = (0..128u8)
                    .map(|b| b.wrapping_mul(3).wrapping_add(i as u8))
                    .collect();
                (0u8, 16 + i, data)
            })
            .collect()
    }

    fn sample_image(config: &DummyConfig, rows: u16) -> FirmwareImage {
        FirmwareImage::parse(&image_text(
            config.silicon_id,
            config.silicon_rev,
            &sample_rows(rows),
        ))
        .unwrap()
    }

    #[test]
    fn test_program_image() {
        let mut dev = DummyBootloader::new_default();
        let image = sample_image(dev.config(), 4);

        let report = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap();

        assert_eq!(report.rows_programmed, 4);
        assert_eq!(report.app_checksum, 1);
        assert_eq!(dev.programmed_rows(), 4);
        for row in image.rows() {
            assert_eq!(dev.row(row.array_id(), row.row_num()), Some(row.data()));
        }
        assert!(dev.exited());
        assert!(dev.closed());
    }

    #[test]
    fn test_image_checksum_matches_device() {
        // The record checksum plus the address fields cancels out to the device's data checksum
        let image = sample_image(&DummyConfig::default(), 3);
        for row in image.rows() {
            assert_eq!(
                row.expected_device_checksum(),
                DummyBootloader::row_checksum(row.data())
            );
        }
    }

    #[test]
    fn test_row_checksum_mismatch_stops_before_next_row() {
        let mut config = DummyConfig::default();
        config.faults.corrupt_row_checksum = Some((0, 17));
        let image = sample_image(&config, 3);
        let mut dev = DummyBootloader::new(config);

        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ChecksumMismatch(ChecksumFailure::Row { row_num: 17, .. })
        ));
        assert!(dev.row(0, 18).is_none());
        assert_eq!(dev.programmed_rows(), 2);
        assert_eq!(*dev.requests().last().unwrap(), CMD_EXIT_BOOTLOADER);
    }

    #[test]
    fn test_silicon_mismatch() {
        let mut dev = DummyBootloader::new_default();
        let image = FirmwareImage::parse(&image_text(0x1234_5678, 0, &sample_rows(2))).unwrap();

        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::DeviceMismatch { .. }));
        assert_eq!(dev.programmed_rows(), 0);
        assert_eq!(dev.requests(), &[CMD_ENTER_BOOTLOADER, CMD_EXIT_BOOTLOADER]);
        assert!(dev.exited());
    }

    #[test]
    fn test_zero_app_checksum() {
        let mut config = DummyConfig::default();
        config.faults.zero_app_checksum = true;
        let image = sample_image(&config, 2);
        let mut dev = DummyBootloader::new(config);

        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::ChecksumMismatch(ChecksumFailure::Application { value: 0 })
        ));
        assert!(!err.is_communication());
        assert_eq!(dev.programmed_rows(), 2);
        assert!(dev.exited());
    }

    #[test]
    fn test_program_row_refused() {
        let mut config = DummyConfig::default();
        config.faults.fail_command = Some((CMD_PROGRAM_ROW, StatusCode::Row));
        let image = sample_image(&config, 2);
        let mut dev = DummyBootloader::new(config);

        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::DeviceStatus(StatusCode::Row))
        ));
        assert!(!dev.requests().contains(&CMD_GET_ROW_CHECKSUM));
        assert!(dev.exited());
    }

    #[test]
    fn test_device_goes_silent() {
        let mut config = DummyConfig::default();
        config.faults.silent_after = Some(3);
        let image = sample_image(&config, 2);
        let mut dev = DummyBootloader::new(config);

        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();

        assert!(matches!(err, Error::Communication(TransportError::Timeout)));
        assert!(dev.exited());
    }

    #[test]
    fn test_out_of_range_row() {
        let mut config = DummyConfig::default();
        config.arrays.insert(
            0,
            FlashBounds {
                start_row: 0,
                end_row: 16,
            },
        );
        let image = sample_image(&config, 2);
        let mut dev = DummyBootloader::new(config);

        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OutOfRange {
                row_num: 17,
                end_row: 16,
                ..
            }
        ));
        assert_eq!(dev.programmed_rows(), 1);
    }

    #[test]
    fn test_key_required() {
        let key = BootloaderKey([1, 2, 3, 4, 5, 6]);
        let config = DummyConfig {
            key: Some(key),
            ..Default::default()
        };
        let image = sample_image(&config, 1);

        let mut dev = DummyBootloader::new(config.clone());
        let err = Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::DeviceStatus(StatusCode::Data))
        ));

        let mut dev = DummyBootloader::new(config);
        let options = SessionOptions {
            key: Some(key),
            ..Default::default()
        };
        Session::new(&mut dev, options)
            .program(&image, &mut NoProgress)
            .unwrap();
        assert_eq!(dev.programmed_rows(), 1);
    }

    #[test]
    fn test_small_packets_split_rows() {
        let mut dev = DummyBootloader::new_default();
        let image = sample_image(dev.config(), 1);
        let options = SessionOptions {
            packet_size: 32,
            ..Default::default()
        };
        Session::new(&mut dev, options)
            .program(&image, &mut NoProgress)
            .unwrap();

        // 128 bytes in 25-byte chunks: five SendData, then ProgramRow with the last 3
        let sends = dev.requests().iter().filter(|&&c| c == CMD_SEND_DATA).count();
        assert_eq!(sends, 5);
        assert_eq!(dev.row(0, 16), Some(image.rows()[0].data()));
    }

    #[test]
    fn test_erase_and_verify() {
        let mut dev = DummyBootloader::new_default();
        let image = sample_image(dev.config(), 3);
        Session::new(&mut dev, SessionOptions::default())
            .program(&image, &mut NoProgress)
            .unwrap();

        // Reopen the link for the next session
        dev.closed = false;
        let value = Session::new(&mut dev, SessionOptions::default())
            .verify_app()
            .unwrap();
        assert_eq!(value, 1);

        dev.closed = false;
        let erased = Session::new(&mut dev, SessionOptions::default())
            .erase(0)
            .unwrap();
        assert_eq!(erased, 256);
        assert_eq!(dev.programmed_rows(), 0);

        dev.closed = false;
        let err = Session::new(&mut dev, SessionOptions::default())
            .verify_app()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ChecksumMismatch(ChecksumFailure::Application { value: 0 })
        ));
    }

    #[test]
    fn test_device_info() {
        let mut dev = DummyBootloader::new_default();
        let info = Session::new(&mut dev, SessionOptions::default())
            .device_info(&[0, 1])
            .unwrap();
        assert_eq!(info.bootloader.silicon_id, dev.config().silicon_id);
        assert_eq!(info.bootloader.version_string(), "1.30.1");
        assert_eq!(info.arrays.len(), 2);

        dev.closed = false;
        let err = Session::new(&mut dev, SessionOptions::default())
            .device_info(&[7])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::DeviceStatus(StatusCode::Array))
        ));
    }

    #[test]
    fn test_requests_before_enter_rejected() {
        let mut dev = DummyBootloader::new_default();
        let frame = Command::GetFlashSize { array_id: 0 }.encode().unwrap();
        dev.write(&frame).unwrap();
        let mut buf = [0u8; 64];
        let n = dev.read(&mut buf).unwrap();
        assert_eq!(buf[1], StatusCode::Bootloader.code());
        assert_eq!(n, FRAME_OVERHEAD);
    }

    #[test]
    fn test_corrupt_request_frame() {
        let mut dev = DummyBootloader::new_default();
        let mut frame = Command::VerifyAppChecksum.encode().unwrap();
        frame[4] ^= 0xFF;
        dev.write(&frame).unwrap();
        let mut buf = [0u8; 64];
        dev.read(&mut buf).unwrap();
        assert_eq!(buf[1], StatusCode::Checksum.code());
    }

    #[test]
    fn test_restart() {
        let mut dev = DummyBootloader::new_default();
        Session::new(&mut dev, SessionOptions::default())
            .restart()
            .unwrap();
        assert_eq!(dev.requests(), &[CMD_EXIT_BOOTLOADER]);
        assert!(dev.closed());
    }

    #[test]
    fn test_discovery() {
        let policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(1),
        };
        let mut found = DummyDiscoverer::new("SN-1", DummyBootloader::new_default());
        assert!(policy.acquire(&mut found, "SN-2").is_err());
        let dev = policy.acquire(&mut found, "SN-1").unwrap();
        assert!(!dev.exited());
    }
}
