//! Programming session state machine
//!
//! A [`Session`] owns a [`Transport`] for its whole lifetime. Each public
//! operation consumes the session, runs its transactions strictly in order
//! (write, pacing delay, read), and always finishes by sending
//! ExitBootloader and closing the link, whether it succeeded or not. The
//! first fatal error wins; cleanup failures are only logged.

mod progress;

pub use progress::{NoProgress, ProgramProgress};

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{ChecksumFailure, Error, Result};
use crate::image::{FirmwareImage, Row};
use crate::protocol::{
    decode_ack, decode_checksum, BootloaderInfo, BootloaderKey, Command, FlashBounds,
    DEFAULT_PACKET_SIZE, FRAME_OVERHEAD,
};
use crate::transport::{Discover, RetryPolicy, Transport};
use progress::ProgressLog;

/// Pause between writing a request and reading its response
pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_millis(25);

/// Largest response the protocol defines (EnterBootloader)
const MAX_RESPONSE_LEN: usize = FRAME_OVERHEAD + BootloaderInfo::LEN;

/// Where a session currently is
///
/// Discovery runs before a session exists (see [`Session::connect`]), so
/// every session starts in `Idle` with its link already acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Link acquired, nothing sent yet
    Idle,
    /// Waiting for the EnterBootloader response
    EnteringBootloader,
    /// Device identity confirmed against the image
    DeviceVerified,
    /// Transferring one row (index into the image's rows)
    Programming {
        /// Index of the row being programmed
        row_index: usize,
    },
    /// Erasing one row
    Erasing {
        /// Row being erased
        row_num: u16,
    },
    /// Waiting for the application checksum
    AppVerifying,
    /// Sending the final ExitBootloader
    ExitingBootloader,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::EnteringBootloader => write!(f, "entering bootloader"),
            Self::DeviceVerified => write!(f, "device verified"),
            Self::Programming { row_index } => write!(f, "programming row #{}", row_index),
            Self::Erasing { row_num } => write!(f, "erasing row {}", row_num),
            Self::AppVerifying => write!(f, "verifying application"),
            Self::ExitingBootloader => write!(f, "exiting bootloader"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-session protocol settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Largest frame sent in one transfer, including the 7 framing bytes
    ///
    /// Capped by the link's [`Transport::max_packet_size`].
    pub packet_size: usize,
    /// Pause between a write and the matching read
    pub command_delay: Duration,
    /// Key presented with EnterBootloader
    pub key: Option<BootloaderKey>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            command_delay: DEFAULT_COMMAND_DELAY,
            key: None,
        }
    }
}

/// Outcome of a successful [`Session::program`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Rows programmed and verified
    pub rows_programmed: usize,
    /// Non-zero application checksum reported by the device
    pub app_checksum: u8,
    /// Wall-clock duration of the session
    pub elapsed: Duration,
}

/// What [`Session::device_info`] found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Identity from EnterBootloader
    pub bootloader: BootloaderInfo,
    /// Flash bounds for each queried array, in query order
    pub arrays: Vec<(u8, FlashBounds)>,
}

/// A bootloader session over one transport
pub struct Session<T: Transport> {
    transport: T,
    options: SessionOptions,
    state: SessionState,
    bounds: HashMap<u8, FlashBounds>,
    rx_buf: Vec<u8>,
}

impl<T: Transport> Session<T> {
    /// Wrap an already open transport
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let rx_len = transport.max_packet_size().max(MAX_RESPONSE_LEN);
        Self {
            transport,
            options,
            state: SessionState::Idle,
            bounds: HashMap::new(),
            rx_buf: vec![0; rx_len],
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Options in use
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("session: {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Program `image`, verify every row and the application, then exit
    pub fn program(
        self,
        image: &FirmwareImage,
        progress: &mut dyn ProgramProgress,
    ) -> Result<SessionReport> {
        let started = Instant::now();
        log::info!(
            "programming {} rows ({} bytes) for silicon 0x{:08X} rev 0x{:02X}",
            image.rows().len(),
            image.total_bytes(),
            image.silicon_id(),
            image.silicon_rev()
        );

        let result = self.run(|s| s.program_image(image, &mut *progress));
        progress.finish();

        let (rows_programmed, app_checksum) = result?;
        let report = SessionReport {
            rows_programmed,
            app_checksum,
            elapsed: started.elapsed(),
        };
        log::info!(
            "programming complete: {} rows in {:.2?}, application checksum 0x{:02X}",
            report.rows_programmed,
            report.elapsed,
            report.app_checksum
        );
        Ok(report)
    }

    /// Only send ExitBootloader so the device starts its application
    pub fn restart(self) -> Result<()> {
        log::info!("restarting device");
        self.run(|_| Ok(()))
    }

    /// Read the device identity and the flash bounds of `arrays`
    pub fn device_info(self, arrays: &[u8]) -> Result<DeviceInfo> {
        self.run(|s| {
            let bootloader = s.enter_bootloader()?;
            let mut found = Vec::with_capacity(arrays.len());
            for &array_id in arrays {
                found.push((array_id, s.flash_bounds(array_id)?));
            }
            Ok(DeviceInfo {
                bootloader,
                arrays: found,
            })
        })
    }

    /// Erase every programmable row of `array_id`, returning the row count
    pub fn erase(self, array_id: u8) -> Result<usize> {
        self.run(|s| {
            s.enter_bootloader()?;
            let bounds = s.flash_bounds(array_id)?;
            log::info!(
                "erasing array {} rows {}..={}",
                array_id,
                bounds.start_row,
                bounds.end_row
            );
            let mut erased = 0;
            for row_num in bounds.start_row..=bounds.end_row {
                s.set_state(SessionState::Erasing { row_num });
                let buf = s.transact(&Command::EraseRow { array_id, row_num })?;
                decode_ack(buf)?;
                erased += 1;
            }
            log::info!("erased {} rows", erased);
            Ok(erased)
        })
    }

    /// Ask the device to verify the application checksum
    pub fn verify_app(self) -> Result<u8> {
        self.run(|s| {
            s.enter_bootloader()?;
            s.verify_app_checksum()
        })
    }

    /// Run `op`, then exit the bootloader and close the link regardless of the outcome
    fn run<R>(mut self, op: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let result = op(&mut self);
        if let Err(e) = &result {
            log::debug!("session failed in state {}: {}", self.state, e);
        }

        self.set_state(SessionState::ExitingBootloader);
        if let Err(e) = self.exit_bootloader() {
            log::warn!("failed to exit bootloader: {}", e);
        }
        if let Err(e) = self.transport.close() {
            log::warn!("failed to close transport: {}", e);
        }

        self.set_state(if result.is_ok() {
            SessionState::Succeeded
        } else {
            SessionState::Failed
        });
        result
    }

    fn program_image(
        &mut self,
        image: &FirmwareImage,
        progress: &mut dyn ProgramProgress,
    ) -> Result<(usize, u8)> {
        let info = self.enter_bootloader()?;
        if info.silicon_id != image.silicon_id() || info.silicon_rev != image.silicon_rev() {
            return Err(Error::DeviceMismatch {
                expected_id: image.silicon_id(),
                expected_rev: image.silicon_rev(),
                found_id: info.silicon_id,
                found_rev: info.silicon_rev,
            });
        }
        self.set_state(SessionState::DeviceVerified);

        let packet_size = self.packet_size()?;
        if packet_size < self.options.packet_size {
            log::debug!("packet size capped to {} bytes by the link", packet_size);
        }

        let rows = image.rows();
        progress.start(rows.len());
        let mut steps = ProgressLog::new(rows.len());

        for (index, row) in rows.iter().enumerate() {
            self.set_state(SessionState::Programming { row_index: index });

            let bounds = self.flash_bounds(row.array_id())?;
            if !bounds.contains(row.row_num()) {
                return Err(Error::OutOfRange {
                    array_id: row.array_id(),
                    row_num: row.row_num(),
                    start_row: bounds.start_row,
                    end_row: bounds.end_row,
                });
            }

            self.program_row(row)?;
            self.verify_row(row)?;

            progress.row_programmed(index, row);
            steps.update(index + 1);
        }

        self.set_state(SessionState::AppVerifying);
        progress.verifying();
        let app_checksum = self.verify_app_checksum()?;
        Ok((rows.len(), app_checksum))
    }

    fn enter_bootloader(&mut self) -> Result<BootloaderInfo> {
        self.set_state(SessionState::EnteringBootloader);
        let key = self.options.key;
        let buf = self.transact(&Command::EnterBootloader { key })?;
        let info = BootloaderInfo::decode(buf)?;
        log::info!(
            "bootloader {} on silicon 0x{:08X} rev 0x{:02X}",
            info.version_string(),
            info.silicon_id,
            info.silicon_rev
        );
        Ok(info)
    }

    /// Flash bounds of `array_id`, queried once per session
    fn flash_bounds(&mut self, array_id: u8) -> Result<FlashBounds> {
        if let Some(bounds) = self.bounds.get(&array_id) {
            return Ok(*bounds);
        }
        let buf = self.transact(&Command::GetFlashSize { array_id })?;
        let bounds = FlashBounds::decode(buf)?;
        log::debug!(
            "array {}: rows {}..={}",
            array_id,
            bounds.start_row,
            bounds.end_row
        );
        self.bounds.insert(array_id, bounds);
        Ok(bounds)
    }

    /// Frame size used for row transfers: the configured size, capped by the link
    fn packet_size(&self) -> Result<usize> {
        let packet_size = self
            .options
            .packet_size
            .min(self.transport.max_packet_size());
        if packet_size <= FRAME_OVERHEAD {
            return Err(Error::Config(format!(
                "packet size {} leaves no room for data (frame overhead is {})",
                packet_size, FRAME_OVERHEAD
            )));
        }
        Ok(packet_size)
    }

    /// Send a row as SendData chunks followed by ProgramRow with the remainder
    fn program_row(&mut self, row: &Row) -> Result<()> {
        let data = row.data();
        let packet_size = self.packet_size()?;
        let chunk_len = packet_size - FRAME_OVERHEAD;

        let mut offset = 0;
        while data.len() - offset + FRAME_OVERHEAD > packet_size {
            let chunk = &data[offset..offset + chunk_len];
            let buf = self.transact(&Command::SendData { data: chunk })?;
            decode_ack(buf)?;
            offset += chunk_len;
        }

        let buf = self.transact(&Command::ProgramRow {
            array_id: row.array_id(),
            row_num: row.row_num(),
            data: &data[offset..],
        })?;
        decode_ack(buf)?;
        log::debug!(
            "programmed array {} row {} ({} bytes)",
            row.array_id(),
            row.row_num(),
            data.len()
        );
        Ok(())
    }

    fn verify_row(&mut self, row: &Row) -> Result<()> {
        let expected = row.expected_device_checksum();
        let buf = self.transact(&Command::GetRowChecksum {
            array_id: row.array_id(),
            row_num: row.row_num(),
        })?;
        let actual = decode_checksum(buf)?;
        if actual != expected {
            return Err(Error::ChecksumMismatch(ChecksumFailure::Row {
                array_id: row.array_id(),
                row_num: row.row_num(),
                expected,
                actual,
            }));
        }
        Ok(())
    }

    /// Zero means the device rejected the application image
    fn verify_app_checksum(&mut self) -> Result<u8> {
        let buf = self.transact(&Command::VerifyAppChecksum)?;
        let value = decode_checksum(buf)?;
        if value == 0 {
            return Err(Error::ChecksumMismatch(ChecksumFailure::Application {
                value,
            }));
        }
        log::info!("application checksum valid (0x{:02X})", value);
        Ok(value)
    }

    /// ExitBootloader has no response
    fn exit_bootloader(&mut self) -> Result<()> {
        let frame = Command::ExitBootloader.encode()?;
        log::trace!("tx ExitBootloader: {}", hex::encode(&frame));
        self.transport.write(&frame)?;
        Ok(())
    }

    /// One write, pacing delay, read cycle; returns the raw response bytes
    fn transact(&mut self, cmd: &Command<'_>) -> Result<&[u8]> {
        let frame = cmd.encode()?;
        log::trace!("tx {}: {}", cmd.name(), hex::encode(&frame));
        self.transport.write(&frame)?;
        self.transport.delay(self.options.command_delay);

        let n = self.transport.read(&mut self.rx_buf)?;
        let response = &self.rx_buf[..n];
        log::trace!("rx {}: {}", cmd.name(), hex::encode(response));
        Ok(response)
    }
}

impl<T: Transport> Session<T> {
    /// Find a device with `policy`, then wrap its transport in a session
    pub fn connect<D>(
        discoverer: &mut D,
        serial: &str,
        policy: &RetryPolicy,
        options: SessionOptions,
    ) -> Result<Self>
    where
        D: Discover<Transport = T>,
    {
        log::debug!("session: discovering device {:?}", serial);
        let transport = policy.acquire(discoverer, serial)?;
        Ok(Self::new(transport, options))
    }
}
