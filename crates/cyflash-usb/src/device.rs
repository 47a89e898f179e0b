//! nusb-backed transport

use std::time::Duration;

use cyflash_core::config::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
use cyflash_core::{Discover, Transport, TransportError};
use nusb::descriptors::TransferType;
use nusb::transfer::{Buffer, Bulk, BulkOrInterrupt, In, Interrupt, Out, TransferError};
use nusb::{Endpoint, MaybeFuture};

use crate::{IN_EP, OUT_EP, PACKET_SIZE};

/// Timeout for a single transfer
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

fn map_transfer_error(e: TransferError) -> TransportError {
    match e {
        // transfer_blocking cancels a transfer that outlives its timeout
        TransferError::Cancelled => TransportError::Timeout,
        TransferError::Disconnected => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}

/// Which USB devices are candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
        }
    }
}

impl DeviceFilter {
    /// Whether a device matches; an empty `wanted` serial accepts any device
    pub fn matches(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
        wanted: &str,
    ) -> bool {
        vendor_id == self.vendor_id
            && product_id == self.product_id
            && (wanted.is_empty() || serial == Some(wanted))
    }
}

/// Summary of a connected bootloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    /// Bus number
    pub bus: u8,
    /// Device address on the bus
    pub address: u8,
    /// USB serial-number string
    pub serial: Option<String>,
}

impl std::fmt::Display for UsbDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bus {} address {} serial {}",
            self.bus,
            self.address,
            self.serial.as_deref().unwrap_or("<none>")
        )
    }
}

enum Endpoints {
    Bulk(Endpoint<Bulk, Out>, Endpoint<Bulk, In>),
    Interrupt(Endpoint<Interrupt, Out>, Endpoint<Interrupt, In>),
}

fn write_ep<E: BulkOrInterrupt>(
    ep: &mut Endpoint<E, Out>,
    data: &[u8],
) -> Result<(), TransportError> {
    let mut buf = Buffer::new(data.len());
    buf.extend_from_slice(data);
    ep.transfer_blocking(buf, TRANSFER_TIMEOUT)
        .into_result()
        .map_err(map_transfer_error)?;
    Ok(())
}

fn read_ep<E: BulkOrInterrupt>(
    ep: &mut Endpoint<E, In>,
    out: &mut [u8],
) -> Result<usize, TransportError> {
    let max_packet_size = ep.max_packet_size();
    let mut buf = Buffer::new(max_packet_size);
    buf.set_requested_len(max_packet_size);
    let data = ep
        .transfer_blocking(buf, TRANSFER_TIMEOUT)
        .into_result()
        .map_err(map_transfer_error)?;
    if data.is_empty() {
        log::debug!("usb: IN endpoint returned 0 bytes");
    }
    let received = data.len().min(out.len());
    out[..received].copy_from_slice(&data[..received]);
    Ok(received)
}

/// USB link to one bootloader
pub struct UsbTransport {
    endpoints: Option<Endpoints>,
    info: UsbDeviceInfo,
}

impl UsbTransport {
    /// Open the device described by `device_info`
    pub fn open(device_info: &nusb::DeviceInfo) -> Result<Self, TransportError> {
        let info = UsbDeviceInfo {
            bus: device_info.busnum(),
            address: device_info.device_address(),
            serial: device_info.serial_number().map(String::from),
        };
        log::info!("Opening bootloader at {}", info);

        let device = device_info
            .open()
            .wait()
            .map_err(|e| TransportError::Io(format!("failed to open device: {}", e)))?;

        let config_desc = device
            .active_configuration()
            .map_err(|e| TransportError::Io(format!("failed to get configuration: {}", e)))?;

        // The interface carrying OUT_EP decides the interface number and endpoint type
        let mut found: Option<(u8, TransferType)> = None;
        for iface in config_desc.interface_alt_settings() {
            if let Some(ep) = iface.endpoints().find(|ep| ep.address() == OUT_EP) {
                found = Some((iface.interface_number(), ep.transfer_type()));
                break;
            }
        }
        let (iface_num, transfer_type) = found.ok_or_else(|| {
            TransportError::Io(format!("no interface with endpoint 0x{:02X}", OUT_EP))
        })?;
        log::debug!("usb: interface {} ({:?} endpoints)", iface_num, transfer_type);

        let interface = device
            .claim_interface(iface_num)
            .wait()
            .map_err(|e| TransportError::Io(format!("failed to claim interface: {}", e)))?;

        let claim_err =
            |e: nusb::Error| TransportError::Io(format!("failed to open endpoint: {}", e));
        let endpoints = match transfer_type {
            TransferType::Interrupt => Endpoints::Interrupt(
                interface.endpoint::<Interrupt, Out>(OUT_EP).map_err(claim_err)?,
                interface.endpoint::<Interrupt, In>(IN_EP).map_err(claim_err)?,
            ),
            _ => Endpoints::Bulk(
                interface.endpoint::<Bulk, Out>(OUT_EP).map_err(claim_err)?,
                interface.endpoint::<Bulk, In>(IN_EP).map_err(claim_err)?,
            ),
        };

        Ok(Self {
            endpoints: Some(endpoints),
            info,
        })
    }

    /// Device this link is attached to
    pub fn info(&self) -> &UsbDeviceInfo {
        &self.info
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.endpoints.as_mut().ok_or(TransportError::Closed)? {
            Endpoints::Bulk(out, _) => write_ep(out, data),
            Endpoints::Interrupt(out, _) => write_ep(out, data),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.endpoints.as_mut().ok_or(TransportError::Closed)? {
            Endpoints::Bulk(_, input) => read_ep(input, buf),
            Endpoints::Interrupt(_, input) => read_ep(input, buf),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the endpoints releases the interface
        if self.endpoints.take().is_some() {
            log::debug!("usb: released {}", self.info);
        }
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        PACKET_SIZE
    }
}

/// Finds bootloaders by USB serial number
#[derive(Debug, Clone, Default)]
pub struct UsbDiscoverer {
    /// Vendor/product filter
    pub filter: DeviceFilter,
}

impl Discover for UsbDiscoverer {
    type Transport = UsbTransport;

    fn discover(&mut self, serial: &str) -> Result<Option<UsbTransport>, TransportError> {
        let filter = self.filter;
        let device = nusb::list_devices()
            .wait()
            .map_err(|e| TransportError::Io(e.to_string()))?
            .find(|d| filter.matches(d.vendor_id(), d.product_id(), d.serial_number(), serial));

        match device {
            Some(info) => UsbTransport::open(&info).map(Some),
            None => Ok(None),
        }
    }
}
