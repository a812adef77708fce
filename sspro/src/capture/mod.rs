pub mod camera;
pub mod download;
pub mod frame;
pub mod parse;
pub mod protocol;

use std::time::Duration;

use log::{debug, info};
use rusb::{Device, DeviceDescriptor, DeviceHandle, UsbContext};

use crate::error::{Error, Result};

pub const VENDOR_ID: u16 = 0x1856;
pub const PRODUCT_ID: u16 = 0x001E;

pub const ENDPOINT_COMMAND_OUT: u8 = 0x08;
pub const ENDPOINT_STATUS_IN: u8 = 0x82;
// image data arrives on the same IN pipe as command replies
pub const ENDPOINT_DATA_IN: u8 = 0x82;

const CONFIGURATION: u8 = 1;
const INTERFACE: u8 = 0;

/// Blocking bulk pipe to the camera.
///
/// Implemented for [`rusb::DeviceHandle`]; tests substitute their own.
pub trait Transport {
    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
}

impl<T: UsbContext> Transport for DeviceHandle<T> {
    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, endpoint, buf, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, endpoint, buf, timeout)
    }
}

fn open_device<T: UsbContext>(
    context: &T,
    vid: u16,
    pid: u16,
) -> Result<Option<(Device<T>, DeviceDescriptor, DeviceHandle<T>)>> {
    for device in context.devices()?.iter() {
        let device_desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };

        if device_desc.vendor_id() == vid && device_desc.product_id() == pid {
            let handle = device.open()?;
            return Ok(Some((device, device_desc, handle)));
        }
    }

    Ok(None)
}

/// Open the camera and claim its only interface.
pub(crate) fn connect<T: UsbContext>(context: &T) -> Result<DeviceHandle<T>> {
    let (device, _, mut handle) =
        open_device(context, VENDOR_ID, PRODUCT_ID)?.ok_or(Error::DeviceNotFound)?;
    info!(
        "Opened {:04x}:{:04x} on bus {} address {}",
        VENDOR_ID,
        PRODUCT_ID,
        device.bus_number(),
        device.address()
    );

    if let Ok(true) = handle.kernel_driver_active(INTERFACE) {
        debug!("Detaching kernel driver");
        handle.detach_kernel_driver(INTERFACE)?;
    }

    handle.set_active_configuration(CONFIGURATION)?;
    handle.claim_interface(INTERFACE)?;

    Ok(handle)
}
