//! Driver for the Starshoot Pro V2.0 imaging sensor.
//!
//! The camera speaks a small command/response protocol over USB bulk pipes and
//! streams its image as unframed rows that are recovered by searching for a
//! zero-byte preamble.

mod capture;
mod clock;
mod config;
mod error;

use log::debug;
use rusb::{Context, DeviceHandle};

pub use capture::camera::{Camera, CancelHandle, CaptureState};
pub use capture::download::{Downloader, CHUNK_SIZE, MAX_TRANSFER_SIZE};
pub use capture::frame::{
    HalfFrame, Interleave, PixelImage, SensorProfile, MAX_SENSOR_ROWS, ROW_LENGTH_BYTES,
};
pub use capture::parse::{Reconstructor, RowGap, RowIndex, ROW_PREAMBLE_LEN};
pub use capture::protocol::{
    CommandFrame, DeviceStatus, Opcode, ResponseFrame, COMMAND_LEN, RESPONSE_LEN, START_BYTE,
};
pub use capture::{
    Transport, ENDPOINT_COMMAND_OUT, ENDPOINT_DATA_IN, ENDPOINT_STATUS_IN, PRODUCT_ID, VENDOR_ID,
};
pub use clock::{Clock, SystemClock};
pub use config::{CaptureOptions, DeviceConfig, Geometry, ReadoutSpeed};
pub use error::{Error, ProtocolError, ReconstructionError, Result};

/// Process-wide libusb context.
///
/// Create one with [`init`](Self::init), open cameras through it, and
/// [`shutdown`](Self::shutdown) once every handle is gone.
pub struct UsbSession {
    context: Context,
}

impl UsbSession {
    pub fn init() -> Result<Self> {
        let context = Context::new()?;
        debug!("USB session started");
        Ok(Self { context })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Find the camera, detach any kernel driver and claim its interface.
    pub fn open_camera(&self) -> Result<DeviceHandle<Context>> {
        capture::connect(&self.context)
    }

    pub fn shutdown(self) {
        debug!("USB session closed");
    }
}
