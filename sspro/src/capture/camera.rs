//! Command sequencing and the exposure/readout cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, info, warn};

use super::download::Downloader;
use super::frame::PixelImage;
use super::parse::Reconstructor;
use super::protocol::{
    CommandFrame, DeviceStatus, Opcode, ResponseFrame, COMMAND_LEN, RESPONSE_LEN,
};
use super::{Transport, ENDPOINT_COMMAND_OUT, ENDPOINT_STATUS_IN};
use crate::clock::{Clock, SystemClock};
use crate::config::{CaptureOptions, DeviceConfig, ReadoutSpeed};
use crate::error::{Error, Result};

// colour, 1x1 binning
const CAPTURE_MODE: u8 = 0x01;
// exposure travels as a 24-bit millisecond count
const MAX_EXPOSURE_MS: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    FrameConfigured,
    Exposing { started: Instant, exposure: Duration },
    Polling { attempt: u32 },
    Downloading,
    FrameReady,
    Failed,
}

impl CaptureState {
    /// An exposure has been started and its frame not yet collected.
    pub fn in_flight(&self) -> bool {
        matches!(
            self,
            CaptureState::Exposing { .. } | CaptureState::Polling { .. } | CaptureState::Downloading
        )
    }
}

/// Requests that a blocking [`Camera::capture`] stop at its next wait slice
/// or status poll. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// A connected camera.
///
/// One instance per device, driven from one thread at a time. Every call
/// blocks for at most the configured USB timeout per transfer; a full
/// [`capture`](Self::capture) blocks for the exposure plus polling.
pub struct Camera<T: Transport, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    options: CaptureOptions,
    config: DeviceConfig,
    status: DeviceStatus,
    state: CaptureState,
    reconstructor: Reconstructor,
    downloader: Downloader,
    cancel: CancelHandle,
    last_image: Option<PixelImage>,
}

impl<T: Transport> Camera<T> {
    /// Take over an opened device and push the default cooling settings to it.
    pub fn connect(transport: T, options: CaptureOptions) -> Result<Self> {
        let mut camera = Self::new(transport, SystemClock, options)?;
        camera.initialize()?;
        Ok(camera)
    }
}

impl<T: Transport, C: Clock> Camera<T, C> {
    /// Wrap a transport without talking to the device.
    pub fn new(transport: T, clock: C, options: CaptureOptions) -> Result<Self> {
        let reconstructor = Reconstructor::new(options.geometry.profile(), options.interleave)?;
        let downloader = Downloader::new(options.usb_timeout());

        Ok(Self {
            transport,
            clock,
            options,
            config: DeviceConfig::default(),
            status: DeviceStatus::default(),
            state: CaptureState::Idle,
            reconstructor,
            downloader,
            cancel: CancelHandle::default(),
            last_image: None,
        })
    }

    /// Reset the device configuration to its defaults and apply it.
    pub fn initialize(&mut self) -> Result<()> {
        debug!("Initializing camera");
        self.config = DeviceConfig::default();
        self.set_digital_io()
    }

    /// Give the transport back; dropping a USB handle releases the device.
    pub fn disconnect(self) -> T {
        debug!("Disconnecting camera");
        self.transport
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Status from the most recent Status reply.
    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn reconstructor(&self) -> &Reconstructor {
        &self.reconstructor
    }

    /// Swap in a different geometry or interleave, e.g. after calibration.
    pub fn set_reconstructor(&mut self, reconstructor: Reconstructor) {
        self.reconstructor = reconstructor;
    }

    pub fn set_downloader(&mut self, downloader: Downloader) {
        self.downloader = downloader;
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn last_image(&self) -> Option<&PixelImage> {
        self.last_image.as_ref()
    }

    pub fn take_last_image(&mut self) -> Option<PixelImage> {
        self.last_image.take()
    }

    /// Send one command and read back its reply.
    pub fn send_command(&mut self, opcode: Opcode, data: [u8; 4]) -> Result<ResponseFrame> {
        let command = CommandFrame::encode(opcode, data);
        let timeout = self.options.usb_timeout();
        debug!("-> {:?} {}", opcode, hex::encode(command.as_bytes()));

        let written = self
            .transport
            .write_bulk(ENDPOINT_COMMAND_OUT, command.as_bytes(), timeout)
            .map_err(Error::TransportWrite)?;
        if written != COMMAND_LEN {
            return Err(Error::ShortWrite { written });
        }

        let mut buf = [0u8; RESPONSE_LEN];
        let len = self
            .transport
            .read_bulk(ENDPOINT_STATUS_IN, &mut buf, timeout)
            .map_err(Error::TransportRead)?;
        let reply = &buf[..len.min(RESPONSE_LEN)];
        debug!("<- {:?} {}", opcode, hex::encode(reply));

        let response = ResponseFrame::decode(reply, opcode)?;
        if let Some(status) = response.status() {
            self.status = status;
        }

        Ok(response)
    }

    pub fn query_status(&mut self) -> Result<DeviceStatus> {
        self.send_command(Opcode::Status, [0; 4])?;
        debug!(
            "Status: capturing={} frame_ready={}",
            self.status.capturing, self.status.frame_ready
        );
        Ok(self.status)
    }

    /// Announce the readout geometry ahead of an exposure.
    pub fn setup_frame(&mut self) -> Result<()> {
        if self.state.in_flight() {
            return Err(Error::CaptureInProgress);
        }

        let [hi, lo] = self
            .reconstructor
            .profile()
            .readout_rows_per_half()
            .to_be_bytes();
        self.send_command(Opcode::SetFrame, [0x00, 0x00, hi, lo])?;
        self.transition(CaptureState::FrameConfigured);
        Ok(())
    }

    /// Begin an exposure and return without waiting for it.
    ///
    /// Clears any earlier cancel request before the first command goes out; a
    /// request made after that point is honoured by [`wait_for_frame`](Self::wait_for_frame).
    pub fn start_capture(&mut self, exposure: Duration) -> Result<()> {
        if self.state.in_flight() {
            return Err(Error::CaptureInProgress);
        }

        let payload = capture_payload(exposure)?;
        self.cancel.reset();
        if self.state != CaptureState::FrameConfigured {
            self.setup_frame()?;
        }

        self.send_command(Opcode::Capture, payload)?;
        self.transition(CaptureState::Exposing {
            started: self.clock.now(),
            exposure,
        });
        Ok(())
    }

    /// Tell the camera to drop the current exposure and return to idle.
    ///
    /// Local state is reset even when the command fails.
    pub fn abort_capture(&mut self) -> Result<()> {
        info!("Aborting capture");
        let result = self.send_command(Opcode::Abort, [0; 4]);
        self.cancel.reset();
        self.transition(CaptureState::Idle);
        result.map(|_| ())
    }

    /// Wait out the exposure, then poll status until the frame is ready.
    pub fn wait_for_frame(&mut self) -> Result<()> {
        let deadline = match self.state {
            CaptureState::Exposing { started, exposure } => {
                started + exposure + self.options.exposure_margin()
            }
            _ => return Err(Error::NotExposing),
        };
        self.sleep_until(deadline)?;

        let attempts = self.options.max_poll_attempts;
        for attempt in 1..=attempts {
            self.check_cancelled()?;
            self.transition(CaptureState::Polling { attempt });

            let status = match self.query_status() {
                Ok(status) => status,
                Err(err) => return Err(self.fail(err)),
            };
            if status.frame_ready {
                self.transition(CaptureState::Downloading);
                return Ok(());
            }

            if attempt < attempts {
                self.clock.sleep(self.options.poll_interval());
            }
        }

        Err(self.fail(Error::FrameNotReady { attempts }))
    }

    /// Pull the finished frame off the camera and decode it.
    pub fn download_frame(&mut self) -> Result<&PixelImage> {
        self.transition(CaptureState::Downloading);

        match self.fetch_frame() {
            Ok(image) => {
                info!(
                    "Frame ready: {}x{} ({} bytes)",
                    image.width(),
                    image.height(),
                    image.byte_size()
                );
                self.transition(CaptureState::FrameReady);
                Ok(&*self.last_image.insert(image))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Pull the finished frame off the camera as raw row data, leaving the
    /// stored image untouched. Used to record downloads for
    /// [`Interleave::calibrate`](crate::Interleave::calibrate).
    pub fn download_raw(&mut self) -> Result<BytesMut> {
        self.transition(CaptureState::Downloading);

        match self.read_frame() {
            Ok(raw) => {
                info!("Raw frame downloaded ({} bytes)", raw.len());
                self.transition(CaptureState::Idle);
                Ok(raw)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Expose, wait and download in one blocking call.
    pub fn capture(&mut self, exposure: Duration) -> Result<&PixelImage> {
        info!("Starting {:?} exposure", exposure);
        self.start_capture(exposure)?;
        self.wait_for_frame()?;
        self.download_frame()
    }

    pub fn set_digital_io(&mut self) -> Result<()> {
        let dio = self.config.dio_bits();
        self.send_command(Opcode::SetDigitalIO, [dio, 0x00, 0x00, 0x00])?;
        Ok(())
    }

    pub fn set_fan_high(&mut self, fan_high: bool) -> Result<()> {
        self.config.fan_high = fan_high;
        self.set_digital_io()
    }

    pub fn set_cooler_on(&mut self, cooler_on: bool) -> Result<()> {
        self.config.cooler_on = cooler_on;
        self.set_digital_io()
    }

    pub fn set_readout_speed(&mut self, readout_speed: ReadoutSpeed) {
        self.config.readout_speed = readout_speed;
    }

    fn read_frame(&mut self) -> Result<BytesMut> {
        self.send_command(Opcode::Download, [0; 4])?;
        self.downloader.download_all(&self.transport)
    }

    fn fetch_frame(&mut self) -> Result<PixelImage> {
        let raw = self.read_frame()?;
        Ok(self.reconstructor.reconstruct(&raw)?)
    }

    fn sleep_until(&mut self, deadline: Instant) -> Result<()> {
        let slice = self.options.poll_interval();
        loop {
            self.check_cancelled()?;

            let now = self.clock.now();
            if now >= deadline {
                return Ok(());
            }

            let remaining = deadline - now;
            self.clock.sleep(if slice.is_zero() {
                remaining
            } else {
                remaining.min(slice)
            });
        }
    }

    fn check_cancelled(&mut self) -> Result<()> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }

        info!("Capture cancelled");
        self.abort_capture()?;
        Err(Error::Cancelled)
    }

    fn transition(&mut self, state: CaptureState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn fail(&mut self, err: Error) -> Error {
        warn!("Capture failed: {}", err);
        self.transition(CaptureState::Failed);
        err
    }
}

fn capture_payload(exposure: Duration) -> Result<[u8; 4]> {
    let ms = u32::try_from(exposure.as_millis())
        .ok()
        .filter(|ms| *ms <= MAX_EXPOSURE_MS)
        .ok_or(Error::ExposureOutOfRange(exposure))?;
    let [_, a, b, c] = ms.to_be_bytes();
    Ok([CAPTURE_MODE, a, b, c])
}
