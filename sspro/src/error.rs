//! Error types for camera communication and frame reconstruction.

use std::time::Duration;

use thiserror::Error;

use crate::capture::protocol::Opcode;

/// A response frame that does not match the command that produced it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Response was not exactly eight bytes long.
    #[error("malformed response frame: expected 8 bytes, got {len}")]
    MalformedFrame { len: usize },

    /// First byte of the response was not the start byte.
    #[error("bad response header: {0:#04x}")]
    BadHeader(u8),

    /// The echoed opcode differs from the command that was sent.
    #[error("mismatched response opcode: sent {expected:?}, device echoed {actual:#04x}")]
    OpcodeMismatch { expected: Opcode, actual: u8 },

    /// Byte does not name any known opcode.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
}

/// Failure to turn a raw download into a pixel grid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconstructionError {
    #[error("found {found} sensor rows, need {required} (last good row at {last_good_offset:?})")]
    InsufficientRows {
        found: usize,
        required: usize,
        last_good_offset: Option<usize>,
    },

    /// A row marker landed at a distance that is not a multiple of the row
    /// length, and the scan never re-synchronized afterwards.
    #[error(
        "row length mismatch after {rows_found} rows: gap of {gap} bytes from row at {last_good_offset}"
    )]
    RowLengthMismatch {
        rows_found: usize,
        last_good_offset: usize,
        gap: usize,
    },

    #[error("row {row} starting at {offset} runs past the end of the buffer")]
    TruncatedRow { row: usize, offset: usize },

    #[error("invalid sensor profile: {0}")]
    InvalidProfile(&'static str),
}

/// Errors that can occur while operating the camera.
///
/// `TransportWrite`, `ShortWrite` and `TransportRead` make up the transport
/// group; [`Error::is_transport`] matches all three.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to write command: {0}")]
    TransportWrite(#[source] rusb::Error),

    /// The command write completed with fewer than 6 bytes accepted.
    #[error("short command write: {written} of 6 bytes")]
    ShortWrite { written: usize },

    #[error("failed to read from camera: {0}")]
    TransportRead(#[source] rusb::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),

    /// USB session or device setup failure.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("camera not found")]
    DeviceNotFound,

    #[error("a capture is already in progress")]
    CaptureInProgress,

    #[error("no exposure has been started")]
    NotExposing,

    #[error("frame not ready after {attempts} status polls")]
    FrameNotReady { attempts: u32 },

    #[error("capture cancelled")]
    Cancelled,

    #[error("exposure of {0:?} does not fit the capture command")]
    ExposureOutOfRange(Duration),
}

impl Error {
    /// The command or its reply failed to cross the USB pipe.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::TransportWrite(_) | Error::ShortWrite { .. } | Error::TransportRead(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
