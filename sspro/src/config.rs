//! Device and capture settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::frame::{Interleave, SensorProfile};

const DIO_COOLER_ON: u8 = 0x01;
const DIO_FAN_HIGH: u8 = 0x02;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReadoutSpeed {
    #[default]
    Fastest = 0,
    Faster = 1,
    Fast = 2,
    MedFast = 3,
    MedSlow = 4,
    Slow = 5,
    Slower = 6,
    Slowest = 7,
}

/// Cooling and readout settings held for the life of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub fan_high: bool,
    pub cooler_on: bool,
    pub readout_speed: ReadoutSpeed,
}

impl DeviceConfig {
    /// Bit pattern sent with [`Opcode::SetDigitalIO`](crate::Opcode::SetDigitalIO).
    pub fn dio_bits(&self) -> u8 {
        let mut dio = 0x00;
        if self.fan_high {
            dio |= DIO_FAN_HIGH;
        }
        if self.cooler_on {
            dio |= DIO_COOLER_ON;
        }
        dio
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fan_high: false,
            cooler_on: true,
            readout_speed: ReadoutSpeed::Fastest,
        }
    }
}

/// Which raw row layout the camera firmware produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    FullFrame,
    #[default]
    Cropped,
}

impl Geometry {
    pub fn profile(&self) -> SensorProfile {
        match self {
            Geometry::FullFrame => SensorProfile::FULL_FRAME,
            Geometry::Cropped => SensorProfile::CROPPED,
        }
    }
}

/// Timing and decoding options for a [`Camera`](crate::Camera).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Per-transfer USB timeout.
    pub usb_timeout_ms: u64,

    /// Extra wait after the nominal exposure before polling starts.
    pub exposure_margin_ms: u64,

    pub poll_interval_ms: u64,

    pub max_poll_attempts: u32,

    pub geometry: Geometry,

    pub interleave: Interleave,
}

impl CaptureOptions {
    pub fn usb_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_timeout_ms)
    }

    pub fn exposure_margin(&self) -> Duration {
        Duration::from_millis(self.exposure_margin_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            usb_timeout_ms: 1000,
            exposure_margin_ms: 100,
            poll_interval_ms: 500,
            max_poll_attempts: 240,
            geometry: Geometry::default(),
            interleave: Interleave::default(),
        }
    }
}
