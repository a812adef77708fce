use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::error::ReconstructionError;

/// Bytes in one raw sensor row, preamble and porches included.
pub const ROW_LENGTH_BYTES: usize = 6220;

/// Raw rows the sensor emits per download, both half-frames together.
pub const MAX_SENSOR_ROWS: usize = 2034;

/// One of the two sub-frames the sensor reads out back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfFrame {
    /// Raw row index of the first row belonging to this half.
    pub first_row: usize,
    pub rows: usize,
    /// Bytes dropped from the start of each row.
    pub front_porch: usize,
    /// Bytes dropped from the end of each row.
    pub back_porch: usize,
}

impl HalfFrame {
    fn end_row(&self) -> usize {
        self.first_row + self.rows
    }
}

/// Row geometry of one firmware readout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorProfile {
    pub name: &'static str,
    pub row_bytes: usize,
    /// Upper bound on the rows the line scan will record.
    pub max_rows: usize,
    /// Output pixels per row.
    pub width: usize,
    pub halves: [HalfFrame; 2],
}

impl SensorProfile {
    /// Every raw row, no cropping. 3110 x 2034.
    pub const FULL_FRAME: SensorProfile = SensorProfile {
        name: "full-frame",
        row_bytes: ROW_LENGTH_BYTES,
        max_rows: MAX_SENSOR_ROWS,
        width: 3110,
        halves: [
            HalfFrame {
                first_row: 0,
                rows: 1017,
                front_porch: 0,
                back_porch: 0,
            },
            HalfFrame {
                first_row: 1017,
                rows: 1017,
                front_porch: 0,
                back_porch: 0,
            },
        ],
    };

    /// Dark rows and porch columns removed. 3040 x 2028.
    pub const CROPPED: SensorProfile = SensorProfile {
        name: "cropped",
        row_bytes: ROW_LENGTH_BYTES,
        max_rows: MAX_SENSOR_ROWS,
        width: 3040,
        halves: [
            HalfFrame {
                first_row: 3,
                rows: 1014,
                front_porch: 60 * 2,
                back_porch: 10 * 2,
            },
            HalfFrame {
                first_row: 1020,
                rows: 1014,
                front_porch: 70 * 2,
                back_porch: 0,
            },
        ],
    };

    pub fn height(&self) -> usize {
        self.halves[0].rows + self.halves[1].rows
    }

    /// Raw rows that must be found before pixels can be assembled.
    pub fn required_rows(&self) -> usize {
        self.halves[0].end_row().max(self.halves[1].end_row())
    }

    /// Rows per half-frame as announced to the camera with SetFrame.
    pub fn readout_rows_per_half(&self) -> u16 {
        u16::try_from(self.max_rows / 2).unwrap_or(u16::MAX)
    }

    pub fn validate(&self) -> Result<(), ReconstructionError> {
        let [first, second] = &self.halves;

        if self.row_bytes == 0 || self.width == 0 {
            return Err(ReconstructionError::InvalidProfile("empty rows"));
        }
        if first.rows == 0 || first.rows != second.rows {
            return Err(ReconstructionError::InvalidProfile(
                "half-frames must hold the same non-zero row count",
            ));
        }
        if first.end_row() > second.first_row {
            return Err(ReconstructionError::InvalidProfile(
                "half-frames overlap or are out of order",
            ));
        }
        if self.required_rows() > self.max_rows {
            return Err(ReconstructionError::InvalidProfile(
                "half-frames extend past the maximum row count",
            ));
        }
        for half in &self.halves {
            let porches = half.front_porch + half.back_porch;
            if porches > self.row_bytes || self.row_bytes - porches != self.width * 2 {
                return Err(ReconstructionError::InvalidProfile(
                    "cropped row length does not match the image width",
                ));
            }
        }

        Ok(())
    }
}

/// How the two half-frames are woven into output rows.
///
/// Firmware revisions disagree on which half carries the even lines, so
/// this is chosen per camera rather than fixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interleave {
    /// First half-frame fills rows 0, 2, 4...
    #[default]
    EvenFirst,
    /// First half-frame fills rows 1, 3, 5...
    OddFirst,
}

impl Interleave {
    /// Output row for line `line` of half-frame `half` (0 or 1).
    pub fn output_row(&self, half: usize, line: usize) -> usize {
        let parity = match self {
            Interleave::EvenFirst => half & 1,
            Interleave::OddFirst => (half & 1) ^ 1,
        };
        line * 2 + parity
    }
}

/// A reconstructed frame of 16-bit samples in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    width: usize,
    height: usize,
    pixels: Vec<u16>,
}

impl PixelImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<u16>()
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u16> {
        self.pixels
    }

    /// Samples of row `y`, or `None` past the bottom of the image.
    pub fn row(&self, y: usize) -> Option<&[u16]> {
        if y >= self.height {
            return None;
        }
        Some(&self.pixels[y * self.width..(y + 1) * self.width])
    }

    pub fn row_mut(&mut self, y: usize) -> Option<&mut [u16]> {
        if y >= self.height {
            return None;
        }
        Some(&mut self.pixels[y * self.width..(y + 1) * self.width])
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[y * self.width + x])
    }

    pub fn to_luma16(&self) -> ImageBuffer<Luma<u16>, Vec<u16>> {
        ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
            Luma([self.pixels[y as usize * self.width + x as usize]])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_are_valid() {
        for profile in [SensorProfile::FULL_FRAME, SensorProfile::CROPPED] {
            profile.validate().unwrap();
            assert_eq!(profile.required_rows(), MAX_SENSOR_ROWS);
            assert_eq!(profile.readout_rows_per_half(), 0x03F9);
        }

        assert_eq!(SensorProfile::FULL_FRAME.height(), 2034);
        assert_eq!(SensorProfile::CROPPED.height(), 2028);
        assert_eq!(SensorProfile::CROPPED.width, 3040);
    }

    #[test]
    fn rejects_unbalanced_halves() {
        let mut profile = SensorProfile::FULL_FRAME;
        profile.halves[1].rows = 1000;
        assert!(matches!(
            profile.validate(),
            Err(ReconstructionError::InvalidProfile(_))
        ));
    }

    #[test]
    fn rejects_porch_width_mismatch() {
        let mut profile = SensorProfile::CROPPED;
        profile.halves[1].front_porch = 120;
        assert!(matches!(
            profile.validate(),
            Err(ReconstructionError::InvalidProfile(_))
        ));
    }

    #[test]
    fn rejects_rows_past_maximum() {
        let mut profile = SensorProfile::CROPPED;
        profile.max_rows = 2028;
        assert!(matches!(
            profile.validate(),
            Err(ReconstructionError::InvalidProfile(_))
        ));
    }

    #[test]
    fn interleave_orderings() {
        assert_eq!(Interleave::EvenFirst.output_row(0, 0), 0);
        assert_eq!(Interleave::EvenFirst.output_row(1, 0), 1);
        assert_eq!(Interleave::EvenFirst.output_row(0, 5), 10);
        assert_eq!(Interleave::EvenFirst.output_row(1, 5), 11);

        assert_eq!(Interleave::OddFirst.output_row(0, 0), 1);
        assert_eq!(Interleave::OddFirst.output_row(1, 0), 0);
        assert_eq!(Interleave::OddFirst.output_row(0, 5), 11);
        assert_eq!(Interleave::OddFirst.output_row(1, 5), 10);
    }

    #[test]
    fn pixel_image_accessors() {
        let mut image = PixelImage::new(3, 2);
        image.row_mut(1).unwrap().copy_from_slice(&[7, 8, 9]);

        assert_eq!(image.byte_size(), 12);
        assert_eq!(image.row(0), Some(&[0, 0, 0][..]));
        assert_eq!(image.row(2), None);
        assert!(image.row_mut(2).is_none());
        assert_eq!(image.get(2, 1), Some(9));
        assert_eq!(image.get(3, 1), None);

        let luma = image.to_luma16();
        assert_eq!(luma.dimensions(), (3, 2));
        assert_eq!(luma.get_pixel(1, 1).0, [8]);
    }
}
