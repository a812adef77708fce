use bytes::Buf;
use log::{debug, warn};
use memchr::memmem;

use super::frame::{Interleave, PixelImage, SensorProfile};
use crate::error::ReconstructionError;

// Every raw row opens with a run of zero bytes:
// 0000 0000 0000 0000 0000 0000 0000 0000 0000 (then porch + pixels, LE u16)
pub const ROW_PREAMBLE_LEN: usize = 18;
const ROW_PREAMBLE: [u8; ROW_PREAMBLE_LEN] = [0; ROW_PREAMBLE_LEN];

/// A row marker that could not be reconciled with the fixed row spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowGap {
    /// Start of the last row accepted before the marker.
    pub offset: usize,
    /// Distance from that row to the rejected marker.
    pub gap: usize,
}

/// Byte offsets of the sensor rows found in a raw download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowIndex {
    starts: Vec<usize>,
    recovered: usize,
    discarded: usize,
    unresolved_gap: Option<RowGap>,
}

impl RowIndex {
    /// Find row starts by their zero preamble, keeping only markers that sit a
    /// whole number of rows after the last accepted one.
    ///
    /// Markers lost in transfer are filled in at the fixed spacing. Stray
    /// markers are skipped without moving the reference row, so a later
    /// genuine marker still lines up.
    ///
    /// A profile with zero-length rows yields an empty index.
    pub fn scan(data: &[u8], profile: &SensorProfile) -> Self {
        let row_bytes = profile.row_bytes;
        if row_bytes == 0 {
            warn!("profile {} has zero-length rows, nothing to scan", profile.name);
            return Self::default();
        }

        let mut index = RowIndex {
            starts: Vec::with_capacity(profile.max_rows),
            ..Default::default()
        };
        let mut anchor: Option<usize> = None;

        for start in memmem::find_iter(data, &ROW_PREAMBLE) {
            if index.starts.len() >= profile.max_rows {
                break;
            }

            let Some(previous) = anchor else {
                index.starts.push(start);
                anchor = Some(start);
                continue;
            };

            let gap = start - previous;
            if gap == row_bytes {
                index.starts.push(start);
            } else if gap % row_bytes == 0 {
                debug!("{} bytes since row at {:#x}, filling in missing rows", gap, previous);
                let mut next = previous + row_bytes;
                while next <= start && index.starts.len() < profile.max_rows {
                    if next != start {
                        index.recovered += 1;
                    }
                    index.starts.push(next);
                    next += row_bytes;
                }
            } else {
                debug!("dropping row marker at {:#x}, {} bytes since last row", start, gap);
                index.discarded += 1;
                index.unresolved_gap = Some(RowGap {
                    offset: previous,
                    gap,
                });
                continue;
            }

            anchor = Some(start);
            index.unresolved_gap = None;
        }

        index
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Rows synthesized to cover missing markers.
    pub fn recovered(&self) -> usize {
        self.recovered
    }

    /// Markers rejected for landing off the row grid.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// The last rejected marker, if no row was accepted after it.
    pub fn unresolved_gap(&self) -> Option<RowGap> {
        self.unresolved_gap
    }
}

/// Turns raw downloads into pixel grids for one sensor profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconstructor {
    profile: SensorProfile,
    interleave: Interleave,
}

impl Reconstructor {
    pub fn new(profile: SensorProfile, interleave: Interleave) -> Result<Self, ReconstructionError> {
        profile.validate()?;
        Ok(Self {
            profile,
            interleave,
        })
    }

    pub fn profile(&self) -> &SensorProfile {
        &self.profile
    }

    pub fn interleave(&self) -> Interleave {
        self.interleave
    }

    pub fn reconstruct(&self, data: &[u8]) -> Result<PixelImage, ReconstructionError> {
        let index = self.sync(data)?;
        self.assemble(data, &index)
    }

    fn sync(&self, data: &[u8]) -> Result<RowIndex, ReconstructionError> {
        let index = RowIndex::scan(data, &self.profile);
        let required = self.profile.required_rows();

        debug!(
            "found {} rows in {} bytes ({} recovered, {} discarded)",
            index.len(),
            data.len(),
            index.recovered(),
            index.discarded()
        );

        if index.len() >= required {
            return Ok(index);
        }

        let err = match index.unresolved_gap() {
            Some(RowGap { offset, gap }) => ReconstructionError::RowLengthMismatch {
                rows_found: index.len(),
                last_good_offset: offset,
                gap,
            },
            None => ReconstructionError::InsufficientRows {
                found: index.len(),
                required,
                last_good_offset: index.starts().last().copied(),
            },
        };
        warn!("{}", err);
        Err(err)
    }

    fn assemble(&self, data: &[u8], index: &RowIndex) -> Result<PixelImage, ReconstructionError> {
        let profile = &self.profile;
        let mut image = PixelImage::new(profile.width, profile.height());

        for (half_number, half) in profile.halves.iter().enumerate() {
            for line in 0..half.rows {
                let row = half.first_row + line;
                let offset = index.starts()[row];

                let pixels = data
                    .get(offset + half.front_porch..offset + profile.row_bytes - half.back_porch)
                    .ok_or(ReconstructionError::TruncatedRow { row, offset })?;

                let target = self.interleave.output_row(half_number, line);
                if let Some(samples) = image.row_mut(target) {
                    unpack_row(pixels, samples);
                }
            }
        }

        Ok(image)
    }
}

/// Little-endian byte pairs to samples. `bytes` holds exactly two bytes per sample.
fn unpack_row(mut bytes: &[u8], row: &mut [u16]) {
    for sample in row.iter_mut() {
        *sample = bytes.get_u16_le();
    }
}

impl Interleave {
    /// Pick the ordering that turns `raw` into `reference`, a frame whose
    /// correct layout is already known.
    pub fn calibrate(
        raw: &[u8],
        profile: &SensorProfile,
        reference: &PixelImage,
    ) -> Result<Option<Interleave>, ReconstructionError> {
        let even_first = Reconstructor::new(*profile, Interleave::EvenFirst)?;
        let index = even_first.sync(raw)?;

        for interleave in [Interleave::EvenFirst, Interleave::OddFirst] {
            let reconstructor = Reconstructor {
                interleave,
                ..even_first
            };
            if reconstructor.assemble(raw, &index)? == *reference {
                return Ok(Some(interleave));
            }
        }

        Ok(None)
    }
}
