//! Dark-field offset calibration
//!
//! The offset plane is the average dark-current signal over K reference
//! frames acquired with no illumination. Accumulation is 64-bit so deep
//! stacks of 16-bit frames cannot overflow; the division rounds half up,
//! `(sum + k/2) / k`, so averaging K copies of the same frame reproduces it
//! exactly.

use super::CalibrationSet;
use crate::error::{Error, Result};
use crate::frame::ImageFrame;

impl CalibrationSet {
    /// Derive the offset plane from dark-field frames of identical geometry.
    pub fn calibrate_offset(&mut self, darks: &[&ImageFrame]) -> Result<()> {
        if darks.is_empty() {
            return Err(Error::EmptyInput("offset calibration needs dark frames"));
        }
        for dark in darks {
            self.check_frame(dark)?;
        }

        let n = self.pixel_count();
        let k = darks.len() as u64;
        let mut accum = vec![0u64; n];
        for dark in darks {
            for (acc, px) in accum.iter_mut().zip(dark.pixels()) {
                *acc += *px as u64;
            }
        }
        for (out, acc) in self.offset.iter_mut().zip(&accum) {
            *out = ((*acc + k / 2) / k) as u16;
        }
        Ok(())
    }

    /// Line-mode variant: average K dark lines of width W into a column
    /// mean and broadcast it down every row of the detector.
    pub fn calibrate_offset_lines(&mut self, lines: &[&[u16]]) -> Result<()> {
        if lines.is_empty() {
            return Err(Error::EmptyInput("offset calibration needs dark lines"));
        }
        let width = self.width() as usize;
        for line in lines {
            if line.len() != width {
                return Err(Error::LengthMismatch {
                    expected: width,
                    actual: line.len(),
                });
            }
        }

        let k = lines.len() as u64;
        let mut accum = vec![0u64; width];
        for line in lines {
            for (acc, px) in accum.iter_mut().zip(*line) {
                *acc += *px as u64;
            }
        }
        let column_mean: Vec<u16> = accum.iter().map(|acc| ((acc + k / 2) / k) as u16).collect();

        for row in self.offset.chunks_exact_mut(width) {
            row.copy_from_slice(&column_mean);
        }
        Ok(())
    }
}
