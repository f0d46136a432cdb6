//! Baseline calibration
//!
//! Baseline references are acquired after offset and gain are in place; the
//! reference frames are offset- and gain-corrected first, then averaged per
//! pixel. Subtracting the resulting plane and re-adding a scalar target
//! normalizes the mean level across the detector.

use super::CalibrationSet;
use crate::error::{Error, Result};
use crate::frame::ImageFrame;

impl CalibrationSet {
    /// Derive the baseline plane from reference frames.
    ///
    /// Each reference is offset- and gain-corrected (clamped to the depth
    /// range) before averaging, matching what the live pipeline would see.
    pub fn calibrate_baseline(&mut self, references: &[&ImageFrame]) -> Result<()> {
        if references.is_empty() {
            return Err(Error::EmptyInput("baseline calibration needs references"));
        }
        for reference in references {
            self.check_frame(reference)?;
        }

        let k = references.len() as u64;
        let max = self.max_value() as f32;
        let mut accum = vec![0u64; self.pixel_count()];
        for reference in references {
            for (i, px) in reference.pixels().iter().enumerate() {
                let corrected = (*px as f32 - self.offset[i] as f32) * self.gain[i];
                let clamped = corrected.clamp(0.0, max);
                accum[i] += (clamped + 0.5) as u64;
            }
        }
        for (out, acc) in self.baseline.iter_mut().zip(&accum) {
            *out = ((*acc + k / 2) / k) as u16;
        }
        Ok(())
    }
}

/// Conventional target baseline for a bit depth: half of full scale
/// (2048 at 12 bits, 8192 at 14 bits).
pub fn target_for_depth(bit_depth: u8) -> u16 {
    1u16 << (bit_depth.clamp(8, 16) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_for_depth() {
        assert_eq!(target_for_depth(12), 2048);
        assert_eq!(target_for_depth(14), 8192);
    }

    #[test]
    fn test_baseline_applies_offset_and_gain_first() {
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        cal.set_offset(vec![100]).unwrap();
        cal.set_gain(vec![2.0]).unwrap();
        let reference = ImageFrame::from_pixels(1, 1, 12, vec![600]).unwrap();
        cal.calibrate_baseline(&[&reference]).unwrap();
        // (600 - 100) * 2.0 = 1000
        assert_eq!(cal.baseline, vec![1000]);
    }

    #[test]
    fn test_baseline_average() {
        let cal_refs = [
            ImageFrame::from_pixels(1, 1, 12, vec![100]).unwrap(),
            ImageFrame::from_pixels(1, 1, 12, vec![101]).unwrap(),
        ];
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        cal.calibrate_baseline(&[&cal_refs[0], &cal_refs[1]]).unwrap();
        assert_eq!(cal.baseline, vec![101]); // rounds half up
    }
}
