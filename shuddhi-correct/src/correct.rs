//! Per-pixel correction pipeline
//!
//! For every pixel `x` the pipeline computes
//!
//! ```text
//! y = x
//! y -= offset[i]          (when offset stage enabled)
//! y *= gain[i]            (when gain stage enabled)
//! y -= baseline[i]        (when baseline stage enabled)
//! y += target_baseline
//! y = clamp(round(y), 0, (1 << depth) - 1)
//! ```
//!
//! Stage enables are independent. With an uncalibrated set, all stages on,
//! and a zero target baseline the pipeline is the identity.

use crate::calibration::CalibrationSet;
use crate::error::{Error, Result};
use crate::frame::ImageFrame;

/// Correction engine for a single detector.
#[derive(Debug, Clone)]
pub struct Corrector {
    cal: CalibrationSet,
    offset_enabled: bool,
    gain_enabled: bool,
    baseline_enabled: bool,
    target_baseline: u16,
}

impl Corrector {
    /// Engine with offset and gain stages on, baseline off, target 0.
    ///
    /// These defaults match a freshly initialized detector; hosts that use
    /// baseline normalization typically pair the baseline stage with
    /// [`crate::calibration::target_for_depth`].
    pub fn new(cal: CalibrationSet) -> Self {
        Self {
            cal,
            offset_enabled: true,
            gain_enabled: true,
            baseline_enabled: false,
            target_baseline: 0,
        }
    }

    /// Identity engine for a geometry (uncalibrated planes).
    pub fn identity(width: u32, height: u32, bit_depth: u8) -> Self {
        Self::new(CalibrationSet::uncalibrated(width, height, bit_depth))
    }

    pub fn calibration(&self) -> &CalibrationSet {
        &self.cal
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationSet {
        &mut self.cal
    }

    /// Enable or disable individual stages.
    pub fn set_stages(&mut self, offset: bool, gain: bool, baseline: bool) {
        self.offset_enabled = offset;
        self.gain_enabled = gain;
        self.baseline_enabled = baseline;
    }

    pub fn set_target_baseline(&mut self, target: u16) {
        self.target_baseline = target;
    }

    pub fn target_baseline(&self) -> u16 {
        self.target_baseline
    }

    /// Correct a whole frame into a fresh output frame.
    pub fn apply(&self, input: &ImageFrame) -> Result<ImageFrame> {
        self.cal.check_frame(input)?;
        if input.bit_depth() != self.cal.bit_depth() {
            return Err(Error::InvalidParam(format!(
                "frame depth {} does not match calibration depth {}",
                input.bit_depth(),
                self.cal.bit_depth()
            )));
        }
        let mut output = input.clone();
        let (pixels, n) = (output.pixels_mut(), self.cal.pixel_count());
        debug_assert_eq!(pixels.len(), n);
        self.apply_range(pixels, 0);
        Ok(output)
    }

    /// Correct one line in place using the calibration row at `line_index`.
    ///
    /// Line-scan hosts that correct on the fly pass each assembled row
    /// through here before the frame completes.
    pub fn apply_line(&self, line: &mut [u16], line_index: u32) -> Result<()> {
        let width = self.cal.width() as usize;
        if line.len() != width {
            return Err(Error::LengthMismatch {
                expected: width,
                actual: line.len(),
            });
        }
        let row = if line_index < self.cal.height() {
            line_index as usize
        } else {
            0
        };
        self.apply_range(line, row * width);
        Ok(())
    }

    fn apply_range(&self, pixels: &mut [u16], cal_start: usize) {
        let max = self.cal.max_value() as f32;
        let target = self.target_baseline as f32;
        for (i, px) in pixels.iter_mut().enumerate() {
            let ci = cal_start + i;
            let mut y = *px as f32;
            if self.offset_enabled {
                y -= self.cal.offset[ci] as f32;
            }
            if self.gain_enabled {
                y *= self.cal.gain[ci];
            }
            if self.baseline_enabled {
                y -= self.cal.baseline[ci] as f32;
            }
            y += target;
            *px = (y.clamp(0.0, max) + 0.5) as u16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_12(pixels: &[u16]) -> ImageFrame {
        ImageFrame::from_pixels(pixels.len() as u32, 1, 12, pixels.to_vec()).unwrap()
    }

    #[test]
    fn test_identity_pipeline() {
        let corrector = Corrector::identity(4, 1, 12);
        let input = frame_12(&[0, 1, 2048, 4095]);
        let out = corrector.apply(&input).unwrap();
        assert_eq!(out.pixels(), input.pixels());
    }

    #[test]
    fn test_gain_target_scenario() {
        // gain 2.048 maps 1000 -> 2048
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        let bright = frame_12(&[1000]);
        cal.calibrate_gain(&bright, 2048).unwrap();
        let corrector = Corrector::new(cal);
        let out = corrector.apply(&frame_12(&[1000])).unwrap();
        assert_eq!(out.pixels(), &[2048]);
    }

    #[test]
    fn test_clamps_not_wraps() {
        let mut cal = CalibrationSet::uncalibrated(2, 1, 12);
        cal.set_gain(vec![10.0, 0.1]).unwrap();
        let corrector = Corrector::new(cal);
        let out = corrector.apply(&frame_12(&[4095, 3])).unwrap();
        assert_eq!(out.pixels()[0], 4095); // 40950 clamps to max
        assert_eq!(out.pixels()[1], 0); // 0.3 rounds to 0
    }

    #[test]
    fn test_negative_clamps_to_zero() {
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        cal.set_offset(vec![500]).unwrap();
        let corrector = Corrector::new(cal);
        let out = corrector.apply(&frame_12(&[100])).unwrap();
        assert_eq!(out.pixels(), &[0]);
    }

    #[test]
    fn test_baseline_and_target() {
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        cal.set_baseline(vec![300]).unwrap();
        let mut corrector = Corrector::new(cal);
        corrector.set_stages(false, false, true);
        corrector.set_target_baseline(2048);
        let out = corrector.apply(&frame_12(&[1000])).unwrap();
        // 1000 - 300 + 2048
        assert_eq!(out.pixels(), &[2748]);
    }

    #[test]
    fn test_line_mode_uses_calibration_row() {
        let mut cal = CalibrationSet::uncalibrated(2, 2, 12);
        cal.set_offset(vec![0, 0, 100, 100]).unwrap();
        let corrector = Corrector::new(cal);
        let mut line = [500u16, 600];
        corrector.apply_line(&mut line, 1).unwrap();
        assert_eq!(line, [400, 500]);
    }

    #[test]
    fn test_depth_mismatch_rejected() {
        let corrector = Corrector::identity(2, 1, 12);
        let input = ImageFrame::from_pixels(2, 1, 16, vec![0, 0]).unwrap();
        assert!(corrector.apply(&input).is_err());
    }
}
