//! Bright-field gain calibration
//!
//! Gain is chosen per pixel so the offset-subtracted bright reference lands
//! on a caller-supplied target: `gain = target / max(bright - offset, 1)`.
//! Every coefficient is clamped to `[0.1, 10.0]`, so a dead pixel pins at
//! the upper clamp and shows up in the [`CalibrationSet::validate`] budget
//! once enough of them accumulate.

use super::CalibrationSet;
use crate::error::{Error, Result};
use crate::frame::ImageFrame;

pub(crate) const GAIN_MIN: f32 = 0.1;
pub(crate) const GAIN_MAX: f32 = 10.0;

impl CalibrationSet {
    /// Derive the gain plane from one bright-field frame.
    ///
    /// The offset plane must already be calibrated (or deliberately zero).
    pub fn calibrate_gain(&mut self, bright: &ImageFrame, target: u16) -> Result<()> {
        self.check_frame(bright)?;
        if target == 0 {
            return Err(Error::InvalidParam("gain target must be nonzero".into()));
        }

        for ((gain, px), offset) in self.gain.iter_mut().zip(bright.pixels()).zip(&self.offset) {
            let corrected = (*px as i32 - *offset as i32).max(1);
            *gain = (target as f32 / corrected as f32).clamp(GAIN_MIN, GAIN_MAX);
        }
        Ok(())
    }

    /// Smooth the gain plane with a k x k mean kernel, `k` in {3, 5, 7}.
    ///
    /// Border pixels (closer than k/2 to an edge) keep their unsmoothed
    /// value.
    pub fn smooth_gain(&mut self, kernel: usize) -> Result<()> {
        let width = self.width() as usize;
        let height = self.height() as usize;
        smooth_plane(&mut self.gain, width, height, kernel)
    }
}

/// k x k mean filter over a row-major f32 plane, borders untouched.
pub fn smooth_plane(plane: &mut [f32], width: usize, height: usize, kernel: usize) -> Result<()> {
    if !matches!(kernel, 3 | 5 | 7) {
        return Err(Error::InvalidParam(format!(
            "smoothing kernel must be 3, 5 or 7, got {}",
            kernel
        )));
    }
    if plane.len() != width * height {
        return Err(Error::LengthMismatch {
            expected: width * height,
            actual: plane.len(),
        });
    }

    let half = kernel / 2;
    if width <= 2 * half || height <= 2 * half {
        // Nothing but border pixels
        return Ok(());
    }

    let source = plane.to_vec();
    let inv = 1.0 / (kernel * kernel) as f32;
    for y in half..height - half {
        for x in half..width - half {
            let mut sum = 0.0f32;
            for ky in y - half..=y + half {
                for kx in x - half..=x + half {
                    sum += source[ky * width + kx];
                }
            }
            plane[y * width + x] = sum * inv;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_hits_target() {
        // bright 1000, offset 0, target 2048 -> gain 2.048
        let bright = ImageFrame::from_pixels(1, 1, 12, vec![1000]).unwrap();
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        cal.calibrate_gain(&bright, 2048).unwrap();
        assert!((cal.gain[0] - 2.048).abs() < 1e-6);
    }

    #[test]
    fn test_gain_clamped() {
        let bright = ImageFrame::from_pixels(2, 1, 16, vec![1, 65535]).unwrap();
        let mut cal = CalibrationSet::uncalibrated(2, 1, 16);
        cal.set_offset(vec![0, 65000]).unwrap();
        cal.calibrate_gain(&bright, 40000).unwrap();
        assert_eq!(cal.gain[0], GAIN_MAX);
        // 40000 / 535 > 10 as well
        assert_eq!(cal.gain[1], GAIN_MAX);
    }

    #[test]
    fn test_dead_pixel_pins_at_upper_clamp() {
        let bright = ImageFrame::from_pixels(1, 1, 12, vec![5]).unwrap();
        let mut cal = CalibrationSet::uncalibrated(1, 1, 12);
        cal.set_offset(vec![10]).unwrap();
        cal.calibrate_gain(&bright, 2048).unwrap();
        assert_eq!(cal.gain[0], GAIN_MAX);
    }

    #[test]
    fn test_smooth_preserves_border() {
        let mut cal = CalibrationSet::uncalibrated(5, 5, 12);
        cal.gain[12] = 10.0; // center pixel
        cal.gain[0] = 5.0; // corner stays
        cal.smooth_gain(3).unwrap();
        assert_eq!(cal.gain[0], 5.0);
        // Center got averaged down: (8 * 1.0 + 10.0) / 9
        assert!((cal.gain[12] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_smooth_rejects_even_kernel() {
        let mut cal = CalibrationSet::uncalibrated(8, 8, 12);
        assert!(cal.smooth_gain(4).is_err());
    }
}
