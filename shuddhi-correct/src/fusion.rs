//! Dual-energy fusion
//!
//! Dual-energy detectors expose each line twice, once at high and once at
//! low tube energy. Fusing the co-registered pair improves image quality
//! and admits material discrimination: organic materials absorb relatively
//! more at low energy, inorganic absorption is flatter across the spectrum.

use crate::error::{Error, Result};
use crate::frame::{self, ImageFrame};

/// Stabilizer for the adaptive per-pixel weights.
const VAR_EPSILON: f32 = 1e-6;

/// Offset applied before/after the logarithm to keep log(0) finite.
const LOG_EPSILON: f32 = 1.0;

/// Fusion strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionMode {
    /// `y = w_H * H + w_L * L` with normalized weights.
    WeightedAverage,
    /// `y = H + k * (H - L)`, emphasizing the energy difference.
    MaterialDecomposition { coefficient: f32 },
    /// `y = exp(w_H * ln(H+1) + w_L * ln(L+1)) - 1`, for transmission data.
    Logarithmic,
    /// Per-pixel weights from local variance in an odd window (3, 5 or 7).
    Adaptive { window: usize },
}

/// Dual-energy fusion engine for one image geometry.
#[derive(Debug, Clone)]
pub struct DualEnergyFuser {
    width: u32,
    height: u32,
    w_high: f32,
    w_low: f32,
    mode: FusionMode,
}

impl DualEnergyFuser {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParam("zero-sized fusion geometry".into()));
        }
        Ok(Self {
            width,
            height,
            w_high: 0.5,
            w_low: 0.5,
            mode: FusionMode::WeightedAverage,
        })
    }

    pub fn set_mode(&mut self, mode: FusionMode) -> Result<()> {
        if let FusionMode::Adaptive { window } = mode {
            if !matches!(window, 3 | 5 | 7) {
                return Err(Error::InvalidParam(format!(
                    "adaptive window must be 3, 5 or 7, got {}",
                    window
                )));
            }
        }
        self.mode = mode;
        Ok(())
    }

    /// Set fusion weights; they are normalized so `w_H + w_L = 1`.
    pub fn set_weights(&mut self, high: f32, low: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&high) || !(0.0..=1.0).contains(&low) {
            return Err(Error::InvalidParam(format!(
                "weights ({}, {}) outside [0, 1]",
                high, low
            )));
        }
        let sum = high + low;
        if sum > 0.0 {
            self.w_high = high / sum;
            self.w_low = low / sum;
        } else {
            self.w_high = 0.5;
            self.w_low = 0.5;
        }
        Ok(())
    }

    pub fn weights(&self) -> (f32, f32) {
        (self.w_high, self.w_low)
    }

    /// Fuse a high/low pair with the current mode.
    pub fn fuse(&self, high: &ImageFrame, low: &ImageFrame) -> Result<ImageFrame> {
        self.check_pair(high, low)?;
        match self.mode {
            FusionMode::WeightedAverage => Ok(self.fuse_pixelwise(high, low, |h, l| self.w_high * h + self.w_low * l)),
            FusionMode::MaterialDecomposition { coefficient } => {
                Ok(self.fuse_pixelwise(high, low, |h, l| h + coefficient * (h - l)))
            }
            FusionMode::Logarithmic => Ok(self.fuse_pixelwise(high, low, |h, l| {
                let log_fused = self.w_high * (h + LOG_EPSILON).ln()
                    + self.w_low * (l + LOG_EPSILON).ln();
                log_fused.exp() - LOG_EPSILON
            })),
            FusionMode::Adaptive { window } => self.fuse_adaptive(high, low, window),
        }
    }

    /// SNR-proportional weights: `snr = mean^2 / var`, normalized over the
    /// pair. A flat image (zero variance) counts as unit SNR.
    pub fn optimal_weights(&self, high: &ImageFrame, low: &ImageFrame) -> Result<(f32, f32)> {
        self.check_pair(high, low)?;
        let snr_high = snr(high.pixels());
        let snr_low = snr(low.pixels());
        let total = snr_high + snr_low;
        Ok(((snr_high / total) as f32, (snr_low / total) as f32))
    }

    /// Two-channel material decomposition.
    ///
    /// Returns `(organic, inorganic)`: `organic = L - 0.5 * H`,
    /// `inorganic = H - 0.3 * (H - L)`, both clamped and rounded.
    pub fn decompose_materials(
        &self,
        high: &ImageFrame,
        low: &ImageFrame,
    ) -> Result<(ImageFrame, ImageFrame)> {
        self.check_pair(high, low)?;
        let organic = self.fuse_pixelwise(high, low, |h, l| l - 0.5 * h);
        let inorganic = self.fuse_pixelwise(high, low, |h, l| h - 0.3 * (h - l));
        Ok((organic, inorganic))
    }

    fn fuse_adaptive(
        &self,
        high: &ImageFrame,
        low: &ImageFrame,
        window: usize,
    ) -> Result<ImageFrame> {
        let w = self.width as usize;
        let h = self.height as usize;
        let half = window / 2;
        let max = frame::max_value(high.bit_depth()) as f32;
        let mut output = ImageFrame::new(self.width, self.height, high.bit_depth())?;

        for y in 0..h {
            for x in 0..w {
                let (var_high, _) = local_stats(high.pixels(), w, h, x, y, half);
                let (var_low, _) = local_stats(low.pixels(), w, h, x, y, half);
                let total = var_high + var_low + VAR_EPSILON;
                let w_high = var_high / total;
                let w_low = var_low / total;

                let idx = y * w + x;
                let fused = w_high * high.pixels()[idx] as f32 + w_low * low.pixels()[idx] as f32;
                output.pixels_mut()[idx] = (fused.clamp(0.0, max) + 0.5) as u16;
            }
        }
        Ok(output)
    }

    fn fuse_pixelwise(
        &self,
        high: &ImageFrame,
        low: &ImageFrame,
        f: impl Fn(f32, f32) -> f32,
    ) -> ImageFrame {
        let max = frame::max_value(high.bit_depth()) as f32;
        let mut output = high.clone();
        for (i, px) in output.pixels_mut().iter_mut().enumerate() {
            let fused = f(high.pixels()[i] as f32, low.pixels()[i] as f32);
            *px = (fused.clamp(0.0, max) + 0.5) as u16;
        }
        output
    }

    fn check_pair(&self, high: &ImageFrame, low: &ImageFrame) -> Result<()> {
        high.check_geometry(low)?;
        if high.width() != self.width || high.height() != self.height {
            return Err(Error::GeometryMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: high.width(),
                height: high.height(),
            });
        }
        if high.bit_depth() != low.bit_depth() {
            return Err(Error::InvalidParam(format!(
                "energy pair depth mismatch: {} vs {}",
                high.bit_depth(),
                low.bit_depth()
            )));
        }
        Ok(())
    }
}

/// Variance and mean over a clamped window centered at (x, y).
fn local_stats(pixels: &[u16], w: usize, h: usize, x: usize, y: usize, half: usize) -> (f32, f32) {
    let y0 = y.saturating_sub(half);
    let y1 = (y + half).min(h - 1);
    let x0 = x.saturating_sub(half);
    let x1 = (x + half).min(w - 1);

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for wy in y0..=y1 {
        for wx in x0..=x1 {
            sum += pixels[wy * w + wx] as f32;
            count += 1;
        }
    }
    let mean = sum / count as f32;

    let mut var = 0.0f32;
    for wy in y0..=y1 {
        for wx in x0..=x1 {
            let diff = pixels[wy * w + wx] as f32 - mean;
            var += diff * diff;
        }
    }
    (var / count as f32, mean)
}

fn snr(pixels: &[u16]) -> f64 {
    let n = pixels.len() as f64;
    let mean: f64 = pixels.iter().map(|p| *p as f64).sum::<f64>() / n;
    let var: f64 = pixels
        .iter()
        .map(|p| {
            let d = *p as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    if var > 0.0 {
        mean * mean / var
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(high: &[u16], low: &[u16]) -> (ImageFrame, ImageFrame) {
        let w = high.len() as u32;
        (
            ImageFrame::from_pixels(w, 1, 12, high.to_vec()).unwrap(),
            ImageFrame::from_pixels(w, 1, 12, low.to_vec()).unwrap(),
        )
    }

    #[test]
    fn test_full_high_weight_is_identity() {
        let (high, low) = pair(&[100, 2000, 4095], &[5, 5, 5]);
        let mut fuser = DualEnergyFuser::new(3, 1).unwrap();
        fuser.set_weights(1.0, 0.0).unwrap();
        let out = fuser.fuse(&high, &low).unwrap();
        assert_eq!(out.pixels(), high.pixels());
    }

    #[test]
    fn test_weights_normalized() {
        let mut fuser = DualEnergyFuser::new(1, 1).unwrap();
        fuser.set_weights(0.6, 0.6).unwrap();
        let (h, l) = fuser.weights();
        assert!((h - 0.5).abs() < 1e-6);
        assert!((l - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_material_decomposition_difference() {
        let (high, low) = pair(&[1000], &[400]);
        let mut fuser = DualEnergyFuser::new(1, 1).unwrap();
        fuser
            .set_mode(FusionMode::MaterialDecomposition { coefficient: 1.0 })
            .unwrap();
        let out = fuser.fuse(&high, &low).unwrap();
        assert_eq!(out.pixels(), &[1600]); // 1000 + (1000 - 400)
    }

    #[test]
    fn test_decompose_materials_channels() {
        let (high, low) = pair(&[1000], &[800]);
        let fuser = DualEnergyFuser::new(1, 1).unwrap();
        let (organic, inorganic) = fuser.decompose_materials(&high, &low).unwrap();
        assert_eq!(organic.pixels(), &[300]); // 800 - 500
        assert_eq!(inorganic.pixels(), &[940]); // 1000 - 0.3 * 200
    }

    #[test]
    fn test_optimal_weights_favor_cleaner_image() {
        let noisy: Vec<u16> = (0..64).map(|i| 1000 + (i % 7) * 100).collect();
        let clean: Vec<u16> = (0..64).map(|i| 1000 + (i % 2)).collect();
        let (high, low) = (
            ImageFrame::from_pixels(64, 1, 12, clean).unwrap(),
            ImageFrame::from_pixels(64, 1, 12, noisy).unwrap(),
        );
        let fuser = DualEnergyFuser::new(64, 1).unwrap();
        let (w_high, w_low) = fuser.optimal_weights(&high, &low).unwrap();
        assert!(w_high > w_low);
        assert!((w_high + w_low - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_adaptive_window_validation() {
        let mut fuser = DualEnergyFuser::new(8, 8).unwrap();
        assert!(fuser.set_mode(FusionMode::Adaptive { window: 4 }).is_err());
        assert!(fuser.set_mode(FusionMode::Adaptive { window: 5 }).is_ok());
    }

    #[test]
    fn test_geometry_mismatch_rejected() {
        let (high, _) = pair(&[1, 2], &[1, 2]);
        let low = ImageFrame::from_pixels(3, 1, 12, vec![0, 0, 0]).unwrap();
        let fuser = DualEnergyFuser::new(2, 1).unwrap();
        assert!(fuser.fuse(&high, &low).is_err());
    }
}
