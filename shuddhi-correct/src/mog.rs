//! Multi-detector offset/gain correction and stitching
//!
//! Tunnel rigs stack several line-scan detectors side by side. Each detector
//! keeps its own [`CalibrationSet`] plus a placement in the stitched output
//! and a normalization factor that levels mean response across detectors.
//! Stitched correction places every corrected pixel at its detector's
//! `(x_offset, y_offset)` and blends linearly where a detector overlaps its
//! right-hand neighbor.

use crate::calibration::CalibrationSet;
use crate::error::{Error, Result};
use crate::frame::{self, ImageFrame};

/// Position and state of one detector inside the stitched image.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectorPlacement {
    pub x_offset: u32,
    pub y_offset: u32,
    pub active: bool,
    /// Cross-detector leveling factor, strictly positive.
    pub normalization: f32,
}

impl Default for DetectorPlacement {
    fn default() -> Self {
        Self {
            x_offset: 0,
            y_offset: 0,
            active: true,
            normalization: 1.0,
        }
    }
}

struct DetectorSlot {
    cal: CalibrationSet,
    placement: DetectorPlacement,
}

/// Correction engine for a rig of `D` detectors.
pub struct MultiCorrector {
    detectors: Vec<DetectorSlot>,
    bit_depth: u8,
    offset_enabled: bool,
    gain_enabled: bool,
    baseline_enabled: bool,
    target_baseline: u16,
    overlap_blending: bool,
}

impl MultiCorrector {
    /// Build a rig from per-detector geometries, laid out side by side.
    pub fn new(dims: &[(u32, u32)], bit_depth: u8) -> Result<Self> {
        if dims.is_empty() || dims.len() > 16 {
            return Err(Error::InvalidParam(format!(
                "detector count {} outside 1..=16",
                dims.len()
            )));
        }
        if !(8..=16).contains(&bit_depth) {
            return Err(Error::InvalidBitDepth(bit_depth));
        }
        let mut detectors = Vec::with_capacity(dims.len());
        let mut x = 0u32;
        for (width, height) in dims {
            detectors.push(DetectorSlot {
                cal: CalibrationSet::uncalibrated(*width, *height, bit_depth),
                placement: DetectorPlacement {
                    x_offset: x,
                    ..DetectorPlacement::default()
                },
            });
            x += width;
        }
        Ok(Self {
            detectors,
            bit_depth,
            offset_enabled: true,
            gain_enabled: true,
            baseline_enabled: false,
            target_baseline: 0,
            overlap_blending: true,
        })
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    pub fn calibration(&self, id: usize) -> Result<&CalibrationSet> {
        self.slot(id).map(|d| &d.cal)
    }

    pub fn calibration_mut(&mut self, id: usize) -> Result<&mut CalibrationSet> {
        self.slot_mut(id).map(|d| &mut d.cal)
    }

    pub fn placement(&self, id: usize) -> Result<DetectorPlacement> {
        self.slot(id).map(|d| d.placement)
    }

    pub fn set_position(&mut self, id: usize, x_offset: u32, y_offset: u32) -> Result<()> {
        let slot = self.slot_mut(id)?;
        slot.placement.x_offset = x_offset;
        slot.placement.y_offset = y_offset;
        Ok(())
    }

    pub fn set_active(&mut self, id: usize, active: bool) -> Result<()> {
        self.slot_mut(id)?.placement.active = active;
        Ok(())
    }

    pub fn set_normalization(&mut self, id: usize, factor: f32) -> Result<()> {
        if !(factor > 0.0 && factor <= 10.0) {
            return Err(Error::InvalidParam(format!(
                "normalization factor {} outside (0, 10]",
                factor
            )));
        }
        self.slot_mut(id)?.placement.normalization = factor;
        Ok(())
    }

    pub fn set_stages(&mut self, offset: bool, gain: bool, baseline: bool) {
        self.offset_enabled = offset;
        self.gain_enabled = gain;
        self.baseline_enabled = baseline;
    }

    pub fn set_target_baseline(&mut self, target: u16) {
        self.target_baseline = target;
    }

    pub fn set_overlap_blending(&mut self, enable: bool) {
        self.overlap_blending = enable;
    }

    /// Restore a rig from externally loaded state (calibration file I/O).
    pub(crate) fn from_parts(
        parts: Vec<(CalibrationSet, DetectorPlacement)>,
        bit_depth: u8,
    ) -> Result<Self> {
        let mut rig = Self::new(
            &parts.iter().map(|(c, _)| (c.width(), c.height())).collect::<Vec<_>>(),
            bit_depth,
        )?;
        for (slot, (cal, placement)) in rig.detectors.iter_mut().zip(parts) {
            slot.cal = cal;
            slot.placement = placement;
        }
        Ok(rig)
    }

    /// Level mean gain across active detectors.
    ///
    /// Sets each active detector's normalization factor to
    /// `global_mean / detector_mean` where the global mean runs over active
    /// detectors only.
    pub fn cross_normalize(&mut self) -> Result<()> {
        let means: Vec<Option<f32>> = self
            .detectors
            .iter()
            .map(|d| d.placement.active.then(|| d.cal.gain_mean()))
            .collect();
        let active: Vec<f32> = means.iter().flatten().copied().collect();
        if active.is_empty() {
            return Err(Error::EmptyInput("no active detectors to normalize"));
        }
        let global_mean = active.iter().sum::<f32>() / active.len() as f32;
        for (id, (slot, mean)) in self.detectors.iter_mut().zip(means).enumerate() {
            if let Some(mean) = mean {
                if mean > 0.0 {
                    slot.placement.normalization = global_mean / mean;
                    log::debug!(
                        "detector {}: gain mean {:.4}, normalization {:.4}",
                        id,
                        mean,
                        slot.placement.normalization
                    );
                }
            }
        }
        Ok(())
    }

    /// Coefficient-of-variation uniformity metric over active-detector gain
    /// means: 1.0 is perfectly level, lower is worse, floored at 0.
    pub fn uniformity(&self) -> f32 {
        let means: Vec<f32> = self
            .detectors
            .iter()
            .filter(|d| d.placement.active)
            .map(|d| d.cal.gain_mean())
            .collect();
        if means.len() < 2 {
            return 1.0;
        }
        let mean = means.iter().sum::<f32>() / means.len() as f32;
        let var = means.iter().map(|m| (m - mean) * (m - mean)).sum::<f32>() / means.len() as f32;
        (1.0 - var.sqrt() / mean).max(0.0)
    }

    /// Correct each detector's frame independently.
    pub fn apply_each(&self, inputs: &[&ImageFrame]) -> Result<Vec<ImageFrame>> {
        self.check_inputs(inputs)?;
        let mut outputs = Vec::with_capacity(inputs.len());
        for (slot, input) in self.detectors.iter().zip(inputs) {
            let mut output = (*input).clone();
            if slot.placement.active {
                let max = frame::max_value(self.bit_depth) as f32;
                for (i, px) in output.pixels_mut().iter_mut().enumerate() {
                    *px = (self.correct_pixel(slot, i, *px).clamp(0.0, max) + 0.5) as u16;
                }
            }
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Correct all detectors and stitch them into one output image.
    ///
    /// Where detector `d+1` overlaps detector `d` horizontally, already
    /// written columns are blended with weight `1 - t` over the overlap.
    pub fn stitch(
        &self,
        inputs: &[&ImageFrame],
        stitched_width: u32,
        stitched_height: u32,
    ) -> Result<ImageFrame> {
        self.check_inputs(inputs)?;
        if stitched_width == 0 || stitched_height == 0 {
            return Err(Error::InvalidParam("zero-sized stitched output".into()));
        }

        let max = frame::max_value(self.bit_depth) as f32;
        let mut output = ImageFrame::new(stitched_width, stitched_height, self.bit_depth)?;

        for (id, (slot, input)) in self.detectors.iter().zip(inputs).enumerate() {
            if !slot.placement.active {
                continue;
            }

            // Columns shared with the already-written predecessor, if any.
            // The predecessor keeps weight 1 - t across the overlap, so the
            // seam ramps from its data into this detector's.
            let overlap = self.overlap_with_prev(id);

            let det_w = slot.cal.width();
            let det_h = slot.cal.height();
            for y in 0..det_h {
                let out_y = slot.placement.y_offset + y;
                if out_y >= stitched_height {
                    continue;
                }
                for x in 0..det_w {
                    let out_x = slot.placement.x_offset + x;
                    if out_x >= stitched_width {
                        continue;
                    }
                    let in_idx = (y * det_w + x) as usize;
                    let mut value = self.correct_pixel(slot, in_idx, input.pixels()[in_idx]);

                    if let Some((overlap_start, overlap_width)) = overlap {
                        if self.overlap_blending
                            && out_x >= overlap_start
                            && out_x < overlap_start + overlap_width
                        {
                            let t = (out_x - overlap_start) as f32 / overlap_width as f32;
                            let prev_weight = (1.0 - t).clamp(0.0, 1.0);
                            let existing = output.row(out_y)[out_x as usize] as f32;
                            value = existing * prev_weight + value * (1.0 - prev_weight);
                        }
                    }

                    output.row_mut(out_y)[out_x as usize] = (value.clamp(0.0, max) + 0.5) as u16;
                }
            }
        }
        Ok(output)
    }

    fn overlap_with_prev(&self, id: usize) -> Option<(u32, u32)> {
        let prev = &self.detectors[id.checked_sub(1)?];
        if !prev.placement.active {
            return None;
        }
        let this = &self.detectors[id];
        let prev_end = prev.placement.x_offset + prev.cal.width();
        let this_start = this.placement.x_offset;
        (this_start < prev_end).then(|| (this_start, prev_end - this_start))
    }

    fn correct_pixel(&self, slot: &DetectorSlot, i: usize, raw: u16) -> f32 {
        let mut y = raw as f32;
        if self.offset_enabled {
            y -= slot.cal.offset[i] as f32;
        }
        if self.gain_enabled {
            y *= slot.cal.gain[i];
        }
        y *= slot.placement.normalization;
        if self.baseline_enabled {
            y -= slot.cal.baseline[i] as f32;
        }
        y + self.target_baseline as f32
    }

    fn check_inputs(&self, inputs: &[&ImageFrame]) -> Result<()> {
        if inputs.len() != self.detectors.len() {
            return Err(Error::InvalidParam(format!(
                "{} input frames for {} detectors",
                inputs.len(),
                self.detectors.len()
            )));
        }
        for (slot, input) in self.detectors.iter().zip(inputs) {
            slot.cal.check_frame(input)?;
        }
        Ok(())
    }

    fn slot(&self, id: usize) -> Result<&DetectorSlot> {
        self.detectors
            .get(id)
            .ok_or_else(|| Error::InvalidParam(format!("detector id {} out of range", id)))
    }

    fn slot_mut(&mut self, id: usize) -> Result<&mut DetectorSlot> {
        self.detectors
            .get_mut(id)
            .ok_or_else(|| Error::InvalidParam(format!("detector id {} out of range", id)))
    }
}
