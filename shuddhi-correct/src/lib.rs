//! Shuddhi-Correct: radiometric correction for line-scan X-ray detectors
//!
//! This library implements the pixel-math half of the detector SDK: dark- and
//! bright-field calibration, per-pixel offset/gain/baseline correction,
//! pixel-discontinuity correction across module gaps, multi-detector
//! stitching with overlap blending, and dual-energy fusion.
//!
//! All stages are pure over their input plus calibration data and operate on
//! 8..=16 bit detector images stored as `u16` planes. Corrected output is
//! always clamped to `[0, (1 << bit_depth) - 1]` and rounded to nearest.
//!
//! ## Quick Start
//!
//! ```rust
//! use shuddhi_correct::{CalibrationSet, Corrector, ImageFrame};
//!
//! let width = 64;
//! let height = 4;
//! let depth = 12;
//!
//! // Dark-field calibration from two dark frames
//! let dark = ImageFrame::new(width, height, depth).unwrap();
//! let mut cal = CalibrationSet::uncalibrated(width, height, depth);
//! cal.calibrate_offset(&[&dark, &dark]).unwrap();
//!
//! // Apply the pipeline to an acquired frame
//! let corrector = Corrector::new(cal);
//! let raw = ImageFrame::new(width, height, depth).unwrap();
//! let corrected = corrector.apply(&raw).unwrap();
//! assert_eq!(corrected.width(), width);
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: the [`ImageFrame`] pixel container
//! - [`calibration`]: [`CalibrationSet`] and the offset/gain/baseline math
//! - [`correct`]: the [`Corrector`] per-pixel pipeline
//! - [`pdc`]: pixel-discontinuity correction across module gaps
//! - [`mog`]: multi-detector correction and stitching
//! - [`fusion`]: dual-energy fusion
//! - [`io`]: calibration file persistence

pub mod calibration;
pub mod correct;
pub mod error;
pub mod frame;
pub mod fusion;
pub mod io;
pub mod mog;
pub mod pdc;

pub use calibration::{CalibrationSet, PlaneStats};
pub use correct::Corrector;
pub use error::{Error, Result};
pub use frame::ImageFrame;
pub use fusion::{DualEnergyFuser, FusionMode};
pub use mog::{DetectorPlacement, MultiCorrector};
pub use pdc::{GapMap, PdcMode};
