//! Error types for the correction engine

use thiserror::Error;

/// Errors raised by calibration and correction routines
#[derive(Error, Debug)]
pub enum Error {
    #[error("bit depth {0} outside supported range 8..=16")]
    InvalidBitDepth(u8),

    #[error("geometry mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    GeometryMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("buffer length {actual} does not match {expected} pixels")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("calibration data failed validation: {0}")]
    InvalidCalibration(String),

    #[error("no reference data: {0}")]
    EmptyInput(&'static str),

    #[error("calibration file format error: {0}")]
    FileFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
