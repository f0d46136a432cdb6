//! Calibration file persistence
//!
//! Little-endian binary layout.
//!
//! Single detector:
//!
//! ```text
//! u32 width, u32 height, u32 bit_depth
//! u16[width*height] offset
//! f32[width*height] gain
//! u16[width*height] baseline
//! ```
//!
//! Multi detector prepends `u32 detector_count` and, per detector,
//! `(id u32, width u32, height u32, x_offset u32, y_offset u32,
//! active u8, normalization f32)` followed by that detector's three
//! arrays. There is no magic prefix; loads reject implausible geometry
//! headers, and a loaded gain plane must pass the same clamp-range
//! validation the calibration routines enforce, so a wrong or corrupt
//! file fails fast.

use crate::calibration::CalibrationSet;
use crate::error::{Error, Result};
use crate::mog::{DetectorPlacement, MultiCorrector};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Save a single-detector calibration.
pub fn save_calibration<P: AsRef<Path>>(path: P, cal: &CalibrationSet) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_calibration_body(&mut writer, cal)?;
    writer.flush()?;
    Ok(())
}

/// Load a single-detector calibration.
pub fn load_calibration<P: AsRef<Path>>(path: P) -> Result<CalibrationSet> {
    let mut reader = BufReader::new(File::open(path)?);
    read_calibration_body(&mut reader)
}

/// Save a multi-detector rig: placements plus every calibration plane.
pub fn save_multi_calibration<P: AsRef<Path>>(path: P, rig: &MultiCorrector) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_u32(&mut writer, rig.detector_count() as u32)?;
    for id in 0..rig.detector_count() {
        let cal = rig.calibration(id)?;
        let placement = rig.placement(id)?;
        write_u32(&mut writer, id as u32)?;
        write_u32(&mut writer, cal.width())?;
        write_u32(&mut writer, cal.height())?;
        write_u32(&mut writer, placement.x_offset)?;
        write_u32(&mut writer, placement.y_offset)?;
        writer.write_all(&[placement.active as u8])?;
        writer.write_all(&placement.normalization.to_le_bytes())?;
        write_planes(&mut writer, cal)?;
    }
    writer.flush()?;
    Ok(())
}

/// Load a multi-detector rig saved by [`save_multi_calibration`].
///
/// The stored bit depth of the first detector governs the rig.
pub fn load_multi_calibration<P: AsRef<Path>>(path: P, bit_depth: u8) -> Result<MultiCorrector> {
    let mut reader = BufReader::new(File::open(path)?);
    let count = read_u32(&mut reader)? as usize;
    if count == 0 || count > 16 {
        return Err(Error::FileFormat(format!(
            "detector count {} outside 1..=16",
            count
        )));
    }

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let _id = read_u32(&mut reader)?;
        let width = read_u32(&mut reader)?;
        let height = read_u32(&mut reader)?;
        let x_offset = read_u32(&mut reader)?;
        let y_offset = read_u32(&mut reader)?;
        let active = read_u8(&mut reader)? != 0;
        let normalization = f32::from_le_bytes(read_array(&mut reader)?);

        if width == 0 || height == 0 || width as u64 * height as u64 > (1 << 28) {
            return Err(Error::FileFormat(format!(
                "implausible geometry {}x{}",
                width, height
            )));
        }
        let mut cal = CalibrationSet::uncalibrated(width, height, bit_depth);
        read_planes(&mut reader, &mut cal)?;
        if !cal.validate() {
            return Err(Error::InvalidCalibration(format!(
                "detector {}: loaded gain plane fails the clamp-range check",
                parts.len()
            )));
        }
        parts.push((
            cal,
            DetectorPlacement {
                x_offset,
                y_offset,
                active,
                normalization,
            },
        ));
    }
    MultiCorrector::from_parts(parts, bit_depth)
}

fn write_calibration_body<W: Write>(writer: &mut W, cal: &CalibrationSet) -> Result<()> {
    write_u32(writer, cal.width())?;
    write_u32(writer, cal.height())?;
    write_u32(writer, cal.bit_depth() as u32)?;
    write_planes(writer, cal)
}

fn read_calibration_body<R: Read>(reader: &mut R) -> Result<CalibrationSet> {
    let width = read_u32(reader)?;
    let height = read_u32(reader)?;
    let bit_depth = read_u32(reader)?;
    if !(8..=16).contains(&bit_depth) {
        return Err(Error::FileFormat(format!("bad bit depth {}", bit_depth)));
    }
    if width == 0 || height == 0 || width as u64 * height as u64 > (1 << 28) {
        return Err(Error::FileFormat(format!(
            "implausible geometry {}x{}",
            width, height
        )));
    }
    let mut cal = CalibrationSet::uncalibrated(width, height, bit_depth as u8);
    read_planes(reader, &mut cal)?;
    if !cal.validate() {
        return Err(Error::InvalidCalibration(
            "loaded gain plane fails the clamp-range check".into(),
        ));
    }
    Ok(cal)
}

fn write_planes<W: Write>(writer: &mut W, cal: &CalibrationSet) -> Result<()> {
    for v in &cal.offset {
        writer.write_all(&v.to_le_bytes())?;
    }
    for v in &cal.gain {
        writer.write_all(&v.to_le_bytes())?;
    }
    for v in &cal.baseline {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn read_planes<R: Read>(reader: &mut R, cal: &mut CalibrationSet) -> Result<()> {
    let n = cal.pixel_count();
    let mut offset = vec![0u16; n];
    for v in offset.iter_mut() {
        *v = u16::from_le_bytes(read_array(reader)?);
    }
    let mut gain = vec![0f32; n];
    for v in gain.iter_mut() {
        *v = f32::from_le_bytes(read_array(reader)?);
    }
    let mut baseline = vec![0u16; n];
    for v in baseline.iter_mut() {
        *v = u16::from_le_bytes(read_array(reader)?);
    }
    cal.set_offset(offset)?;
    cal.set_gain(gain)?;
    cal.set_baseline(baseline)?;
    Ok(())
}

fn write_u32<W: Write>(writer: &mut W, v: u32) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let b: [u8; 1] = read_array(reader)?;
    Ok(b[0])
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
