//! Calibration file round-trip tests.

use rand::Rng;
use shuddhi_correct::{io, CalibrationSet, MultiCorrector};

fn random_calibration(width: u32, height: u32, depth: u8) -> CalibrationSet {
    let mut rng = rand::thread_rng();
    let n = (width * height) as usize;
    let mut cal = CalibrationSet::uncalibrated(width, height, depth);
    cal.set_offset((0..n).map(|_| rng.gen_range(0..1000)).collect())
        .unwrap();
    cal.set_gain((0..n).map(|_| rng.gen_range(0.1..10.0)).collect())
        .unwrap();
    cal.set_baseline((0..n).map(|_| rng.gen_range(0..4000)).collect())
        .unwrap();
    cal
}

#[test]
fn single_detector_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("detector.cal");

    let cal = random_calibration(64, 16, 14);
    io::save_calibration(&path, &cal).unwrap();
    let loaded = io::load_calibration(&path).unwrap();

    assert_eq!(loaded, cal);
}

#[test]
fn multi_detector_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rig.cal");

    let mut rig = MultiCorrector::new(&[(32, 8), (32, 8), (16, 8)], 12).unwrap();
    *rig.calibration_mut(0).unwrap() = random_calibration(32, 8, 12);
    *rig.calibration_mut(2).unwrap() = random_calibration(16, 8, 12);
    rig.set_position(1, 28, 2).unwrap();
    rig.set_active(2, false).unwrap();
    rig.set_normalization(0, 1.25).unwrap();

    io::save_multi_calibration(&path, &rig).unwrap();
    let loaded = io::load_multi_calibration(&path, 12).unwrap();

    assert_eq!(loaded.detector_count(), 3);
    for id in 0..3 {
        assert_eq!(
            loaded.calibration(id).unwrap(),
            rig.calibration(id).unwrap()
        );
        assert_eq!(loaded.placement(id).unwrap(), rig.placement(id).unwrap());
    }
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.cal");

    let cal = random_calibration(16, 4, 12);
    io::save_calibration(&path, &cal).unwrap();
    let full = std::fs::read(&path).unwrap();
    std::fs::write(&path, &full[..full.len() / 2]).unwrap();

    assert!(io::load_calibration(&path).is_err());
}

#[test]
fn out_of_range_gain_plane_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hot.cal");

    let mut cal = random_calibration(16, 4, 12);
    cal.gain[0] = 50.0; // beyond the 10.0 clamp
    io::save_calibration(&path, &cal).unwrap();

    assert!(matches!(
        io::load_calibration(&path),
        Err(shuddhi_correct::Error::InvalidCalibration(_))
    ));
}

#[test]
fn garbage_header_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.cal");
    std::fs::write(&path, [0xFFu8; 64]).unwrap();
    assert!(io::load_calibration(&path).is_err());
}
