//! Multi-detector stitching tests: single-detector equivalence, overlap
//! blending, and cross-detector normalization.

use shuddhi_correct::{CalibrationSet, Corrector, ImageFrame, MultiCorrector};

fn flat(width: u32, height: u32, depth: u8, value: u16) -> ImageFrame {
    ImageFrame::from_pixels(width, height, depth, vec![value; (width * height) as usize]).unwrap()
}

#[test]
fn single_detector_stitch_matches_plain_correction() {
    let width = 24;
    let height = 6;
    let depth = 12;

    let mut pixels = Vec::new();
    for i in 0..width * height {
        pixels.push((i * 17 % 4000) as u16);
    }
    let input = ImageFrame::from_pixels(width, height, depth, pixels).unwrap();

    let mut cal = CalibrationSet::uncalibrated(width, height, depth);
    cal.set_offset(vec![100; (width * height) as usize]).unwrap();
    cal.set_gain(vec![1.5; (width * height) as usize]).unwrap();

    let corrector = Corrector::new(cal.clone());
    let expected = corrector.apply(&input).unwrap();

    let mut rig = MultiCorrector::new(&[(width, height)], depth).unwrap();
    *rig.calibration_mut(0).unwrap() = cal;
    let stitched = rig.stitch(&[&input], width, height).unwrap();

    assert_eq!(stitched.pixels(), expected.pixels());
}

#[test]
fn overlap_blend_of_equal_inputs_is_lossless() {
    // A covers 0..16, B covers 12..28, both flat 1000 after correction;
    // blended columns must still read 1000.
    let depth = 12;
    let a = flat(16, 4, depth, 1000);
    let b = flat(16, 4, depth, 1000);

    let mut rig = MultiCorrector::new(&[(16, 4), (16, 4)], depth).unwrap();
    rig.set_position(1, 12, 0).unwrap();

    let out = rig.stitch(&[&a, &b], 28, 4).unwrap();
    for y in 0..4 {
        for x in 0..28 {
            assert_eq!(out.row(y)[x], 1000, "column {} row {}", x, y);
        }
    }
}

#[test]
fn overlap_blend_ramps_between_detectors() {
    let depth = 12;
    let a = flat(16, 1, depth, 2000);
    let b = flat(16, 1, depth, 1000);

    let mut rig = MultiCorrector::new(&[(16, 1), (16, 1)], depth).unwrap();
    rig.set_position(1, 12, 0).unwrap();

    let out = rig.stitch(&[&a, &b], 28, 1).unwrap();
    // Left of the overlap pure A, right of it pure B
    assert_eq!(out.row(0)[11], 2000);
    assert_eq!(out.row(0)[16], 1000);
    // Inside the overlap the value descends linearly from A toward B
    assert_eq!(&out.row(0)[12..16], &[2000, 1750, 1500, 1250]);
}

#[test]
fn inactive_detector_leaves_zeros() {
    let depth = 12;
    let a = flat(8, 2, depth, 500);
    let b = flat(8, 2, depth, 900);

    let mut rig = MultiCorrector::new(&[(8, 2), (8, 2)], depth).unwrap();
    rig.set_active(1, false).unwrap();

    let out = rig.stitch(&[&a, &b], 16, 2).unwrap();
    assert_eq!(out.row(0)[0], 500);
    assert_eq!(out.row(0)[8], 0);
}

#[test]
fn normalization_levels_detector_response() {
    let depth = 12;
    // Detector 1's gain plane runs twice as hot as detector 0's
    let mut rig = MultiCorrector::new(&[(4, 1), (4, 1)], depth).unwrap();
    rig.calibration_mut(0).unwrap().set_gain(vec![1.0; 4]).unwrap();
    rig.calibration_mut(1).unwrap().set_gain(vec![2.0; 4]).unwrap();
    rig.cross_normalize().unwrap();

    let input = flat(4, 1, depth, 1000);
    let outputs = rig.apply_each(&[&input, &input]).unwrap();
    // Effective gain after normalization is 1.5 for both detectors
    assert_eq!(outputs[0].pixels(), outputs[1].pixels());
    assert_eq!(outputs[0].pixels()[0], 1500);

    assert!(rig.uniformity() < 1.0);
}
