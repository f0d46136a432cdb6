//! End-to-end correction pipeline tests: calibrate from reference frames,
//! then verify the per-pixel math and its range discipline.

use rand::Rng;
use shuddhi_correct::calibration::target_for_depth;
use shuddhi_correct::{CalibrationSet, Corrector, ImageFrame};

fn random_frame(width: u32, height: u32, depth: u8, seed_max: u16) -> ImageFrame {
    let mut rng = rand::thread_rng();
    let pixels = (0..width * height)
        .map(|_| rng.gen_range(0..=seed_max))
        .collect();
    ImageFrame::from_pixels(width, height, depth, pixels).unwrap()
}

#[test]
fn dark_field_workflow_hits_target_on_bright_field() {
    let width = 128;
    let height = 8;
    let depth = 14;
    let target = target_for_depth(depth);
    assert_eq!(target, 8192);

    // Dark frames with a fixed pattern, bright frames well above it
    let dark = random_frame(width, height, depth, 400);
    let mut bright = dark.clone();
    for px in bright.pixels_mut() {
        *px += 3000;
    }

    let mut cal = CalibrationSet::uncalibrated(width, height, depth);
    cal.calibrate_offset(&[&dark, &dark, &dark]).unwrap();
    cal.calibrate_gain(&bright, target).unwrap();
    assert!(cal.validate());

    // Correcting the bright field must land every pixel on the target
    let corrector = Corrector::new(cal);
    let out = corrector.apply(&bright).unwrap();
    for px in out.pixels() {
        assert_eq!(*px, target);
    }
}

#[test]
fn corrected_output_stays_in_depth_range() {
    let width = 64;
    let height = 4;
    let depth = 12;
    let max = (1u16 << depth) - 1;

    let mut cal = CalibrationSet::uncalibrated(width, height, depth);
    // Hostile calibration: huge gains and offsets
    cal.set_gain(vec![10.0; (width * height) as usize]).unwrap();
    cal.set_offset(vec![4000; (width * height) as usize]).unwrap();

    let mut corrector = Corrector::new(cal);
    corrector.set_target_baseline(max);

    let input = random_frame(width, height, depth, max);
    let out = corrector.apply(&input).unwrap();
    for px in out.pixels() {
        assert!(*px <= max);
    }
}

#[test]
fn offset_calibration_of_constant_frames_is_exact() {
    let frame = random_frame(32, 32, 16, u16::MAX);
    let mut cal = CalibrationSet::uncalibrated(32, 32, 16);
    cal.calibrate_offset(&[&frame; 5]).unwrap();
    assert_eq!(cal.offset.as_slice(), frame.pixels());

    // With offset == input and gain stage off, correction zeroes the frame
    let mut corrector = Corrector::new(cal);
    corrector.set_stages(true, false, false);
    let out = corrector.apply(&frame).unwrap();
    assert!(out.pixels().iter().all(|px| *px == 0));
}

#[test]
fn baseline_stage_normalizes_mean_level() {
    let width = 16;
    let height = 2;
    let depth = 12;
    let target = target_for_depth(depth);

    // Flat reference at 1000 after offset/gain (identity planes)
    let reference =
        ImageFrame::from_pixels(width, height, depth, vec![1000; (width * height) as usize])
            .unwrap();
    let mut cal = CalibrationSet::uncalibrated(width, height, depth);
    cal.calibrate_baseline(&[&reference]).unwrap();

    let mut corrector = Corrector::new(cal);
    corrector.set_stages(false, false, true);
    corrector.set_target_baseline(target);

    let out = corrector.apply(&reference).unwrap();
    for px in out.pixels() {
        assert_eq!(*px, target);
    }
}

#[test]
fn smoothing_keeps_gain_plane_valid() {
    let width = 64;
    let height = 64;
    let mut cal = CalibrationSet::uncalibrated(width, height, 16);
    let bright = random_frame(width, height, 16, 30000);
    cal.calibrate_gain(&bright, 20000).unwrap();
    cal.smooth_gain(5).unwrap();
    assert!(cal.validate());
    let stats = cal.gain_stats();
    assert!(stats.min >= 0.1 && stats.max <= 10.0);
}
