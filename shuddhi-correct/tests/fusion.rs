//! Dual-energy fusion integration tests.

use shuddhi_correct::{DualEnergyFuser, FusionMode, ImageFrame};

fn gradient(width: u32, height: u32, base: u16, step: u16) -> ImageFrame {
    let pixels = (0..width * height)
        .map(|i| base + (i as u16 % 32) * step)
        .collect();
    ImageFrame::from_pixels(width, height, 14, pixels).unwrap()
}

#[test]
fn weighted_average_midpoint() {
    let high = gradient(32, 4, 2000, 10);
    let low = gradient(32, 4, 1000, 10);
    let fuser = DualEnergyFuser::new(32, 4).unwrap();

    let out = fuser.fuse(&high, &low).unwrap();
    for ((h, l), f) in high.pixels().iter().zip(low.pixels()).zip(out.pixels()) {
        let expected = ((*h as f32 + *l as f32) / 2.0 + 0.5) as u16;
        assert_eq!(*f, expected);
    }
}

#[test]
fn logarithmic_fusion_stays_between_inputs() {
    let high = gradient(16, 2, 4000, 20);
    let low = gradient(16, 2, 500, 20);
    let mut fuser = DualEnergyFuser::new(16, 2).unwrap();
    fuser.set_mode(FusionMode::Logarithmic).unwrap();

    let out = fuser.fuse(&high, &low).unwrap();
    for ((h, l), f) in high.pixels().iter().zip(low.pixels()).zip(out.pixels()) {
        assert!(*f >= *l.min(h) && *f <= *l.max(h));
    }
}

#[test]
fn adaptive_fusion_weighs_structured_image() {
    let width = 16;
    let height = 16;
    // High energy carries all the structure, low energy is flat
    let mut high_pixels = vec![1000u16; (width * height) as usize];
    for (i, px) in high_pixels.iter_mut().enumerate() {
        if (i / width as usize + i % width as usize) % 2 == 0 {
            *px = 3000;
        }
    }
    let high = ImageFrame::from_pixels(width, height, 14, high_pixels).unwrap();
    let low = ImageFrame::from_pixels(width, height, 14, vec![500; (width * height) as usize])
        .unwrap();

    let mut fuser = DualEnergyFuser::new(width, height).unwrap();
    fuser.set_mode(FusionMode::Adaptive { window: 3 }).unwrap();
    let out = fuser.fuse(&high, &low).unwrap();

    // The flat low image has zero local variance, so the fused result
    // follows the high-energy image almost exactly.
    for (f, h) in out.pixels().iter().zip(high.pixels()) {
        assert!((*f as i32 - *h as i32).abs() <= 1);
    }
}

#[test]
fn material_channels_separate() {
    let width = 8;
    // Organic-like region: strong low-energy absorption difference
    let high = ImageFrame::from_pixels(width, 1, 14, vec![3000; 8]).unwrap();
    let low = ImageFrame::from_pixels(width, 1, 14, vec![1200; 8]).unwrap();
    let fuser = DualEnergyFuser::new(width, 1).unwrap();

    let (organic, inorganic) = fuser.decompose_materials(&high, &low).unwrap();
    // organic = 1200 - 1500 clamps to 0; inorganic = 3000 - 540
    assert!(organic.pixels().iter().all(|px| *px == 0));
    assert!(inorganic.pixels().iter().all(|px| *px == 2460));
}

#[test]
fn snr_weights_sum_to_one() {
    let high = gradient(64, 2, 3000, 5);
    let low = gradient(64, 2, 800, 30);
    let fuser = DualEnergyFuser::new(64, 2).unwrap();
    let (w_high, w_low) = fuser.optimal_weights(&high, &low).unwrap();
    assert!(w_high > 0.0 && w_low > 0.0);
    assert!((w_high + w_low - 1.0).abs() < 1e-6);
}
