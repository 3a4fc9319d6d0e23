mod common;

use ndarray::Array2;
use tempfile::TempDir;

use starstack_core::calibrate::CalibrationSet;
use starstack_core::error::StackError;
use starstack_core::frame::{Frame, FrameHeader};

fn light(data: Array2<f32>) -> Frame {
    Frame::new(0, data, FrameHeader::default())
}

#[test]
fn zero_dark_and_unit_flat_are_identity() {
    let dir = TempDir::new().unwrap();
    let dark = common::write_fits(&dir, "dark.fits", &Array2::zeros((16, 16)), 60.0);
    let flat = common::write_fits(&dir, "flat.fits", &Array2::from_elem((16, 16), 1.0), 1.0);

    let calibration = CalibrationSet::load(Some(&dark), Some(&flat)).unwrap();

    let original = Array2::from_shape_fn((16, 16), |(r, c)| (r * 16 + c) as f32 * 0.5);
    let mut frame = light(original.clone());
    calibration.apply(&mut frame).unwrap();

    // Bitwise unchanged on finite inputs.
    for (a, b) in original.iter().zip(frame.data.iter()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn dark_subtraction_and_flat_division_compose() {
    let dir = TempDir::new().unwrap();
    let dark = common::write_fits(&dir, "dark.fits", &Array2::from_elem((8, 8), 10.0), 60.0);
    // Flat with mean 2.0: left half 1.0, right half 3.0.
    let flat_data = Array2::from_shape_fn((8, 8), |(_, c)| if c < 4 { 1.0 } else { 3.0 });
    let flat = common::write_fits(&dir, "flat.fits", &flat_data, 1.0);

    let calibration = CalibrationSet::load(Some(&dark), Some(&flat)).unwrap();
    let mut frame = light(Array2::from_elem((8, 8), 16.0));
    calibration.apply(&mut frame).unwrap();

    // (16 - 10) * mean(flat) / flat
    assert!((frame.data[[0, 0]] - 12.0).abs() < 1e-5);
    assert!((frame.data[[0, 7]] - 4.0).abs() < 1e-5);
}

#[test]
fn zero_flat_pixels_become_nan() {
    let dir = TempDir::new().unwrap();
    let mut flat_data = Array2::from_elem((8, 8), 1.0f32);
    flat_data[[3, 3]] = 0.0;
    let flat = common::write_fits(&dir, "flat.fits", &flat_data, 1.0);

    let calibration = CalibrationSet::load(None, Some(&flat)).unwrap();
    let mut frame = light(Array2::from_elem((8, 8), 5.0));
    calibration.apply(&mut frame).unwrap();

    assert!(frame.data[[3, 3]].is_nan());
    assert!(frame.data[[0, 0]].is_finite());
}

#[test]
fn mismatched_dark_and_flat_are_fatal() {
    let dir = TempDir::new().unwrap();
    let dark = common::write_fits(&dir, "dark.fits", &Array2::zeros((16, 16)), 60.0);
    let flat = common::write_fits(&dir, "flat.fits", &Array2::from_elem((16, 15), 1.0), 1.0);

    assert!(matches!(
        CalibrationSet::load(Some(&dark), Some(&flat)),
        Err(StackError::DimensionMismatch { .. })
    ));
}

#[test]
fn mismatched_light_is_fatal() {
    let dir = TempDir::new().unwrap();
    let dark = common::write_fits(&dir, "dark.fits", &Array2::zeros((16, 16)), 60.0);
    let calibration = CalibrationSet::load(Some(&dark), None).unwrap();

    let mut frame = light(Array2::zeros((8, 8)));
    assert!(matches!(
        calibration.apply(&mut frame),
        Err(StackError::DimensionMismatch { .. })
    ));
}

#[test]
fn zero_mean_flat_is_degenerate() {
    let dir = TempDir::new().unwrap();
    let flat = common::write_fits(&dir, "flat.fits", &Array2::zeros((8, 8)), 1.0);

    assert!(matches!(
        CalibrationSet::load(None, Some(&flat)),
        Err(StackError::NumericDegenerate(_))
    ));
}
