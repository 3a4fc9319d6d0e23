mod common;

use std::io::Write;

use ndarray::Array2;
use tempfile::TempDir;

use starstack_core::error::StackError;
use starstack_core::frame::CfaPattern;
use starstack_core::io::fits::{self, OutputHeader};

#[test]
fn write_then_read_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("roundtrip.fits");
    let data = Array2::from_shape_fn((7, 5), |(r, c)| (r * 5 + c) as f32 * 0.25 - 1.0);

    fits::write_mono(
        &path,
        &data,
        &OutputHeader {
            exposure_seconds: 120.0,
            date_obs: Some("2023-09-14T21:30:00".into()),
            frames_combined: Some(8),
            ..Default::default()
        },
    )
    .unwrap();

    let (read, header) = fits::read_mono(&path).unwrap();
    assert_eq!(read.dim(), (7, 5));
    for (a, b) in data.iter().zip(read.iter()) {
        assert_eq!(a, b);
    }
    assert!((header.exposure_seconds - 120.0).abs() < 1e-3);
    assert_eq!(header.date_obs.as_deref(), Some("2023-09-14T21:30:00"));
}

#[test]
fn integer_samples_apply_bzero_bscale() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("int16.fits");
    let samples: Vec<i16> = vec![-32768, 0, 32767, 100, -100, 7];
    let bytes = common::build_fits_i16(&samples, 3, 2, 32768.0, 1.0, &[]);
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let (data, _) = fits::read_mono(&path).unwrap();
    // BZERO 32768 recovers the unsigned range.
    assert_eq!(data[[0, 0]], 0.0);
    assert_eq!(data[[0, 1]], 32768.0);
    assert_eq!(data[[0, 2]], 65535.0);
}

#[test]
fn bayer_and_binning_headers_are_parsed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("headers.fits");
    let samples: Vec<i16> = vec![0; 4];
    let bytes = common::build_fits_i16(
        &samples,
        2,
        2,
        0.0,
        1.0,
        &[
            ("BAYERPAT", "'RGGB'"),
            ("XBINNING", "2"),
            ("YBINNING", "2"),
            ("DATE-OBS", "'2024-01-01T00:00:00'"),
        ],
    );
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let (_, header) = fits::read_mono(&path).unwrap();
    assert_eq!(header.bayer_pattern, Some(CfaPattern::Rggb));
    assert_eq!(header.xbinning, 2);
    assert_eq!(header.ybinning, 2);
}

#[test]
fn peek_axes_reads_header_only() {
    let dir = TempDir::new().unwrap();
    let data = Array2::zeros((31, 17));
    let path = common::write_fits(&dir, "axes.fits", &data, 0.0);
    assert_eq!(fits::peek_axes(&path).unwrap(), (17, 31));
}

#[test]
fn malformed_header_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.fits");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&vec![0x42u8; 2880])
        .unwrap();

    match fits::read_mono(&path) {
        Err(StackError::Format { .. }) => {}
        other => panic!("expected format error, got {other:?}"),
    }
}

#[test]
fn truncated_data_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.fits");
    let data = Array2::from_elem((64, 64), 1.0f32);
    let mut bytes = common::build_fits_f32(&data, 0.0);
    bytes.truncate(bytes.len() - 4096);
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    assert!(matches!(
        fits::read_mono(&path),
        Err(StackError::Format { .. })
    ));
}

#[test]
fn rgb_cube_round_trips_channel_major() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rgb.fits");
    let red = Array2::from_elem((4, 4), 0.9f32);
    let green = Array2::from_elem((4, 4), 0.5f32);
    let blue = Array2::from_elem((4, 4), 0.1f32);

    fits::write_rgb(&path, [&red, &green, &blue], &OutputHeader::default()).unwrap();

    let (planes, _) = fits::read_image(&path).unwrap();
    assert_eq!(planes.len(), 3);
    assert_eq!(planes[0][[0, 0]], 0.9);
    assert_eq!(planes[1][[0, 0]], 0.5);
    assert_eq!(planes[2][[0, 0]], 0.1);
}
