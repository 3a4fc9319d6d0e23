mod common;

use std::path::PathBuf;

use ndarray::Array2;
use tempfile::TempDir;

use starstack_core::error::StackError;
use starstack_core::normalize::HistoNormMode;
use starstack_core::pipeline::{self, PipelineConfig, SilentReporter};
use starstack_core::stack::{StackMode, WeightMode};
use starstack_core::stats;

fn base_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    // Synthetic fields are clean; keep the cosmetic pass from nibbling at
    // noise-free star profiles.
    config.bad_pixel.sig_low = 100.0;
    config.bad_pixel.sig_high = 100.0;
    config.star_detect.bad_pixel_sigma = 0.0;
    config.star_detect.radius = 12;
    config
}

fn write_star_frames(
    dir: &TempDir,
    shifts: &[(f32, f32)],
    noise: f32,
    background: f32,
) -> Vec<PathBuf> {
    let layout = common::test_star_layout();
    shifts
        .iter()
        .enumerate()
        .map(|(i, &(dx, dy))| {
            let shifted: Vec<(f32, f32, f32)> = layout
                .iter()
                .map(|&(x, y, amp)| (x + dx, y + dy, amp))
                .collect();
            let mut data = common::render_stars(256, 256, &shifted, 2.0, background);
            if noise > 0.0 {
                common::add_noise(&mut data, noise, 7000 + i as u64);
            }
            common::write_fits(dir, &format!("light{i:02}.fits"), &data, 60.0)
        })
        .collect()
}

#[test]
fn subpixel_shifted_frames_stack_onto_the_reference() {
    let dir = TempDir::new().unwrap();
    let shifts = [(0.0, 0.0), (1.3, -0.7), (-0.5, 2.1)];
    let files = write_star_frames(&dir, &shifts, 0.02, 10.0);

    let mut config = base_config();
    config.stack.mode = StackMode::Mean;
    config.normalize = HistoNormMode::None;

    let output = pipeline::run_stack(&files, &config, &SilentReporter).unwrap();
    assert_eq!(output.frames_combined, 3);
    assert!((output.total_exposure - 180.0).abs() < 1e-3);

    // All stars must survive the stack at their reference positions.
    assert_eq!(output.stars.len(), common::test_star_layout().len());

    // Stacking three frames reduces the noise; resampling smooths a bit
    // more, so bound the reduction from both sides instead of pinning the
    // exact 1/sqrt(3).
    let single = {
        let (data, _) = starstack_core::io::fits::read_mono(&files[0]).unwrap();
        stats::estimate_noise(&data)
    };
    let stacked = output.stats.noise;
    assert!(stacked < single / 1.4, "stacked {stacked}, single {single}");
    assert!(stacked > single / 6.0, "stacked {stacked}, single {single}");
}

#[test]
fn batch_splits_do_not_change_a_mean_stack() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..12)
        .map(|i| {
            let mut data = Array2::from_elem((128, 128), 100.0f32);
            common::add_noise(&mut data, 2.0, 9000 + i as u64);
            common::write_fits(&dir, &format!("flatfield{i:02}.fits"), &data, 10.0)
        })
        .collect();

    let mut config = base_config();
    config.stack.mode = StackMode::Mean;
    config.stack.weight = WeightMode::Unweighted;
    config.align.enabled = false;
    config.normalize = HistoNormMode::None;

    config.stack.memory_mib = 4096;
    let single = pipeline::run_stack(&files, &config, &SilentReporter).unwrap();

    // 128*128*4*6 bytes per working set: a 1 MiB budget forces 2-frame
    // batches.
    config.stack.memory_mib = 1;
    let batched = pipeline::run_stack(&files, &config, &SilentReporter).unwrap();

    assert_eq!(single.frames_combined, 12);
    assert_eq!(batched.frames_combined, 12);
    let mut worst = 0.0f32;
    for (a, b) in single.data.iter().zip(batched.data.iter()) {
        worst = worst.max((a - b).abs() / a.abs().max(1.0));
    }
    assert!(worst < 1e-5, "worst relative difference {worst}");
}

#[test]
fn single_frame_stack_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let files = write_star_frames(&dir, &[(0.0, 0.0)], 0.0, 10.0);
    let (original, _) = starstack_core::io::fits::read_mono(&files[0]).unwrap();

    let mut config = base_config();
    config.stack.mode = StackMode::Mean;
    config.normalize = HistoNormMode::None;

    let output = pipeline::run_stack(&files, &config, &SilentReporter).unwrap();
    assert_eq!(output.frames_combined, 1);
    for (a, b) in original.iter().zip(output.data.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn calibration_dimension_mismatch_aborts_before_stacking() {
    let dir = TempDir::new().unwrap();
    let files = write_star_frames(&dir, &[(0.0, 0.0), (1.0, 1.0)], 0.02, 10.0);
    let dark = common::write_fits(&dir, "dark.fits", &Array2::zeros((64, 64)), 60.0);

    let mut config = base_config();
    config.calibration.dark = Some(dark);

    let result = pipeline::run_stack(&files, &config, &SilentReporter);
    assert!(matches!(result, Err(StackError::DimensionMismatch { .. })));
}

#[test]
fn misaligned_frame_is_dropped_and_the_rest_stack() {
    let dir = TempDir::new().unwrap();
    let shifts = [(0.0, 0.0), (0.8, -0.3), (-0.6, 0.4), (0.2, 0.9)];
    let mut files = write_star_frames(&dir, &shifts, 0.02, 10.0);

    // A frame of the same depth but a completely different star field.
    let rogue_layout = [
        (25.0f32, 35.0f32, 1.0f32),
        (210.0, 70.0, 0.9),
        (75.0, 160.0, 0.8),
        (150.0, 30.0, 0.7),
        (60.0, 90.0, 0.6),
        (190.0, 210.0, 0.5),
    ];
    let mut rogue = common::render_stars(256, 256, &rogue_layout, 2.0, 10.0);
    common::add_noise(&mut rogue, 0.02, 7777);
    files.push(common::write_fits(&dir, "rogue.fits", &rogue, 60.0));

    let mut config = base_config();
    config.stack.mode = StackMode::Mean;
    config.normalize = HistoNormMode::None;
    config.align.threshold = 1.0;

    let output = pipeline::run_stack(&files, &config, &SilentReporter).unwrap();
    assert_eq!(output.frames_combined, 4, "rogue frame was not dropped");
}

#[test]
fn no_stars_anywhere_fails_reference_selection() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..3)
        .map(|i| {
            let mut data = Array2::from_elem((64, 64), 5.0f32);
            common::add_noise(&mut data, 0.1, 400 + i as u64);
            common::write_fits(&dir, &format!("starless{i}.fits"), &data, 10.0)
        })
        .collect();

    let config = base_config();
    let result = pipeline::run_stack(&files, &config, &SilentReporter);
    assert!(matches!(result, Err(StackError::NoReference)));
}

#[test]
fn unreadable_light_is_dropped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut files = write_star_frames(&dir, &[(0.0, 0.0), (0.5, 0.5)], 0.02, 10.0);
    files.push(dir.path().join("missing.fits"));

    let mut config = base_config();
    config.stack.mode = StackMode::Mean;
    config.normalize = HistoNormMode::None;

    let output = pipeline::run_stack(&files, &config, &SilentReporter).unwrap();
    assert_eq!(output.frames_combined, 2);
}
