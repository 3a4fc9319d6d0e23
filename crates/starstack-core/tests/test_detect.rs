mod common;

use starstack_core::detect::{self, StarDetectConfig};
use starstack_core::stats::{self, LocationScaleMode};

fn detect_config() -> StarDetectConfig {
    StarDetectConfig {
        sigma: 10.0,
        bad_pixel_sigma: 0.0,
        radius: 12,
    }
}

#[test]
fn finds_all_synthetic_stars() {
    let layout = common::test_star_layout();
    let mut data = common::render_stars(256, 256, &layout, 2.0, 10.0);
    common::add_noise(&mut data, 0.01, 3);

    let pixels: Vec<f32> = data.iter().copied().collect();
    let (location, scale) = stats::location_scale(&pixels, LocationScaleMode::SampledSigmaClip, 0);

    let (stars, hfr) = detect::find_stars(&data, location, scale, &detect_config());

    assert_eq!(stars.len(), layout.len(), "found {} stars", stars.len());
    for &(x, y, _) in &layout {
        let hit = stars
            .iter()
            .any(|s| (s.x - x).abs() < 0.5 && (s.y - y).abs() < 0.5);
        assert!(hit, "no detection near ({x}, {y})");
    }
    assert!(hfr > 0.0);
}

#[test]
fn stars_are_ordered_by_descending_mass() {
    let layout = common::test_star_layout();
    let mut data = common::render_stars(256, 256, &layout, 2.0, 10.0);
    common::add_noise(&mut data, 0.01, 5);

    let pixels: Vec<f32> = data.iter().copied().collect();
    let (location, scale) = stats::location_scale(&pixels, LocationScaleMode::SampledSigmaClip, 0);
    let (stars, _) = detect::find_stars(&data, location, scale, &detect_config());

    for pair in stars.windows(2) {
        assert!(pair[0].mass >= pair[1].mass);
    }
    // The brightest input star should rank first.
    assert!((stars[0].x - 40.0).abs() < 1.0 && (stars[0].y - 60.0).abs() < 1.0);
}

#[test]
fn hfr_tracks_the_star_profile_width() {
    // Half-flux radius of a 2D Gaussian is sigma * sqrt(2 ln 2).
    let narrow = common::render_stars(128, 128, &[(64.0, 64.0, 1.0)], 1.5, 0.0);
    let wide = common::render_stars(128, 128, &[(64.0, 64.0, 1.0)], 3.0, 0.0);

    let config = detect_config();
    let (stars_narrow, hfr_narrow) = detect::find_stars(&narrow, 0.0, 0.01, &config);
    let (stars_wide, hfr_wide) = detect::find_stars(&wide, 0.0, 0.01, &config);

    assert_eq!(stars_narrow.len(), 1);
    assert_eq!(stars_wide.len(), 1);
    let expected_narrow = 1.5 * (2.0f32 * std::f32::consts::LN_2).sqrt();
    assert!(
        (hfr_narrow - expected_narrow).abs() < 0.4,
        "narrow HFR {hfr_narrow}, expected about {expected_narrow}"
    );
    assert!(
        (hfr_wide / hfr_narrow - 2.0).abs() < 0.3,
        "HFR ratio {}",
        hfr_wide / hfr_narrow
    );
}

#[test]
fn faint_stars_below_threshold_are_ignored() {
    let stars = [(64.0f32, 64.0f32, 1.0f32), (32.0, 32.0, 0.005)];
    let mut data = common::render_stars(128, 128, &stars, 2.0, 1.0);
    common::add_noise(&mut data, 0.01, 9);

    let (found, _) = detect::find_stars(&data, 1.0, 0.01, &detect_config());
    assert_eq!(found.len(), 1);
    assert!((found[0].x - 64.0).abs() < 0.5);
}

#[test]
fn empty_frame_yields_no_stars() {
    let mut data = common::render_stars(64, 64, &[], 2.0, 5.0);
    common::add_noise(&mut data, 0.1, 31);

    let pixels: Vec<f32> = data.iter().copied().collect();
    let (location, scale) = stats::location_scale(&pixels, LocationScaleMode::SampledSigmaClip, 0);
    let (stars, hfr) = detect::find_stars(&data, location, scale, &detect_config());
    assert!(stars.is_empty());
    assert_eq!(hfr, 0.0);
}
